//! Noise filtering for MTP CLI output.
//!
//! On some platforms the CLI prints device-probe failures on every run, even when the command
//! worked. Those lines must never reach the user as errors.

use serde::Serialize;

/// Lowercased substrings that mark a line as probe noise.
const NOISE_MARKERS: [&str; 2] = ["device::find failed", "iocreateplugininterfaceforservice"];

/// Banner printed after storage selection. Only benign in the first lines of a batch.
const STORAGE_BANNER: &str = "selected storage";
const STORAGE_BANNER_MAX_INDEX: usize = 2;

/// Classification of one output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Benign,
    Signal,
}

/// Unfiltered capture of one CLI run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResult {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub error: Option<String>,
}

/// CLI result with noise removed. `stderr` and `error` are `None` exactly when no real lines remain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanedResult {
    pub data: Option<String>,
    pub stderr: Option<String>,
    pub error: Option<String>,
}

impl CleanedResult {
    /// True when either stream still carries real error lines.
    pub fn has_signal(&self) -> bool {
        self.stderr.is_some() || self.error.is_some()
    }
}

/// Classifies a single line as noise or real signal.
pub fn classify(line: &str) -> LineClass {
    if line.is_empty() || line == "\n" || line == "\r\n" {
        return LineClass::Benign;
    }
    let lower = line.to_lowercase();
    if NOISE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return LineClass::Benign;
    }
    LineClass::Signal
}

/// Classifies a line from a streaming batch, where `index` is its zero-based position in the stream.
///
/// Adds one positional rule on top of [`classify`]: the storage selection banner is expected
/// in the first two lines only. Anywhere later it is reported.
pub fn classify_batch_line(line: &str, index: usize) -> LineClass {
    if index < STORAGE_BANNER_MAX_INDEX && line.to_lowercase().contains(STORAGE_BANNER) {
        return LineClass::Benign;
    }
    classify(line)
}

/// Splits on `\n`, dropping the `\r` of CRLF endings.
pub fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line))
}

fn filter_signal(text: Option<&str>) -> Option<String> {
    let text = text?;
    let kept: Vec<&str> = split_lines(text)
        .filter(|line| classify(line) == LineClass::Signal)
        .collect();
    if kept.is_empty() { None } else { Some(kept.join("\n")) }
}

/// Removes noise lines from `error` and `stderr`. `stdout` passes through untouched.
pub fn clean_junk(raw: RawResult) -> CleanedResult {
    CleanedResult {
        error: filter_signal(raw.error.as_deref()),
        stderr: filter_signal(raw.stderr.as_deref()),
        data: raw.stdout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_benign_fixtures() {
        for line in ["", "\n", "\r\n"] {
            assert_eq!(classify(line), LineClass::Benign, "line: {:?}", line);
        }
        assert_eq!(classify("Device::find failed"), LineClass::Benign);
        assert_eq!(classify("error: DEVICE::FIND FAILED (-1)"), LineClass::Benign);
        assert_eq!(
            classify("IOCreatePlugInInterfaceForService failed: 0xe00002be"),
            LineClass::Benign
        );
    }

    #[test]
    fn test_classify_signal() {
        assert_eq!(classify("no such file or directory"), LineClass::Signal);
        assert_eq!(classify(" "), LineClass::Signal);
        assert_eq!(classify("selected storage 65537"), LineClass::Signal);
    }

    #[test]
    fn test_storage_banner_only_benign_at_the_start() {
        assert_eq!(classify_batch_line("selected storage 65537", 0), LineClass::Benign);
        assert_eq!(classify_batch_line("Selected Storage 65537", 1), LineClass::Benign);
        assert_eq!(classify_batch_line("selected storage 65537", 2), LineClass::Signal);
        // General noise rules still apply at any position
        assert_eq!(classify_batch_line("device::find failed", 9), LineClass::Benign);
        assert_eq!(classify_batch_line("could not open", 0), LineClass::Signal);
    }

    #[test]
    fn test_clean_junk_keeps_only_real_lines() {
        let cleaned = clean_junk(RawResult {
            stdout: Some("out".to_string()),
            stderr: Some("Device::find failed\nrename failed: object not found".to_string()),
            error: None,
        });
        assert_eq!(cleaned.stderr.as_deref(), Some("rename failed: object not found"));
        assert_eq!(cleaned.error, None);
        assert_eq!(cleaned.data.as_deref(), Some("out"));
        assert!(cleaned.has_signal());
    }

    #[test]
    fn test_clean_junk_all_noise_is_none() {
        let cleaned = clean_junk(RawResult {
            stdout: None,
            stderr: Some("Device::find failed\r\n\r\n".to_string()),
            error: Some("\n".to_string()),
        });
        assert_eq!(cleaned.stderr, None);
        assert_eq!(cleaned.error, None);
        assert!(!cleaned.has_signal());
    }

    #[test]
    fn test_clean_junk_filters_streams_independently() {
        let cleaned = clean_junk(RawResult {
            stdout: Some("Device::find failed".to_string()),
            stderr: Some("iocreateplugininterfaceforservice".to_string()),
            error: Some("Command failed: mtp-cli\nfirst\nsecond".to_string()),
        });
        // stdout is data and never filtered
        assert_eq!(cleaned.data.as_deref(), Some("Device::find failed"));
        assert_eq!(cleaned.stderr, None);
        assert_eq!(cleaned.error.as_deref(), Some("Command failed: mtp-cli\nfirst\nsecond"));
    }

    #[test]
    fn test_split_lines_handles_crlf() {
        let lines: Vec<&str> = split_lines("a\r\nb\nc").collect();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }
}
