//! Bridge configuration loaded from a JSON file.
//!
//! Keys may be camelCase (as written by the frontend store) or snake_case.

use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Which CLI protocol the transfer orchestrator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum MtpMode {
    /// One bounded command per item, progress by polling.
    Legacy,
    /// One chained process for the whole batch, progress parsed from its output.
    #[default]
    Streaming,
}

/// Whether sources are walked before a transfer to compute totals, per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub struct PreprocessSettings {
    #[serde(alias = "localToMtp", default)]
    pub local_to_mtp: bool,
    #[serde(alias = "mtpToLocal", default)]
    pub mtp_to_local: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BridgeConfig {
    /// Path to the MTP CLI executable
    #[serde(alias = "cliPath", default = "default_cli_path")]
    pub cli_path: String,
    #[serde(default)]
    pub mode: MtpMode,
    #[serde(alias = "legacyPollIntervalMs", default = "default_poll_interval")]
    pub legacy_poll_interval_ms: u64,
    #[serde(alias = "filesPreprocessingBeforeTransfer", default)]
    pub preprocess: PreprocessSettings,
}

fn default_cli_path() -> String {
    "mtp-cli".to_string()
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            cli_path: default_cli_path(),
            mode: MtpMode::default(),
            legacy_poll_interval_ms: default_poll_interval(),
            preprocess: PreprocessSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Config for the given CLI binary, everything else default.
    pub fn with_cli_path(cli_path: impl Into<String>) -> Self {
        Self {
            cli_path: cli_path.into(),
            ..Self::default()
        }
    }
}

pub fn parse_config(contents: &str) -> Result<BridgeConfig, serde_json::Error> {
    serde_json::from_str(contents)
}

/// Loads the config file at `path`.
/// Returns defaults if the file doesn't exist or can't be parsed.
pub fn load_config(path: &Path) -> BridgeConfig {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!("MTP config: couldn't read {}: {}, using defaults", path.display(), e);
            return BridgeConfig::default();
        }
    };

    match parse_config(&contents) {
        Ok(config) => config,
        Err(e) => {
            warn!("MTP config: couldn't parse {}: {}, using defaults", path.display(), e);
            BridgeConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.mode, MtpMode::Streaming);
        assert_eq!(config.legacy_poll_interval_ms, 1000);
        assert!(!config.preprocess.local_to_mtp);
    }

    #[test]
    fn test_camel_case_keys() {
        let config = parse_config(
            r#"{
                "cliPath": "/opt/mtp-cli",
                "mode": "legacy",
                "legacyPollIntervalMs": 250,
                "filesPreprocessingBeforeTransfer": { "localToMtp": true, "mtpToLocal": false }
            }"#,
        )
        .unwrap();
        assert_eq!(config.cli_path, "/opt/mtp-cli");
        assert_eq!(config.mode, MtpMode::Legacy);
        assert_eq!(config.legacy_poll_interval_ms, 250);
        assert!(config.preprocess.local_to_mtp);
        assert!(!config.preprocess.mtp_to_local);
    }

    #[test]
    fn test_snake_case_keys() {
        let config = parse_config(r#"{ "cli_path": "/bin/x", "preprocess": { "mtp_to_local": true } }"#).unwrap();
        assert_eq!(config.cli_path, "/bin/x");
        assert!(config.preprocess.mtp_to_local);
    }

    #[test]
    fn test_invalid_mode_is_an_error() {
        assert!(parse_config(r#"{ "mode": "turbo" }"#).is_err());
    }

    #[test]
    fn test_load_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_config(&dir.path().join("missing.json")), BridgeConfig::default());

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        assert_eq!(load_config(&broken), BridgeConfig::default());
    }

    #[test]
    fn test_load_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "cliPath": "/usr/local/bin/mtp-cli", "mode": "legacy" }}"#).unwrap();
        let config = load_config(file.path());
        assert_eq!(config.cli_path, "/usr/local/bin/mtp-cli");
        assert_eq!(config.mode, MtpMode::Legacy);
    }
}
