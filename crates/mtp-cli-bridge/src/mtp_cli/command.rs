//! MTP CLI command construction.
//!
//! Two invocation shapes:
//!
//! - bounded: `<bin> "storage 65537" "properties \"/DCIM\"" [flags]`, one shell line run to completion
//! - streaming: `<bin> -e "storage 65537" -e "get \"/a\" \"/b\"" ...`, one `-e` per chained operation
//!
//! Paths go through [`escape_shell_mtp`] before being placed between the inner `\"` quotes.
//! Any `$` or backtick still open to `sh` after that gets one more backslash, so the CLI sees
//! the literal character instead of an expansion.

use super::escape::escape_shell_mtp;

/// One protocol operation understood by the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubCommand {
    /// Selects the storage all following operations act on.
    Storage(String),
    Properties(String),
    /// Renames `path` in place. `new_name` is a bare file name, not a path.
    Rename {
        path: String,
        new_name: String,
    },
    Rm(String),
    Mkpath(String),
    /// Device to local.
    Get {
        source: String,
        destination: String,
    },
    /// Local to device.
    Put {
        source: String,
        destination: String,
    },
    Pwd,
}

/// Escapes `raw` for the CLI, then shields what `sh` would still expand inside double quotes.
///
/// A `$` or backtick preceded by an even number of backslashes is live for `sh`, so it gets
/// one more. After an odd number it is already literal and left alone.
fn shell_literal(raw: &str) -> String {
    let escaped = escape_shell_mtp(raw);
    let mut out = String::with_capacity(escaped.len());
    let mut backslashes = 0usize;
    for c in escaped.chars() {
        if matches!(c, '$' | '`') && backslashes % 2 == 0 {
            out.push('\\');
        }
        backslashes = if c == '\\' { backslashes + 1 } else { 0 };
        out.push(c);
    }
    out
}

fn quoted(path: &str) -> String {
    format!(r#"\"{}\""#, shell_literal(path))
}

impl SubCommand {
    /// Renders the sub-command the way it appears between the outer double quotes.
    pub fn render(&self) -> String {
        match self {
            Self::Storage(id) => format!("storage {}", shell_literal(id)),
            Self::Properties(path) => format!("properties {}", quoted(path)),
            Self::Rename { path, new_name } => format!("rename {} {}", quoted(path), quoted(new_name)),
            Self::Rm(path) => format!("rm {}", quoted(path)),
            Self::Mkpath(path) => format!("mkpath {}", quoted(path)),
            Self::Get { source, destination } => format!("get {} {}", quoted(source), quoted(destination)),
            Self::Put { source, destination } => format!("put {} {}", quoted(source), quoted(destination)),
            Self::Pwd => "pwd".to_string(),
        }
    }

    /// The device-side path this operation touches, for logging and error reports.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Storage(_) | Self::Pwd => None,
            Self::Properties(path) | Self::Rm(path) | Self::Mkpath(path) | Self::Rename { path, .. } => {
                Some(path.as_str())
            }
            Self::Get { source, .. } => Some(source.as_str()),
            Self::Put { destination, .. } => Some(destination.as_str()),
        }
    }
}

/// Quotes the program path for `sh`. The CLI's own escaping rules don't apply to it.
fn quote_program(bin: &str) -> String {
    format!("'{}'", bin.replace('\'', r"'\''"))
}

/// A single-shot CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedCommand {
    bin: String,
    sub_commands: Vec<SubCommand>,
    flags: Vec<String>,
}

impl BoundedCommand {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            sub_commands: Vec::new(),
            flags: Vec::new(),
        }
    }

    pub fn storage(self, storage_id: &str) -> Self {
        self.sub(SubCommand::Storage(storage_id.to_string()))
    }

    pub fn sub(mut self, sub_command: SubCommand) -> Self {
        self.sub_commands.push(sub_command);
        self
    }

    pub fn flag(mut self, flag: &str) -> Self {
        self.flags.push(flag.to_string());
        self
    }

    pub fn sub_commands(&self) -> &[SubCommand] {
        &self.sub_commands
    }

    /// The full line handed to `sh -c`.
    pub fn to_shell_line(&self) -> String {
        let mut line = quote_program(&self.bin);
        for sub_command in &self.sub_commands {
            line.push_str(&format!(" \"{}\"", sub_command.render()));
        }
        for flag in &self.flags {
            line.push(' ');
            line.push_str(flag);
        }
        line
    }
}

/// A chained CLI invocation whose output is consumed while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingCommand {
    bin: String,
    sub_commands: Vec<SubCommand>,
}

impl StreamingCommand {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            sub_commands: Vec::new(),
        }
    }

    pub fn storage(self, storage_id: &str) -> Self {
        self.sub(SubCommand::Storage(storage_id.to_string()))
    }

    pub fn sub(mut self, sub_command: SubCommand) -> Self {
        self.sub_commands.push(sub_command);
        self
    }

    pub fn sub_commands(&self) -> &[SubCommand] {
        &self.sub_commands
    }

    /// Argument list: one `-e` flag followed by its quoted sub-command per chained operation.
    ///
    /// Each element is already quoted for the shell, since the process is started through
    /// `sh` and the CLI expects its sub-commands to survive that pass intact.
    pub fn args(&self) -> Vec<String> {
        self.sub_commands
            .iter()
            .flat_map(|sub_command| ["-e".to_string(), format!("\"{}\"", sub_command.render())])
            .collect()
    }

    pub fn to_shell_line(&self) -> String {
        let mut parts = vec![quote_program(&self.bin)];
        parts.extend(self.args());
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_sub_commands() {
        assert_eq!(SubCommand::Storage("65537".to_string()).render(), "storage 65537");
        assert_eq!(
            SubCommand::Properties("/DCIM/Camera".to_string()).render(),
            r#"properties \"/DCIM/Camera\""#
        );
        assert_eq!(
            SubCommand::Rename {
                path: "/a b.txt".to_string(),
                new_name: "c.txt".to_string()
            }
            .render(),
            r#"rename \"/a b.txt\" \"c.txt\""#
        );
        assert_eq!(SubCommand::Rm("/x".to_string()).render(), r#"rm \"/x\""#);
        assert_eq!(SubCommand::Mkpath("/x/y".to_string()).render(), r#"mkpath \"/x/y\""#);
        assert_eq!(
            SubCommand::Get {
                source: "/DCIM/a.jpg".to_string(),
                destination: "/tmp/a.jpg".to_string()
            }
            .render(),
            r#"get \"/DCIM/a.jpg\" \"/tmp/a.jpg\""#
        );
        assert_eq!(SubCommand::Pwd.render(), "pwd");
    }

    #[test]
    fn test_render_escapes_paths() {
        let rendered = SubCommand::Rm("/say \"hi\".txt".to_string()).render();
        assert_eq!(rendered, r#"rm \"/say \\\"hi\\\".txt\""#);
    }

    #[test]
    fn test_render_shields_shell_expansions() {
        assert_eq!(
            SubCommand::Rm("/Music/$HOME.mp3".to_string()).render(),
            r#"rm \"/Music/\$HOME.mp3\""#
        );
        assert_eq!(
            SubCommand::Rm("/DCIM/$(id)x.jpg".to_string()).render(),
            r#"rm \"/DCIM/\$(id)x.jpg\""#
        );
        assert_eq!(SubCommand::Storage("$X".to_string()).render(), r#"storage \$X"#);
        // Already literal after the CLI escaping
        assert_eq!(SubCommand::Rm("a`b".to_string()).render(), r#"rm \"a\\\`b\""#);
        // The both-quotes branch multiplies backslashes by four, which leaves a backtick live
        let raw = "\\\"x\"\\`";
        let escaped = escape_shell_mtp(raw);
        assert!(escaped.ends_with(&format!("{}`", "\\".repeat(8))), "escaped: {}", escaped);
        assert_eq!(
            SubCommand::Rm(raw.to_string()).render(),
            format!(r#"rm \"{}\`\""#, &escaped[..escaped.len() - 1])
        );
    }

    #[test]
    fn test_bounded_shell_line() {
        let command = BoundedCommand::new("/opt/mtp-cli")
            .storage("65537")
            .sub(SubCommand::Properties("/Music".to_string()));
        assert_eq!(
            command.to_shell_line(),
            r#"'/opt/mtp-cli' "storage 65537" "properties \"/Music\"""#
        );

        let probe = BoundedCommand::new("/opt/mtp-cli").sub(SubCommand::Pwd).flag("-v");
        assert_eq!(probe.to_shell_line(), r#"'/opt/mtp-cli' "pwd" -v"#);
    }

    #[test]
    fn test_program_path_with_spaces_and_quotes() {
        let command = BoundedCommand::new("/Applications/Open MTP.app/bin/it's").sub(SubCommand::Pwd);
        assert_eq!(
            command.to_shell_line(),
            r#"'/Applications/Open MTP.app/bin/it'\''s' "pwd""#
        );
    }

    #[test]
    fn test_streaming_args_chain() {
        let command = StreamingCommand::new("/opt/mtp-cli")
            .storage("65537")
            .sub(SubCommand::Put {
                source: "/home/me/a.txt".to_string(),
                destination: "/Download/a.txt".to_string(),
            })
            .sub(SubCommand::Put {
                source: "/home/me/b.txt".to_string(),
                destination: "/Download/b.txt".to_string(),
            });

        assert_eq!(
            command.args(),
            vec![
                "-e",
                "\"storage 65537\"",
                "-e",
                r#""put \"/home/me/a.txt\" \"/Download/a.txt\"""#,
                "-e",
                r#""put \"/home/me/b.txt\" \"/Download/b.txt\"""#,
            ]
        );
        assert!(command.to_shell_line().starts_with(r#"'/opt/mtp-cli' -e "storage 65537" -e "put"#));
    }

    #[test]
    fn test_target() {
        assert_eq!(SubCommand::Pwd.target(), None);
        assert_eq!(
            SubCommand::Put {
                source: "/local".to_string(),
                destination: "/device".to_string()
            }
            .target(),
            Some("/device")
        );
    }
}
