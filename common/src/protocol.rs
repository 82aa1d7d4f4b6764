use crate::error::{PanelError, PanelResult};
use serde::{Deserialize, Serialize};

/// Protocol version for compatibility checking between panel and helper
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on any single marshaled field. Entries beyond this are
/// rejected before anything executes.
pub const MAX_ENTRY_LEN: usize = 4096;

/// Placeholder argv token for "run as the helper's own (root) identity".
const DEFAULT_USER_MARKER: &str = "-";

/// The four ways the panel executes a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivilegedCommand {
    /// Run as the current user, wait, capture stdout.
    Plain { command: String },

    /// Run through the privileged helper, wait for completion.
    Sudo { command: String },

    /// Spawn as the current user without waiting; completion is observed
    /// by the next status poll.
    Async { command: String },

    /// Queue onto the persistent privileged helper, demoted to `user`.
    AsyncSudoAsUser { command: String, user: String },
}

/// Actions understood by the privileged helper's argv contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperAction {
    InstallService,
    RemoveService,
    Uninstall,
    RunAs,
}

impl HelperAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstallService => "installService",
            Self::RemoveService => "removeService",
            Self::Uninstall => "uninstall",
            Self::RunAs => "runas",
        }
    }

    pub fn parse(s: &str) -> PanelResult<Self> {
        match s {
            "installService" => Ok(Self::InstallService),
            "removeService" => Ok(Self::RemoveService),
            "uninstall" => Ok(Self::Uninstall),
            "runas" => Ok(Self::RunAs),
            other => Err(PanelError::protocol(format!(
                "unknown helper action: {:?}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for HelperAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One queued command for the privileged helper.
///
/// `run_as = None` means the helper keeps its own elevated identity for
/// this entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub command: String,
    pub run_as: Option<String>,
}

impl CommandEntry {
    pub fn new(command: impl Into<String>, run_as: Option<String>) -> Self {
        Self {
            command: command.into(),
            run_as,
        }
    }

    /// Reject anything that could smuggle bytes past the helper's shell:
    /// NULs, embedded line breaks, empty commands, oversized fields.
    pub fn validate(&self) -> PanelResult<()> {
        if self.command.trim().is_empty() {
            return Err(PanelError::protocol("empty command entry"));
        }

        for field in std::iter::once(self.command.as_str()).chain(self.run_as.as_deref()) {
            if field.len() > MAX_ENTRY_LEN {
                return Err(PanelError::protocol(format!(
                    "entry field exceeds {} bytes",
                    MAX_ENTRY_LEN
                )));
            }
            if field.contains('\0') || field.contains('\n') {
                return Err(PanelError::protocol("entry field contains forbidden byte"));
            }
        }

        if let Some(user) = &self.run_as {
            if user.trim().is_empty() {
                return Err(PanelError::protocol("empty run-as user"));
            }
        }

        Ok(())
    }

    /// Serialize a queue of entries to the flat argv payload passed to the
    /// helper: `[user-or-"-", command]` pairs, in submission order.
    pub fn queue_to_args(entries: &[CommandEntry]) -> PanelResult<Vec<String>> {
        let mut args = Vec::with_capacity(entries.len() * 2);
        for entry in entries {
            entry.validate()?;
            args.push(
                entry
                    .run_as
                    .clone()
                    .unwrap_or_else(|| DEFAULT_USER_MARKER.to_string()),
            );
            args.push(entry.command.clone());
        }
        Ok(args)
    }

    /// Parse a flat argv payload back into an ordered queue; any malformed
    /// entry rejects the whole queue so nothing partially executes.
    pub fn queue_from_args(args: &[String]) -> PanelResult<Vec<CommandEntry>> {
        if args.len() % 2 != 0 {
            return Err(PanelError::protocol(
                "dangling run-as marker without a command",
            ));
        }

        let mut entries = Vec::with_capacity(args.len() / 2);
        for pair in args.chunks_exact(2) {
            let run_as = if pair[0] == DEFAULT_USER_MARKER {
                None
            } else {
                Some(pair[0].clone())
            };
            let entry = CommandEntry::new(pair[1].clone(), run_as);
            entry.validate()?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Serialize one entry for the resident helper's line-oriented request
    /// channel.
    pub fn to_line(&self) -> PanelResult<String> {
        self.validate()?;
        serde_json::to_string(self).map_err(|e| PanelError::protocol(e.to_string()))
    }

    /// Parse one line from the request channel.
    pub fn from_line(line: &str) -> PanelResult<Self> {
        if line.len() > MAX_ENTRY_LEN * 2 {
            return Err(PanelError::protocol("request line exceeds bound"));
        }
        let entry: CommandEntry = serde_json::from_str(line)
            .map_err(|e| PanelError::protocol(format!("malformed request line: {}", e)))?;
        entry.validate()?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_round_trips_in_order() {
        let entries = vec![
            CommandEntry::new("launchctl unload /tmp/a.plist", None),
            CommandEntry::new("launchctl load /tmp/b.plist", Some("svc".to_string())),
        ];

        let args = CommandEntry::queue_to_args(&entries).unwrap();
        assert_eq!(args.len(), 4);
        assert_eq!(args[0], "-");
        assert_eq!(args[2], "svc");

        let parsed = CommandEntry::queue_from_args(&args).unwrap();
        assert_eq!(parsed, entries);
    }

    #[test]
    fn test_dangling_marker_rejected() {
        let args = vec!["-".to_string()];
        let err = CommandEntry::queue_from_args(&args).unwrap_err();
        assert!(matches!(err, PanelError::Protocol { .. }));
    }

    #[test]
    fn test_forbidden_bytes_rejected() {
        let entry = CommandEntry::new("echo hi\0rm -rf /", None);
        assert!(entry.validate().is_err());

        let entry = CommandEntry::new("echo hi\nrm -rf /", None);
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let entry = CommandEntry::new("x".repeat(MAX_ENTRY_LEN + 1), None);
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_empty_command_rejects_whole_queue() {
        let args = vec![
            "-".to_string(),
            "echo ok".to_string(),
            "-".to_string(),
            "   ".to_string(),
        ];
        assert!(CommandEntry::queue_from_args(&args).is_err());
    }

    #[test]
    fn test_request_line_round_trip() {
        let entry = CommandEntry::new("/usr/local/bin/svc-wrapper start", Some("svc".into()));
        let line = entry.to_line().unwrap();
        assert_eq!(CommandEntry::from_line(&line).unwrap(), entry);
    }

    #[test]
    fn test_helper_action_strings() {
        for action in [
            HelperAction::InstallService,
            HelperAction::RemoveService,
            HelperAction::Uninstall,
            HelperAction::RunAs,
        ] {
            assert_eq!(HelperAction::parse(action.as_str()).unwrap(), action);
        }
        assert!(HelperAction::parse("reboot").is_err());
    }
}
