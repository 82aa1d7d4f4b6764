use crate::error::{PanelError, PanelResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root directory where controllable service definitions are installed
pub const INSTALL_ROOT: &str = "/Library/LaunchDaemons";

/// One way to launch the service beyond direct launchctl control,
/// optionally pinned to a specific run-as user.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StarterCommand {
    #[serde(rename = "Command")]
    pub command: String,

    #[serde(rename = "AsUser")]
    pub run_as: Option<String>,
}

/// Read-only value model of one controllable service.
///
/// Constructed once from the definition plist at panel load and never
/// mutated afterwards, so it is safe to share across threads.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub source_url: PathBuf,
    pub identifier: String,
    pub display_name: String,
    pub service_description: String,
    pub version: String,
    pub program: PathBuf,
    pub starters: Vec<StarterCommand>,
    pub runs_as_root: bool,
    pub runs_at_boot: bool,
}

/// On-disk shape of the service definition plist. The format is owned by
/// whatever produced the bundle; we only require these fields.
#[derive(Debug, Deserialize)]
struct RawDescriptor {
    #[serde(rename = "Identifier")]
    identifier: String,

    #[serde(rename = "Name")]
    name: String,

    #[serde(rename = "Description", default)]
    description: String,

    #[serde(rename = "Version", default)]
    version: String,

    #[serde(rename = "Program")]
    program: PathBuf,

    #[serde(rename = "Starter", default)]
    starters: Vec<StarterCommand>,

    #[serde(rename = "AsRoot", default)]
    as_root: bool,

    #[serde(rename = "RunAtBoot", default)]
    run_at_boot: bool,
}

impl ServiceDescriptor {
    /// Load a descriptor from its definition plist.
    pub fn load(path: impl AsRef<Path>) -> PanelResult<Self> {
        let path = path.as_ref();

        let raw: RawDescriptor = plist::from_file(path).map_err(|e| {
            PanelError::malformed_descriptor(format!("{}: {}", path.display(), e))
        })?;

        if raw.identifier.trim().is_empty() {
            return Err(PanelError::malformed_descriptor(
                "descriptor has an empty identifier",
            ));
        }

        if raw.name.trim().is_empty() {
            return Err(PanelError::malformed_descriptor(
                "descriptor has an empty display name",
            ));
        }

        if !raw.program.is_absolute() {
            return Err(PanelError::malformed_descriptor(format!(
                "program path is not absolute: {}",
                raw.program.display()
            )));
        }

        Ok(Self {
            source_url: path.to_path_buf(),
            identifier: raw.identifier,
            display_name: raw.name,
            service_description: raw.description,
            version: raw.version,
            program: raw.program,
            starters: raw.starters,
            runs_as_root: raw.as_root,
            runs_at_boot: raw.run_at_boot,
        })
    }

    /// Where the launchd definition for this service lives once installed.
    ///
    /// Pure derivation from the identifier; performs no I/O.
    pub fn install_path(&self) -> PathBuf {
        PathBuf::from(INSTALL_ROOT).join(format!("{}.plist", self.identifier))
    }

    /// The user a given starter must run as, defaulting to the invoking user.
    pub fn run_as_user(&self, starter_index: usize) -> String {
        if let Some(user) = self
            .starters
            .get(starter_index)
            .and_then(|s| s.run_as.clone())
        {
            return user;
        }

        invoking_user()
    }

    /// Whether any starter pins a run-as user, which forces queued
    /// privileged execution instead of a one-shot helper call.
    pub fn has_per_user_starters(&self) -> bool {
        self.starters.iter().any(|s| s.run_as.is_some())
    }
}

/// Name of the user that owns this (unprivileged) process.
pub fn invoking_user() -> String {
    nix::unistd::User::from_uid(nix::unistd::Uid::effective())
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| "root".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DESCRIPTOR_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Identifier</key>
    <string>com.example.svc</string>
    <key>Name</key>
    <string>Example Service</string>
    <key>Description</key>
    <string>A service used in tests</string>
    <key>Version</key>
    <string>2.1</string>
    <key>Program</key>
    <string>/usr/local/bin/svc</string>
    <key>Starter</key>
    <array>
        <dict>
            <key>Command</key>
            <string>/usr/local/bin/svc-wrapper start</string>
            <key>AsUser</key>
            <string>svc-daemon</string>
        </dict>
    </array>
    <key>AsRoot</key>
    <true/>
    <key>RunAtBoot</key>
    <false/>
</dict>
</plist>"#;

    fn write_plist(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_descriptor() {
        let file = write_plist(DESCRIPTOR_PLIST);
        let descriptor = ServiceDescriptor::load(file.path()).unwrap();

        assert_eq!(descriptor.identifier, "com.example.svc");
        assert_eq!(descriptor.display_name, "Example Service");
        assert_eq!(descriptor.version, "2.1");
        assert_eq!(descriptor.program, PathBuf::from("/usr/local/bin/svc"));
        assert!(descriptor.runs_as_root);
        assert!(!descriptor.runs_at_boot);
        assert_eq!(descriptor.starters.len(), 1);
        assert_eq!(descriptor.starters[0].run_as.as_deref(), Some("svc-daemon"));
        assert!(descriptor.has_per_user_starters());
    }

    #[test]
    fn test_install_path_derivation() {
        let file = write_plist(DESCRIPTOR_PLIST);
        let descriptor = ServiceDescriptor::load(file.path()).unwrap();

        assert_eq!(
            descriptor.install_path(),
            PathBuf::from("/Library/LaunchDaemons/com.example.svc.plist")
        );
    }

    #[test]
    fn test_run_as_user_override_and_default() {
        let file = write_plist(DESCRIPTOR_PLIST);
        let descriptor = ServiceDescriptor::load(file.path()).unwrap();

        assert_eq!(descriptor.run_as_user(0), "svc-daemon");
        // Out-of-range starter falls back to the invoking user.
        assert_eq!(descriptor.run_as_user(7), invoking_user());
    }

    #[test]
    fn test_malformed_descriptor_fails_load() {
        let file = write_plist("not a plist at all");
        let err = ServiceDescriptor::load(file.path()).unwrap_err();

        assert!(matches!(err, PanelError::MalformedDescriptor { .. }));
    }

    #[test]
    fn test_missing_file_fails_load() {
        let err = ServiceDescriptor::load("/nonexistent/service.plist").unwrap_err();
        assert!(matches!(err, PanelError::MalformedDescriptor { .. }));
    }
}
