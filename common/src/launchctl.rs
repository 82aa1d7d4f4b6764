use crate::descriptor::ServiceDescriptor;
use std::path::Path;

/// Command-string builders for the launchd control surface.
///
/// The panel never shells out to launchctl directly; these strings are
/// always routed through the `PrivilegedExecutor` so elevation and
/// serialization stay in one place.

pub fn load_command(plist_path: &Path) -> String {
    format!("launchctl load -w {}", plist_path.display())
}

pub fn unload_command(plist_path: &Path) -> String {
    format!("launchctl unload -w {}", plist_path.display())
}

pub fn list_command(descriptor: &ServiceDescriptor) -> String {
    format!("launchctl list {}", descriptor.identifier)
}

pub fn start_command(descriptor: &ServiceDescriptor) -> String {
    load_command(&descriptor.install_path())
}

pub fn stop_command(descriptor: &ServiceDescriptor) -> String {
    unload_command(&descriptor.install_path())
}
