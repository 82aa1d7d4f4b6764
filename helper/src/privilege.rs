use nix::unistd::{Uid, User};
use svcpanel_common::error::{PanelError, PanelResult};

/// Resolve a run-as account name to its system record.
pub fn lookup_user(name: &str) -> PanelResult<User> {
    User::from_name(name)
        .map_err(|e| PanelError::helper_launch(format!("user lookup failed: {}", e)))?
        .ok_or_else(|| PanelError::helper_launch(format!("no such user: {}", name)))
}

/// The helper refuses to do anything unless it actually holds root;
/// a mislaunched (unprivileged) helper would otherwise fail half-way
/// through a queue with confusing permission errors.
pub fn ensure_root() -> PanelResult<()> {
    if Uid::effective().is_root() {
        Ok(())
    } else {
        Err(PanelError::helper_launch(
            "helper is not running with elevated privileges",
        ))
    }
}
