use async_trait::async_trait;
use svcpanel_common::error::{PanelError, PanelResult};
use svcpanel_common::protocol::CommandEntry;
use tokio::process::Command;
use tracing::debug;

/// Executes one validated command entry to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, entry: &CommandEntry) -> PanelResult<String>;
}

/// Real runner: hands the command string to `/bin/sh`, demoted to the
/// entry's run-as user for exactly that child. The helper's own identity
/// is untouched, so the next entry starts elevated again.
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, entry: &CommandEntry) -> PanelResult<String> {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(&entry.command);

        if let Some(user) = &entry.run_as {
            let account = crate::privilege::lookup_user(user)?;
            command.uid(account.uid.as_raw());
            command.gid(account.gid.as_raw());
        }

        debug!(run_as = entry.run_as.as_deref().unwrap_or("root"), "running entry");

        let output = command
            .output()
            .await
            .map_err(|e| PanelError::helper_launch(format!("spawn failed: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let mut diagnostic = stdout;
            diagnostic.push_str(&String::from_utf8_lossy(&output.stderr));
            Err(PanelError::non_zero_exit(
                output.status.code().unwrap_or(-1),
                diagnostic,
            ))
        }
    }
}
