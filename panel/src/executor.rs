use crate::authorization::{AuthorizationCredential, Authorizer};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use svcpanel_common::error::{PanelError, PanelResult};
use svcpanel_common::protocol::{CommandEntry, HelperAction, PrivilegedCommand};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info};

/// Stable name of the bundled helper binary. Used both to locate it next
/// to the panel executable and to recognize stray instances left behind by
/// a crashed session.
pub const HELPER_EXECUTABLE_NAME: &str = "svcpanel-helper";

/// Single entry point for the four command execution modes, so the
/// controller dispatches on the command kind rather than on four loosely
/// related methods.
#[async_trait]
pub trait CommandExecutor: Send {
    async fn execute(&mut self, command: PrivilegedCommand) -> PanelResult<String>;

    /// One-shot privileged helper invocation with the `[action, payload...]`
    /// argv contract.
    async fn run_helper_action(
        &mut self,
        action: HelperAction,
        payload: Vec<String>,
    ) -> PanelResult<String>;

    /// Kill the resident helper (if any) and drop authorization. Called on
    /// panel teardown regardless of outstanding operations.
    async fn teardown(&mut self);
}

/// Handle to the resident privileged helper process.
struct HelperHandle {
    child: Child,
    stdin: ChildStdin,
}

/// Executes commands with or without elevation.
///
/// Owns the process-wide authorization credential and the (at most one)
/// resident helper handle; both have explicit teardown.
pub struct PrivilegedExecutor {
    authorizer: Arc<dyn Authorizer>,
    credential: Option<AuthorizationCredential>,
    helper_path: PathBuf,
    helper: Option<HelperHandle>,
}

impl PrivilegedExecutor {
    pub fn new(authorizer: Arc<dyn Authorizer>, helper_path: Option<PathBuf>) -> Self {
        let helper_path = helper_path.unwrap_or_else(Self::default_helper_path);
        Self {
            authorizer,
            credential: None,
            helper_path,
            helper: None,
        }
    }

    /// The helper ships adjacent to the panel executable.
    fn default_helper_path() -> PathBuf {
        let name = Self::helper_executable_name();
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(name)))
            .unwrap_or_else(|| PathBuf::from(name))
    }

    pub fn helper_executable_name() -> &'static str {
        HELPER_EXECUTABLE_NAME
    }

    /// Eagerly acquire the authorization credential (panel "unlock").
    pub fn unlock(&mut self) -> PanelResult<()> {
        self.ensure_credential()?;
        Ok(())
    }

    /// Release the credential. Privileged calls afterwards re-prompt or
    /// fail; they never reuse the revoked token.
    pub fn release_authorization(&mut self) {
        if let Some(credential) = self.credential.take() {
            self.authorizer.release(credential);
            info!("authorization released");
        }
    }

    /// Kill the resident helper if one is running, and reap any stray
    /// helper left over from a previous session. Safe to call when
    /// nothing is running.
    pub async fn kill_helper(&mut self) {
        if let Some(mut handle) = self.helper.take() {
            drop(handle.stdin);
            if let Err(e) = handle.child.kill().await {
                debug!("helper already exited: {}", e);
            }
            let _ = handle.child.wait().await;
            info!("resident helper terminated");
        }

        // A crashed panel can orphan an elevated helper; recognize it by
        // name and reap it. pkill exiting non-zero just means none found.
        let _ = Command::new("pkill")
            .args(["-x", HELPER_EXECUTABLE_NAME])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }

    fn ensure_credential(&mut self) -> PanelResult<()> {
        match &self.credential {
            Some(credential) if self.authorizer.validate(credential) => Ok(()),
            _ => {
                // A revoked credential is gone for good; a fresh acquire is
                // the only path back, and denial is not retried.
                self.credential = Some(self.authorizer.acquire()?);
                Ok(())
            }
        }
    }

    /// Mode 1: run as the current user, wait, capture stdout.
    async fn execute_plain(&self, command: &str) -> PanelResult<String> {
        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .output()
            .await?;

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

    /// Mode 3: spawn and return immediately; the next status poll observes
    /// the outcome.
    fn execute_async(&self, command: &str) -> PanelResult<String> {
        Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PanelError::helper_launch(format!("async spawn failed: {}", e)))?;
        Ok(String::new())
    }

    /// Mode 2 backbone: one-shot helper invocation, blocking this task
    /// until the helper exits.
    async fn invoke_helper_once(
        &mut self,
        action: HelperAction,
        payload: Vec<String>,
    ) -> PanelResult<String> {
        self.ensure_credential()?;

        let output = Command::new(&self.helper_path)
            .arg(action.as_str())
            .args(&payload)
            .output()
            .await
            .map_err(|e| {
                PanelError::helper_launch(format!(
                    "{}: {}",
                    self.helper_path.display(),
                    e
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            // The helper's output is diagnostic text only, never parsed
            // for control decisions.
            let mut diagnostic = stdout;
            diagnostic.push_str(&String::from_utf8_lossy(&output.stderr));
            Err(PanelError::non_zero_exit(
                output.status.code().unwrap_or(-1),
                diagnostic,
            ))
        }
    }

    /// Mode 4: lazily spawn the resident helper and feed it one entry.
    async fn enqueue_as_user(&mut self, command: &str, user: &str) -> PanelResult<()> {
        self.ensure_credential()?;

        if self.helper.is_none() {
            let mut child = Command::new(&self.helper_path)
                .arg(HelperAction::RunAs.as_str())
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .spawn()
                .map_err(|e| {
                    PanelError::helper_launch(format!(
                        "{}: {}",
                        self.helper_path.display(),
                        e
                    ))
                })?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| PanelError::helper_launch("helper stdin unavailable"))?;

            info!("resident privileged helper spawned");
            self.helper = Some(HelperHandle { child, stdin });
        }

        let entry = CommandEntry::new(command, Some(user.to_string()));
        let mut line = entry.to_line()?;
        line.push('\n');

        let mut handle = self.helper.take().expect("helper was just spawned");
        if let Err(e) = handle.stdin.write_all(line.as_bytes()).await {
            // A dead helper is fatal to this action only; the next call
            // respawns.
            return Err(PanelError::helper_launch(format!(
                "helper queue write failed: {}",
                e
            )));
        }
        handle.stdin.flush().await?;
        self.helper = Some(handle);

        debug!(user, "entry queued to resident helper");
        Ok(())
    }
}

#[async_trait]
impl CommandExecutor for PrivilegedExecutor {
    async fn execute(&mut self, command: PrivilegedCommand) -> PanelResult<String> {
        match command {
            PrivilegedCommand::Plain { command } => self.execute_plain(&command).await,
            PrivilegedCommand::Sudo { command } => {
                let entry = CommandEntry::new(command, None);
                let payload = CommandEntry::queue_to_args(std::slice::from_ref(&entry))?;
                self.invoke_helper_once(HelperAction::RunAs, payload).await
            }
            PrivilegedCommand::Async { command } => self.execute_async(&command),
            PrivilegedCommand::AsyncSudoAsUser { command, user } => {
                self.enqueue_as_user(&command, &user).await?;
                Ok(String::new())
            }
        }
    }

    async fn run_helper_action(
        &mut self,
        action: HelperAction,
        payload: Vec<String>,
    ) -> PanelResult<String> {
        self.invoke_helper_once(action, payload).await
    }

    async fn teardown(&mut self) {
        self.kill_helper().await;
        self.release_authorization();
    }
}
