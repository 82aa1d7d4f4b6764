use crate::executor::CommandExecutor;
use std::path::PathBuf;
use std::sync::Arc;
use svcpanel_common::config::PollingConfig;
use svcpanel_common::descriptor::ServiceDescriptor;
use svcpanel_common::error::{PanelError, PanelResult};
use svcpanel_common::launchctl;
use svcpanel_common::process::{find_processes, ProcessTable};
use svcpanel_common::protocol::{HelperAction, PrivilegedCommand};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Displayed status of the controlled service.
///
/// Recomputed every poll tick from observed process state plus any pending
/// transition intent; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Before the first poll completes.
    Unknown,
    Stopped,
    Running,
    Starting,
    Stopping,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Unknown => write!(f, "unknown"),
            ServiceStatus::Stopped => write!(f, "stopped"),
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Starting => write!(f, "starting"),
            ServiceStatus::Stopping => write!(f, "stopping"),
        }
    }
}

/// Drives one service: reconciles observed OS process state with the
/// displayed status and serializes user actions against the poll tick.
///
/// At most one background command unit is in flight per controller; user
/// actions while one is pending are ignored with a visible warning, never
/// queued silently.
pub struct ServiceController<T: ProcessTable> {
    descriptor: ServiceDescriptor,
    executor: Arc<Mutex<dyn CommandExecutor>>,
    table: T,
    polling: PollingConfig,
    status: ServiceStatus,
    grace_left: u32,
    in_flight: Option<JoinHandle<PanelResult<String>>>,
    last_error: Option<PanelError>,
}

impl<T: ProcessTable> ServiceController<T> {
    pub fn new(
        descriptor: ServiceDescriptor,
        executor: Arc<Mutex<dyn CommandExecutor>>,
        table: T,
        polling: PollingConfig,
    ) -> Self {
        Self {
            descriptor,
            executor,
            table,
            polling,
            status: ServiceStatus::Unknown,
            grace_left: 0,
            in_flight: None,
            last_error: None,
        }
    }

    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Failure of the last background unit, surfaced exactly once.
    pub fn take_last_error(&mut self) -> Option<PanelError> {
        self.last_error.take()
    }

    /// Whether a background command unit is still in flight.
    pub fn is_busy(&self) -> bool {
        self.in_flight
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// One poll tick. Returns whether the displayed status changed, which
    /// is the UI's cue to refresh the indicator.
    pub async fn poll_status(&mut self) -> bool {
        let mut changed = self.harvest_finished().await;

        let observed = match find_processes(&self.table, &self.descriptor) {
            Ok(pids) if pids.is_empty() => ServiceStatus::Stopped,
            Ok(_) => ServiceStatus::Running,
            Err(e) => {
                // Transient enumeration failure: retain the last known
                // status and retry on the next tick.
                warn!("status poll failed, retaining {}: {}", self.status, e);
                return changed;
            }
        };

        let next = match self.status {
            ServiceStatus::Starting => {
                if observed == ServiceStatus::Running {
                    ServiceStatus::Running
                } else if self.grace_left > 0 {
                    // Launch latency: let the optimistic state outlive the
                    // observation for a bounded number of polls.
                    self.grace_left -= 1;
                    ServiceStatus::Starting
                } else {
                    observed
                }
            }
            ServiceStatus::Stopping => {
                if observed == ServiceStatus::Stopped {
                    ServiceStatus::Stopped
                } else if self.grace_left > 0 {
                    self.grace_left -= 1;
                    ServiceStatus::Stopping
                } else {
                    observed
                }
            }
            _ => observed,
        };

        changed |= self.service_status_changed(next);
        changed
    }

    /// Toggle-switch click: start when stopped, stop when running;
    /// debounced while a transition is pending.
    pub fn handle_start_stop_click(&mut self) -> bool {
        if self.is_busy() || matches!(self.status, ServiceStatus::Starting | ServiceStatus::Stopping)
        {
            warn!(
                service = %self.descriptor.identifier,
                "action already in progress, ignoring click"
            );
            return false;
        }

        match self.status {
            ServiceStatus::Stopped => {
                info!(service = %self.descriptor.identifier, "start requested");
                self.spawn_commands(self.start_commands());
                self.enter_optimistic(ServiceStatus::Starting);
                true
            }
            ServiceStatus::Running => {
                info!(service = %self.descriptor.identifier, "stop requested");
                self.spawn_commands(self.stop_commands());
                self.enter_optimistic(ServiceStatus::Stopping);
                true
            }
            _ => {
                warn!("service status not yet known, ignoring click");
                false
            }
        }
    }

    /// Uninstall: stop if running, unload from launchd, remove the
    /// definition and installed files. Idempotent on the helper side, so
    /// repeating it against an already-removed service is not an error.
    pub fn handle_uninstall_click(&mut self) -> bool {
        if self.is_busy() || matches!(self.status, ServiceStatus::Starting | ServiceStatus::Stopping)
        {
            warn!(
                service = %self.descriptor.identifier,
                "action already in progress, ignoring uninstall"
            );
            return false;
        }

        info!(service = %self.descriptor.identifier, "uninstall requested");

        let payload = vec![
            self.descriptor.identifier.clone(),
            self.descriptor.install_path().display().to_string(),
            self.support_dir().display().to_string(),
        ];

        let executor = self.executor.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let mut executor = executor.lock().await;
            executor
                .run_helper_action(HelperAction::Uninstall, payload)
                .await
        }));

        if self.status == ServiceStatus::Running {
            self.enter_optimistic(ServiceStatus::Stopping);
        }
        true
    }

    /// Block until the in-flight unit (if any) finishes, harvesting its
    /// outcome. Used by one-shot invocations and tests; the recurring
    /// panel loop relies on `poll_status` instead.
    pub async fn wait_for_pending(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            self.finish(handle).await;
        }
    }

    /// Release every privileged resource the panel holds, regardless of
    /// outstanding operations.
    pub async fn teardown(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
        let mut executor = self.executor.lock().await;
        executor.teardown().await;
    }

    fn enter_optimistic(&mut self, status: ServiceStatus) {
        self.grace_left = self.polling.grace_polls;
        self.service_status_changed(status);
    }

    fn service_status_changed(&mut self, next: ServiceStatus) -> bool {
        if next != self.status {
            info!(
                service = %self.descriptor.identifier,
                "status {} -> {}", self.status, next
            );
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Harvest a finished background unit without blocking. A failed unit
    /// reverts the optimistic transition and records the error for the UI.
    async fn harvest_finished(&mut self) -> bool {
        let finished = self
            .in_flight
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(false);

        if !finished {
            return false;
        }

        let handle = self.in_flight.take().expect("checked above");
        self.finish(handle).await
    }

    async fn finish(&mut self, handle: JoinHandle<PanelResult<String>>) -> bool {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(PanelError::General(anyhow::anyhow!(
                "background unit panicked: {}",
                e
            ))),
        };

        match result {
            Ok(_) => false,
            Err(e) => {
                error!(service = %self.descriptor.identifier, "command failed: {}", e);
                let reverted = match self.status {
                    ServiceStatus::Starting => Some(ServiceStatus::Stopped),
                    ServiceStatus::Stopping => Some(ServiceStatus::Running),
                    _ => None,
                };
                self.last_error = Some(e);
                match reverted {
                    Some(status) => self.service_status_changed(status),
                    None => false,
                }
            }
        }
    }

    fn spawn_commands(&mut self, commands: Vec<PrivilegedCommand>) {
        let executor = self.executor.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let mut executor = executor.lock().await;
            let mut output = String::new();
            for command in commands {
                output = executor.execute(command).await?;
            }
            Ok(output)
        }));
    }

    /// Start mode selection: queued per-user execution when any starter
    /// pins a run-as user, one-shot privileged execution when the service
    /// needs root, fire-and-forget otherwise.
    fn start_commands(&self) -> Vec<PrivilegedCommand> {
        if self.descriptor.has_per_user_starters() {
            return self
                .descriptor
                .starters
                .iter()
                .enumerate()
                .map(|(index, starter)| PrivilegedCommand::AsyncSudoAsUser {
                    command: starter.command.clone(),
                    user: self.descriptor.run_as_user(index),
                })
                .collect();
        }

        if !self.descriptor.starters.is_empty() {
            return self
                .descriptor
                .starters
                .iter()
                .map(|starter| self.wrap_for_privilege(starter.command.clone()))
                .collect();
        }

        vec![self.wrap_for_privilege(launchctl::start_command(&self.descriptor))]
    }

    fn stop_commands(&self) -> Vec<PrivilegedCommand> {
        vec![self.wrap_for_privilege(launchctl::stop_command(&self.descriptor))]
    }

    fn wrap_for_privilege(&self, command: String) -> PrivilegedCommand {
        if self.descriptor.runs_as_root {
            PrivilegedCommand::Sudo { command }
        } else {
            PrivilegedCommand::Async { command }
        }
    }

    fn support_dir(&self) -> PathBuf {
        PathBuf::from("/Library/Application Support").join(&self.descriptor.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use svcpanel_common::descriptor::StarterCommand;
    use svcpanel_common::process::ProcessInfo;

    struct MockExecutor {
        calls: Arc<AtomicUsize>,
        commands: Arc<StdMutex<Vec<PrivilegedCommand>>>,
        fail: bool,
    }

    impl MockExecutor {
        fn new(fail: bool) -> (Self, Arc<AtomicUsize>, Arc<StdMutex<Vec<PrivilegedCommand>>>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let commands = Arc::new(StdMutex::new(Vec::new()));
            (
                Self {
                    calls: calls.clone(),
                    commands: commands.clone(),
                    fail,
                },
                calls,
                commands,
            )
        }
    }

    #[async_trait]
    impl CommandExecutor for MockExecutor {
        async fn execute(&mut self, command: PrivilegedCommand) -> PanelResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.commands.lock().unwrap().push(command);
            if self.fail {
                Err(PanelError::non_zero_exit(1, "boom"))
            } else {
                Ok(String::new())
            }
        }

        async fn run_helper_action(
            &mut self,
            _action: HelperAction,
            _payload: Vec<String>,
        ) -> PanelResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(String::new())
        }

        async fn teardown(&mut self) {}
    }

    #[derive(Clone)]
    struct FakeTable {
        entries: Arc<StdMutex<Vec<ProcessInfo>>>,
    }

    impl FakeTable {
        fn empty() -> Self {
            Self {
                entries: Arc::new(StdMutex::new(Vec::new())),
            }
        }

        fn inject(&self, pid: u32, exe: &str) {
            self.entries.lock().unwrap().push(ProcessInfo {
                pid,
                executable_path: PathBuf::from(exe),
                arguments: vec![],
            });
        }

        fn clear(&self) {
            self.entries.lock().unwrap().clear();
        }
    }

    impl ProcessTable for FakeTable {
        fn snapshot(&self) -> PanelResult<Vec<ProcessInfo>> {
            Ok(self.entries.lock().unwrap().clone())
        }
    }

    fn descriptor(starters: Vec<StarterCommand>, runs_as_root: bool) -> ServiceDescriptor {
        ServiceDescriptor {
            source_url: PathBuf::from("/tmp/com.example.svc.plist"),
            identifier: "com.example.svc".to_string(),
            display_name: "Example Service".to_string(),
            service_description: String::new(),
            version: "1.0".to_string(),
            program: PathBuf::from("/usr/local/bin/svc"),
            starters,
            runs_as_root,
            runs_at_boot: false,
        }
    }

    fn controller(
        desc: ServiceDescriptor,
        fail: bool,
        grace_polls: u32,
    ) -> (
        ServiceController<FakeTable>,
        FakeTable,
        Arc<AtomicUsize>,
        Arc<StdMutex<Vec<PrivilegedCommand>>>,
    ) {
        let (executor, calls, commands) = MockExecutor::new(fail);
        let table = FakeTable::empty();
        let controller = ServiceController::new(
            desc,
            Arc::new(Mutex::new(executor)),
            table.clone(),
            PollingConfig {
                interval_ms: 10,
                grace_polls,
            },
        );
        (controller, table, calls, commands)
    }

    #[tokio::test]
    async fn test_first_poll_resolves_unknown() {
        let (mut controller, _table, _calls, _) = controller(descriptor(vec![], true), false, 3);

        assert_eq!(controller.status(), ServiceStatus::Unknown);
        assert!(controller.poll_status().await);
        assert_eq!(controller.status(), ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_poll_is_idempotent_when_table_unchanged() {
        let (mut controller, _table, _calls, _) = controller(descriptor(vec![], true), false, 3);

        assert!(controller.poll_status().await);
        assert!(!controller.poll_status().await);
        assert!(!controller.poll_status().await);
    }

    #[tokio::test]
    async fn test_click_from_stopped_enters_starting_and_debounces() {
        let (mut controller, _table, calls, _) = controller(descriptor(vec![], true), false, 3);
        controller.poll_status().await;

        assert!(controller.handle_start_stop_click());
        assert_eq!(controller.status(), ServiceStatus::Starting);

        // Second click while still starting is a no-op.
        assert!(!controller.handle_start_stop_click());

        controller.wait_for_pending().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_click_before_first_poll_is_ignored() {
        let (mut controller, _table, calls, _) = controller(descriptor(vec![], true), false, 3);

        assert!(!controller.handle_start_stop_click());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_end_to_end_status_observation() {
        let (mut controller, table, _calls, _) = controller(descriptor(vec![], true), false, 3);

        assert!(controller.poll_status().await);
        assert_eq!(controller.status(), ServiceStatus::Stopped);

        table.inject(100, "/usr/local/bin/svc");
        assert!(controller.poll_status().await);
        assert_eq!(controller.status(), ServiceStatus::Running);

        // Unchanged table: no further change reported.
        assert!(!controller.poll_status().await);
    }

    #[tokio::test]
    async fn test_failed_start_reverts_and_surfaces_error_once() {
        let (mut controller, _table, _calls, _) = controller(descriptor(vec![], true), true, 3);
        controller.poll_status().await;

        assert!(controller.handle_start_stop_click());
        controller.wait_for_pending().await;

        assert_eq!(controller.status(), ServiceStatus::Stopped);
        let error = controller.take_last_error().expect("failure surfaced");
        assert!(matches!(error, PanelError::NonZeroExit { .. }));
        assert!(controller.take_last_error().is_none());
    }

    #[tokio::test]
    async fn test_optimistic_state_survives_grace_then_reconciles() {
        let (mut controller, _table, _calls, _) = controller(descriptor(vec![], true), false, 2);
        controller.poll_status().await;

        controller.handle_start_stop_click();
        controller.wait_for_pending().await;

        // Service never appears in the table; starting survives the
        // configured grace polls, then is forced back to stopped.
        assert!(!controller.poll_status().await);
        assert_eq!(controller.status(), ServiceStatus::Starting);
        assert!(!controller.poll_status().await);
        assert_eq!(controller.status(), ServiceStatus::Starting);

        assert!(controller.poll_status().await);
        assert_eq!(controller.status(), ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_from_running_enters_stopping() {
        let (mut controller, table, _calls, commands) =
            controller(descriptor(vec![], true), false, 2);
        table.inject(100, "/usr/local/bin/svc");
        controller.poll_status().await;
        assert_eq!(controller.status(), ServiceStatus::Running);

        assert!(controller.handle_start_stop_click());
        assert_eq!(controller.status(), ServiceStatus::Stopping);
        controller.wait_for_pending().await;

        table.clear();
        assert!(controller.poll_status().await);
        assert_eq!(controller.status(), ServiceStatus::Stopped);

        let commands = commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0], PrivilegedCommand::Sudo { .. }));
    }

    #[tokio::test]
    async fn test_per_user_starters_select_queued_mode_in_order() {
        let starters = vec![
            StarterCommand {
                command: "stop old-instance".to_string(),
                run_as: Some("alice".to_string()),
            },
            StarterCommand {
                command: "start new-instance".to_string(),
                run_as: Some("bob".to_string()),
            },
        ];
        let (mut controller, _table, _calls, commands) =
            controller(descriptor(starters, true), false, 2);
        controller.poll_status().await;

        controller.handle_start_stop_click();
        controller.wait_for_pending().await;

        let commands = commands.lock().unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[0],
            PrivilegedCommand::AsyncSudoAsUser {
                command: "stop old-instance".to_string(),
                user: "alice".to_string(),
            }
        );
        assert_eq!(
            commands[1],
            PrivilegedCommand::AsyncSudoAsUser {
                command: "start new-instance".to_string(),
                user: "bob".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_unprivileged_service_uses_fire_and_forget() {
        let (mut controller, _table, _calls, commands) =
            controller(descriptor(vec![], false), false, 2);
        controller.poll_status().await;

        controller.handle_start_stop_click();
        controller.wait_for_pending().await;

        let commands = commands.lock().unwrap();
        assert!(matches!(commands[0], PrivilegedCommand::Async { .. }));
    }

    #[tokio::test]
    async fn test_uninstall_is_repeatable() {
        let (mut controller, _table, calls, _) = controller(descriptor(vec![], true), false, 2);
        controller.poll_status().await;

        assert!(controller.handle_uninstall_click());
        controller.wait_for_pending().await;
        assert!(controller.take_last_error().is_none());

        // Uninstalling an already-removed service is not an error.
        assert!(controller.handle_uninstall_click());
        controller.wait_for_pending().await;
        assert!(controller.take_last_error().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
