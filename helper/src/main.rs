mod actions;
mod privilege;
mod queue;
mod runner;

use runner::ShellRunner;
use std::path::Path;
use svcpanel_common::error::{PanelError, PanelResult};
use svcpanel_common::protocol::{CommandEntry, HelperAction};
use tracing::info;

/// Exit code for rejected (malformed) requests, distinguishable from
/// command failures so the panel can tell "bad request" from "ran and
/// failed".
const EXIT_PROTOCOL: i32 = 2;
const EXIT_FAILURE: i32 = 1;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(&args).await {
        Ok(()) => {}
        Err(e @ PanelError::Protocol { .. }) => {
            eprintln!("{}", e);
            std::process::exit(EXIT_PROTOCOL);
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(EXIT_FAILURE);
        }
    }
}

async fn run(args: &[String]) -> PanelResult<()> {
    let (action, payload) = args
        .split_first()
        .ok_or_else(|| PanelError::protocol("usage: svcpanel-helper <action> [payload...]"))?;
    let action = HelperAction::parse(action)?;

    privilege::ensure_root()?;

    let runner = ShellRunner;
    info!(action = %action, "helper invoked");

    match action {
        HelperAction::RunAs => {
            if payload.is_empty() {
                // Resident mode: serve queued entries until the panel
                // closes our stdin or kills us.
                queue::run_resident(&runner, tokio::io::stdin()).await
            } else {
                let entries = CommandEntry::queue_from_args(payload)?;
                queue::run_queue(&runner, &entries).await
            }
        }
        HelperAction::InstallService => {
            let [source] = payload else {
                return Err(PanelError::protocol("installService expects one plist path"));
            };
            actions::install_service(&runner, Path::new(source)).await
        }
        HelperAction::RemoveService => {
            let [label] = payload else {
                return Err(PanelError::protocol("removeService expects one label"));
            };
            actions::remove_service(&runner, label).await
        }
        HelperAction::Uninstall => {
            let [label, plist_path, support_dir] = payload else {
                return Err(PanelError::protocol(
                    "uninstall expects label, plist path and support dir",
                ));
            };
            actions::uninstall(
                &runner,
                label,
                Path::new(plist_path),
                Path::new(support_dir),
            )
            .await
        }
    }
}
