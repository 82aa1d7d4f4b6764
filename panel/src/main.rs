mod authorization;
mod config;
mod controller;
mod executor;

use authorization::SystemAuthorizer;
use clap::Parser;
use config::*;
use controller::{ServiceController, ServiceStatus};
use executor::PrivilegedExecutor;
use std::sync::Arc;
use svcpanel_common::descriptor::ServiceDescriptor;
use svcpanel_common::process::SystemProcessTable;
use tokio::sync::Mutex;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Generate config if requested
    if args.generate_config {
        if let Err(e) = generate_default_config() {
            eprintln!("Failed to generate config: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // Load configuration
    let config = match load_panel_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging
    if let Err(e) = setup_logging(&config) {
        eprintln!("Failed to setup logging: {}", e);
        std::process::exit(1);
    }

    let Some(descriptor_path) = args.descriptor.clone() else {
        eprintln!("A service descriptor is required (--descriptor <plist>)");
        std::process::exit(1);
    };

    // A descriptor that fails to load means the panel cannot present
    // controls at all.
    let descriptor = match ServiceDescriptor::load(&descriptor_path) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            error!("Failed to load service descriptor: {}", e);
            std::process::exit(1);
        }
    };

    let authorizer = Arc::new(SystemAuthorizer::new());
    let executor = Arc::new(Mutex::new(PrivilegedExecutor::new(
        authorizer,
        config.helper.path.clone(),
    )));

    let mut controller = ServiceController::new(
        descriptor,
        executor.clone(),
        SystemProcessTable::new(),
        config.polling.clone(),
    );

    let loaded = controller.descriptor();
    info!(
        "Controlling service {} ({} {})",
        loaded.identifier, loaded.display_name, loaded.version
    );

    let command = args.command.unwrap_or(PanelCommand::Status);

    // Unlock up front for actions that will need privilege, so a denial
    // surfaces before any optimistic state change.
    let needs_privilege = command == PanelCommand::Uninstall
        || (controller.descriptor().runs_as_root
            && matches!(command, PanelCommand::Start | PanelCommand::Stop));
    if needs_privilege {
        if let Err(e) = executor.lock().await.unlock() {
            error!("{}", e);
            std::process::exit(1);
        }
    }

    let outcome = run_command(&mut controller, command, &config).await;

    // Teardown always releases authorization and kills the resident
    // helper, even when the command failed.
    controller.teardown().await;

    if let Err(e) = outcome {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_command(
    controller: &mut ServiceController<SystemProcessTable>,
    command: PanelCommand,
    config: &svcpanel_common::config::PanelConfig,
) -> anyhow::Result<()> {
    match command {
        PanelCommand::Status => {
            controller.poll_status().await;
            println!("{}", controller.status());
            Ok(())
        }
        PanelCommand::Start => {
            controller.poll_status().await;
            if controller.status() == ServiceStatus::Running {
                println!("already running");
                return Ok(());
            }
            if !controller.handle_start_stop_click() {
                anyhow::bail!("start not possible from status {}", controller.status());
            }
            controller.wait_for_pending().await;
            finish_action(controller, config).await
        }
        PanelCommand::Stop => {
            controller.poll_status().await;
            if controller.status() == ServiceStatus::Stopped {
                println!("already stopped");
                return Ok(());
            }
            if !controller.handle_start_stop_click() {
                anyhow::bail!("stop not possible from status {}", controller.status());
            }
            controller.wait_for_pending().await;
            finish_action(controller, config).await
        }
        PanelCommand::Uninstall => {
            controller.poll_status().await;
            if !controller.handle_uninstall_click() {
                anyhow::bail!("uninstall not possible right now");
            }
            controller.wait_for_pending().await;
            if let Some(e) = controller.take_last_error() {
                return Err(e.into());
            }
            println!("uninstalled");
            Ok(())
        }
        PanelCommand::Watch => watch(controller, config).await,
    }
}

/// Let the next polls observe the outcome of an asynchronous action
/// before reporting the final status.
async fn finish_action(
    controller: &mut ServiceController<SystemProcessTable>,
    config: &svcpanel_common::config::PanelConfig,
) -> anyhow::Result<()> {
    if let Some(e) = controller.take_last_error() {
        return Err(e.into());
    }

    for _ in 0..=config.polling.grace_polls {
        tokio::time::sleep(config.polling.interval()).await;
        controller.poll_status().await;
        if !matches!(
            controller.status(),
            ServiceStatus::Starting | ServiceStatus::Stopping
        ) {
            break;
        }
    }

    if let Some(e) = controller.take_last_error() {
        return Err(e.into());
    }
    println!("{}", controller.status());
    Ok(())
}

async fn watch(
    controller: &mut ServiceController<SystemProcessTable>,
    config: &svcpanel_common::config::PanelConfig,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(config.polling.interval());
    info!(
        "Watching service status every {}ms",
        config.polling.interval_ms
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if controller.poll_status().await {
                    println!("{}", controller.status());
                }
                if let Some(e) = controller.take_last_error() {
                    error!("{}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                return Ok(());
            }
        }
    }
}
