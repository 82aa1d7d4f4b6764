use crate::runner::CommandRunner;
use std::path::{Path, PathBuf};
use svcpanel_common::descriptor::INSTALL_ROOT;
use svcpanel_common::error::{PanelError, PanelResult};
use svcpanel_common::launchctl;
use svcpanel_common::protocol::CommandEntry;
use tracing::{info, warn};

/// Copy a service definition into the launchd install root and load it.
pub async fn install_service(runner: &dyn CommandRunner, source: &Path) -> PanelResult<()> {
    let file_name = source
        .file_name()
        .ok_or_else(|| PanelError::protocol("install payload is not a plist path"))?;
    let destination = PathBuf::from(INSTALL_ROOT).join(file_name);

    std::fs::copy(source, &destination)?;
    info!("installed service definition at {}", destination.display());

    let load = CommandEntry::new(launchctl::load_command(&destination), None);
    runner.run(&load).await?;
    Ok(())
}

/// Unload a service and remove its installed definition.
pub async fn remove_service(runner: &dyn CommandRunner, label: &str) -> PanelResult<()> {
    let plist_path = PathBuf::from(INSTALL_ROOT).join(format!("{}.plist", label));
    unload_and_remove(runner, &plist_path).await
}

/// Full uninstall: unload, remove the definition, remove installed files.
/// Every step tolerates already-removed state so repeated uninstalls are
/// not an error.
pub async fn uninstall(
    runner: &dyn CommandRunner,
    label: &str,
    plist_path: &Path,
    support_dir: &Path,
) -> PanelResult<()> {
    unload_and_remove(runner, plist_path).await?;

    if support_dir.exists() {
        std::fs::remove_dir_all(support_dir)?;
        info!("removed installed files at {}", support_dir.display());
    }

    info!("service {} uninstalled", label);
    Ok(())
}

async fn unload_and_remove(runner: &dyn CommandRunner, plist_path: &Path) -> PanelResult<()> {
    if plist_path.exists() {
        let unload = CommandEntry::new(launchctl::unload_command(plist_path), None);
        if let Err(e) = runner.run(&unload).await {
            // Already unloaded is the expected steady state here.
            warn!("unload reported failure, continuing: {}", e);
        }
        std::fs::remove_file(plist_path)?;
        info!("removed {}", plist_path.display());
    }
    Ok(())
}
