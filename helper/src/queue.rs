use crate::runner::CommandRunner;
use svcpanel_common::error::PanelResult;
use svcpanel_common::protocol::CommandEntry;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{error, info};

/// Run a pre-marshaled queue strictly in submission order.
///
/// The whole queue is validated before the first entry executes; a failing
/// entry stops the queue so later entries never run against a half-applied
/// state.
pub async fn run_queue(runner: &dyn CommandRunner, entries: &[CommandEntry]) -> PanelResult<()> {
    for entry in entries {
        entry.validate()?;
    }

    for entry in entries {
        let output = runner.run(entry).await?;
        info!(
            run_as = entry.run_as.as_deref().unwrap_or("root"),
            "entry completed"
        );
        if !output.trim().is_empty() {
            print!("{}", output);
        }
    }

    Ok(())
}

/// Resident mode: accept one marshaled entry per line until the channel
/// closes. Malformed lines are rejected with a diagnostic and skipped;
/// they never execute partially parsed.
pub async fn run_resident<R>(runner: &dyn CommandRunner, input: R) -> PanelResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let entry = match CommandEntry::from_line(&line) {
            Ok(entry) => entry,
            Err(e) => {
                error!("rejecting malformed queue entry: {}", e);
                eprintln!("rejected entry: {}", e);
                continue;
            }
        };

        if let Err(e) = runner.run(&entry).await {
            error!("queued entry failed: {}", e);
            eprintln!("entry failed: {}", e);
        }
    }

    Ok(())
}
