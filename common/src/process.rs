use crate::descriptor::ServiceDescriptor;
use crate::error::PanelResult;
use std::collections::BTreeSet;
use std::path::PathBuf;
use sysinfo::System;

/// One row of the OS process table, reduced to what status matching needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub executable_path: PathBuf,
    pub arguments: Vec<String>,
}

/// Source of process-table snapshots.
///
/// A snapshot is finite and restartable: every call re-queries the source,
/// nothing is cached between calls.
pub trait ProcessTable {
    fn snapshot(&self) -> PanelResult<Vec<ProcessInfo>>;
}

/// Live process table backed by the OS.
pub struct SystemProcessTable;

impl SystemProcessTable {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> PanelResult<Vec<ProcessInfo>> {
        let mut system = System::new();
        system.refresh_processes();

        Ok(system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let executable_path = process.exe()?.to_path_buf();
                Some(ProcessInfo {
                    pid: pid.as_u32(),
                    executable_path,
                    arguments: process.cmd().to_vec(),
                })
            })
            .collect())
    }
}

/// Find the PIDs that look like instances of the descriptor's service.
///
/// Matching is best-effort path equality against `program`, with a
/// substring fallback against the declared starter commands for processes
/// launched through wrapper scripts. There is no PID tracking: the panel
/// runs in a different privilege context than whatever launched the
/// service, so the executable path is the only discriminator. Two services
/// sharing one binary will be conflated; that is a known limitation.
pub fn find_processes(
    table: &dyn ProcessTable,
    descriptor: &ServiceDescriptor,
) -> PanelResult<BTreeSet<u32>> {
    let program = descriptor.program.to_string_lossy();

    Ok(table
        .snapshot()?
        .into_iter()
        .filter(|process| {
            if process.executable_path == descriptor.program {
                return true;
            }

            let command_line = process.arguments.join(" ");
            if !program.is_empty() && command_line.contains(program.as_ref()) {
                return true;
            }

            descriptor
                .starters
                .iter()
                .any(|starter| command_line.contains(starter.command.as_str()))
        })
        .map(|process| process.pid)
        .inspect(|pid| tracing::debug!(pid = *pid, service = %descriptor.identifier, "matched process"))
        .collect())
}
