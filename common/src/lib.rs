pub mod config;
pub mod descriptor;
pub mod error;
pub mod launchctl;
pub mod process;
pub mod protocol;
