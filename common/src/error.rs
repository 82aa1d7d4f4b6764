use thiserror::Error;

/// Common error types for the service control panel
#[derive(Error, Debug)]
pub enum PanelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authorization denied")]
    AuthorizationDenied,

    #[error("Privileged helper could not be launched: {message}")]
    HelperLaunchFailed { message: String },

    #[error("Command exited with status {code}: {output}")]
    NonZeroExit { code: i32, output: String },

    #[error("Malformed service descriptor: {message}")]
    MalformedDescriptor { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("General error: {0}")]
    General(#[from] anyhow::Error),
}

impl PanelError {
    pub fn helper_launch(message: impl Into<String>) -> Self {
        Self::HelperLaunchFailed {
            message: message.into(),
        }
    }

    pub fn non_zero_exit(code: i32, output: impl Into<String>) -> Self {
        Self::NonZeroExit {
            code,
            output: output.into(),
        }
    }

    pub fn malformed_descriptor(message: impl Into<String>) -> Self {
        Self::MalformedDescriptor {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// Result type alias for panel operations
pub type PanelResult<T> = Result<T, PanelError>;
