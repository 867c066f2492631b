use std::process::ExitCode;

/// All errors `kv-sim` can surface to the user.
///
/// Variants split the same way as the controller's own taxonomy:
/// parameter/usage mistakes exit `2`, everything the controller itself
/// reported back as a non-success completion exits `1`.
#[derive(thiserror::Error, Debug)]
pub enum SimError {
    #[error("invalid hex key: {0}")]
    BadKeyHex(String),

    #[error("key too long: {0}")]
    Key(#[from] kv_core::key::KeyError),

    #[error("no response received from the controller within the timeout")]
    CompletionTimeout,

    #[error("command failed with status 0x{0:04x}")]
    CommandFailed(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown select format: {0}")]
    UnknownFormat(String),
}

impl SimError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            SimError::BadKeyHex(_) | SimError::Key(_) | SimError::UnknownFormat(_) => ExitCode::from(2),
            SimError::CompletionTimeout | SimError::CommandFailed(_) | SimError::Io(_) => ExitCode::from(1),
        }
    }
}
