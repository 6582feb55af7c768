use thiserror::Error;

use crate::HostAddr;

const STATUS_NOT_FOUND: i32 = 0x8002_D082_u32 as i32;
const STATUS_ILLEGAL_ADDR: i32 = 0x8002_0005_u32 as i32;

pub type Result<T> = std::result::Result<T, HostError>;

/// Failure reported by one of the host services.
///
/// Host services follow the kernel convention of returning a negative status word on
/// failure; [`HostError::Status`] carries that word verbatim so it can be logged in the same
/// form the host's own diagnostics use.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("host call failed with status {status:#010x}")]
    Status { status: i32 },

    #[error("module {0} is not loaded")]
    ModuleNotFound(String),

    #[error("host memory access out of range: addr={addr} len={len}")]
    OutOfRange { addr: HostAddr, len: usize },
}

impl HostError {
    pub fn status(status: i32) -> Self {
        HostError::Status { status }
    }

    /// Status word to hand back across the host boundary.
    pub fn as_status(&self) -> i32 {
        match self {
            HostError::Status { status } => *status,
            HostError::ModuleNotFound(_) => STATUS_NOT_FOUND,
            HostError::OutOfRange { .. } => STATUS_ILLEGAL_ADDR,
        }
    }
}
