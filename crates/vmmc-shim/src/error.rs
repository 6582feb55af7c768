use thiserror::Error;
use vmmc_channel::ChannelError;
use vmmc_emu::ImageError;
use vmmc_host::HostError;
use vmmc_recovery::RecoveryError;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ShimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open card image: {0}")]
    Image(#[from] ImageError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("interceptor is already installed")]
    AlreadyInstalled,

    #[error("shim is already started")]
    AlreadyStarted,

    #[error("shim is not started")]
    NotStarted,
}
