#![forbid(unsafe_code)]

//! Virtual MMC game-card shim.
//!
//! [`Interceptor`] sits on the host storage driver's entry points. Traffic for the game card
//! is answered by a [`vmmc_emu::Engine`] backed by a card dump; everything else reaches the
//! original driver unchanged. Sector reads for the card are carried out on a dedicated worker
//! thread through a [`vmmc_channel::ReadChannel`].
//!
//! [`module_start`] and [`module_stop`] manage the single process-wide instance.

mod card;
mod config;
mod error;
mod global;
mod interceptor;
mod locks;

pub use card::EmulatedCard;
pub use config::{ConfigError, ShimConfig, DEFAULT_WORKER_NAME};
pub use error::ShimError;
pub use global::{instance, module_start, module_start_with_engine, module_stop};
pub use interceptor::{
    InstallReport, Interceptor, SkipReason, RESERVED_MUTEX_NAME, SYSEVENT_HANDLER_NAME,
};
pub use locks::{LockPolicy, LockPolicyTable};
