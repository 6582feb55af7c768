#![forbid(unsafe_code)]

//! Host-side contract for the virtual MMC shim.
//!
//! The shim runs inside a host kernel and only ever touches host state through the services
//! defined here. This crate provides:
//!
//! - [`HostAddr`]: a 32-bit host pointer, never dereferenced directly
//! - [`HostServices`]: the bundle of host services the core consumes
//! - [`layout`]: byte offsets of the host storage driver's in-place structures
//! - [`hooks`]: the intercepted entry points and where they live
//!
//! With the `test-utils` feature, [`testing`] provides in-memory fakes of every service.

mod addr;
mod error;
pub mod hooks;
pub mod layout;
mod services;

#[cfg(feature = "test-utils")]
pub mod testing;

pub use addr::HostAddr;
pub use error::{HostError, Result};
pub use hooks::{HookPoint, HookTarget};
pub use services::{
    part_global_context, AddressTranslator, HookHandle, HookRegistry, HostMemory, HostServices,
    KernelSync, KernelUid, ModuleId, ModuleResolver, SdifDevice, SdifDriver, SysEvent,
    SysEventHandler, SysEventPhase, SysEventRegistry,
};
