#![forbid(unsafe_code)]

//! Emulated game card.
//!
//! [`Engine`] answers the intercepted storage calls for the emulated card:
//!
//! - sector reads from a [`BackingImage`] (a card dump), with a reserved media identity range
//!   served from an in-memory [`MediaIdBlock`]
//! - writes, which only the identity range accepts
//! - the CMD56 handshake, answered with the dump's key material
//! - command-level traffic, answered by the MMC responder in [`mmc`]

mod engine;
mod image;
mod media_id;
pub mod mmc;
mod status;

pub use engine::Engine;
pub use image::{
    check_range, BackingImage, DumpLayout, FileImage, ImageError, KeyMaterial, MemImage,
};
pub use media_id::{IdentityRegion, MediaIdBlock};
pub use mmc::CardIdentity;
pub use status::SdStatus;
