//! In-place layout contract for the host storage driver's data section.
//!
//! The host owns these structures and never hands us a typed pointer to them. Everything here
//! is a byte offset from the start of a structure; callers combine them with a [`HostAddr`]
//! and go through [`crate::HostMemory`] to read or rewrite fields in place.
//!
//! All multi-byte fields are little-endian. Pointers are 32-bit.

use crate::HostAddr;

/// Sector size used by the host for every read/write entry point.
pub const SECTOR_SIZE: usize = 0x200;

/// Number of entries in a device's command ring.
pub const COMMAND_RING_LEN: usize = 16;

/// Segment index of a module's data section.
pub const DATA_SEGMENT: u32 = 1;

/// Segment index of a module's text section.
pub const TEXT_SEGMENT: u32 = 0;

/// Name of the host storage interface module.
pub const SDIF_MODULE: &str = "SceSdif";

/// Name of the host storage filesystem-facing module.
pub const SDSTOR_MODULE: &str = "SceSdstor";

/// Name of the game-card authentication module.
pub const GC_AUTH_MODULE: &str = "SceSblGcAuthMgr";

/// Offsets inside the storage module's data section ([`SDIF_MODULE`], [`DATA_SEGMENT`]).
pub mod sdif_data {
    /// Game-card global context.
    pub const GC_GLOBAL_CTX: u32 = 0x2500;
    /// Context block used while the card runs in MMC mode.
    pub const MMC_PART: u32 = 0x7218;
    pub const MMC_PART_SIZE: usize = 0x398;
    /// Context block used while the card runs in SD mode.
    pub const SD_PART: u32 = 0x7670;
    pub const SD_PART_SIZE: usize = 0xC0;
}

/// Key slot the authentication module reads after the CMD56 handshake.
pub mod gc_auth_data {
    pub const CMD56_KEY_SLOT: u32 = 0x5018;
    pub const CMD56_DATA_SIZE: usize = 0x20;
}

/// One command descriptor in the ring.
pub mod cmd_entry {
    pub const SIZE: usize = 0x240;

    pub const COMMAND: u32 = 0x08;
    pub const ARGUMENT: u32 = 0x0C;
    pub const RESPONSE: u32 = 0x10;
    pub const RESPONSE_LEN: usize = 0x10;
    pub const BUFFER: u32 = 0x20;
    pub const BLOCK_SIZE: u32 = 0x24;
    pub const BLOCK_COUNT: u32 = 0x26;
    pub const ERROR_CODE: u32 = 0x28;
    pub const NEXT: u32 = 0x40;
    pub const ARRAY_INDEX: u32 = 0x48;
    pub const GLOBAL_CTX: u32 = 0x58;

    /// Buffers embedded in the entry that the host hands to the DMA engine.
    ///
    /// The physical address of each buffer is cached in a separate field of the same entry.
    pub const DMA_REGIONS: [DmaRegion; 3] = [
        DmaRegion {
            offset: 0x80,
            len: 0x100,
            paddr_field: 0x184,
        },
        DmaRegion {
            offset: 0x1C0,
            len: 0x40,
            paddr_field: 0x1A8,
        },
        DmaRegion {
            offset: 0x200,
            len: 0x40,
            paddr_field: 0x1AC,
        },
    ];

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaRegion {
        pub offset: u32,
        pub len: u32,
        pub paddr_field: u32,
    }
}

/// Per-device context data that follows the command ring in the global context.
pub mod ctx_data {
    pub const SIZE: usize = 0xC0;

    pub const CMD_PTR: u32 = 0x00;
    pub const CMD_PTR_NEXT: u32 = 0x04;
    pub const UNK_18: u32 = 0x18;
    pub const ARRAY_IDX: u32 = 0x20;
    pub const MEMBASE_1000: u32 = 0x30;
    pub const UNK_34: u32 = 0x34;
    pub const UNK_38: u32 = 0x38;
    pub const UID_1000: u32 = 0x3C;
    pub const EVID: u32 = 0x40;
    pub const FAST_MUTEX: u32 = 0x44;
    pub const FAST_MUTEX_SIZE: usize = 0x40;
    pub const UID_10000: u32 = 0xB0;
    pub const MEMBASE_10000: u32 = 0xB4;
}

/// Global (device-class) context: the command ring followed by the context data.
pub mod global_ctx {
    use super::{cmd_entry, ctx_data, COMMAND_RING_LEN};

    pub const COMMANDS: u32 = 0x0;
    pub const CTX_DATA: u32 = (cmd_entry::SIZE * COMMAND_RING_LEN) as u32;
    pub const SIZE: usize = CTX_DATA as usize + ctx_data::SIZE;
}

/// Per-mode device part handed to the read/write entry points.
pub mod part {
    /// Back-pointer to the owning global context.
    pub const GLOBAL_CTX: u32 = 0x0;
}

/// Address of command entry `index` inside the global context at `gctx`.
pub fn command_entry(gctx: HostAddr, index: usize) -> HostAddr {
    gctx.offset(global_ctx::COMMANDS)
        .index(index as u32, cmd_entry::SIZE as u32)
}

/// Address of the context data block inside the global context at `gctx`.
pub fn context_data(gctx: HostAddr) -> HostAddr {
    gctx.offset(global_ctx::CTX_DATA)
}

/// Address of the fast mutex guarding the global context at `gctx`.
pub fn fast_mutex(gctx: HostAddr) -> HostAddr {
    context_data(gctx).offset(ctx_data::FAST_MUTEX)
}
