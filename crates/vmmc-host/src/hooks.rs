//! Interception points on the host storage stack and where they live.

use crate::layout::{SDIF_MODULE, SDSTOR_MODULE, TEXT_SEGMENT};

/// Library NIDs the hooked imports are resolved against.
pub mod nid {
    pub const SDIF_FOR_DRIVER: u32 = 0x96D3_06FA;
    pub const GC_AUTH_FOR_DRIVER: u32 = 0xC662_7F5E;
    pub const THREADMGR_FOR_DRIVER: u32 = 0xE2C4_0624;

    pub const SD_READ: u32 = 0x6F8D_529B;
    pub const SD_WRITE: u32 = 0x1755_43D2;
    pub const GC_CMD56_HANDSHAKE: u32 = 0x6878_1760;
    pub const FAST_MUTEX_LOCK: u32 = 0x7062_7F3A;
    pub const FAST_MUTEX_UNLOCK: u32 = 0xDB39_5782;
}

/// Text offset of the command-send routine inside [`SDIF_MODULE`].
pub const SEND_COMMAND_OFFSET: u32 = 0x17E8;

/// Where a hook is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookTarget {
    /// An import of `module`, identified by library and function NID.
    Import {
        module: &'static str,
        library_nid: u32,
        function_nid: u32,
    },
    /// A raw code offset inside `module`.
    Offset {
        module: &'static str,
        segment: u32,
        offset: u32,
        thumb: bool,
    },
}

impl HookTarget {
    pub fn module(&self) -> &'static str {
        match self {
            HookTarget::Import { module, .. } | HookTarget::Offset { module, .. } => module,
        }
    }
}

/// Every entry point the shim intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookPoint {
    FastMutexLock,
    FastMutexUnlock,
    GcCmd56Handshake,
    SdRead,
    SdWrite,
    SendCommand,
}

impl HookPoint {
    /// Installation order: lock overrides first so no emulated traffic can reach the broken
    /// mutex, then the storage entry points.
    pub const ALL: [HookPoint; 6] = [
        HookPoint::FastMutexLock,
        HookPoint::FastMutexUnlock,
        HookPoint::GcCmd56Handshake,
        HookPoint::SdRead,
        HookPoint::SdWrite,
        HookPoint::SendCommand,
    ];

    pub fn target(self) -> HookTarget {
        match self {
            HookPoint::FastMutexLock => HookTarget::Import {
                module: SDIF_MODULE,
                library_nid: nid::THREADMGR_FOR_DRIVER,
                function_nid: nid::FAST_MUTEX_LOCK,
            },
            HookPoint::FastMutexUnlock => HookTarget::Import {
                module: SDIF_MODULE,
                library_nid: nid::THREADMGR_FOR_DRIVER,
                function_nid: nid::FAST_MUTEX_UNLOCK,
            },
            HookPoint::GcCmd56Handshake => HookTarget::Import {
                module: SDSTOR_MODULE,
                library_nid: nid::GC_AUTH_FOR_DRIVER,
                function_nid: nid::GC_CMD56_HANDSHAKE,
            },
            HookPoint::SdRead => HookTarget::Import {
                module: SDSTOR_MODULE,
                library_nid: nid::SDIF_FOR_DRIVER,
                function_nid: nid::SD_READ,
            },
            HookPoint::SdWrite => HookTarget::Import {
                module: SDSTOR_MODULE,
                library_nid: nid::SDIF_FOR_DRIVER,
                function_nid: nid::SD_WRITE,
            },
            HookPoint::SendCommand => HookTarget::Offset {
                module: SDIF_MODULE,
                segment: TEXT_SEGMENT,
                offset: SEND_COMMAND_OFFSET,
                thumb: true,
            },
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HookPoint::FastMutexLock => "fast_mutex_lock",
            HookPoint::FastMutexUnlock => "fast_mutex_unlock",
            HookPoint::GcCmd56Handshake => "gc_cmd56_handshake",
            HookPoint::SdRead => "sd_read",
            HookPoint::SdWrite => "sd_write",
            HookPoint::SendCommand => "send_command",
        }
    }
}
