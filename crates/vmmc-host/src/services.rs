use std::sync::Arc;

use crate::hooks::HookTarget;
use crate::layout::DATA_SEGMENT;
use crate::{HostAddr, HostError, Result};

/// Kernel object id (mutex, hook, event handler, ...).
pub type KernelUid = i32;

/// Loaded-module id as returned by the module manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub i32);

/// Module discovery and symbol/offset resolution.
pub trait ModuleResolver: Send + Sync {
    fn module_id(&self, name: &str) -> Result<ModuleId>;

    fn segment_address(&self, module: ModuleId, segment: u32, offset: u32) -> Result<HostAddr>;

    /// Address `offset` bytes into the data section of module `name`.
    fn data_address(&self, name: &str, offset: u32) -> Result<HostAddr> {
        let module = self.module_id(name)?;
        self.segment_address(module, DATA_SEGMENT, offset)
    }
}

/// Handle of an installed hook; releasing it restores the original entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle(pub KernelUid);

/// Hook installation service.
///
/// Once a hook is installed the host routes calls to the shim; the shim reaches the original
/// implementation through [`SdifDriver`].
pub trait HookRegistry: Send + Sync {
    fn install(&self, target: &HookTarget) -> Result<HookHandle>;
    fn release(&self, handle: HookHandle) -> Result<()>;
}

/// Byte-addressed access to host kernel memory.
///
/// Reads and writes take `&self`: the memory belongs to the host and is shared with it, so
/// implementations provide their own interior mutability.
pub trait HostMemory: Send + Sync {
    fn read(&self, addr: HostAddr, dst: &mut [u8]) -> Result<()>;
    fn write(&self, addr: HostAddr, src: &[u8]) -> Result<()>;

    fn fill(&self, addr: HostAddr, len: usize, byte: u8) -> Result<()> {
        const CHUNK: usize = 0x200;
        let chunk = [byte; CHUNK];
        let mut done = 0usize;
        while done < len {
            let n = (len - done).min(CHUNK);
            self.write(addr.offset(done as u32), &chunk[..n])?;
            done += n;
        }
        Ok(())
    }

    fn read_u16(&self, addr: HostAddr) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&self, addr: HostAddr) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_addr(&self, addr: HostAddr) -> Result<HostAddr> {
        self.read_u32(addr).map(HostAddr)
    }

    fn write_u32(&self, addr: HostAddr, value: u32) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    fn write_addr(&self, addr: HostAddr, value: HostAddr) -> Result<()> {
        self.write_u32(addr, value.get())
    }
}

/// Virtual to physical address translation.
pub trait AddressTranslator: Send + Sync {
    fn physical_address(&self, vaddr: HostAddr) -> Result<u32>;
}

/// Kernel mutex service.
pub trait KernelSync: Send + Sync {
    fn create_mutex(&self, name: &str, recursive: bool) -> Result<KernelUid>;
    fn delete_mutex(&self, uid: KernelUid) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysEventPhase {
    Suspend,
    Resume,
    Other(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysEvent {
    pub phase: SysEventPhase,
    pub id: u32,
}

pub type SysEventHandler = Box<dyn Fn(SysEvent) -> i32 + Send + Sync>;

/// Suspend/resume notification service.
pub trait SysEventRegistry: Send + Sync {
    fn register(&self, name: &str, handler: SysEventHandler) -> Result<KernelUid>;
    fn unregister(&self, uid: KernelUid) -> Result<()>;
}

/// Device classes known to the storage driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdifDevice {
    Internal = 0,
    GameCard = 1,
    MemoryCard = 2,
}

/// The host storage driver's original (un-intercepted) entry points.
///
/// Signatures mirror the host's: addresses are passed as [`HostAddr`], data buffers as slices,
/// and results follow the host convention (negative = error).
pub trait SdifDriver: Send + Sync {
    /// Global context of `device`, or `None` while the driver has not set it up.
    fn sd_context_global(&self, device: SdifDevice) -> Option<HostAddr>;

    fn read_sector(&self, ctx_part: HostAddr, sector: u32, buf: &mut [u8], sectors: u32) -> i32;
    fn write_sector(&self, ctx_part: HostAddr, sector: u32, buf: &mut [u8], sectors: u32) -> i32;
    fn gc_cmd56_handshake(&self, param0: i32) -> i32;
    fn send_command(
        &self,
        ctx: HostAddr,
        cmd1: HostAddr,
        cmd2: HostAddr,
        n_iter: i32,
        num: i32,
    ) -> i32;
    fn fast_mutex_lock(&self, mutex: HostAddr) -> i32;
    fn fast_mutex_unlock(&self, mutex: HostAddr) -> i32;
}

/// Every host service the shim consumes.
#[derive(Clone)]
pub struct HostServices {
    pub modules: Arc<dyn ModuleResolver>,
    pub hooks: Arc<dyn HookRegistry>,
    pub memory: Arc<dyn HostMemory>,
    pub translator: Arc<dyn AddressTranslator>,
    pub sync: Arc<dyn KernelSync>,
    pub sysevents: Option<Arc<dyn SysEventRegistry>>,
    pub sdif: Arc<dyn SdifDriver>,
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices")
            .field("sysevents", &self.sysevents.is_some())
            .finish_non_exhaustive()
    }
}

/// Reads the global-context back-pointer of a device part.
pub fn part_global_context(memory: &dyn HostMemory, ctx_part: HostAddr) -> Result<HostAddr> {
    if ctx_part.is_null() {
        return Err(HostError::OutOfRange {
            addr: ctx_part,
            len: 4,
        });
    }
    memory.read_addr(ctx_part.offset(crate::layout::part::GLOBAL_CTX))
}
