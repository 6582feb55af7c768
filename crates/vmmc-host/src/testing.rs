//! In-memory fakes of the host services.
//!
//! These back the integration tests of every crate in the workspace and the `vmmc-sim` tool.
//! They are deliberately simple: no fake models timing, and all state is inspectable.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::hooks::HookTarget;
use crate::services::{
    AddressTranslator, HookHandle, HookRegistry, HostMemory, KernelSync, KernelUid, ModuleId,
    ModuleResolver, SdifDevice, SdifDriver, SysEvent, SysEventHandler, SysEventRegistry,
};
use crate::{HostAddr, HostError, Result};

const STATUS_FAKE_FAILURE: i32 = 0x8002_0001_u32 as i32;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// A contiguous window of host memory starting at `base`.
pub struct FlatMemory {
    base: HostAddr,
    bytes: Mutex<Vec<u8>>,
}

impl FlatMemory {
    pub fn new(base: HostAddr, len: usize) -> Self {
        Self {
            base,
            bytes: Mutex::new(vec![0u8; len]),
        }
    }

    pub fn base(&self) -> HostAddr {
        self.base
    }

    pub fn len(&self) -> usize {
        lock(&self.bytes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of `len` bytes at `addr`; panics when out of range.
    pub fn snapshot(&self, addr: HostAddr, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read(addr, &mut out)
            .unwrap_or_else(|err| panic!("snapshot of {addr} failed: {err}"));
        out
    }

    fn range(&self, addr: HostAddr, len: usize, total: usize) -> Result<std::ops::Range<usize>> {
        let err = HostError::OutOfRange { addr, len };
        let start = addr.get().checked_sub(self.base.get()).ok_or(err.clone())? as usize;
        let end = start.checked_add(len).ok_or(err.clone())?;
        if end > total {
            return Err(err);
        }
        Ok(start..end)
    }
}

impl HostMemory for FlatMemory {
    fn read(&self, addr: HostAddr, dst: &mut [u8]) -> Result<()> {
        let bytes = lock(&self.bytes);
        let range = self.range(addr, dst.len(), bytes.len())?;
        dst.copy_from_slice(&bytes[range]);
        Ok(())
    }

    fn write(&self, addr: HostAddr, src: &[u8]) -> Result<()> {
        let mut bytes = lock(&self.bytes);
        let total = bytes.len();
        let range = self.range(addr, src.len(), total)?;
        bytes[range].copy_from_slice(src);
        Ok(())
    }
}

/// Module table keyed by name, with a base address per (module, segment).
#[derive(Default)]
pub struct FakeModules {
    ids: HashMap<String, ModuleId>,
    segments: HashMap<(ModuleId, u32), HostAddr>,
}

impl FakeModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segment(mut self, name: &str, segment: u32, base: HostAddr) -> Self {
        let next = ModuleId(0x0040_0001 + self.ids.len() as i32);
        let id = *self.ids.entry(name.to_owned()).or_insert(next);
        self.segments.insert((id, segment), base);
        self
    }
}

impl ModuleResolver for FakeModules {
    fn module_id(&self, name: &str) -> Result<ModuleId> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| HostError::ModuleNotFound(name.to_owned()))
    }

    fn segment_address(&self, module: ModuleId, segment: u32, offset: u32) -> Result<HostAddr> {
        self.segments
            .get(&(module, segment))
            .map(|base| base.offset(offset))
            .ok_or(HostError::Status {
                status: STATUS_FAKE_FAILURE,
            })
    }
}

/// Hook registry that records installs and can be told to reject targets.
#[derive(Default)]
pub struct FakeHooks {
    next_uid: AtomicI32,
    installed: Mutex<Vec<(HookHandle, HookTarget)>>,
    released: Mutex<Vec<HookTarget>>,
    rejected: Mutex<HashSet<HookTarget>>,
}

impl FakeHooks {
    pub fn new() -> Self {
        Self {
            next_uid: AtomicI32::new(0x1000),
            ..Self::default()
        }
    }

    pub fn reject(&self, target: HookTarget) {
        lock(&self.rejected).insert(target);
    }

    /// Targets currently hooked, in installation order.
    pub fn installed(&self) -> Vec<HookTarget> {
        lock(&self.installed).iter().map(|(_, t)| *t).collect()
    }

    /// Targets released so far, in release order.
    pub fn released(&self) -> Vec<HookTarget> {
        lock(&self.released).clone()
    }
}

impl HookRegistry for FakeHooks {
    fn install(&self, target: &HookTarget) -> Result<HookHandle> {
        if lock(&self.rejected).contains(target) {
            return Err(HostError::status(STATUS_FAKE_FAILURE));
        }
        let handle = HookHandle(self.next_uid.fetch_add(1, Ordering::Relaxed));
        lock(&self.installed).push((handle, *target));
        Ok(handle)
    }

    fn release(&self, handle: HookHandle) -> Result<()> {
        let mut installed = lock(&self.installed);
        let pos = installed
            .iter()
            .position(|(h, _)| *h == handle)
            .ok_or(HostError::status(STATUS_FAKE_FAILURE))?;
        let (_, target) = installed.remove(pos);
        lock(&self.released).push(target);
        Ok(())
    }
}

/// Translator that maps `vaddr` to `vaddr + delta`, failing for selected addresses.
#[derive(Default)]
pub struct OffsetTranslator {
    delta: u32,
    failing: Mutex<HashSet<HostAddr>>,
    calls: AtomicUsize,
}

impl OffsetTranslator {
    pub fn new(delta: u32) -> Self {
        Self {
            delta,
            ..Self::default()
        }
    }

    pub fn fail_for(&self, vaddr: HostAddr) {
        lock(&self.failing).insert(vaddr);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl AddressTranslator for OffsetTranslator {
    fn physical_address(&self, vaddr: HostAddr) -> Result<u32> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if lock(&self.failing).contains(&vaddr) {
            return Err(HostError::status(STATUS_FAKE_FAILURE));
        }
        Ok(vaddr.get().wrapping_add(self.delta))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedMutex {
    pub uid: KernelUid,
    pub name: String,
    pub recursive: bool,
}

#[derive(Default)]
pub struct FakeKernelSync {
    next_uid: AtomicI32,
    live: Mutex<Vec<CreatedMutex>>,
    deleted: Mutex<Vec<KernelUid>>,
}

impl FakeKernelSync {
    pub fn new() -> Self {
        Self {
            next_uid: AtomicI32::new(0x2000),
            ..Self::default()
        }
    }

    pub fn live(&self) -> Vec<CreatedMutex> {
        lock(&self.live).clone()
    }

    pub fn deleted(&self) -> Vec<KernelUid> {
        lock(&self.deleted).clone()
    }
}

impl KernelSync for FakeKernelSync {
    fn create_mutex(&self, name: &str, recursive: bool) -> Result<KernelUid> {
        let uid = self.next_uid.fetch_add(1, Ordering::Relaxed);
        lock(&self.live).push(CreatedMutex {
            uid,
            name: name.to_owned(),
            recursive,
        });
        Ok(uid)
    }

    fn delete_mutex(&self, uid: KernelUid) -> Result<()> {
        let mut live = lock(&self.live);
        let pos = live
            .iter()
            .position(|m| m.uid == uid)
            .ok_or(HostError::status(STATUS_FAKE_FAILURE))?;
        live.remove(pos);
        lock(&self.deleted).push(uid);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSysEvents {
    next_uid: AtomicI32,
    handlers: Mutex<Vec<(KernelUid, String, SysEventHandler)>>,
}

impl FakeSysEvents {
    pub fn new() -> Self {
        Self {
            next_uid: AtomicI32::new(0x3000),
            ..Self::default()
        }
    }

    pub fn registered(&self) -> Vec<String> {
        lock(&self.handlers)
            .iter()
            .map(|(_, name, _)| name.clone())
            .collect()
    }

    /// Delivers `event` to every registered handler and returns their results.
    pub fn deliver(&self, event: SysEvent) -> Vec<i32> {
        lock(&self.handlers)
            .iter()
            .map(|(_, _, handler)| handler(event))
            .collect()
    }
}

impl SysEventRegistry for FakeSysEvents {
    fn register(&self, name: &str, handler: SysEventHandler) -> Result<KernelUid> {
        let uid = self.next_uid.fetch_add(1, Ordering::Relaxed);
        lock(&self.handlers).push((uid, name.to_owned(), handler));
        Ok(uid)
    }

    fn unregister(&self, uid: KernelUid) -> Result<()> {
        let mut handlers = lock(&self.handlers);
        let pos = handlers
            .iter()
            .position(|(u, _, _)| *u == uid)
            .ok_or(HostError::status(STATUS_FAKE_FAILURE))?;
        handlers.remove(pos);
        Ok(())
    }
}

/// A call that reached the original driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdifCall {
    Read {
        ctx_part: HostAddr,
        sector: u32,
        sectors: u32,
    },
    Write {
        ctx_part: HostAddr,
        sector: u32,
        data: Vec<u8>,
    },
    Cmd56Handshake(i32),
    SendCommand {
        ctx: HostAddr,
        cmd1: HostAddr,
        cmd2: HostAddr,
    },
    Lock(HostAddr),
    Unlock(HostAddr),
}

/// Status the fake driver returns for every call. Non-zero, so a forwarded result can never
/// be mistaken for an emulated success.
pub const FAKE_DRIVER_STATUS: i32 = 0x0000_1234;

/// Deterministic byte the fake driver produces for `sector` at byte `index`.
pub fn real_device_byte(ctx_part: HostAddr, sector: u32, index: usize) -> u8 {
    let seed = ctx_part
        .get()
        .wrapping_mul(31)
        .wrapping_add(sector.wrapping_mul(0x9E37_79B9))
        .wrapping_add(index as u32);
    (seed ^ (seed >> 13)) as u8
}

/// Original driver double that records every call and serves a deterministic pattern.
pub struct RecordingSdif {
    global: Mutex<HashMap<SdifDevice, HostAddr>>,
    calls: Mutex<Vec<SdifCall>>,
}

impl Default for RecordingSdif {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSdif {
    pub fn new() -> Self {
        Self {
            global: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_global_context(&self, device: SdifDevice, gctx: HostAddr) {
        lock(&self.global).insert(device, gctx);
    }

    pub fn calls(&self) -> Vec<SdifCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: SdifCall) {
        lock(&self.calls).push(call);
    }
}

impl SdifDriver for RecordingSdif {
    fn sd_context_global(&self, device: SdifDevice) -> Option<HostAddr> {
        lock(&self.global).get(&device).copied()
    }

    fn read_sector(&self, ctx_part: HostAddr, sector: u32, buf: &mut [u8], sectors: u32) -> i32 {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = real_device_byte(ctx_part, sector, i);
        }
        self.record(SdifCall::Read {
            ctx_part,
            sector,
            sectors,
        });
        FAKE_DRIVER_STATUS
    }

    fn write_sector(&self, ctx_part: HostAddr, sector: u32, buf: &mut [u8], _sectors: u32) -> i32 {
        self.record(SdifCall::Write {
            ctx_part,
            sector,
            data: buf.to_vec(),
        });
        FAKE_DRIVER_STATUS
    }

    fn gc_cmd56_handshake(&self, param0: i32) -> i32 {
        self.record(SdifCall::Cmd56Handshake(param0));
        FAKE_DRIVER_STATUS
    }

    fn send_command(
        &self,
        ctx: HostAddr,
        cmd1: HostAddr,
        cmd2: HostAddr,
        _n_iter: i32,
        _num: i32,
    ) -> i32 {
        self.record(SdifCall::SendCommand { ctx, cmd1, cmd2 });
        FAKE_DRIVER_STATUS
    }

    fn fast_mutex_lock(&self, mutex: HostAddr) -> i32 {
        self.record(SdifCall::Lock(mutex));
        FAKE_DRIVER_STATUS
    }

    fn fast_mutex_unlock(&self, mutex: HostAddr) -> i32 {
        self.record(SdifCall::Unlock(mutex));
        FAKE_DRIVER_STATUS
    }
}
