use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use vmmc_channel::{ReadChannel, Transfer, TransferHandler};
use vmmc_emu::{Engine, SdStatus};
use vmmc_host::layout::{fast_mutex, gc_auth_data, GC_AUTH_MODULE, SECTOR_SIZE};
use vmmc_host::{
    part_global_context, HookHandle, HookPoint, HostAddr, HostServices, KernelUid, SysEvent,
    SysEventPhase,
};
use vmmc_recovery::{QueueRecovery, RecoveryError, RecoveryReport, RecoveryTargets};

use crate::card::EmulatedCard;
use crate::config::ShimConfig;
use crate::locks::{LockPolicy, LockPolicyTable};
use crate::ShimError;

/// Kernel mutex created alongside the hooks. Reserved; nothing locks it.
pub const RESERVED_MUTEX_NAME: &str = "SceSdif1_Emu";

pub const SYSEVENT_HANDLER_NAME: &str = "SceSdifSysEvent";

/// Why a hook point was left inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ModuleNotLoaded,
    WorkerUnavailable,
    KeySlotUnresolved,
    InstallFailed { status: i32 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ModuleNotLoaded => f.write_str("module not loaded"),
            SkipReason::WorkerUnavailable => f.write_str("read worker unavailable"),
            SkipReason::KeySlotUnresolved => f.write_str("cmd56 key slot unresolved"),
            SkipReason::InstallFailed { status } => write!(f, "install failed ({status:#010x})"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: Vec<HookPoint>,
    pub skipped: Vec<(HookPoint, SkipReason)>,
    pub worker: bool,
    pub reserved_mutex: bool,
    pub sysevents: bool,
}

/// Serves channel transfers from the backing image.
struct EngineReads {
    engine: Arc<Engine>,
}

impl TransferHandler for EngineReads {
    fn handle(&mut self, transfer: &mut Transfer) -> i32 {
        let (sector, sectors) = (transfer.sector, transfer.sectors);
        self.engine
            .read_image(sector, &mut transfer.buffer, sectors)
            .code()
    }
}

#[derive(Debug, Default)]
struct Installation {
    hooks: Vec<(HookPoint, HookHandle)>,
    reserved_mutex: Option<KernelUid>,
    sysevent: Option<KernelUid>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("recovering poisoned interceptor lock");
            poisoned.into_inner()
        }
    }
}

fn sysevent_handler(event: SysEvent) -> i32 {
    match event.phase {
        SysEventPhase::Suspend => tracing::debug!(id = event.id, "sysevent suspend"),
        SysEventPhase::Resume => tracing::debug!(id = event.id, "sysevent resume"),
        SysEventPhase::Other(phase) => tracing::trace!(id = event.id, phase, "sysevent"),
    }
    0
}

/// Decides, per intercepted call, whether it belongs to the emulated card.
///
/// Calls for any other device go to the original driver entry point untouched and its result
/// is returned verbatim. Calls for the emulated card are answered by the [`Engine`]: reads via
/// the worker thread, everything else synchronously.
pub struct Interceptor {
    host: HostServices,
    engine: Arc<Engine>,
    worker_name: String,
    sysevents: bool,
    card: EmulatedCard,
    locks: LockPolicyTable,
    recovery: QueueRecovery,
    key_slot: Mutex<Option<HostAddr>>,
    channel: Mutex<Option<Arc<ReadChannel>>>,
    installation: Mutex<Option<Installation>>,
}

impl Interceptor {
    pub fn new(host: HostServices, engine: Arc<Engine>, config: &ShimConfig) -> Self {
        Self {
            host,
            engine,
            worker_name: config.worker_name.clone(),
            sysevents: config.sysevents,
            card: EmulatedCard::new(),
            locks: LockPolicyTable::new(),
            recovery: QueueRecovery::new(),
            key_slot: Mutex::new(None),
            channel: Mutex::new(None),
            installation: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn locks(&self) -> &LockPolicyTable {
        &self.locks
    }

    pub fn is_installed(&self) -> bool {
        lock(&self.installation).is_some()
    }

    /// Installs every hook point it can. Points that cannot be installed are logged, reported
    /// and left inactive; none of that is an error.
    pub fn install(&self) -> Result<InstallReport, ShimError> {
        let mut installation = lock(&self.installation);
        if installation.is_some() {
            return Err(ShimError::AlreadyInstalled);
        }
        let mut report = InstallReport::default();
        let mut inst = Installation::default();

        match self.host.sync.create_mutex(RESERVED_MUTEX_NAME, true) {
            Ok(uid) => {
                inst.reserved_mutex = Some(uid);
                report.reserved_mutex = true;
            }
            Err(err) => tracing::warn!(error = %err, "failed to create {RESERVED_MUTEX_NAME}"),
        }

        let key_slot = match self
            .host
            .modules
            .data_address(GC_AUTH_MODULE, gc_auth_data::CMD56_KEY_SLOT)
        {
            Ok(addr) if !addr.is_null() => Some(addr),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(error = %err, "failed to resolve cmd56 key slot");
                None
            }
        };
        *lock(&self.key_slot) = key_slot;

        let handler = EngineReads {
            engine: Arc::clone(&self.engine),
        };
        let channel = match ReadChannel::spawn(&self.worker_name, handler) {
            Ok(channel) => Some(Arc::new(channel)),
            Err(err) => {
                tracing::warn!(error = %err, "failed to start read worker");
                None
            }
        };
        report.worker = channel.is_some();
        *lock(&self.channel) = channel;

        self.emulated_global_context();

        let mut loaded: HashMap<&'static str, bool> = HashMap::new();
        for point in HookPoint::ALL {
            let target = point.target();
            let module = target.module();
            let module_loaded = *loaded.entry(module).or_insert_with(|| {
                match self.host.modules.module_id(module) {
                    Ok(_) => true,
                    Err(err) => {
                        tracing::warn!(module, error = %err, "module not loaded");
                        false
                    }
                }
            });

            let skip = if !module_loaded {
                Some(SkipReason::ModuleNotLoaded)
            } else if point == HookPoint::SdRead && !report.worker {
                Some(SkipReason::WorkerUnavailable)
            } else if point == HookPoint::GcCmd56Handshake && key_slot.is_none() {
                Some(SkipReason::KeySlotUnresolved)
            } else {
                None
            };
            if let Some(reason) = skip {
                tracing::info!(hook = point.name(), %reason, "hook skipped");
                report.skipped.push((point, reason));
                continue;
            }

            match self.host.hooks.install(&target) {
                Ok(handle) => {
                    tracing::info!(hook = point.name(), "init hook");
                    inst.hooks.push((point, handle));
                    report.installed.push(point);
                }
                Err(err) => {
                    tracing::warn!(hook = point.name(), error = %err, "failed to init hook");
                    report.skipped.push((
                        point,
                        SkipReason::InstallFailed {
                            status: err.as_status(),
                        },
                    ));
                }
            }
        }

        if self.sysevents {
            match &self.host.sysevents {
                Some(registry) => {
                    match registry.register(SYSEVENT_HANDLER_NAME, Box::new(sysevent_handler)) {
                        Ok(uid) => {
                            inst.sysevent = Some(uid);
                            report.sysevents = true;
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to register sysevent handler")
                        }
                    }
                }
                None => tracing::debug!("no sysevent service; handler not registered"),
            }
        }

        *installation = Some(inst);
        Ok(report)
    }

    /// Releases hooks in reverse installation order, then stops the worker and frees the
    /// kernel objects. Release failures are logged. Does nothing if not installed.
    pub fn uninstall(&self) {
        let Some(inst) = lock(&self.installation).take() else {
            return;
        };

        for (point, handle) in inst.hooks.into_iter().rev() {
            match self.host.hooks.release(handle) {
                Ok(()) => tracing::info!(hook = point.name(), "deinit hook"),
                Err(err) => {
                    tracing::warn!(hook = point.name(), error = %err, "failed to deinit hook")
                }
            }
        }

        if let (Some(uid), Some(registry)) = (inst.sysevent, &self.host.sysevents) {
            if let Err(err) = registry.unregister(uid) {
                tracing::warn!(error = %err, "failed to unregister sysevent handler");
            }
        }

        let channel = lock(&self.channel).take();
        if let Some(channel) = channel {
            channel.close();
        }
        *lock(&self.key_slot) = None;

        if let Some(uid) = inst.reserved_mutex {
            if let Err(err) = self.host.sync.delete_mutex(uid) {
                tracing::warn!(error = %err, "failed to delete {RESERVED_MUTEX_NAME}");
            }
        }
    }

    /// Global context of the emulated card, if the driver has one yet.
    ///
    /// The first successful lookup is cached and registers the card's fast mutex as a no-op.
    pub fn emulated_global_context(&self) -> Option<HostAddr> {
        let (gctx, fresh) = self.card.resolve(&*self.host.sdif);
        if let (Some(gctx), true) = (gctx, fresh) {
            self.locks.register(fast_mutex(gctx), LockPolicy::NoOp);
        }
        gctx
    }

    /// Whether the device part at `ctx_part` belongs to the emulated card.
    pub fn is_emulated_part(&self, ctx_part: HostAddr) -> bool {
        let Some(gctx) = self.emulated_global_context() else {
            return false;
        };
        match part_global_context(&*self.host.memory, ctx_part) {
            Ok(owner) => owner == gctx,
            Err(err) => {
                tracing::trace!(%ctx_part, error = %err, "unreadable device part; passing through");
                false
            }
        }
    }

    pub fn sd_read(&self, ctx_part: HostAddr, sector: u32, buf: &mut [u8], sectors: u32) -> i32 {
        if !self.is_emulated_part(ctx_part) {
            return self.host.sdif.read_sector(ctx_part, sector, buf, sectors);
        }
        if let Some(status) = self.engine.read_media_id(sector, buf, sectors) {
            return status.code();
        }

        let channel = lock(&self.channel).clone();
        let result = match channel {
            Some(channel) => channel.read(ctx_part, sector, buf, sectors),
            None => Err(vmmc_channel::ChannelError::Closed),
        };
        match result {
            Ok(res) => res,
            Err(err) => {
                tracing::warn!(error = %err, sector, sectors, "emulated read failed");
                let n = (sectors as usize * SECTOR_SIZE).min(buf.len());
                buf[..n].fill(0);
                SdStatus::ReadFailed.code()
            }
        }
    }

    pub fn sd_write(&self, ctx_part: HostAddr, sector: u32, buf: &mut [u8], sectors: u32) -> i32 {
        if !self.is_emulated_part(ctx_part) {
            return self.host.sdif.write_sector(ctx_part, sector, buf, sectors);
        }
        self.engine.write(sector, buf, sectors).code()
    }

    /// The handshake is only issued for game cards in MMC mode, so once the key slot is known
    /// it is always answered from the dump.
    pub fn gc_cmd56_handshake(&self, param0: i32) -> i32 {
        let key_slot = *lock(&self.key_slot);
        match key_slot {
            Some(slot) => self
                .engine
                .override_cmd56_handshake(&*self.host.memory, slot),
            None => self.host.sdif.gc_cmd56_handshake(param0),
        }
    }

    pub fn send_command(
        &self,
        ctx: HostAddr,
        cmd1: HostAddr,
        cmd2: HostAddr,
        n_iter: i32,
        num: i32,
    ) -> i32 {
        match self.emulated_global_context() {
            Some(gctx) if gctx == ctx => {
                self.engine
                    .emulate_command(&*self.host.memory, cmd1, cmd2)
            }
            _ => self.host.sdif.send_command(ctx, cmd1, cmd2, n_iter, num),
        }
    }

    pub fn fast_mutex_lock(&self, mutex: HostAddr) -> i32 {
        self.emulated_global_context();
        match self.locks.policy(mutex) {
            LockPolicy::NoOp => 0,
            LockPolicy::Passthrough => self.host.sdif.fast_mutex_lock(mutex),
        }
    }

    pub fn fast_mutex_unlock(&self, mutex: HostAddr) -> i32 {
        self.emulated_global_context();
        match self.locks.policy(mutex) {
            LockPolicy::NoOp => 0,
            LockPolicy::Passthrough => self.host.sdif.fast_mutex_unlock(mutex),
        }
    }

    /// Rebuilds the game-card command queue in place.
    pub fn recover_queue(&self) -> Result<RecoveryReport, RecoveryError> {
        let targets = RecoveryTargets::resolve(&*self.host.modules);
        self.recovery
            .recover(&*self.host.memory, &*self.host.translator, &targets)
    }
}

impl Drop for Interceptor {
    fn drop(&mut self) {
        self.uninstall();
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("engine", &self.engine)
            .field("card", &self.card.cached())
            .field("installed", &self.is_installed())
            .finish_non_exhaustive()
    }
}
