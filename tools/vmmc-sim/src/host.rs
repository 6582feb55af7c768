//! In-memory host the simulator runs the shim against.

use std::sync::Arc;

use vmmc_host::layout::{
    gc_auth_data, global_ctx, sdif_data, DATA_SEGMENT, GC_AUTH_MODULE, SDIF_MODULE,
    SDSTOR_MODULE, TEXT_SEGMENT,
};
use vmmc_host::testing::{
    FakeHooks, FakeKernelSync, FakeModules, FakeSysEvents, FlatMemory, OffsetTranslator,
    RecordingSdif,
};
use vmmc_host::{HostAddr, HostMemory, HostServices, SdifDevice};

const MEM_BASE: HostAddr = HostAddr(0x8100_0000);
const MEM_LEN: usize = 0x10000;
const PADDR_DELTA: u32 = 0x4000_0000;

pub const SDIF_DATA: HostAddr = MEM_BASE;
const SDIF_TEXT: HostAddr = HostAddr(0x8200_0000);
const SDSTOR_TEXT: HostAddr = HostAddr(0x8300_0000);
const GC_AUTH_DATA: HostAddr = HostAddr(0x8100_8000);

pub const GCTX: HostAddr = SDIF_DATA.offset(sdif_data::GC_GLOBAL_CTX);
pub const KEY_SLOT: HostAddr = GC_AUTH_DATA.offset(gc_auth_data::CMD56_KEY_SLOT);
pub const CARD_PART: HostAddr = HostAddr(0x8100_B000);
pub const OTHER_PART: HostAddr = HostAddr(0x8100_C000);
const OTHER_GCTX: HostAddr = HostAddr(0x8100_A000);

pub struct SimHost {
    pub memory: Arc<FlatMemory>,
    pub hooks: Arc<FakeHooks>,
    pub sdif: Arc<RecordingSdif>,
    modules: Arc<FakeModules>,
    translator: Arc<OffsetTranslator>,
    sync: Arc<FakeKernelSync>,
    sysevents: Arc<FakeSysEvents>,
}

impl SimHost {
    /// A host with the storage, filesystem and auth modules loaded and one game card present.
    pub fn new() -> vmmc_host::Result<Self> {
        let modules = FakeModules::new()
            .with_segment(SDIF_MODULE, DATA_SEGMENT, SDIF_DATA)
            .with_segment(SDIF_MODULE, TEXT_SEGMENT, SDIF_TEXT)
            .with_segment(SDSTOR_MODULE, TEXT_SEGMENT, SDSTOR_TEXT)
            .with_segment(GC_AUTH_MODULE, DATA_SEGMENT, GC_AUTH_DATA);

        let memory = FlatMemory::new(MEM_BASE, MEM_LEN);
        memory.write_addr(CARD_PART, GCTX)?;
        memory.write_addr(OTHER_PART, OTHER_GCTX)?;

        let sdif = RecordingSdif::new();
        sdif.set_global_context(SdifDevice::GameCard, GCTX);
        sdif.set_global_context(SdifDevice::Internal, OTHER_GCTX);

        Ok(Self {
            memory: Arc::new(memory),
            hooks: Arc::new(FakeHooks::new()),
            sdif: Arc::new(sdif),
            modules: Arc::new(modules),
            translator: Arc::new(OffsetTranslator::new(PADDR_DELTA)),
            sync: Arc::new(FakeKernelSync::new()),
            sysevents: Arc::new(FakeSysEvents::new()),
        })
    }

    pub fn services(&self) -> HostServices {
        HostServices {
            modules: self.modules.clone(),
            hooks: self.hooks.clone(),
            memory: self.memory.clone(),
            translator: self.translator.clone(),
            sync: self.sync.clone(),
            sysevents: Some(self.sysevents.clone()),
            sdif: self.sdif.clone(),
        }
    }

    /// Leaves the game-card queue the way a wedged driver does.
    pub fn scribble_queue(&self) -> vmmc_host::Result<()> {
        let garbage: Vec<u8> = (0..global_ctx::SIZE)
            .map(|i| (i as u8).wrapping_mul(29) | 0x81)
            .collect();
        self.memory.write(GCTX, &garbage)
    }
}
