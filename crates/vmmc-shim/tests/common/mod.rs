#![allow(dead_code)]

use std::sync::Arc;

use vmmc_emu::{Engine, IdentityRegion, KeyMaterial, MediaIdBlock, MemImage};
use vmmc_host::layout::{
    gc_auth_data, sdif_data, DATA_SEGMENT, GC_AUTH_MODULE, SDIF_MODULE, SDSTOR_MODULE,
    SECTOR_SIZE, TEXT_SEGMENT,
};
use vmmc_host::testing::{
    FakeHooks, FakeKernelSync, FakeModules, FakeSysEvents, FlatMemory, OffsetTranslator,
    RecordingSdif,
};
use vmmc_host::{HostAddr, HostMemory, HostServices, SdifDevice};
use vmmc_shim::{Interceptor, ShimConfig};

pub const MEM_BASE: HostAddr = HostAddr(0x8100_0000);
pub const MEM_LEN: usize = 0x10000;

pub const SDIF_DATA: HostAddr = MEM_BASE;
pub const SDIF_TEXT: HostAddr = HostAddr(0x8200_0000);
pub const SDSTOR_TEXT: HostAddr = HostAddr(0x8300_0000);
pub const GC_AUTH_DATA: HostAddr = HostAddr(0x8100_8000);

pub const GCTX: HostAddr = SDIF_DATA.offset(sdif_data::GC_GLOBAL_CTX);
pub const KEY_SLOT: HostAddr = GC_AUTH_DATA.offset(gc_auth_data::CMD56_KEY_SLOT);

/// Device part owned by the emulated card.
pub const CARD_PART: HostAddr = HostAddr(0x8100_B000);
/// Device part owned by some other device class.
pub const OTHER_PART: HostAddr = HostAddr(0x8100_C000);
pub const OTHER_GCTX: HostAddr = HostAddr(0x8100_A000);

pub const IMAGE_SECTORS: usize = 64;
pub const KEY: KeyMaterial = [0x3C; 0x20];

pub fn image_bytes() -> Vec<u8> {
    (0..IMAGE_SECTORS * SECTOR_SIZE)
        .map(|i| ((i / SECTOR_SIZE) as u8).wrapping_mul(13) ^ (i as u8))
        .collect()
}

pub fn image_range(sector: usize, sectors: usize) -> Vec<u8> {
    image_bytes()[sector * SECTOR_SIZE..(sector + sectors) * SECTOR_SIZE].to_vec()
}

pub fn engine() -> Arc<Engine> {
    Arc::new(Engine::new(
        Box::new(MemImage::new(KEY, image_bytes())),
        MediaIdBlock::new(IdentityRegion::DEFAULT),
    ))
}

pub fn all_modules() -> FakeModules {
    FakeModules::new()
        .with_segment(SDIF_MODULE, DATA_SEGMENT, SDIF_DATA)
        .with_segment(SDIF_MODULE, TEXT_SEGMENT, SDIF_TEXT)
        .with_segment(SDSTOR_MODULE, TEXT_SEGMENT, SDSTOR_TEXT)
        .with_segment(GC_AUTH_MODULE, DATA_SEGMENT, GC_AUTH_DATA)
}

pub struct Harness {
    pub memory: Arc<FlatMemory>,
    pub modules: Arc<FakeModules>,
    pub hooks: Arc<FakeHooks>,
    pub translator: Arc<OffsetTranslator>,
    pub sync: Arc<FakeKernelSync>,
    pub sysevents: Arc<FakeSysEvents>,
    pub sdif: Arc<RecordingSdif>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_modules(all_modules())
    }

    pub fn with_modules(modules: FakeModules) -> Self {
        let memory = FlatMemory::new(MEM_BASE, MEM_LEN);
        memory.write_addr(CARD_PART, GCTX).unwrap();
        memory.write_addr(OTHER_PART, OTHER_GCTX).unwrap();
        let sdif = RecordingSdif::new();
        sdif.set_global_context(SdifDevice::GameCard, GCTX);
        sdif.set_global_context(SdifDevice::Internal, OTHER_GCTX);

        Self {
            memory: Arc::new(memory),
            modules: Arc::new(modules),
            hooks: Arc::new(FakeHooks::new()),
            translator: Arc::new(OffsetTranslator::new(0x4000_0000)),
            sync: Arc::new(FakeKernelSync::new()),
            sysevents: Arc::new(FakeSysEvents::new()),
            sdif: Arc::new(sdif),
        }
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

    pub fn interceptor(&self, config: &ShimConfig) -> Interceptor {
        Interceptor::new(self.services(), engine(), config)
    }

    /// An interceptor with every hook installed.
    pub fn installed(&self) -> Interceptor {
        let interceptor = self.interceptor(&ShimConfig::default());
        interceptor.install().unwrap();
        interceptor
    }
}
