#![forbid(unsafe_code)]

//! In-place repair of the storage driver's game-card command queue.
//!
//! The host can leave the game-card command ring and its context block in a deadlocked state.
//! We cannot recreate the host's kernel objects, so [`QueueRecovery::recover`] rewrites the
//! structures where they are: the ring is zeroed and relinked, DMA physical addresses are
//! rederived, and the context block is rebuilt around the fields that reference live kernel
//! objects. The two mode-specific part blocks are cleared as well.
//!
//! This is a repair tool, not part of normal request handling.

mod context;
mod ring;

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use vmmc_host::layout::{sdif_data, SDIF_MODULE};
use vmmc_host::{AddressTranslator, HostAddr, HostError, HostMemory, ModuleResolver};

pub use context::{ContextSnapshot, ARRAY_IDX_VALUE, UNK_18_VALUE, UNK_34_VALUE, UNK_38_VALUE};
pub use ring::{rehydrate_paddrs, relink, TranslationFailure};

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("queue recovery already in progress")]
    InProgress,

    #[error("host memory access failed during recovery: {0}")]
    Memory(#[from] HostError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Normal,
    Recovering,
}

/// Host addresses the recovery rewrites. A `None` target is skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryTargets {
    pub global_ctx: Option<HostAddr>,
    pub mmc_part: Option<HostAddr>,
    pub sd_part: Option<HostAddr>,
}

impl RecoveryTargets {
    /// Resolves every target from the storage module's data section.
    pub fn resolve(modules: &dyn ModuleResolver) -> Self {
        let lookup = |what: &'static str, offset: u32| {
            match modules.data_address(SDIF_MODULE, offset) {
                Ok(addr) if !addr.is_null() => Some(addr),
                Ok(_) => {
                    tracing::warn!(recovery_target = what, "recovery target resolved to null");
                    None
                }
                Err(err) => {
                    tracing::warn!(
                        recovery_target = what,
                        error = %err,
                        "failed to resolve recovery target"
                    );
                    None
                }
            }
        };
        Self {
            global_ctx: lookup("global_ctx", sdif_data::GC_GLOBAL_CTX),
            mmc_part: lookup("mmc_part", sdif_data::MMC_PART),
            sd_part: lookup("sd_part", sdif_data::SD_PART),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub ring_relinked: bool,
    pub translation_failures: Vec<TranslationFailure>,
    pub context_rebuilt: bool,
    pub mmc_part_cleared: bool,
    pub sd_part_cleared: bool,
    pub skipped: Vec<&'static str>,
}

/// Recovery state machine. Only one recovery runs at a time.
#[derive(Debug, Default)]
pub struct QueueRecovery {
    recovering: AtomicBool,
}

struct RecoveringGuard<'a>(&'a AtomicBool);

impl Drop for RecoveringGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl QueueRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RecoveryState {
        if self.recovering.load(Ordering::Acquire) {
            RecoveryState::Recovering
        } else {
            RecoveryState::Normal
        }
    }

    /// Rewrites the targets in place.
    ///
    /// Translation failures are logged and reported but do not stop the recovery; a host
    /// memory access failure aborts it.
    pub fn recover(
        &self,
        memory: &dyn HostMemory,
        translator: &dyn AddressTranslator,
        targets: &RecoveryTargets,
    ) -> Result<RecoveryReport, RecoveryError> {
        if self
            .recovering
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RecoveryError::InProgress);
        }
        let _guard = RecoveringGuard(&self.recovering);
        tracing::info!(?targets, "cleaning up sdif queue");

        let mut report = RecoveryReport::default();
        match targets.global_ctx {
            Some(gctx) => {
                ring::relink(memory, gctx)?;
                report.ring_relinked = true;
                report.translation_failures = ring::rehydrate_paddrs(memory, translator, gctx)?;

                let snapshot = ContextSnapshot::capture(memory, gctx)?;
                snapshot.rebuild(memory, gctx)?;
                report.context_rebuilt = true;
            }
            None => report.skipped.push("global_ctx"),
        }
        match targets.mmc_part {
            Some(part) => {
                memory.fill(part, sdif_data::MMC_PART_SIZE, 0)?;
                report.mmc_part_cleared = true;
            }
            None => report.skipped.push("mmc_part"),
        }
        match targets.sd_part {
            Some(part) => {
                memory.fill(part, sdif_data::SD_PART_SIZE, 0)?;
                report.sd_part_cleared = true;
            }
            None => report.skipped.push("sd_part"),
        }

        tracing::info!(
            translation_failures = report.translation_failures.len(),
            skipped = ?report.skipped,
            "sdif queue cleanup finished"
        );
        Ok(report)
    }
}
