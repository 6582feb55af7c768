use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use vmmc_host::layout::{
    cmd_entry, command_entry, context_data, ctx_data, global_ctx, sdif_data, COMMAND_RING_LEN,
    SDIF_MODULE,
};
use vmmc_host::testing::{FakeModules, FlatMemory, OffsetTranslator};
use vmmc_host::{AddressTranslator, HostAddr, HostMemory};
use vmmc_recovery::{
    QueueRecovery, RecoveryError, RecoveryState, RecoveryTargets, ARRAY_IDX_VALUE, UNK_18_VALUE,
    UNK_34_VALUE, UNK_38_VALUE,
};

const DATA_BASE: HostAddr = HostAddr(0x8100_0000);
const DATA_LEN: usize = 0x8000;
const PADDR_DELTA: u32 = 0x4000_0000;

fn gctx() -> HostAddr {
    DATA_BASE.offset(sdif_data::GC_GLOBAL_CTX)
}

fn modules() -> FakeModules {
    FakeModules::new().with_segment(SDIF_MODULE, 1, DATA_BASE)
}

/// Data section filled with a non-zero garbage pattern, as a wedged driver would leave it.
fn garbage_memory(seed: u8) -> FlatMemory {
    let memory = FlatMemory::new(DATA_BASE, DATA_LEN);
    let garbage: Vec<u8> = (0..DATA_LEN)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) | 1)
        .collect();
    memory.write(DATA_BASE, &garbage).unwrap();
    memory
}

fn entry_next(memory: &FlatMemory, i: usize) -> HostAddr {
    memory
        .read_addr(command_entry(gctx(), i).offset(cmd_entry::NEXT))
        .unwrap()
}

#[test]
fn targets_resolve_from_the_data_section() {
    let targets = RecoveryTargets::resolve(&modules());
    assert_eq!(targets.global_ctx, Some(DATA_BASE.offset(0x2500)));
    assert_eq!(targets.mmc_part, Some(DATA_BASE.offset(0x7218)));
    assert_eq!(targets.sd_part, Some(DATA_BASE.offset(0x7670)));

    let missing = RecoveryTargets::resolve(&FakeModules::new());
    assert_eq!(missing, RecoveryTargets::default());
}

#[test]
fn garbage_ring_is_relinked_and_terminated() {
    let memory = garbage_memory(0x3C);
    let translator = OffsetTranslator::new(PADDR_DELTA);
    let report = QueueRecovery::new()
        .recover(&memory, &translator, &RecoveryTargets::resolve(&modules()))
        .unwrap();

    assert!(report.ring_relinked && report.context_rebuilt);
    assert!(report.translation_failures.is_empty());
    assert!(report.skipped.is_empty());

    for i in 0..COMMAND_RING_LEN - 1 {
        assert_eq!(entry_next(&memory, i), command_entry(gctx(), i + 1), "entry {i}");
    }
    assert_eq!(entry_next(&memory, COMMAND_RING_LEN - 1), HostAddr::NULL);

    for i in 0..COMMAND_RING_LEN {
        let entry = command_entry(gctx(), i);
        let index = memory.read_u32(entry.offset(cmd_entry::ARRAY_INDEX)).unwrap();
        assert_eq!(index, i as u32);
        for region in cmd_entry::DMA_REGIONS {
            let paddr = memory.read_u32(entry.offset(region.paddr_field)).unwrap();
            assert_eq!(paddr, entry.offset(region.offset).get() + PADDR_DELTA);
        }
        // Everything else in the entry was zeroed.
        assert_eq!(memory.read_u32(entry.offset(cmd_entry::COMMAND)).unwrap(), 0);
        assert_eq!(memory.read_u32(entry.offset(cmd_entry::ERROR_CODE)).unwrap(), 0);
    }
}

#[test]
fn context_is_rebuilt_around_preserved_fields() {
    let memory = garbage_memory(0x11);
    let ctx = context_data(gctx());
    let before = memory.snapshot(ctx, ctx_data::SIZE);

    QueueRecovery::new()
        .recover(
            &memory,
            &OffsetTranslator::new(0),
            &RecoveryTargets::resolve(&modules()),
        )
        .unwrap();

    let word = |off: u32| memory.read_u32(ctx.offset(off)).unwrap();
    let old_word = |off: u32| {
        let o = off as usize;
        u32::from_le_bytes(before[o..o + 4].try_into().unwrap())
    };

    assert_eq!(HostAddr(word(ctx_data::CMD_PTR)), command_entry(gctx(), 0));
    assert_eq!(
        HostAddr(word(ctx_data::CMD_PTR_NEXT)),
        command_entry(gctx(), COMMAND_RING_LEN - 1)
    );
    assert_eq!(word(ctx_data::UNK_18), UNK_18_VALUE);
    assert_eq!(word(ctx_data::ARRAY_IDX), ARRAY_IDX_VALUE);
    assert_eq!(word(ctx_data::UNK_34), UNK_34_VALUE);
    assert_eq!(word(ctx_data::UNK_38), UNK_38_VALUE);

    for off in [
        ctx_data::MEMBASE_1000,
        ctx_data::UID_1000,
        ctx_data::EVID,
        ctx_data::UID_10000,
        ctx_data::MEMBASE_10000,
    ] {
        assert_eq!(word(off), old_word(off), "field {off:#x}");
    }
    let m = ctx_data::FAST_MUTEX as usize;
    assert_eq!(
        memory.snapshot(ctx.offset(ctx_data::FAST_MUTEX), ctx_data::FAST_MUTEX_SIZE),
        before[m..m + ctx_data::FAST_MUTEX_SIZE]
    );

    // Unnamed fields are cleared.
    assert_eq!(word(0x08), 0);
    assert_eq!(word(0x24), 0);
}

#[test]
fn part_blocks_are_cleared_and_neighbours_untouched() {
    let memory = garbage_memory(0x77);
    let after_sd = DATA_BASE.offset(sdif_data::SD_PART + sdif_data::SD_PART_SIZE as u32);
    let neighbour = memory.read_u32(after_sd).unwrap();

    let report = QueueRecovery::new()
        .recover(
            &memory,
            &OffsetTranslator::new(0),
            &RecoveryTargets::resolve(&modules()),
        )
        .unwrap();
    assert!(report.mmc_part_cleared && report.sd_part_cleared);

    let mmc = memory.snapshot(DATA_BASE.offset(sdif_data::MMC_PART), sdif_data::MMC_PART_SIZE);
    let sd = memory.snapshot(DATA_BASE.offset(sdif_data::SD_PART), sdif_data::SD_PART_SIZE);
    assert!(mmc.iter().all(|&b| b == 0));
    assert!(sd.iter().all(|&b| b == 0));
    assert_eq!(memory.read_u32(after_sd).unwrap(), neighbour);

    let end_of_gctx = gctx().offset(global_ctx::SIZE as u32);
    assert_ne!(memory.read_u32(end_of_gctx).unwrap(), 0);
}

#[test]
fn translation_failure_is_reported_and_recovery_continues() {
    let memory = garbage_memory(0x05);
    let translator = OffsetTranslator::new(PADDR_DELTA);
    let entry3 = command_entry(gctx(), 3);
    let failing = cmd_entry::DMA_REGIONS[1];
    translator.fail_for(entry3.offset(failing.offset));

    let report = QueueRecovery::new()
        .recover(&memory, &translator, &RecoveryTargets::resolve(&modules()))
        .unwrap();

    assert_eq!(report.translation_failures.len(), 1);
    assert_eq!(report.translation_failures[0].entry, 3);
    assert_eq!(report.translation_failures[0].paddr_field, failing.paddr_field);
    assert_eq!(
        memory.read_u32(entry3.offset(failing.paddr_field)).unwrap(),
        0
    );
    assert!(report.context_rebuilt);
    assert_eq!(translator.calls(), COMMAND_RING_LEN * cmd_entry::DMA_REGIONS.len());
}

#[test]
fn unresolved_targets_are_skipped() {
    let memory = garbage_memory(0x22);
    let before = memory.snapshot(DATA_BASE, DATA_LEN);
    let report = QueueRecovery::new()
        .recover(&memory, &OffsetTranslator::new(0), &RecoveryTargets::default())
        .unwrap();
    assert_eq!(report.skipped, vec!["global_ctx", "mmc_part", "sd_part"]);
    assert_eq!(memory.snapshot(DATA_BASE, DATA_LEN), before);
}

#[test]
fn memory_failure_aborts_recovery() {
    let memory = FlatMemory::new(DATA_BASE, 0x1000);
    let err = QueueRecovery::new()
        .recover(
            &memory,
            &OffsetTranslator::new(0),
            &RecoveryTargets::resolve(&modules()),
        )
        .unwrap_err();
    assert!(matches!(err, RecoveryError::Memory(_)));
}

/// Translator that parks the first call until released.
struct GatedTranslator {
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl AddressTranslator for GatedTranslator {
    fn physical_address(&self, vaddr: HostAddr) -> vmmc_host::Result<u32> {
        if let Some(entered) = self.entered.lock().unwrap().take() {
            entered.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        Ok(vaddr.get())
    }
}

#[test]
fn concurrent_recovery_is_rejected() {
    let memory = Arc::new(garbage_memory(0x09));
    let recovery = Arc::new(QueueRecovery::new());
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let translator = Arc::new(GatedTranslator {
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
    });
    let targets = RecoveryTargets::resolve(&modules());

    let first = {
        let memory = Arc::clone(&memory);
        let recovery = Arc::clone(&recovery);
        let translator = Arc::clone(&translator);
        std::thread::spawn(move || recovery.recover(&*memory, &*translator, &targets))
    };

    entered_rx.recv().unwrap();
    assert_eq!(recovery.state(), RecoveryState::Recovering);
    let second = recovery.recover(&*memory, &*translator, &targets);
    assert!(matches!(second, Err(RecoveryError::InProgress)));

    release_tx.send(()).unwrap();
    assert!(first.join().unwrap().is_ok());
    assert_eq!(recovery.state(), RecoveryState::Normal);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn recovery_is_idempotent_on_any_garbage(seed in any::<u8>(), delta in any::<u32>()) {
        let memory = garbage_memory(seed);
        let translator = OffsetTranslator::new(delta);
        let targets = RecoveryTargets::resolve(&modules());
        let recovery = QueueRecovery::new();

        recovery.recover(&memory, &translator, &targets).unwrap();
        let once = memory.snapshot(DATA_BASE, DATA_LEN);
        recovery.recover(&memory, &translator, &targets).unwrap();
        prop_assert_eq!(memory.snapshot(DATA_BASE, DATA_LEN), once);

        for i in 0..COMMAND_RING_LEN {
            let expected = if i + 1 < COMMAND_RING_LEN {
                command_entry(gctx(), i + 1)
            } else {
                HostAddr::NULL
            };
            prop_assert_eq!(entry_next(&memory, i), expected);
        }
    }
}
