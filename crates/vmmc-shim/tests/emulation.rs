mod common;

use std::sync::Arc;
use std::thread;

use common::{image_range, Harness, CARD_PART, GCTX, IMAGE_SECTORS, KEY, KEY_SLOT};
use vmmc_emu::mmc::{opcode, OCR_READY};
use vmmc_emu::SdStatus;
use vmmc_host::layout::{
    cmd_entry, command_entry, fast_mutex, DATA_SEGMENT, GC_AUTH_MODULE, SDIF_MODULE,
    SDSTOR_MODULE, SECTOR_SIZE, TEXT_SEGMENT,
};
use vmmc_host::testing::{FakeModules, SdifCall, FAKE_DRIVER_STATUS};
use vmmc_host::{HookPoint, HostAddr, HostMemory};
use vmmc_shim::{LockPolicy, ShimConfig, SkipReason};

#[test]
fn emulated_reads_come_from_the_image() {
    let h = Harness::new();
    let shim = h.installed();

    let mut buf = vec![0u8; SECTOR_SIZE * 3];
    assert_eq!(shim.sd_read(CARD_PART, 8, &mut buf, 3), 0);
    assert_eq!(buf, image_range(8, 3));

    let mut direct = vec![0u8; SECTOR_SIZE * 3];
    assert_eq!(shim.engine().read(8, &mut direct, 3), SdStatus::Success);
    assert_eq!(buf, direct);
    assert!(h.sdif.calls().is_empty());
}

#[test]
fn media_id_writes_are_read_back() {
    let h = Harness::new();
    let shim = h.installed();

    let mut id = vec![0xABu8; SECTOR_SIZE];
    assert_eq!(shim.sd_write(CARD_PART, 1, &mut id, 1), 0);

    let mut buf = vec![0u8; SECTOR_SIZE];
    assert_eq!(shim.sd_read(CARD_PART, 1, &mut buf, 1), 0);
    assert_eq!(buf, vec![0xABu8; SECTOR_SIZE]);
    assert!(h.sdif.calls().is_empty());
}

#[test]
fn writes_outside_the_media_id_are_refused() {
    let h = Harness::new();
    let shim = h.installed();

    let mut buf = vec![0x55u8; SECTOR_SIZE * 2];
    assert_eq!(
        shim.sd_write(CARD_PART, 10, &mut buf, 2),
        SdStatus::UnknownReadWrite.code()
    );
    assert!(buf.iter().all(|&b| b == 0));

    let mut back = vec![0u8; SECTOR_SIZE * 2];
    assert_eq!(shim.sd_read(CARD_PART, 10, &mut back, 2), 0);
    assert_eq!(back, image_range(10, 2));
    assert!(h.sdif.calls().is_empty());
}

#[test]
fn reads_past_the_image_fail_zeroed() {
    let h = Harness::new();
    let shim = h.installed();

    let mut buf = vec![0xEEu8; SECTOR_SIZE * 2];
    let status = shim.sd_read(CARD_PART, IMAGE_SECTORS as u32 - 1, &mut buf, 2);
    assert_eq!(status, SdStatus::ReadFailed.code());
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn short_buffers_are_rejected() {
    let h = Harness::new();
    let shim = h.installed();

    let mut buf = vec![0u8; SECTOR_SIZE];
    assert_eq!(
        shim.sd_read(CARD_PART, 4, &mut buf, 2),
        SdStatus::InvalidBuffer.code()
    );
    assert_eq!(
        shim.sd_write(CARD_PART, 1, &mut buf, 2),
        SdStatus::InvalidBuffer.code()
    );
}

#[test]
fn handshake_is_answered_with_the_dump_key() {
    let h = Harness::new();
    let shim = h.installed();

    assert_eq!(shim.gc_cmd56_handshake(3), 0);
    assert_eq!(h.memory.snapshot(KEY_SLOT, KEY.len()), KEY.to_vec());
    assert!(h.sdif.calls().is_empty());
}

#[test]
fn handshake_passes_through_without_a_key_slot() {
    let modules = FakeModules::new()
        .with_segment(SDIF_MODULE, DATA_SEGMENT, common::SDIF_DATA)
        .with_segment(SDIF_MODULE, TEXT_SEGMENT, common::SDIF_TEXT)
        .with_segment(SDSTOR_MODULE, TEXT_SEGMENT, common::SDSTOR_TEXT)
        // Loaded, but without the data segment holding the key slot.
        .with_segment(GC_AUTH_MODULE, TEXT_SEGMENT, HostAddr(0x8400_0000));
    let h = Harness::with_modules(modules);
    let shim = h.interceptor(&ShimConfig::default());
    let report = shim.install().unwrap();

    assert!(report
        .skipped
        .contains(&(HookPoint::GcCmd56Handshake, SkipReason::KeySlotUnresolved)));
    assert_eq!(shim.gc_cmd56_handshake(7), FAKE_DRIVER_STATUS);
    assert_eq!(h.sdif.calls(), vec![SdifCall::Cmd56Handshake(7)]);
}

#[test]
fn commands_for_the_card_are_emulated_in_place() {
    let h = Harness::new();
    let shim = h.installed();
    let entry = command_entry(GCTX, 0);
    h.memory
        .write_u32(entry.offset(cmd_entry::COMMAND), opcode::SEND_OP_COND)
        .unwrap();
    h.memory
        .write_u32(entry.offset(cmd_entry::ERROR_CODE), 0xDEAD_BEEF)
        .unwrap();

    assert_eq!(shim.send_command(GCTX, entry, HostAddr::NULL, 1, 1), 0);
    assert_eq!(
        h.memory.read_u32(entry.offset(cmd_entry::RESPONSE)).unwrap(),
        OCR_READY
    );
    assert_eq!(
        h.memory.read_u32(entry.offset(cmd_entry::ERROR_CODE)).unwrap(),
        0
    );
    assert!(h.sdif.calls().is_empty());
}

#[test]
fn card_fast_mutex_is_a_no_op() {
    let h = Harness::new();
    let shim = h.installed();
    let mutex = fast_mutex(GCTX);

    assert_eq!(shim.locks().policy(mutex), LockPolicy::NoOp);
    assert_eq!(shim.fast_mutex_lock(mutex), 0);
    assert_eq!(shim.fast_mutex_unlock(mutex), 0);
    assert!(h.sdif.calls().is_empty());
}

#[test]
fn concurrent_emulated_reads_each_get_their_own_sectors() {
    let h = Harness::new();
    let shim = Arc::new(h.installed());

    let threads: Vec<_> = (0..6u32)
        .map(|t| {
            let shim = Arc::clone(&shim);
            thread::spawn(move || {
                for round in 0..20u32 {
                    let sector = 2 + (t * 7 + round) % (IMAGE_SECTORS as u32 - 4);
                    let mut buf = vec![0u8; SECTOR_SIZE * 2];
                    assert_eq!(shim.sd_read(CARD_PART, sector, &mut buf, 2), 0);
                    assert_eq!(buf, image_range(sector as usize, 2));
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    assert!(h.sdif.calls().is_empty());
}
