mod common;

use std::io::Write as _;

use common::{image_bytes, image_range, Harness, CARD_PART, KEY};
use vmmc_emu::DumpLayout;
use vmmc_host::layout::SECTOR_SIZE;
use vmmc_shim::{instance, module_start, module_start_with_engine, module_stop};
use vmmc_shim::{ConfigError, ShimConfig, ShimError};

// The instance is process-wide, so the whole lifecycle runs in one test.
#[test]
fn module_lifecycle() {
    let h = Harness::new();
    assert!(instance().is_none());
    assert!(matches!(module_stop(), Err(ShimError::NotStarted)));

    let err = module_start(h.services(), &ShimConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        ShimError::Config(ConfigError::MissingEnv("VMMC_IMAGE"))
    ));
    let missing = ShimConfig {
        image: Some("/nonexistent/vmmc/card.psv".into()),
        ..ShimConfig::default()
    };
    assert!(matches!(
        module_start(h.services(), &missing),
        Err(ShimError::Image(_))
    ));
    assert!(instance().is_none());

    let mut dump = tempfile::NamedTempFile::new().unwrap();
    let mut bytes = vec![0u8; DumpLayout::DEFAULT.data_offset as usize];
    bytes[..KEY.len()].copy_from_slice(&KEY);
    bytes.extend_from_slice(&image_bytes());
    dump.write_all(&bytes).unwrap();
    dump.flush().unwrap();

    let config = ShimConfig {
        image: Some(dump.path().to_path_buf()),
        ..ShimConfig::default()
    };
    let (shim, report) = module_start(h.services(), &config).unwrap();
    assert!(report.skipped.is_empty());
    assert!(std::sync::Arc::ptr_eq(&shim, &instance().unwrap()));

    let mut buf = vec![0u8; SECTOR_SIZE * 4];
    assert_eq!(shim.sd_read(CARD_PART, 12, &mut buf, 4), 0);
    assert_eq!(buf, image_range(12, 4));

    assert!(matches!(
        module_start_with_engine(h.services(), common::engine(), &config),
        Err(ShimError::AlreadyStarted)
    ));

    module_stop().unwrap();
    assert!(instance().is_none());
    assert!(!shim.is_installed());
    assert!(h.hooks.installed().is_empty());
    assert!(matches!(module_stop(), Err(ShimError::NotStarted)));
}
