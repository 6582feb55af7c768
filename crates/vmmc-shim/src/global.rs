//! Process-wide shim instance, mirroring the host's module start/stop entry points.

use std::sync::{Arc, Mutex, MutexGuard};

use vmmc_emu::{Engine, FileImage, MediaIdBlock};
use vmmc_host::HostServices;

use crate::config::{ConfigError, ShimConfig};
use crate::interceptor::{InstallReport, Interceptor};
use crate::ShimError;

static INSTANCE: Mutex<Option<Arc<Interceptor>>> = Mutex::new(None);

fn instance_slot() -> MutexGuard<'static, Option<Arc<Interceptor>>> {
    INSTANCE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Opens the configured image and starts the shim around it.
pub fn module_start(
    host: HostServices,
    config: &ShimConfig,
) -> Result<(Arc<Interceptor>, InstallReport), ShimError> {
    let path = config
        .image
        .as_deref()
        .ok_or(ConfigError::MissingEnv("VMMC_IMAGE"))?;
    let image = FileImage::open(path, config.layout)?;
    tracing::info!(image = %path.display(), "opened card image");
    let engine = Engine::new(Box::new(image), MediaIdBlock::new(config.media_id));
    module_start_with_engine(host, Arc::new(engine), config)
}

/// Installs an interceptor around `engine` and publishes it as the running instance.
pub fn module_start_with_engine(
    host: HostServices,
    engine: Arc<Engine>,
    config: &ShimConfig,
) -> Result<(Arc<Interceptor>, InstallReport), ShimError> {
    let mut slot = instance_slot();
    if slot.is_some() {
        return Err(ShimError::AlreadyStarted);
    }

    let interceptor = Arc::new(Interceptor::new(host, engine, config));
    let report = interceptor.install()?;
    tracing::info!(
        installed = report.installed.len(),
        skipped = report.skipped.len(),
        "shim started"
    );

    if config.recover_on_start {
        match interceptor.recover_queue() {
            Ok(recovery) => tracing::info!(?recovery, "queue recovered on start"),
            Err(err) => tracing::warn!(error = %err, "queue recovery on start failed"),
        }
    }

    *slot = Some(Arc::clone(&interceptor));
    Ok((interceptor, report))
}

/// The running instance, if any.
pub fn instance() -> Option<Arc<Interceptor>> {
    instance_slot().clone()
}

/// Uninstalls and drops the running instance.
pub fn module_stop() -> Result<(), ShimError> {
    let interceptor = instance_slot().take().ok_or(ShimError::NotStarted)?;
    interceptor.uninstall();
    tracing::info!("shim stopped");
    Ok(())
}
