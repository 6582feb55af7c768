use std::sync::OnceLock;

use vmmc_host::{HostAddr, SdifDevice, SdifDriver};

/// The emulated card's global context, resolved from the host once and then cached.
#[derive(Debug, Default)]
pub struct EmulatedCard {
    gctx: OnceLock<HostAddr>,
}

impl EmulatedCard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self) -> Option<HostAddr> {
        self.gctx.get().copied()
    }

    /// Returns the cached context, asking the driver if nothing is cached yet.
    ///
    /// The second value is `true` on the call that populated the cache.
    pub fn resolve(&self, sdif: &dyn SdifDriver) -> (Option<HostAddr>, bool) {
        if let Some(gctx) = self.cached() {
            return (Some(gctx), false);
        }
        match sdif.sd_context_global(SdifDevice::GameCard) {
            Some(gctx) if !gctx.is_null() => {
                let fresh = self.gctx.set(gctx).is_ok();
                if fresh {
                    tracing::info!(%gctx, "emulated card context resolved");
                }
                (self.cached(), fresh)
            }
            _ => (None, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use vmmc_host::testing::RecordingSdif;

    use super::*;

    #[test]
    fn resolves_once_and_caches() {
        let sdif = RecordingSdif::new();
        let card = EmulatedCard::new();
        assert_eq!(card.resolve(&sdif), (None, false));

        sdif.set_global_context(SdifDevice::GameCard, HostAddr(0x8100_2500));
        assert_eq!(card.resolve(&sdif), (Some(HostAddr(0x8100_2500)), true));

        sdif.set_global_context(SdifDevice::GameCard, HostAddr(0x9000_0000));
        assert_eq!(card.resolve(&sdif), (Some(HostAddr(0x8100_2500)), false));
    }

    #[test]
    fn null_context_is_not_cached() {
        let sdif = RecordingSdif::new();
        sdif.set_global_context(SdifDevice::GameCard, HostAddr::NULL);
        let card = EmulatedCard::new();
        assert_eq!(card.resolve(&sdif), (None, false));
        assert_eq!(card.cached(), None);
    }
}
