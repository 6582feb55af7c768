use std::sync::{Mutex, MutexGuard};

use vmmc_host::layout::SECTOR_SIZE;
use vmmc_host::{HostAddr, HostMemory};

use crate::image::BackingImage;
use crate::media_id::MediaIdBlock;
use crate::mmc::{CardIdentity, MmcResponder};
use crate::SdStatus;

/// The emulated card: backing image, media identity block and command responder.
///
/// Every entry point takes `&self` so one engine can be shared between the synchronous hook
/// paths and the read worker. The image and the identity block each sit behind their own
/// mutex; callers never hold both.
pub struct Engine {
    image: Mutex<Box<dyn BackingImage>>,
    media_id: Mutex<MediaIdBlock>,
    card: CardIdentity,
    sectors: u64,
}

fn lock<'a, T: ?Sized>(m: &'a Mutex<T>, what: &'static str) -> MutexGuard<'a, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(lock = what, "recovering poisoned engine lock");
            poisoned.into_inner()
        }
    }
}

fn check_buffer(op: &'static str, buf_len: usize, sectors: u32) -> Result<usize, SdStatus> {
    let needed = sectors as usize * SECTOR_SIZE;
    if buf_len < needed {
        tracing::warn!(op, buf_len, sectors, "buffer shorter than requested sectors");
        return Err(SdStatus::InvalidBuffer);
    }
    Ok(needed)
}

impl Engine {
    pub fn new(image: Box<dyn BackingImage>, media_id: MediaIdBlock) -> Self {
        let sectors = image.sector_count();
        Self {
            image: Mutex::new(image),
            media_id: Mutex::new(media_id),
            card: CardIdentity::default(),
            sectors,
        }
    }

    pub fn with_card_identity(mut self, card: CardIdentity) -> Self {
        self.card = card;
        self
    }

    pub fn sector_count(&self) -> u64 {
        self.sectors
    }

    pub fn card_identity(&self) -> &CardIdentity {
        &self.card
    }

    pub fn media_id_snapshot(&self) -> Vec<u8> {
        lock(&self.media_id, "media_id").as_bytes().to_vec()
    }

    /// Full read path: identity region first, then the backing image.
    pub fn read(&self, sector: u32, buf: &mut [u8], sectors: u32) -> SdStatus {
        if let Err(status) = check_buffer("read", buf.len(), sectors) {
            return status;
        }
        match self.read_media_id(sector, buf, sectors) {
            Some(status) => status,
            None => self.read_image(sector, buf, sectors),
        }
    }

    /// Serves the read from the identity block if it touches the identity region.
    ///
    /// `None` means the request is not an identity request and `buf` is untouched.
    pub fn read_media_id(&self, sector: u32, buf: &mut [u8], sectors: u32) -> Option<SdStatus> {
        if let Err(status) = check_buffer("read", buf.len(), sectors) {
            return Some(status);
        }
        if !lock(&self.media_id, "media_id").read(sector, buf, sectors) {
            return None;
        }
        tracing::trace!(sector, sectors, "served media id read");
        Some(SdStatus::Success)
    }

    /// Reads straight from the backing image; the destination is zero-filled on failure.
    pub fn read_image(&self, sector: u32, buf: &mut [u8], sectors: u32) -> SdStatus {
        let needed = match check_buffer("read", buf.len(), sectors) {
            Ok(needed) => needed,
            Err(status) => return status,
        };
        if sectors == 0 {
            return SdStatus::Success;
        }
        let dst = &mut buf[..needed];
        match lock(&self.image, "image").read_sectors(u64::from(sector), dst) {
            Ok(()) => SdStatus::Success,
            Err(err) => {
                tracing::warn!(error = %err, sector, sectors, "backing image read failed");
                dst.fill(0);
                SdStatus::ReadFailed
            }
        }
    }

    /// Writes land in the identity block; anything else is refused and the buffer zeroed.
    pub fn write(&self, sector: u32, buf: &mut [u8], sectors: u32) -> SdStatus {
        let needed = match check_buffer("write", buf.len(), sectors) {
            Ok(needed) => needed,
            Err(status) => return status,
        };
        if lock(&self.media_id, "media_id").write(sector, &buf[..needed], sectors) {
            tracing::trace!(sector, sectors, "stored media id write");
            return SdStatus::Success;
        }
        tracing::debug!(sector, sectors, "write operation is not supported");
        buf[..needed].fill(0);
        SdStatus::UnknownReadWrite
    }

    /// Copies the dump's key material into the host key slot at `key_slot`.
    ///
    /// Returns a host status word: `0`, [`SdStatus::ReadFailed`] if the key could not be read,
    /// or the host's own status if the slot could not be written.
    pub fn override_cmd56_handshake(&self, memory: &dyn HostMemory, key_slot: HostAddr) -> i32 {
        let key = match lock(&self.image, "image").key_material() {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read cmd56 key material");
                return SdStatus::ReadFailed.code();
            }
        };
        if let Err(err) = memory.write(key_slot, &key) {
            tracing::warn!(error = %err, %key_slot, "failed to write cmd56 key slot");
            return err.as_status();
        }
        tracing::debug!(%key_slot, "override cmd56 handshake");
        0
    }

    /// Answers the command entries `cmd1` and (if non-null) `cmd2` in place.
    ///
    /// Returns the first failing status word, or `0`.
    pub fn emulate_command(&self, memory: &dyn HostMemory, cmd1: HostAddr, cmd2: HostAddr) -> i32 {
        let responder = MmcResponder::new(self, memory);
        for entry in [cmd1, cmd2] {
            if entry.is_null() {
                continue;
            }
            match responder.respond(entry) {
                Ok(SdStatus::Success) => {}
                Ok(status) => return status.code(),
                Err(err) => {
                    tracing::warn!(error = %err, %entry, "failed to emulate command entry");
                    return err.as_status();
                }
            }
        }
        0
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sectors", &self.sectors)
            .field("card", &self.card)
            .finish_non_exhaustive()
    }
}
