use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;
use vmmc_host::layout::{gc_auth_data::CMD56_DATA_SIZE, SECTOR_SIZE};

/// Authentication key material copied into the host's key slot during the CMD56 handshake.
pub type KeyMaterial = [u8; CMD56_DATA_SIZE];

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("unaligned buffer length {len} (expected multiple of 512)")]
    UnalignedBuffer { len: usize },

    #[error("out of range: sector={sector} sectors={sectors} capacity={capacity}")]
    OutOfRange {
        sector: u64,
        sectors: u64,
        capacity: u64,
    },

    #[error("dump too small: {len} bytes, layout needs at least {needed}")]
    Truncated { len: u64, needed: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the pieces of a card dump live inside the dump file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpLayout {
    /// Byte offset of the [`KeyMaterial`] record.
    pub key_offset: u64,
    /// Byte offset of card sector 0.
    pub data_offset: u64,
}

impl DumpLayout {
    /// Key record in the first sector, card data from the second sector on.
    pub const DEFAULT: DumpLayout = DumpLayout {
        key_offset: 0,
        data_offset: SECTOR_SIZE as u64,
    };

    fn minimum_len(&self) -> u64 {
        (self.key_offset + CMD56_DATA_SIZE as u64).max(self.data_offset)
    }
}

impl Default for DumpLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Read-only source of the emulated card's content.
pub trait BackingImage: Send {
    fn sector_count(&self) -> u64;

    /// Reads `buf.len() / SECTOR_SIZE` sectors starting at `sector`.
    fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<(), ImageError>;

    fn key_material(&mut self) -> Result<KeyMaterial, ImageError>;
}

/// Validates that `[sector, sector + buf_len / SECTOR_SIZE)` is a whole-sector range inside
/// `capacity`; returns the sector count.
pub fn check_range(sector: u64, buf_len: usize, capacity: u64) -> Result<u64, ImageError> {
    if buf_len % SECTOR_SIZE != 0 {
        return Err(ImageError::UnalignedBuffer { len: buf_len });
    }
    let sectors = (buf_len / SECTOR_SIZE) as u64;
    let out_of_range = ImageError::OutOfRange {
        sector,
        sectors,
        capacity,
    };
    match sector.checked_add(sectors) {
        Some(end) if end <= capacity => Ok(sectors),
        _ => Err(out_of_range),
    }
}

/// Image held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemImage {
    key: KeyMaterial,
    data: Vec<u8>,
}

impl MemImage {
    /// `data` is truncated to whole sectors.
    pub fn new(key: KeyMaterial, mut data: Vec<u8>) -> Self {
        let whole = data.len() - data.len() % SECTOR_SIZE;
        data.truncate(whole);
        Self { key, data }
    }

    /// Splits a full dump according to `layout`.
    pub fn from_dump(dump: &[u8], layout: DumpLayout) -> Result<Self, ImageError> {
        let len = dump.len() as u64;
        if len < layout.minimum_len() {
            return Err(ImageError::Truncated {
                len,
                needed: layout.minimum_len(),
            });
        }
        let key_start = layout.key_offset as usize;
        let mut key = [0u8; CMD56_DATA_SIZE];
        key.copy_from_slice(&dump[key_start..key_start + CMD56_DATA_SIZE]);
        Ok(Self::new(key, dump[layout.data_offset as usize..].to_vec()))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl BackingImage for MemImage {
    fn sector_count(&self) -> u64 {
        (self.data.len() / SECTOR_SIZE) as u64
    }

    fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<(), ImageError> {
        check_range(sector, buf.len(), self.sector_count())?;
        let start = sector as usize * SECTOR_SIZE;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn key_material(&mut self) -> Result<KeyMaterial, ImageError> {
        Ok(self.key)
    }
}

/// Dump file on disk.
#[derive(Debug)]
pub struct FileImage {
    file: File,
    layout: DumpLayout,
    sectors: u64,
}

impl FileImage {
    pub fn open(path: impl AsRef<Path>, layout: DumpLayout) -> Result<Self, ImageError> {
        let file = File::open(path)?;
        Self::from_file(file, layout)
    }

    pub fn from_file(file: File, layout: DumpLayout) -> Result<Self, ImageError> {
        let len = file.metadata()?.len();
        if len < layout.minimum_len() {
            return Err(ImageError::Truncated {
                len,
                needed: layout.minimum_len(),
            });
        }
        let sectors = (len - layout.data_offset) / SECTOR_SIZE as u64;
        Ok(Self {
            file,
            layout,
            sectors,
        })
    }

    pub fn layout(&self) -> DumpLayout {
        self.layout
    }
}

impl BackingImage for FileImage {
    fn sector_count(&self) -> u64 {
        self.sectors
    }

    fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<(), ImageError> {
        check_range(sector, buf.len(), self.sectors)?;
        let offset = self.layout.data_offset + sector * SECTOR_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn key_material(&mut self) -> Result<KeyMaterial, ImageError> {
        let mut key = [0u8; CMD56_DATA_SIZE];
        self.file.seek(SeekFrom::Start(self.layout.key_offset))?;
        self.file.read_exact(&mut key)?;
        Ok(key)
    }
}
