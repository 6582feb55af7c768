//! Reserved sector range served from memory instead of the backing image.
//!
//! The host reads its media identity record from a fixed sector range and writes it back
//! during activation. A card dump does not carry a usable copy, so the range is answered from
//! an in-memory block that starts zeroed (or seeded) and absorbs writes.

use vmmc_host::layout::SECTOR_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityRegion {
    pub start: u32,
    pub sectors: u32,
}

impl IdentityRegion {
    pub const DEFAULT: IdentityRegion = IdentityRegion {
        start: 1,
        sectors: 1,
    };

    pub fn end(&self) -> u64 {
        u64::from(self.start) + u64::from(self.sectors)
    }

    pub fn contains(&self, sector: u64) -> bool {
        sector >= u64::from(self.start) && sector < self.end()
    }

    /// Whether `[sector, sector + count)` overlaps the region.
    pub fn intersects(&self, sector: u32, count: u32) -> bool {
        let first = u64::from(sector);
        let last = first + u64::from(count);
        count > 0 && self.sectors > 0 && first < self.end() && last > u64::from(self.start)
    }
}

impl Default for IdentityRegion {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone)]
pub struct MediaIdBlock {
    region: IdentityRegion,
    bytes: Vec<u8>,
}

impl MediaIdBlock {
    pub fn new(region: IdentityRegion) -> Self {
        Self {
            region,
            bytes: vec![0u8; region.sectors as usize * SECTOR_SIZE],
        }
    }

    /// Block pre-filled with `contents`; excess is ignored, a short seed leaves the tail zeroed.
    pub fn seeded(region: IdentityRegion, contents: &[u8]) -> Self {
        let mut block = Self::new(region);
        let n = contents.len().min(block.bytes.len());
        block.bytes[..n].copy_from_slice(&contents[..n]);
        block
    }

    pub fn region(&self) -> IdentityRegion {
        self.region
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn sector_bytes(&self, sector: u64) -> Option<std::ops::Range<usize>> {
        if !self.region.contains(sector) {
            return None;
        }
        let start = (sector - u64::from(self.region.start)) as usize * SECTOR_SIZE;
        Some(start..start + SECTOR_SIZE)
    }

    /// Serves `sectors` sectors at `sector` into `buf` if the range touches the region.
    ///
    /// Returns `false` without touching `buf` otherwise. Sectors outside the region are
    /// zero-filled.
    pub fn read(&self, sector: u32, buf: &mut [u8], sectors: u32) -> bool {
        if !self.region.intersects(sector, sectors) {
            return false;
        }
        for (i, dst) in buf
            .chunks_exact_mut(SECTOR_SIZE)
            .take(sectors as usize)
            .enumerate()
        {
            match self.sector_bytes(u64::from(sector) + i as u64) {
                Some(range) => dst.copy_from_slice(&self.bytes[range]),
                None => dst.fill(0),
            }
        }
        true
    }

    /// Stores the in-region part of a write; out-of-region sectors are dropped.
    ///
    /// Returns `false` without storing anything if the range does not touch the region.
    pub fn write(&mut self, sector: u32, buf: &[u8], sectors: u32) -> bool {
        if !self.region.intersects(sector, sectors) {
            return false;
        }
        for (i, src) in buf.chunks_exact(SECTOR_SIZE).take(sectors as usize).enumerate() {
            if let Some(range) = self.sector_bytes(u64::from(sector) + i as u64) {
                self.bytes[range].copy_from_slice(src);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGION: IdentityRegion = IdentityRegion {
        start: 8,
        sectors: 2,
    };

    #[test]
    fn intersection_is_half_open() {
        assert!(!REGION.intersects(6, 2));
        assert!(REGION.intersects(7, 2));
        assert!(REGION.intersects(9, 5));
        assert!(!REGION.intersects(10, 1));
        assert!(!REGION.intersects(8, 0));
        assert!(!REGION.intersects(u32::MAX, u32::MAX));
    }

    #[test]
    fn straddling_read_zero_fills_outside_sectors() {
        let block = MediaIdBlock::seeded(REGION, &[0xAA; SECTOR_SIZE * 2]);
        let mut buf = vec![0x55u8; SECTOR_SIZE * 3];
        assert!(block.read(7, &mut buf, 3));
        assert!(buf[..SECTOR_SIZE].iter().all(|&b| b == 0));
        assert!(buf[SECTOR_SIZE..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn straddling_write_keeps_only_in_region_sectors() {
        let mut block = MediaIdBlock::new(REGION);
        let mut data = vec![1u8; SECTOR_SIZE];
        data.extend(vec![2u8; SECTOR_SIZE]);
        assert!(block.write(9, &data, 2));
        assert!(block.as_bytes()[..SECTOR_SIZE].iter().all(|&b| b == 0));
        assert!(block.as_bytes()[SECTOR_SIZE..].iter().all(|&b| b == 1));
    }

    #[test]
    fn miss_leaves_buffer_untouched() {
        let block = MediaIdBlock::new(REGION);
        let mut buf = vec![0x55u8; SECTOR_SIZE];
        assert!(!block.read(0, &mut buf, 1));
        assert!(buf.iter().all(|&b| b == 0x55));
    }
}
