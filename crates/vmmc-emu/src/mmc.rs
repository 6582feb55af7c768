//! Command-level responder for the emulated card.
//!
//! The host driver hands us command entries from its ring. Each entry is answered in place:
//! the response registers are filled, the data buffer is read or written through the engine,
//! and the entry's error code is updated.

use vmmc_host::layout::{cmd_entry, SECTOR_SIZE};
use vmmc_host::{HostAddr, HostMemory, Result};

use crate::{Engine, SdStatus};

pub mod opcode {
    pub const GO_IDLE_STATE: u32 = 0;
    pub const SEND_OP_COND: u32 = 1;
    pub const ALL_SEND_CID: u32 = 2;
    pub const SET_RELATIVE_ADDR: u32 = 3;
    pub const SWITCH: u32 = 6;
    pub const SELECT_CARD: u32 = 7;
    pub const SEND_EXT_CSD: u32 = 8;
    pub const SEND_CSD: u32 = 9;
    pub const SEND_CID: u32 = 10;
    pub const STOP_TRANSMISSION: u32 = 12;
    pub const SEND_STATUS: u32 = 13;
    pub const SET_BLOCKLEN: u32 = 16;
    pub const READ_SINGLE_BLOCK: u32 = 17;
    pub const READ_MULTIPLE_BLOCK: u32 = 18;
    pub const SET_BLOCK_COUNT: u32 = 23;
    pub const WRITE_BLOCK: u32 = 24;
    pub const WRITE_MULTIPLE_BLOCK: u32 = 25;
    pub const GEN_CMD: u32 = 56;
}

/// OCR: powered up, 1.7-3.6V, sector addressing.
pub const OCR_READY: u32 = 0xC0FF_8080;

/// Card status: `tran` state, ready for data.
pub const CARD_STATUS_TRAN: u32 = 0x900;

pub const EXT_CSD_LEN: usize = 512;
pub const EXT_CSD_SEC_COUNT: usize = 212;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardIdentity {
    pub cid: [u8; 16],
    pub csd: [u8; 16],
}

impl Default for CardIdentity {
    fn default() -> Self {
        Self {
            // MID, CBX, OID, PNM "VMMC01", PRV, PSN, MDT, CRC
            cid: [
                0x11, 0x01, 0x00, b'V', b'M', b'M', b'C', b'0', b'1', 0x10, 0x00, 0x00, 0x00,
                0x01, 0x11, 0x01,
            ],
            // CSD_STRUCTURE 3 (version in EXT_CSD), SPEC_VERS 4
            csd: [
                0xD0, 0x27, 0x01, 0x32, 0x0F, 0x59, 0x03, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x92,
                0x40, 0x40, 0x01,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    None,
    /// R1/R3: one 32-bit word.
    Short(u32),
    /// R2: 128-bit register.
    Long([u8; 16]),
}

pub(crate) struct MmcResponder<'a> {
    engine: &'a Engine,
    memory: &'a dyn HostMemory,
}

impl<'a> MmcResponder<'a> {
    pub(crate) fn new(engine: &'a Engine, memory: &'a dyn HostMemory) -> Self {
        Self { engine, memory }
    }

    /// Answers the command at `entry`; host memory failures abort the entry.
    pub(crate) fn respond(&self, entry: HostAddr) -> Result<SdStatus> {
        let op = self.memory.read_u32(entry.offset(cmd_entry::COMMAND))?;
        let arg = self.memory.read_u32(entry.offset(cmd_entry::ARGUMENT))?;
        tracing::trace!(op, arg, %entry, "emulating mmc command");

        let card = self.engine.card_identity();
        let (response, status) = match op {
            opcode::GO_IDLE_STATE => (Response::None, SdStatus::Success),
            opcode::SEND_OP_COND => (Response::Short(OCR_READY), SdStatus::Success),
            opcode::ALL_SEND_CID | opcode::SEND_CID => (Response::Long(card.cid), SdStatus::Success),
            opcode::SEND_CSD => (Response::Long(card.csd), SdStatus::Success),
            opcode::SET_RELATIVE_ADDR
            | opcode::SWITCH
            | opcode::SELECT_CARD
            | opcode::STOP_TRANSMISSION
            | opcode::SEND_STATUS
            | opcode::SET_BLOCKLEN
            | opcode::SET_BLOCK_COUNT
            | opcode::GEN_CMD => (Response::Short(CARD_STATUS_TRAN), SdStatus::Success),
            opcode::SEND_EXT_CSD => {
                let buffer = self.memory.read_addr(entry.offset(cmd_entry::BUFFER))?;
                self.memory.write(buffer, &self.ext_csd())?;
                (Response::Short(CARD_STATUS_TRAN), SdStatus::Success)
            }
            opcode::READ_SINGLE_BLOCK | opcode::READ_MULTIPLE_BLOCK => {
                let blocks = self.block_count(entry, op == opcode::READ_SINGLE_BLOCK)?;
                let buffer = self.memory.read_addr(entry.offset(cmd_entry::BUFFER))?;
                let mut data = vec![0u8; blocks as usize * SECTOR_SIZE];
                let status = self.engine.read(arg, &mut data, blocks);
                self.memory.write(buffer, &data)?;
                (Response::Short(CARD_STATUS_TRAN), status)
            }
            opcode::WRITE_BLOCK | opcode::WRITE_MULTIPLE_BLOCK => {
                let blocks = self.block_count(entry, op == opcode::WRITE_BLOCK)?;
                let buffer = self.memory.read_addr(entry.offset(cmd_entry::BUFFER))?;
                let mut data = vec![0u8; blocks as usize * SECTOR_SIZE];
                self.memory.read(buffer, &mut data)?;
                let status = self.engine.write(arg, &mut data, blocks);
                if !status.is_success() {
                    // Refused writes zero the caller's buffer, same as the sector entry point.
                    self.memory.write(buffer, &data)?;
                }
                (Response::Short(CARD_STATUS_TRAN), status)
            }
            _ => {
                tracing::debug!(op, arg, "unsupported mmc command");
                (Response::None, SdStatus::UnsupportedCommand)
            }
        };

        self.write_response(entry, response)?;
        self.memory
            .write_u32(entry.offset(cmd_entry::ERROR_CODE), status.code() as u32)?;
        Ok(status)
    }

    fn block_count(&self, entry: HostAddr, single: bool) -> Result<u32> {
        if single {
            return Ok(1);
        }
        let count = self.memory.read_u16(entry.offset(cmd_entry::BLOCK_COUNT))?;
        Ok(u32::from(count.max(1)))
    }

    fn write_response(&self, entry: HostAddr, response: Response) -> Result<()> {
        let dst = entry.offset(cmd_entry::RESPONSE);
        match response {
            Response::None => Ok(()),
            Response::Short(word) => self.memory.write_u32(dst, word),
            Response::Long(bytes) => self.memory.write(dst, &bytes),
        }
    }

    fn ext_csd(&self) -> [u8; EXT_CSD_LEN] {
        let mut ext = [0u8; EXT_CSD_LEN];
        let sectors = u32::try_from(self.engine.sector_count()).unwrap_or(u32::MAX);
        ext[EXT_CSD_SEC_COUNT..EXT_CSD_SEC_COUNT + 4].copy_from_slice(&sectors.to_le_bytes());
        ext
    }
}
