/// Result codes the emulated device reports back to the host.
///
/// The host convention is a signed 32-bit status word: zero on success and a negative
/// facility-tagged code on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdStatus {
    Success,
    /// Operation the emulated device does not implement (writes outside the identity region).
    UnknownReadWrite,
    /// The backing image could not supply the requested sectors.
    ReadFailed,
    /// Destination buffer shorter than the requested sector count.
    InvalidBuffer,
    /// Command opcode with no emulated response.
    UnsupportedCommand,
}

impl SdStatus {
    pub const fn code(self) -> i32 {
        (match self {
            SdStatus::Success => 0,
            SdStatus::UnknownReadWrite => 0x8032_0002_u32,
            SdStatus::ReadFailed => 0x8032_0003_u32,
            SdStatus::InvalidBuffer => 0x8032_0004_u32,
            SdStatus::UnsupportedCommand => 0x8032_0010_u32,
        }) as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        [
            SdStatus::Success,
            SdStatus::UnknownReadWrite,
            SdStatus::ReadFailed,
            SdStatus::InvalidBuffer,
            SdStatus::UnsupportedCommand,
        ]
        .into_iter()
        .find(|status| status.code() == code)
    }

    pub const fn is_success(self) -> bool {
        matches!(self, SdStatus::Success)
    }
}

impl From<SdStatus> for i32 {
    fn from(status: SdStatus) -> i32 {
        status.code()
    }
}
