use core::fmt;

/// A 32-bit address in the host's kernel address space.
///
/// The host is a 32-bit system, so every pointer stored inside host-owned structures is a
/// little-endian `u32`. Keeping addresses in a newtype (rather than `*mut T`) lets the core
/// compare identities and compute field addresses without ever dereferencing host memory
/// directly; all access goes through [`crate::HostMemory`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostAddr(pub u32);

impl HostAddr {
    pub const NULL: HostAddr = HostAddr(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address of a field `offset` bytes past `self`.
    ///
    /// Uses wrapping arithmetic so a garbage pointer read from host memory can't panic under
    /// overflow-check builds; the bad address is caught by the memory access instead.
    pub const fn offset(self, offset: u32) -> HostAddr {
        HostAddr(self.0.wrapping_add(offset))
    }

    /// Address of element `index` in an array of `stride`-byte elements starting at `self`.
    pub const fn index(self, index: u32, stride: u32) -> HostAddr {
        self.offset(index.wrapping_mul(stride))
    }

    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }
}

impl From<u32> for HostAddr {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::LowerHex for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
