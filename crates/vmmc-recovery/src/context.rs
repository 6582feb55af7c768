use vmmc_host::layout::{command_entry, context_data, ctx_data, COMMAND_RING_LEN};
use vmmc_host::{HostAddr, HostMemory, Result};

pub const UNK_18_VALUE: u32 = 0x0030_0000;
pub const ARRAY_IDX_VALUE: u32 = 1;
pub const UNK_34_VALUE: u32 = 3;
pub const UNK_38_VALUE: u32 = 0xE;

/// Fields of the context data block that must survive a rebuild: they reference kernel
/// objects and memory blocks we cannot recreate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub membase_1000: u32,
    pub uid_1000: u32,
    pub evid: u32,
    pub fast_mutex: [u8; ctx_data::FAST_MUTEX_SIZE],
    pub uid_10000: u32,
    pub membase_10000: u32,
}

impl ContextSnapshot {
    pub fn capture(memory: &dyn HostMemory, gctx: HostAddr) -> Result<Self> {
        let ctx = context_data(gctx);
        let mut fast_mutex = [0u8; ctx_data::FAST_MUTEX_SIZE];
        memory.read(ctx.offset(ctx_data::FAST_MUTEX), &mut fast_mutex)?;
        Ok(Self {
            membase_1000: memory.read_u32(ctx.offset(ctx_data::MEMBASE_1000))?,
            uid_1000: memory.read_u32(ctx.offset(ctx_data::UID_1000))?,
            evid: memory.read_u32(ctx.offset(ctx_data::EVID))?,
            fast_mutex,
            uid_10000: memory.read_u32(ctx.offset(ctx_data::UID_10000))?,
            membase_10000: memory.read_u32(ctx.offset(ctx_data::MEMBASE_10000))?,
        })
    }

    /// Zeroes the context data block and rebuilds it around the preserved fields.
    pub fn rebuild(&self, memory: &dyn HostMemory, gctx: HostAddr) -> Result<()> {
        let ctx = context_data(gctx);
        memory.fill(ctx, ctx_data::SIZE, 0)?;

        memory.write_addr(ctx.offset(ctx_data::CMD_PTR), command_entry(gctx, 0))?;
        memory.write_addr(
            ctx.offset(ctx_data::CMD_PTR_NEXT),
            command_entry(gctx, COMMAND_RING_LEN - 1),
        )?;
        memory.write_u32(ctx.offset(ctx_data::UNK_18), UNK_18_VALUE)?;
        memory.write_u32(ctx.offset(ctx_data::ARRAY_IDX), ARRAY_IDX_VALUE)?;
        memory.write_u32(ctx.offset(ctx_data::MEMBASE_1000), self.membase_1000)?;
        memory.write_u32(ctx.offset(ctx_data::UNK_34), UNK_34_VALUE)?;
        memory.write_u32(ctx.offset(ctx_data::UNK_38), UNK_38_VALUE)?;
        memory.write_u32(ctx.offset(ctx_data::UID_1000), self.uid_1000)?;
        memory.write_u32(ctx.offset(ctx_data::EVID), self.evid)?;
        // Copied back byte for byte, never reinitialized.
        memory.write(ctx.offset(ctx_data::FAST_MUTEX), &self.fast_mutex)?;
        memory.write_u32(ctx.offset(ctx_data::UID_10000), self.uid_10000)?;
        memory.write_u32(ctx.offset(ctx_data::MEMBASE_10000), self.membase_10000)?;
        Ok(())
    }
}
