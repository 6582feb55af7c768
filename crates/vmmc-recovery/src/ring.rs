use vmmc_host::layout::{cmd_entry, command_entry, COMMAND_RING_LEN};
use vmmc_host::{AddressTranslator, HostAddr, HostMemory, Result};

/// A DMA physical-address field that could not be rederived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationFailure {
    pub entry: usize,
    pub paddr_field: u32,
    pub status: i32,
}

/// Zeroes the command ring at `gctx` and relinks it: entry `i` points at entry `i + 1` and
/// carries index `i`, the last entry points at null.
pub fn relink(memory: &dyn HostMemory, gctx: HostAddr) -> Result<()> {
    memory.fill(
        command_entry(gctx, 0),
        cmd_entry::SIZE * COMMAND_RING_LEN,
        0,
    )?;
    for i in 0..COMMAND_RING_LEN {
        let entry = command_entry(gctx, i);
        let next = if i + 1 < COMMAND_RING_LEN {
            command_entry(gctx, i + 1)
        } else {
            HostAddr::NULL
        };
        memory.write_addr(entry.offset(cmd_entry::NEXT), next)?;
        memory.write_u32(entry.offset(cmd_entry::ARRAY_INDEX), i as u32)?;
    }
    Ok(())
}

/// Rederives every DMA physical-address field of the ring from its buffer's virtual address.
///
/// A failed translation leaves that field as it is and is reported; the rest carry on.
pub fn rehydrate_paddrs(
    memory: &dyn HostMemory,
    translator: &dyn AddressTranslator,
    gctx: HostAddr,
) -> Result<Vec<TranslationFailure>> {
    let mut failures = Vec::new();
    for i in 0..COMMAND_RING_LEN {
        let entry = command_entry(gctx, i);
        for region in cmd_entry::DMA_REGIONS {
            let vaddr = entry.offset(region.offset);
            match translator.physical_address(vaddr) {
                Ok(paddr) => memory.write_u32(entry.offset(region.paddr_field), paddr)?,
                Err(err) => {
                    tracing::warn!(
                        entry = i,
                        paddr_field = region.paddr_field,
                        error = %err,
                        "failed to init dma paddr"
                    );
                    failures.push(TranslationFailure {
                        entry: i,
                        paddr_field: region.paddr_field,
                        status: err.as_status(),
                    });
                }
            }
        }
    }
    Ok(failures)
}
