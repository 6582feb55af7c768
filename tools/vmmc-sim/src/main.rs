#![forbid(unsafe_code)]

mod host;

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use vmmc_emu::mmc::opcode;
use vmmc_emu::{BackingImage, DumpLayout, FileImage, IdentityRegion};
use vmmc_host::layout::{cmd_entry, command_entry, SECTOR_SIZE};
use vmmc_host::testing::real_device_byte;
use vmmc_host::{HostAddr, HostMemory};
use vmmc_shim::{module_start, module_stop, ShimConfig};

use crate::host::{SimHost, CARD_PART, GCTX, KEY_SLOT, OTHER_PART};

#[derive(Parser, Debug)]
#[command(
    name = "vmmc-sim",
    about = "Run the virtual MMC shim against an in-memory host and print a JSON report."
)]
struct Args {
    /// Card dump: key material followed by the card's sectors
    image: PathBuf,

    /// Byte offset of the key material in the dump
    #[arg(long, value_name = "BYTES", default_value_t = DumpLayout::DEFAULT.key_offset)]
    key_offset: u64,

    /// Byte offset of sector 0 in the dump
    #[arg(long, value_name = "BYTES", default_value_t = DumpLayout::DEFAULT.data_offset)]
    data_offset: u64,

    /// First sector of the writable media identity range
    #[arg(long, value_name = "SECTOR", default_value_t = IdentityRegion::DEFAULT.start)]
    media_id_sector: u32,

    #[arg(long, value_name = "COUNT", default_value_t = IdentityRegion::DEFAULT.sectors)]
    media_id_sectors: u32,

    /// Emulated read to issue, as SECTOR:COUNT (repeatable; defaults to 0:1)
    #[arg(long = "read", value_name = "SECTOR:COUNT", value_parser = parse_read)]
    reads: Vec<ReadOp>,

    /// Scribble over the command queue and recover it before issuing requests
    #[arg(long, action = clap::ArgAction::SetTrue)]
    recover: bool,

    /// Write the report to this path instead of stdout
    #[arg(long, value_name = "PATH")]
    report_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
struct ReadOp {
    sector: u32,
    sectors: u32,
}

fn parse_read(raw: &str) -> Result<ReadOp, String> {
    let (sector, sectors) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected SECTOR:COUNT, got {raw:?}"))?;
    let sector = sector
        .trim()
        .parse()
        .map_err(|e| format!("bad sector {sector:?}: {e}"))?;
    let sectors = sectors
        .trim()
        .parse()
        .map_err(|e| format!("bad count {sectors:?}: {e}"))?;
    if sectors == 0 {
        return Err("count must be at least 1".to_owned());
    }
    Ok(ReadOp { sector, sectors })
}

#[derive(Debug, Serialize)]
struct Report {
    image: String,
    sectors: u64,
    installed: Vec<&'static str>,
    skipped: Vec<SkippedHook>,
    recovery: Option<RecoverySummary>,
    reads: Vec<ReadResult>,
    handshake: HandshakeResult,
    op_cond_response: String,
    passthrough: PassthroughResult,
}

#[derive(Debug, Serialize)]
struct SkippedHook {
    hook: &'static str,
    reason: String,
}

#[derive(Debug, Serialize)]
struct RecoverySummary {
    ring_relinked: bool,
    context_rebuilt: bool,
    translation_failures: usize,
    skipped: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct ReadResult {
    sector: u32,
    sectors: u32,
    status: String,
    matches_image: bool,
    head: String,
}

#[derive(Debug, Serialize)]
struct HandshakeResult {
    status: String,
    key_installed: bool,
}

#[derive(Debug, Serialize)]
struct PassthroughResult {
    status: String,
    forwarded: bool,
}

fn status_hex(status: i32) -> String {
    format!("{:#010x}", status as u32)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let report = run(&args)?;
    let json = serde_json::to_string_pretty(&report).context("serialize report")?;
    match &args.report_out {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("write {}", path.display()))?
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run(args: &Args) -> anyhow::Result<Report> {
    let layout = DumpLayout {
        key_offset: args.key_offset,
        data_offset: args.data_offset,
    };
    let mut image = FileImage::open(&args.image, layout)
        .with_context(|| format!("open {}", args.image.display()))?;
    let key = image.key_material().context("read key material")?;

    let config = ShimConfig {
        image: Some(args.image.clone()),
        layout,
        media_id: IdentityRegion {
            start: args.media_id_sector,
            sectors: args.media_id_sectors,
        },
        ..ShimConfig::default()
    };

    let host = SimHost::new().context("build host")?;
    if args.recover {
        host.scribble_queue().context("scribble queue")?;
    }
    let (shim, install) = module_start(host.services(), &config).context("start shim")?;

    let recovery = if args.recover {
        let report = shim.recover_queue().context("recover queue")?;
        Some(RecoverySummary {
            ring_relinked: report.ring_relinked,
            context_rebuilt: report.context_rebuilt,
            translation_failures: report.translation_failures.len(),
            skipped: report.skipped,
        })
    } else {
        None
    };

    let ops = if args.reads.is_empty() {
        vec![ReadOp {
            sector: 0,
            sectors: 1,
        }]
    } else {
        args.reads.clone()
    };
    let mut reads = Vec::with_capacity(ops.len());
    for op in ops {
        let len = op.sectors as usize * SECTOR_SIZE;
        let mut via_shim = vec![0u8; len];
        let mut direct = vec![0u8; len];
        let status = shim.sd_read(CARD_PART, op.sector, &mut via_shim, op.sectors);
        let direct_status = shim.engine().read(op.sector, &mut direct, op.sectors);
        reads.push(ReadResult {
            sector: op.sector,
            sectors: op.sectors,
            status: status_hex(status),
            matches_image: status == direct_status.code() && via_shim == direct,
            head: hex(&via_shim[..len.min(16)]),
        });
    }

    let handshake_status = shim.gc_cmd56_handshake(0);
    let mut slot = [0u8; 0x20];
    host.memory.read(KEY_SLOT, &mut slot)?;
    let handshake = HandshakeResult {
        status: status_hex(handshake_status),
        key_installed: slot == key,
    };

    let entry = command_entry(GCTX, 0);
    host.memory
        .write_u32(entry.offset(cmd_entry::COMMAND), opcode::SEND_OP_COND)?;
    let status = shim.send_command(GCTX, entry, HostAddr::NULL, 1, 1);
    if status != 0 {
        return Err(anyhow!("op cond command failed: {}", status_hex(status)));
    }
    let ocr = host.memory.read_u32(entry.offset(cmd_entry::RESPONSE))?;

    let forwarded_before = host.sdif.calls().len();
    let mut other = vec![0u8; SECTOR_SIZE];
    let status = shim.sd_read(OTHER_PART, 0, &mut other, 1);
    let pattern_ok = other
        .iter()
        .enumerate()
        .all(|(i, &b)| b == real_device_byte(OTHER_PART, 0, i));
    let passthrough = PassthroughResult {
        status: status_hex(status),
        forwarded: pattern_ok && host.sdif.calls().len() == forwarded_before + 1,
    };

    module_stop().context("stop shim")?;
    tracing::debug!(released = host.hooks.released().len(), "hooks released");

    Ok(Report {
        image: args.image.display().to_string(),
        sectors: image.sector_count(),
        installed: install.installed.iter().map(|p| p.name()).collect(),
        skipped: install
            .skipped
            .iter()
            .map(|(p, reason)| SkippedHook {
                hook: p.name(),
                reason: reason.to_string(),
            })
            .collect(),
        recovery,
        reads,
        handshake,
        op_cond_response: format!("{ocr:#010x}"),
        passthrough,
    })
}
