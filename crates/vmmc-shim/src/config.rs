use std::path::PathBuf;

use thiserror::Error;
use vmmc_emu::{DumpLayout, IdentityRegion};

pub const DEFAULT_WORKER_NAME: &str = "SceSdifEmuReader";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingEnv(&'static str),

    #[error("invalid value for env var {0}")]
    InvalidEnv(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimConfig {
    /// Card dump backing the emulated card.
    pub image: Option<PathBuf>,
    pub layout: DumpLayout,
    pub media_id: IdentityRegion,
    /// Run queue recovery right after installing the hooks.
    pub recover_on_start: bool,
    /// Register the suspend/resume handler.
    pub sysevents: bool,
    pub worker_name: String,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            image: None,
            layout: DumpLayout::DEFAULT,
            media_id: IdentityRegion::DEFAULT,
            recover_on_start: false,
            sysevents: false,
            worker_name: DEFAULT_WORKER_NAME.to_owned(),
        }
    }
}

impl ShimConfig {
    /// Reads the configuration from `VMMC_*` environment variables.
    ///
    /// `VMMC_IMAGE` is required; everything else falls back to [`ShimConfig::default`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`ShimConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let image = lookup("VMMC_IMAGE")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingEnv("VMMC_IMAGE"))?;

        let number = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            lookup(var)
                .map(|raw| parse_number(&raw).ok_or(ConfigError::InvalidEnv(var)))
                .transpose()
        };
        let sector = |var: &'static str, default: u32| -> Result<u32, ConfigError> {
            match number(var)? {
                Some(n) => u32::try_from(n).map_err(|_| ConfigError::InvalidEnv(var)),
                None => Ok(default),
            }
        };
        let flag = |var: &'static str, default: bool| -> Result<bool, ConfigError> {
            lookup(var)
                .map(|raw| parse_bool(&raw).ok_or(ConfigError::InvalidEnv(var)))
                .unwrap_or(Ok(default))
        };

        Ok(Self {
            image: Some(image),
            layout: DumpLayout {
                key_offset: number("VMMC_KEY_OFFSET")?.unwrap_or(defaults.layout.key_offset),
                data_offset: number("VMMC_DATA_OFFSET")?.unwrap_or(defaults.layout.data_offset),
            },
            media_id: IdentityRegion {
                start: sector("VMMC_MEDIA_ID_SECTOR", defaults.media_id.start)?,
                sectors: sector("VMMC_MEDIA_ID_SECTORS", defaults.media_id.sectors)?,
            },
            recover_on_start: flag("VMMC_RECOVER_ON_START", defaults.recover_on_start)?,
            sysevents: flag("VMMC_SYSEVENTS", defaults.sysevents)?,
            worker_name: lookup("VMMC_WORKER_NAME")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.worker_name),
        })
    }
}

/// Decimal or `0x`-prefixed hexadecimal.
fn parse_number(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
