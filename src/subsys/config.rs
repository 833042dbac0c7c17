//! In-process configuration surface (spec §4.H clamps, §6 "Configuration
//! file"). The on-disk INI grammar itself is out of scope (spec §1); this
//! is the validated, serializable surface it would feed, grounded on the
//! teacher's `subsys::config::{Config, opts::BdevOpts}`.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::nvmf::NvmfTgtOpts;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("bdev opts invalid: {}", source))]
    BadBdevOpts { source: BdevOptsError },
    #[snafu(display("nvmf target opts invalid: {}", source))]
    BadNvmfOpts { source: crate::nvmf::NvmfError },
}

#[derive(Debug, Snafu)]
pub enum BdevOptsError {
    #[snafu(display("bdev_io_pool_size must be nonzero"))]
    EmptyIoPool,
    #[snafu(display("bdev_io_cache_size must not exceed bdev_io_pool_size"))]
    CacheExceedsPool,
}

/// Global knobs for the bdev layer (spec §3/§4.D), mirroring the teacher's
/// `BdevOpts` (`subsys/config/opts.rs`) minus the SPDK FFI conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BdevOpts {
    pub bdev_io_pool_size: u32,
    pub bdev_io_cache_size: u32,
}

impl Default for BdevOpts {
    fn default() -> Self {
        Self {
            bdev_io_pool_size: 65536,
            bdev_io_cache_size: 512,
        }
    }
}

impl BdevOpts {
    pub fn validate(&self) -> Result<(), BdevOptsError> {
        if self.bdev_io_pool_size == 0 {
            return Err(BdevOptsError::EmptyIoPool);
        }
        if self.bdev_io_cache_size > self.bdev_io_pool_size {
            return Err(BdevOptsError::CacheExceedsPool);
        }
        Ok(())
    }
}

/// Top-level configuration (spec §6): the parsed form of the `[Nvmf]`/
/// `[Subsystem<N>]`/... INI sections, minus the grammar itself. Partial
/// configs are supported the same way the teacher's does — `serde`'s
/// `#[serde(default)]` fills in anything the caller omits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub source: Option<String>,
    pub bdev_opts: BdevOpts,
    pub nvmf_tgt_opts: NvmfTgtOpts,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bdev_opts.validate().map_err(|source| ConfigError::BadBdevOpts { source })?;
        self.nvmf_tgt_opts.validate().map_err(|source| ConfigError::BadNvmfOpts { source })?;
        Ok(())
    }
}

static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    /// Install the process-wide configuration; may only be called once,
    /// by the management reactor during subsystem bring-up (spec §5).
    pub fn set_global(config: Config) -> Result<(), ConfigError> {
        config.validate()?;
        CONFIG.set(config).ok();
        Ok(())
    }

    /// Read the active configuration, or the validated default if none was
    /// ever installed.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::default)
    }
}
