//! Configuration: CLI surface plus an optional merged config file,
//! producing the validated [`Config`] every other module reads from.
//!
//! Grounded on the teacher's `settings.rs`/`utils.rs` (`config::Config`
//! loading a `File` before freezing into a typed struct) and on the
//! reference daemon's `main()` getopt loop for the flag set itself.

use std::path::PathBuf;
use std::str::FromStr;

use log::LevelFilter;
use serde_derive::Deserialize;
use structopt::StructOpt;

use crate::error::ConfigError;

const DEFAULT_PORT: u16 = 2056;
const DEFAULT_INTERVAL_SECS: u64 = 300;
const DEFAULT_BUFFERS: usize = 500;
const DEFAULT_MAX_DROP_SILENT: u32 = 0;
const DEFAULT_CURRENT_PATH: &str = "/netflow/flows.current";
const DEFAULT_SAVED_PREFIX: &str = "/netflow/prefetch/flows.";
const DEFAULT_MODE: u32 = 0o660;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy)]
pub struct PortConfig {
    pub port: u16,
    pub drop_detection: bool,
}

#[derive(Debug)]
pub struct Config {
    pub ports: Vec<PortConfig>,
    pub save_interval_secs: u64,
    pub buffer_count: usize,
    pub max_drop_silent: u32,
    pub current_path: PathBuf,
    pub saved_prefix: String,
    pub current_mode: u32,
    pub saved_mode: u32,
    pub nodaemon: bool,
    pub new_user: Option<String>,
    pub log_level: LevelFilter,
}

/// Defaults that may be supplied by an on-disk file, merged underneath the
/// CLI flags. Every field is optional; an absent file leaves all of them
/// unset and every [`Config`] field falls back to its built-in default.
#[derive(Debug, Default, Deserialize)]
struct FileDefaults {
    ports: Option<Vec<u16>>,
    save_interval_secs: Option<u64>,
    buffer_count: Option<usize>,
    max_drop_silent: Option<u32>,
    current_path: Option<PathBuf>,
    saved_prefix: Option<String>,
    current_mode: Option<String>,
    saved_mode: Option<String>,
    log: Option<String>,
}

fn parse_mode(s: &str) -> Result<u32, std::num::ParseIntError> {
    u32::from_str_radix(s, 8)
}

#[derive(StructOpt, Debug)]
#[structopt(name = "netflowd", about = "NetFlow v5 ingest daemon")]
struct Opt {
    /// UDP port to listen on. May be given more than once.
    #[structopt(short = "p", long = "port")]
    ports: Vec<u16>,

    /// Disable drop-sequence checking for this port. May be given more than
    /// once; a port named here that wasn't also passed via -p has no effect.
    #[structopt(short = "n", long = "no-drop-check")]
    no_drop_check: Vec<u16>,

    /// Seconds between file rotations.
    #[structopt(short = "i", long = "interval")]
    interval: Option<u64>,

    /// Number of buffers in the shared pool.
    #[structopt(short = "b", long = "buffers")]
    buffers: Option<usize>,

    /// Cumulative per-interval drop count below which drops aren't logged.
    #[structopt(short = "m", long = "max-drop")]
    max_drop: Option<u32>,

    /// Path to the live output file.
    #[structopt(short = "c", long = "current", parse(from_os_str))]
    current: Option<PathBuf>,

    /// Prefix for archived file names.
    #[structopt(short = "s", long = "saved-prefix")]
    saved_prefix: Option<String>,

    /// Octal POSIX mode for the current file.
    #[structopt(short = "x", long = "current-mode", parse(try_from_str = parse_mode))]
    current_mode: Option<u32>,

    /// Octal POSIX mode for archived files.
    #[structopt(short = "y", long = "saved-mode", parse(try_from_str = parse_mode))]
    saved_mode: Option<u32>,

    /// Stay in the foreground instead of daemonizing.
    #[structopt(short = "d", long = "no-daemon")]
    no_daemon: bool,

    /// Drop privileges to this user after binding sockets.
    #[structopt(short = "u", long = "user")]
    user: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[structopt(long = "log")]
    log: Option<String>,

    /// Optional config file merged underneath these flags.
    #[structopt(long = "config", parse(from_os_str))]
    config_file: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_opt(Opt::from_args())
    }

    fn from_opt(opt: Opt) -> Result<Self, ConfigError> {
        let defaults = match &opt.config_file {
            Some(path) => {
                let mut c = config::Config::new();
                c.merge(config::File::from(path.as_path()))?;
                c.try_into::<FileDefaults>()?
            }
            None => FileDefaults::default(),
        };

        let port_numbers = if !opt.ports.is_empty() {
            opt.ports.clone()
        } else if let Some(ports) = defaults.ports {
            ports
        } else {
            vec![DEFAULT_PORT]
        };

        let ports = port_numbers
            .into_iter()
            .map(|port| PortConfig {
                port,
                drop_detection: !opt.no_drop_check.contains(&port),
            })
            .collect::<Vec<_>>();

        if ports.is_empty() {
            return Err(ConfigError::NoPorts);
        }
        for p in &ports {
            if p.port == 0 {
                return Err(ConfigError::InvalidPort(p.port as i64));
            }
        }

        let save_interval_secs = opt
            .interval
            .or(defaults.save_interval_secs)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        if save_interval_secs == 0 {
            return Err(ConfigError::InvalidInterval(0));
        }

        let log_level_str = opt
            .log
            .or(defaults.log)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let log_level = LevelFilter::from_str(&log_level_str)
            .unwrap_or(LevelFilter::Info);

        Ok(Config {
            ports,
            save_interval_secs,
            buffer_count: opt.buffers.or(defaults.buffer_count).unwrap_or(DEFAULT_BUFFERS),
            max_drop_silent: opt
                .max_drop
                .or(defaults.max_drop_silent)
                .unwrap_or(DEFAULT_MAX_DROP_SILENT),
            current_path: opt
                .current
                .or(defaults.current_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CURRENT_PATH)),
            saved_prefix: opt
                .saved_prefix
                .or(defaults.saved_prefix)
                .unwrap_or_else(|| DEFAULT_SAVED_PREFIX.to_string()),
            current_mode: opt
                .current_mode
                .or(defaults.current_mode.and_then(|s| parse_mode(&s).ok()))
                .unwrap_or(DEFAULT_MODE),
            saved_mode: opt
                .saved_mode
                .or(defaults.saved_mode.and_then(|s| parse_mode(&s).ok()))
                .unwrap_or(DEFAULT_MODE),
            nodaemon: opt.no_daemon,
            new_user: opt.user,
            log_level,
        })
    }
}
