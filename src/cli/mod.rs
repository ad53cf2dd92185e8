// SPDX-License-Identifier: Apache-2.0

mod inspect;
mod listen;
mod patch;
mod run;
mod up;

use siobridge::monitor::{Display, Monitor};
use siobridge::siofs::dir::Policy;
use siobridge::siofs::Siofs;
use siobridge::transport::tty::Tty;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use log::info;

/// Upload executables to a console loader and serve files to it
///
/// Talks to a loader over a serial link: `run`, `up` and `patch` transfer
/// files, `listen` shows console output and answers the device's file
/// requests from the host directory.
#[derive(Parser, Debug)]
#[clap(version)]
pub struct Options {
    /// Logging options
    #[clap(flatten)]
    logger: LogOptions,

    /// Serial port options
    #[clap(flatten)]
    port: PortOptions,

    /// Console options
    #[clap(flatten)]
    console: ConsoleOptions,

    /// Subcommands (with their own options)
    #[clap(subcommand)]
    cmd: Subcommands,
}

impl Options {
    pub fn execute(self) -> anyhow::Result<()> {
        self.logger.init();

        info!("logging initialized!");
        info!("CLI opts: {:?}", self);

        if let Some(ref dir) = self.console.dir {
            std::env::set_current_dir(dir)
                .with_context(|| format!("unable to change to {}", dir.display()))?;
        }

        self.cmd.dispatch(&self.port, &self.console)
    }
}

/// `siobridge` subcommands and their options/arguments.
#[derive(Subcommand, Debug)]
enum Subcommands {
    Run(run::Options),
    Up(up::Options),
    Patch(patch::Options),
    Listen(listen::Options),
    Inspect(inspect::Options),
}

impl Subcommands {
    fn dispatch(self, port: &PortOptions, console: &ConsoleOptions) -> anyhow::Result<()> {
        match self {
            Self::Run(cmd) => cmd.execute(port, console),
            Self::Up(cmd) => cmd.execute(port),
            Self::Patch(cmd) => cmd.execute(port),
            Self::Listen(cmd) => cmd.execute(port, console),
            Self::Inspect(cmd) => cmd.execute(),
        }
    }
}

/// Serial port options
#[derive(Args, Debug)]
pub struct PortOptions {
    /// Serial device connected to the console
    #[clap(
        long,
        global = true,
        env = "SIOBRIDGE_DEVICE",
        default_value = "/dev/ttyUSB0",
        parse(from_os_str)
    )]
    device: PathBuf,

    /// Baud rate
    #[clap(long, global = true, env = "SIOBRIDGE_BAUD", default_value_t = 115200)]
    baud: u32,

    /// Use RTS/CTS flow control
    #[clap(long, global = true)]
    handshake: bool,
}

impl PortOptions {
    pub fn open(&self) -> anyhow::Result<Tty> {
        Tty::open(&self.device, self.baud, self.handshake)
            .with_context(|| format!("unable to open {}", self.device.display()))
    }
}

/// Console options
#[derive(Args, Debug)]
pub struct ConsoleOptions {
    /// Host directory served to the console
    #[clap(long, global = true, parse(from_os_str))]
    dir: Option<PathBuf>,

    /// Show console output as hex
    #[clap(long, global = true)]
    hex: bool,

    /// Let directory steps skip entries that don't match the wildcard.
    ///
    /// By default a step that lands on a non-matching file ends the
    /// listing, which is what existing console software expects.
    #[clap(long, global = true)]
    full_scan: bool,
}

impl ConsoleOptions {
    /// Shows console output and serves file requests until the port fails.
    pub fn listen(&self, tty: Tty, device: &Path) -> anyhow::Result<()> {
        let policy = if self.full_scan {
            Policy::FullScan
        } else {
            Policy::SingleCandidate
        };

        let display = if self.hex { Display::Hex } else { Display::Text };

        eprintln!("Listening on {}, press Ctrl+C to quit...", device.display());

        let mut monitor = Monitor::new(tty, Siofs::new(policy), io::stdout(), display);
        monitor.run().context("console connection lost")
    }
}

/// Width of the upload progress bar.
const BAR: usize = 50;

/// Draws an upload progress bar on stderr.
fn progress(sent: usize, total: usize) {
    let filled = match total {
        0 => BAR,
        _ => sent * BAR / total,
    };
    let percent = match total {
        0 => 100,
        _ => sent * 100 / total,
    };

    let mut stderr = io::stderr();
    let _ = write!(
        stderr,
        "\r[{}{}] {:3}%",
        "#".repeat(filled),
        ".".repeat(BAR - filled),
        percent
    );
    if sent >= total {
        let _ = writeln!(stderr);
    }
    let _ = stderr.flush();
}

/// Common logging / output options
#[derive(Args, Debug)]
pub struct LogOptions {
    /// Increase log verbosity. Pass multiple times for more log output.
    ///
    /// By default we only show error messages. Passing `-v` will show warnings,
    /// `-vv` adds info, `-vvv` for debug, and `-vvvv` for trace.
    #[clap(long = "verbose", short = 'v', parse(from_occurrences), global = true)]
    verbosity: u8,

    /// Set fancier logging filters.
    ///
    /// This is equivalent to the `RUST_LOG` environment variable.
    /// For more info, see the `env_logger` crate documentation.
    #[clap(long = "log-filter", env = "SIOBRIDGE_LOG", global = true)]
    log_filter: Option<String>,

    /// Set log output target ("stderr", "stdout")
    #[clap(long, default_value = "stderr", global = true)]
    log_target: LogTarget,
}

impl LogOptions {
    /// Build & initialize a global logger using env_logger::Builder.
    /// As with Builder::init(), this will panic if called more than once,
    /// or if another library has already initialized a global logger.
    pub fn init(&self) {
        let mut builder = env_logger::Builder::new();
        builder
            .filter_level(self.verbosity_level())
            .parse_filters(self.log_filter.as_deref().unwrap_or_default())
            .target(self.log_target.into())
            .init();
    }

    /// Convert the -vvv.. count into a log level.
    fn verbosity_level(&self) -> log::LevelFilter {
        match self.verbosity {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Warn,
            2 => log::LevelFilter::Info,
            3 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

/// Represents targets for debug logging.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
enum LogTarget {
    Stdout,
    Stderr,
}

/// Convert a str to a LogTarget. This is how Clap parses CLI args.
impl FromStr for LogTarget {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            _ => Err(anyhow!("unknown log target {:?}", s)),
        }
    }
}

/// Convert our LogTarget to env_logger's Target
impl From<LogTarget> for env_logger::Target {
    fn from(t: LogTarget) -> Self {
        match t {
            LogTarget::Stdout => Self::Stdout,
            LogTarget::Stderr => Self::Stderr,
        }
    }
}
