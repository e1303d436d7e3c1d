mod command_create;
mod command_dump;
mod command_info;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::{
    io::{stderr, stdout, Write},
    path::PathBuf,
    sync::Arc,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rdrgen::{
    config::{get_default, get_default_content, Config},
    LeapSeconds,
};

/// Tool for generating JPSS RDRs from CCSDS space packet data.
///
/// ATMS, CrIS, VIIRS and OMPS science products are supported, each packed with the
/// spacecraft diary. Output RDRs are written as directory trees mirroring the RDR HDF5
/// group and dataset layout.
#[derive(Parser)]
#[command(version, about, long_about, disable_help_subcommand = true)]
struct Cli {
    /// Logging level filters, e.g., debug, info, warn, etc ...
    #[arg(short, long, default_value = "info")]
    logging: String,

    /// IERS/IETF leap-seconds.list to use rather than the embedded list.
    #[arg(long, value_name = "path", global = true)]
    leap_seconds: Option<PathBuf>,

    #[command(subcommand)]
    commands: Commands,
}

fn parse_valid_satellite(sat: &str) -> Result<String, String> {
    let valid_satellites = ["npp", "j01", "j02", "j03"];
    if valid_satellites.contains(&sat) {
        Ok(String::from(sat))
    } else {
        Err(format! {"expected one of {}", valid_satellites.join(", ")})
    }
}

#[derive(Args)]
#[group(multiple = false, required = true)]
struct Configs {
    /// Use the built-in default configuration for this satellite id; one of npp, j01, j02, or j03.
    #[arg(short, long, value_name = "name", value_parser=parse_valid_satellite)]
    satellite: Option<String>,

    /// YAML configuration file to use, rather than an embedded default config. See the
    /// config subcommand to view embedded configuration.
    #[arg(short, long, value_name = "path")]
    config: Option<PathBuf>,
}

impl Configs {
    fn load(self) -> Result<Config> {
        match (self.satellite, self.config) {
            (Some(satid), _) => match get_default(&satid).context("getting default config")? {
                Some(config) => Ok(config),
                None => bail!("no config for {satid}"),
            },
            (None, Some(path)) => {
                Config::with_path(&path).with_context(|| format!("invalid config {path:?}"))
            }
            (None, None) => bail!("no spacecraft configuration provided"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create RDRs from spacepacket/level-0 data.
    ///
    /// The default configuration should be good for most cases, but if you want to try your
    /// luck at modifying the default configuration or adding support for a new spacecraft you can
    /// start by dumping the provided default configuration using the `config` sub-command and
    /// modify from there.
    Create {
        #[command(flatten)]
        configs: Configs,

        /// Output directory.
        #[arg(short, long, value_name = "path", default_value = "output")]
        output: PathBuf,

        /// One or more packet data files.
        ///
        /// Inputs are read in the order given and packets are expected to be in time order.
        #[arg(value_name = "path", required = true)]
        input: Vec<PathBuf>,
    },
    /// Extract raw spacepacket data from an RDR.
    ///
    /// Writes one file per RDR collection containing the packets of every granule in
    /// granule order.
    Dump {
        /// RDR to dump
        #[arg(value_name = "path")]
        input: PathBuf,
        /// Directory for the packet files
        #[arg(short, long, value_name = "path", default_value = ".")]
        outdir: PathBuf,
        /// Only dump this collection
        #[arg(short, long)]
        short_name: Option<String>,
    },
    /// Output the default configuration.
    Config {
        /// Satellite to show the config for
        #[arg(value_name = "sat", value_parser=parse_valid_satellite)]
        satellite: String,
    },
    /// Generate JSON containing file, product, granule and aggregate attributes.
    Info {
        #[arg(value_name = "path")]
        input: PathBuf,
        #[arg(short, long)]
        short_name: Option<String>,
        #[arg(short, long)]
        granule_id: Option<String>,
    },
}

fn leap_seconds(path: Option<PathBuf>) -> Result<Arc<LeapSeconds>> {
    let leaps = match path {
        Some(path) => LeapSeconds::from_path(&path)
            .with_context(|| format!("loading leap seconds from {path:?}"))?,
        None => LeapSeconds::embedded(),
    };
    if leaps.is_expired() {
        warn!(
            "{leaps} is expired; times after the expiration may be off by a leap second"
        );
    }
    Ok(leaps)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(EnvFilter::new(cli.logging))
        .init();

    match cli.commands {
        Commands::Create {
            configs,
            input,
            output,
        } => {
            let config = configs.load()?;
            let leaps = leap_seconds(cli.leap_seconds)?;
            let written = crate::command_create::create(config, leaps, &input, &output)?;
            info!("created {} rdrs in {output:?}", written.len());
        }
        Commands::Dump {
            input,
            outdir,
            short_name,
        } => {
            for path in crate::command_dump::dump(&input, &outdir, short_name.as_deref())? {
                info!("wrote {path:?}");
            }
        }
        Commands::Config { satellite } => {
            let Some(content) = get_default_content(&satellite) else {
                bail!("no config for {satellite}");
            };
            stdout().write_all(content.as_bytes())?;
        }
        Commands::Info {
            input,
            short_name,
            granule_id,
        } => {
            crate::command_info::info(input, short_name, granule_id)?;
        }
    }

    Ok(())
}
