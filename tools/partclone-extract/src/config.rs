use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use partclone_image::OpenOptions;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "partclone-extract",
    version,
    about = "Inspect partclone images and read them back as the original block device."
)]
pub struct Cli {
    /// Directory of images; when set, IMAGE arguments are export names instead of paths.
    ///
    /// A `manifest.json` in the directory maps export names to files.
    ///
    /// Environment variable: `PARTCLONE_CATALOG`.
    #[arg(long, global = true, env = "PARTCLONE_CATALOG", value_name = "DIR")]
    pub catalog: Option<PathBuf>,

    /// Log filter (tracing-subscriber EnvFilter syntax).
    ///
    /// Environment variable: `PARTCLONE_LOG`.
    #[arg(long, global = true, env = "PARTCLONE_LOG", default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub log_json: bool,

    #[command(flatten)]
    pub open: OpenArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct OpenArgs {
    /// Refuse images shorter than their block region instead of zero-filling.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub require_complete: bool,

    /// Accept images whose bitmap disagrees with the header's used block count.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub skip_used_count_check: bool,
}

impl OpenArgs {
    pub fn options(&self) -> OpenOptions {
        OpenOptions {
            check_used_count: !self.skip_used_count_check,
            require_complete: self.require_complete,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the image header and layout summary.
    Info {
        image: String,
        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,
    },
    /// Print the extent table.
    Extents {
        image: String,
        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,
    },
    /// Read a byte range of the original device.
    Read {
        image: String,
        #[arg(long, value_name = "BYTES")]
        offset: u64,
        #[arg(long, value_name = "BYTES")]
        length: u32,
        /// Write to this file instead of stdout.
        #[arg(long, short, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Restore the original device into a sparse raw file.
    Extract {
        image: String,
        output: PathBuf,
        /// Overwrite OUTPUT if it exists.
        #[arg(long, action = clap::ArgAction::SetTrue)]
        force: bool,
        /// Suppress progress output.
        #[arg(long, action = clap::ArgAction::SetTrue)]
        quiet: bool,
    },
    /// List the exports of `--catalog`.
    List {
        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,
    },
}

pub fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
