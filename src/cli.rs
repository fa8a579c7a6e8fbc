use clap::{Parser, ValueEnum};
use newmonkey_config::{ALL_CONTENT_TYPES, Overrides};
use newmonkey_export::Layout;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "newmonkey",
    about = "Recover cached images, scripts and media from Discord's disk cache",
    version
)]
pub struct Args {
    /// Where extracted files are written [default: ./newmonkey_output]
    #[arg(short, long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Discord's cache directory, autodetected when omitted
    #[arg(short = 'd', long, value_name = "DIR")]
    pub discord_cache_dir: Option<PathBuf>,

    /// Number of entries processed at once [default: number of cores]
    #[arg(short = 'c', long = "cpu", value_name = "N")]
    pub workers: Option<usize>,

    /// Export every kind of file, not just images
    #[arg(short, long, conflicts_with = "content_types")]
    pub all_files: bool,

    /// Only export these content types, e.g. `video/*` (repeatable)
    #[arg(short = 't', long = "type", value_name = "MIME")]
    pub content_types: Vec<String>,

    /// Replace existing files instead of writing `name-2.ext`
    #[arg(long)]
    pub overwrite: bool,

    /// How files are arranged in the output directory
    #[arg(long, value_enum)]
    pub layout: Option<LayoutArg>,

    /// Configuration file path
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// No progress bar and no summary
    #[arg(short = 'S', long)]
    pub silent: bool,

    /// Show counts per content type and per host
    #[arg(short = 's', long)]
    pub stats: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress all log output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutArg {
    /// All files in the output directory
    Flat,
    /// `{type}/{discord kind}/{name}`, other hosts under `{type}/other/{host}`
    Grouped,
}

impl From<LayoutArg> for Layout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Flat => Self::Flat,
            LayoutArg::Grouped => Self::Grouped,
        }
    }
}

impl Args {
    /// The configuration layer given on the command line.
    pub fn overrides(&self) -> Overrides {
        let content_types = match (self.all_files, self.content_types.is_empty()) {
            (true, _) => Some(vec![ALL_CONTENT_TYPES.to_string()]),
            (false, false) => Some(self.content_types.clone()),
            (false, true) => None,
        };
        Overrides {
            cache_dir: self.discord_cache_dir.clone(),
            output_dir: self.out_dir.clone(),
            overwrite: self.overwrite.then_some(true),
            content_types,
            workers: self.workers,
            layout: self.layout.map(Layout::from),
        }
    }
}
