use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a media file through the subtitle pipeline
    Process {
        /// Input media file (copied into the uploads directory)
        #[arg(short, long)]
        input: PathBuf,

        /// Owner the job belongs to
        #[arg(long, default_value = "local")]
        owner: String,

        /// Display name of the job
        #[arg(short, long)]
        name: Option<String>,

        /// Use this SRT document instead of running extraction
        #[arg(short, long)]
        subtitle: Option<PathBuf>,

        /// Translate the subtitles into this language
        #[arg(short, long)]
        target_lang: Option<String>,

        /// Style snapshot as a JSON file
        #[arg(long)]
        style: Option<PathBuf>,

        /// Burn the subtitles into a new video once processing completes
        #[arg(short, long)]
        export: bool,
    },

    /// Compile an SRT document and a style into a render description
    Compile {
        /// Input SRT document
        #[arg(short, long)]
        input: PathBuf,

        /// Style snapshot as a JSON file
        #[arg(long)]
        style: Option<PathBuf>,

        /// Kind of render description to produce
        #[arg(short, long, value_enum, default_value = "ass")]
        format: CompileFormat,

        /// Font file for overlay output (defaults to the first font in the fonts directory)
        #[arg(long)]
        font: Option<PathBuf>,

        /// Declared width of the style document
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Declared height of the style document
        #[arg(long, default_value = "720")]
        height: u32,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the streams of a media file
    Probe {
        /// Media file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Mirror remote video listings into the local cache
    Sync {
        /// TOML file with an `[owners]` table of long-lived credentials
        #[arg(long)]
        credentials: PathBuf,

        /// Keep running on the configured interval until interrupted
        #[arg(short, long)]
        watch: bool,
    },

    /// Write the default configuration to a file
    Config {
        /// Destination file
        #[arg(short, long, default_value = "subforge.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompileFormat {
    /// ASS style document
    Ass,
    /// drawtext filter chain
    Overlay,
}
