//! Command-line argument definitions

use std::path::PathBuf;

use clap::Args;
use clap_num::number_range;

fn worker_count(s: &str) -> Result<usize, String> {
    number_range(s, 1, 64)
}

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Narration script
    #[arg(short, long)]
    pub script: PathBuf,

    /// Subtitle track (SRT) of the source video
    #[arg(short = 't', long)]
    pub subtitles: PathBuf,

    /// Source video the clips are cut from
    #[arg(short, long)]
    pub video: PathBuf,

    /// Final video path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Script format: explicit, embedded or auto
    #[arg(long, default_value = "auto")]
    pub format: String,

    /// Concurrent speech synthesis calls
    #[arg(long, value_parser = worker_count)]
    pub synthesis_workers: Option<usize>,

    /// Concurrent clip selection calls
    #[arg(long, value_parser = worker_count)]
    pub selection_workers: Option<usize>,

    /// Concurrent ffmpeg extraction jobs
    #[arg(long, value_parser = worker_count)]
    pub extraction_workers: Option<usize>,

    /// Cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Wipe the cache before running
    #[arg(long)]
    pub force_clean: bool,

    /// TTS voice
    #[arg(long)]
    pub speaker: Option<String>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the parse command
#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Narration script
    #[arg(short, long)]
    pub script: PathBuf,

    /// Script format: explicit, embedded or auto
    #[arg(long, default_value = "auto")]
    pub format: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the clean command
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Cache directory (defaults to the configured one)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}
