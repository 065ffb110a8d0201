//! Narracut
//!
//! Turns a timed narration script into a captioned short-form video: the
//! narration is synthesized, matching footage is chosen from the source
//! video's subtitle track, and the clips are cut, captioned and joined.
//!
//! # Usage
//!
//! ```bash
//! narracut run --script script.txt --subtitles source.srt --video source.mp4 --output final.mp4
//! narracut parse --script script.txt
//! narracut clean
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::info;

use narracut::adapters::{LogSettings, TracingLogAdapter};
use narracut::cli::{commands, Cli};

/// Main entry point for the Narracut CLI application
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    TracingLogAdapter::init(&LogSettings {
        level: cli.log_level.clone(),
        json: cli.log_json,
    })?;
    info!("Starting Narracut");

    commands::execute(cli).await?;
    Ok(())
}
