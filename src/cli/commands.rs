//! Command implementations

use std::path::Path;

use tracing::info;

use crate::adapters::{PipelineConfig, Secrets, TomlConfigAdapter};
use crate::app::{clean_cache, AppContainer, DefaultAppContainer, PipelineRequest};
use crate::cli::args::{CleanArgs, ParseArgs, RunArgs};
use crate::cli::{Cli, Commands};
use crate::domain::model::{PipelineReport, ScriptSegment};
use crate::error::{NarracutError, NarracutResult};
use crate::script::{ScriptFormat, ScriptSegmentParser};

/// Dispatch the parsed command line
pub async fn execute(cli: Cli) -> NarracutResult<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run(args) => run(config_path, args).await,
        Commands::Parse(args) => parse(args),
        Commands::Clean(args) => clean(config_path, args),
        Commands::Config => show_config(config_path),
    }
}

/// Execute the run command
pub async fn run(config_path: Option<&Path>, args: RunArgs) -> NarracutResult<()> {
    let format = ScriptFormat::parse(&args.format)?;
    let mut config = TomlConfigAdapter::load(config_path)?;
    apply_overrides(&mut config, &args);
    config.validate()?;
    let secrets = Secrets::from_env()?;

    let container = DefaultAppContainer::new(&config, &secrets)?;
    let request = PipelineRequest {
        script: args.script,
        subtitles: args.subtitles,
        source_video: args.video,
        output: args.output,
        format,
        force_clean: args.force_clean,
    };
    info!("Script: {}", request.script.display());
    info!("Output: {}", request.output.display());

    let report = container.pipeline_interactor().run(&request).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        display_report(&report);
    }

    if report.is_success() {
        return Ok(());
    }
    match &report.composition_error {
        Some(message) if report.segments.iter().any(|s| s.clip_path.is_some()) => {
            Err(NarracutError::FinalVideo {
                message: message.clone(),
            })
        }
        _ => Err(NarracutError::NothingComposed),
    }
}

/// Command-line values win over file and environment
fn apply_overrides(config: &mut PipelineConfig, args: &RunArgs) {
    if let Some(workers) = args.synthesis_workers {
        config.workers.synthesis = workers;
    }
    if let Some(workers) = args.selection_workers {
        config.workers.selection = workers;
    }
    if let Some(workers) = args.extraction_workers {
        config.workers.extraction = workers;
    }
    if let Some(dir) = &args.cache_dir {
        config.cache.dir = dir.clone();
    }
    if let Some(speaker) = &args.speaker {
        config.synthesis.speaker = speaker.clone();
    }
}

/// Execute the parse command
pub fn parse(args: ParseArgs) -> NarracutResult<()> {
    let format = ScriptFormat::parse(&args.format)?;
    if !args.script.is_file() {
        return Err(NarracutError::InputFileNotFound {
            path: args.script.display().to_string(),
        });
    }
    let script = std::fs::read_to_string(&args.script)?;
    let parsed = ScriptSegmentParser::new(format).parse_with_diagnostics(&script);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&parsed.segments)?);
    } else {
        println!("Format: {:?}", parsed.format);
        display_segments(&parsed.segments);
        if !parsed.diagnostics.is_empty() {
            println!("Skipped:");
            for diagnostic in &parsed.diagnostics {
                println!("  line {}: {}", diagnostic.line, diagnostic.message);
            }
        }
    }
    Ok(())
}

/// Execute the clean command
pub fn clean(config_path: Option<&Path>, args: CleanArgs) -> NarracutResult<()> {
    let dir = match args.cache_dir {
        Some(dir) => dir,
        None => TomlConfigAdapter::load(config_path)?.cache.dir,
    };
    let removed = clean_cache(&dir)?;
    println!("Removed {} cache entries from {}", removed, dir.display());
    Ok(())
}

/// Print the configuration the run command would use
pub fn show_config(config_path: Option<&Path>) -> NarracutResult<()> {
    let config = TomlConfigAdapter::load(config_path)?;
    print!("{}", TomlConfigAdapter::to_toml(&config)?);
    Ok(())
}

/// Display parsed segments
fn display_segments(segments: &[ScriptSegment]) {
    println!("Segments");
    println!("========");
    for segment in segments {
        let duration = segment
            .duration_hint
            .map(|d| format!("{:.1}s", d))
            .unwrap_or_else(|| format!("~{:.1}s", segment.estimated_duration()));
        println!(
            "  {:>3}. [{}] {:>6}  {}",
            segment.ordinal,
            segment.line_range,
            duration,
            segment.preview()
        );
    }
    println!("{} segments", segments.len());
}

/// Display a run report
fn display_report(report: &PipelineReport) {
    println!("Pipeline Report");
    println!("===============");
    for segment in &report.segments {
        let status = if segment.clip_path.is_some() { "✓" } else { "✗" };
        let cached = [
            ("audio", segment.audio_cached),
            ("selection", segment.selection_cached),
            ("clip", segment.clip_cached),
        ]
        .iter()
        .filter(|(_, hit)| *hit)
        .map(|(name, _)| *name)
        .collect::<Vec<_>>();
        println!(
            "  {} {:>3}. [{}] {}",
            status, segment.ordinal, segment.line_range, segment.text
        );
        if let Some(level) = segment.match_level {
            println!("        match: {}", level.as_str());
        }
        if !cached.is_empty() {
            println!("        cached: {}", cached.join(", "));
        }
        if let Some(reason) = &segment.reason {
            println!("        {}: {}", segment.outcome, reason);
        }
    }
    println!();
    println!("Included: {}", report.included);
    println!("Dropped: {}", report.dropped);
    match (&report.output, &report.composition_error) {
        (Some(output), _) => println!("Output: {}", output.display()),
        (None, Some(error)) => println!("Output: none ({})", error),
        (None, None) => println!("Output: none"),
    }
    let elapsed = report.finished_at - report.started_at;
    println!("Elapsed: {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
}
