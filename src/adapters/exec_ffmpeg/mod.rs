//! FFmpeg execution adapter
//!
//! Drives the `ffmpeg` and `ffprobe` binaries as child processes. Every
//! invocation is bounded by the profile timeout and reports the tail of the
//! tool's stderr when it fails.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::adapters::toml_config::MediaConfig;
use crate::domain::errors::*;
use crate::ports::*;

const STDERR_TAIL_LINES: usize = 6;

/// FFmpeg-based media toolkit
pub struct FfmpegToolkit {
    profile: MediaConfig,
}

impl FfmpegToolkit {
    pub fn new(profile: MediaConfig) -> Self {
        Self { profile }
    }

    fn base_args() -> Vec<String> {
        ["-y", "-hide_banner", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn video_encode_args(&self) -> Vec<String> {
        vec![
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            self.profile.preset.clone(),
            "-crf".into(),
            self.profile.crf.to_string(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ]
    }

    fn audio_encode_args(&self, bitrate: &str) -> Vec<String> {
        vec![
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            bitrate.to_string(),
            "-ar".into(),
            self.profile.sample_rate.to_string(),
            "-ac".into(),
            self.profile.channels.to_string(),
        ]
    }

    fn cut_args(&self, source: &Path, start: f64, duration: f64, output: &Path) -> Vec<String> {
        let mut args = Self::base_args();
        args.extend([
            "-ss".into(),
            format!("{:.3}", start),
            "-i".into(),
            source.display().to_string(),
            "-t".into(),
            format!("{:.3}", duration),
        ]);
        args.extend(self.video_encode_args());
        args.push("-an".into());
        args.push(output.display().to_string());
        args
    }

    /// Scale and pad into the target frame, then burn the captions
    fn video_filter(&self, captions: &Path) -> String {
        let (w, h) = (self.profile.width, self.profile.height);
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,\
             subtitles={}:force_style='{}'",
            escape_filter_path(captions),
            self.profile.caption_style
        )
    }

    fn mux_args(&self, video: &Path, audio: &Path, captions: &Path, duration: f64, output: &Path) -> Vec<String> {
        let mut args = Self::base_args();
        args.extend([
            "-i".into(),
            video.display().to_string(),
            "-i".into(),
            audio.display().to_string(),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "1:a:0".into(),
            "-vf".into(),
            self.video_filter(captions),
        ]);
        args.extend(self.video_encode_args());
        args.extend(self.audio_encode_args(&self.profile.clip_audio_bitrate));
        args.extend(["-t".into(), format!("{:.3}", duration)]);
        args.push(output.display().to_string());
        args
    }

    fn concat_args(&self, list: &Path, output: &Path, mode: ConcatMode) -> Vec<String> {
        let mut args = Self::base_args();
        args.extend([
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list.display().to_string(),
        ]);
        match mode {
            ConcatMode::StitchVideo => {
                args.extend(["-c:v".into(), "copy".into(), "-an".into()]);
            }
            ConcatMode::Final { copy_video } => {
                if copy_video {
                    args.extend(["-c:v".into(), "copy".into()]);
                } else {
                    args.extend(self.video_encode_args());
                }
                args.extend(self.audio_encode_args(&self.profile.final_audio_bitrate));
            }
        }
        args.push(output.display().to_string());
        args
    }

    /// Run one tool invocation and return its stdout
    async fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>, DomainError> {
        debug!("Running {} {}", program, args.join(" "));
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    DomainError::ExtractionTool(format!("{} executable not found on PATH", program))
                } else {
                    DomainError::ExtractionTool(format!("failed to spawn {}: {}", program, e))
                }
            })?;

        let output = tokio::time::timeout(self.profile.timeout(), child.wait_with_output())
            .await
            .map_err(|_| {
                DomainError::ExtractionTool(format!(
                    "{} timed out after {}s",
                    program, self.profile.timeout_secs
                ))
            })?
            .map_err(|e| DomainError::ExtractionTool(format!("{} failed: {}", program, e)))?;

        if !output.status.success() {
            return Err(DomainError::ExtractionTool(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr_tail(&output.stderr)
            )));
        }
        Ok(output.stdout)
    }
}

/// Quote a path for use inside an ffmpeg filter argument
fn escape_filter_path(path: &Path) -> String {
    path.display()
        .to_string()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// One line per input in ffmpeg's concat demuxer syntax
fn concat_list(inputs: &[PathBuf]) -> String {
    // ffmpeg resolves relative entries against the list file, not the working directory
    let cwd = std::env::current_dir().ok();
    inputs
        .iter()
        .map(|p| match &cwd {
            Some(cwd) if p.is_relative() => cwd.join(p),
            _ => p.clone(),
        })
        .map(|p| format!("file '{}'\n", p.display().to_string().replace('\'', "'\\''")))
        .collect()
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

fn parse_duration(stdout: &[u8]) -> Result<f64, DomainError> {
    let text = String::from_utf8_lossy(stdout);
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| DomainError::ExtractionTool(format!("unexpected ffprobe duration '{}'", text.trim())))
}

#[derive(Debug, Deserialize)]
struct ProbeStreams {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    r_frame_rate: Option<String>,
}

fn parse_signature(stdout: &[u8]) -> Result<StreamSignature, DomainError> {
    let parsed: ProbeStreams = serde_json::from_slice(stdout)
        .map_err(|e| DomainError::ExtractionTool(format!("unreadable ffprobe output: {}", e)))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| DomainError::ExtractionTool("no video stream".to_string()))?;
    Ok(StreamSignature {
        codec: stream.codec_name.unwrap_or_default(),
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        frame_rate: stream.r_frame_rate.unwrap_or_default(),
    })
}

#[async_trait]
impl MediaToolkitPort for FfmpegToolkit {
    async fn cut(&self, source: &Path, start: f64, duration: f64, output: &Path) -> Result<(), DomainError> {
        self.run(&self.profile.ffmpeg, &self.cut_args(source, start, duration, output))
            .await
            .map(|_| ())
    }

    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        captions: &Path,
        duration: f64,
        output: &Path,
    ) -> Result<(), DomainError> {
        self.run(&self.profile.ffmpeg, &self.mux_args(video, audio, captions, duration, output))
            .await
            .map(|_| ())
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path, mode: ConcatMode) -> Result<(), DomainError> {
        let dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let list = tempfile::Builder::new()
            .prefix("concat-")
            .suffix(".txt")
            .tempfile_in(dir)
            .map_err(|e| DomainError::ExtractionTool(format!("cannot create concat list: {}", e)))?;
        tokio::fs::write(list.path(), concat_list(inputs))
            .await
            .map_err(|e| DomainError::ExtractionTool(format!("cannot write concat list: {}", e)))?;

        self.run(&self.profile.ffmpeg, &self.concat_args(list.path(), output, mode))
            .await
            .map(|_| ())
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64, DomainError> {
        let args: Vec<String> = vec![
            "-v".into(),
            "error".into(),
            "-show_entries".into(),
            "format=duration".into(),
            "-of".into(),
            "default=noprint_wrappers=1:nokey=1".into(),
            path.display().to_string(),
        ];
        parse_duration(&self.run(&self.profile.ffprobe, &args).await?)
    }

    async fn probe_signature(&self, path: &Path) -> Result<StreamSignature, DomainError> {
        let args: Vec<String> = vec![
            "-v".into(),
            "error".into(),
            "-select_streams".into(),
            "v:0".into(),
            "-show_entries".into(),
            "stream=codec_name,width,height,r_frame_rate".into(),
            "-of".into(),
            "json".into(),
            path.display().to_string(),
        ];
        parse_signature(&self.run(&self.profile.ffprobe, &args).await?)
    }
}
