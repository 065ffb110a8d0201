//! Narration script parsing
//!
//! Two shapes are accepted:
//!
//! ```text
//! [15s] [1-50] explicit form, one segment per line
//! embedded form: keyword[11-15] prose with inline markers[16-20].
//! ```

use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::{LineRange, ScriptSegment};

const SENTENCE_TERMINALS: &[char] = &['。', '.', '！', '!', '？', '?'];
const CLOSING_MARKS: &[char] = &['”', '"', '’', '\'', '」', '』', '）', ')'];

fn explicit_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:\[\s*(\d+(?:\.\d+)?)\s*s\s*\]\s*)?\[\s*(\d+)\s*(?:-\s*(\d+)\s*)?\]\s*(.+)$",
        )
        .expect("explicit line pattern is valid")
    })
}

fn inline_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\[\]]*)\]").expect("marker pattern is valid"))
}

/// Which script shape to expect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFormat {
    /// `[Ds] [A-B] text` per line
    Explicit,
    /// Prose with inline `keyword[A-B]` markers
    Embedded,
    /// Decide from the content
    Auto,
}

impl ScriptFormat {
    /// Parse format name from string
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.to_lowercase().as_str() {
            "explicit" => Ok(ScriptFormat::Explicit),
            "embedded" => Ok(ScriptFormat::Embedded),
            "auto" => Ok(ScriptFormat::Auto),
            _ => Err(DomainError::Config(format!(
                "Invalid script format: {}. Valid formats: explicit, embedded, auto",
                value
            ))),
        }
    }

    /// Guess the format: explicit when at least half the lines look explicit
    pub fn detect(script: &str) -> Self {
        let lines: Vec<&str> = script
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() {
            return ScriptFormat::Explicit;
        }
        let explicit = lines.iter().filter(|l| explicit_line().is_match(l)).count();
        if explicit * 2 >= lines.len() {
            ScriptFormat::Explicit
        } else {
            ScriptFormat::Embedded
        }
    }
}

/// A skipped line or marker
#[derive(Debug, Clone, PartialEq)]
pub struct ParseDiagnostic {
    /// 1-based script line
    pub line: usize,
    pub message: String,
}

/// Parser output including what was skipped
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedScript {
    /// Format actually used after auto-detection
    pub format: ScriptFormat,
    pub segments: Vec<ScriptSegment>,
    pub diagnostics: Vec<ParseDiagnostic>,
}

/// Narration script parser
#[derive(Debug, Clone)]
pub struct ScriptSegmentParser {
    format: ScriptFormat,
}

impl Default for ScriptSegmentParser {
    fn default() -> Self {
        Self::new(ScriptFormat::Auto)
    }
}

impl ScriptSegmentParser {
    pub fn new(format: ScriptFormat) -> Self {
        Self { format }
    }

    /// Parse a script into ordered segments, skipping bad lines
    pub fn parse(&self, script: &str) -> Vec<ScriptSegment> {
        self.parse_with_diagnostics(script).segments
    }

    /// Parse and keep the diagnostics for everything that was dropped
    pub fn parse_with_diagnostics(&self, script: &str) -> ParsedScript {
        let format = match self.format {
            ScriptFormat::Auto => ScriptFormat::detect(script),
            other => other,
        };
        let mut diagnostics = Vec::new();
        let drafts = match format {
            ScriptFormat::Embedded => parse_embedded(script, &mut diagnostics),
            _ => parse_explicit(script, &mut diagnostics),
        };

        for diagnostic in &diagnostics {
            warn!(line = diagnostic.line, "Skipping script input: {}", diagnostic.message);
        }

        let segments: Vec<ScriptSegment> = drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| ScriptSegment {
                ordinal: i + 1,
                ..draft
            })
            .collect();
        debug!("Parsed {} segments as {:?}", segments.len(), format);

        ParsedScript {
            format,
            segments,
            diagnostics,
        }
    }
}

/// Render segments in the explicit one-per-line form
pub fn render(segments: &[ScriptSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        if let Some(hint) = segment.duration_hint {
            let _ = write!(out, "[{}s] ", hint);
        }
        let _ = writeln!(out, "[{}] {}", segment.line_range, segment.text);
    }
    out
}

fn parse_line_range(marker: &str) -> Result<LineRange, DomainError> {
    let marker = marker.trim();
    let parse_bound = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| DomainError::ParseError(format!("invalid line number '{}'", s.trim())))
    };
    match marker.split_once('-') {
        Some((start, end)) => LineRange::new(parse_bound(start)?, parse_bound(end)?),
        None => Ok(LineRange::single(parse_bound(marker)?)),
    }
}

fn parse_explicit(script: &str, diagnostics: &mut Vec<ParseDiagnostic>) -> Vec<ScriptSegment> {
    let mut segments = Vec::new();
    for (i, raw) in script.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match parse_explicit_line(line) {
            Ok(segment) => segments.push(segment),
            Err(err) => diagnostics.push(ParseDiagnostic {
                line: i + 1,
                message: format!("{} in '{}'", err, line),
            }),
        }
    }
    segments
}

fn parse_explicit_line(line: &str) -> Result<ScriptSegment, DomainError> {
    let caps = explicit_line()
        .captures(line)
        .ok_or_else(|| DomainError::ParseError("expected '[Ds] [A-B] text'".to_string()))?;

    let duration_hint = match caps.get(1) {
        Some(m) => Some(m.as_str().parse::<f64>().map_err(|_| {
            DomainError::ParseError(format!("invalid duration '{}'", m.as_str()))
        })?),
        None => None,
    };
    let start = &caps[2];
    let range = match caps.get(3) {
        Some(end) => parse_line_range(&format!("{}-{}", start, end.as_str()))?,
        None => parse_line_range(start)?,
    };
    let text = caps[4].trim().to_string();

    Ok(ScriptSegment {
        ordinal: 0,
        text,
        line_range: range,
        duration_hint,
        marker_ranges: vec![range],
    })
}

/// Accumulates prose and marker ranges for one sentence
#[derive(Default)]
struct SentenceBuilder {
    text: String,
    ranges: Vec<LineRange>,
    closing: Option<char>,
    first_line: usize,
}

impl SentenceBuilder {
    fn push_text(
        &mut self,
        fragment: &str,
        line: usize,
        out: &mut Vec<ScriptSegment>,
        diagnostics: &mut Vec<ParseDiagnostic>,
    ) {
        for ch in fragment.chars() {
            if let Some(terminal) = self.closing {
                let continues = ch.is_whitespace()
                    || CLOSING_MARKS.contains(&ch)
                    || SENTENCE_TERMINALS.contains(&ch)
                    || (terminal == '.' && ch.is_ascii_digit());
                if !continues {
                    self.flush(out, diagnostics);
                } else if terminal == '.' && ch.is_ascii_digit() {
                    // decimal point, not a sentence end
                    self.closing = None;
                }
            }
            if self.text.trim().is_empty() {
                self.first_line = line;
            }
            self.text.push(ch);
            if SENTENCE_TERMINALS.contains(&ch) {
                self.closing = Some(ch);
            }
        }
    }

    fn push_marker(&mut self, range: LineRange, line: usize) {
        if self.text.trim().is_empty() && self.ranges.is_empty() {
            self.first_line = line;
        }
        self.ranges.push(range);
    }

    fn flush(&mut self, out: &mut Vec<ScriptSegment>, diagnostics: &mut Vec<ParseDiagnostic>) {
        let text = self.text.trim().to_string();
        let ranges = std::mem::take(&mut self.ranges);
        self.text.clear();
        self.closing = None;

        if text.is_empty() && ranges.is_empty() {
            return;
        }
        if text.is_empty() {
            diagnostics.push(ParseDiagnostic {
                line: self.first_line,
                message: "marker without narration text".to_string(),
            });
            return;
        }
        let Some(line_range) = ranges.iter().copied().reduce(|a, b| a.union(&b)) else {
            diagnostics.push(ParseDiagnostic {
                line: self.first_line,
                message: format!("no line range for '{}'", text),
            });
            return;
        };
        out.push(ScriptSegment {
            ordinal: 0,
            text,
            line_range,
            duration_hint: None,
            marker_ranges: ranges,
        });
    }
}

fn parse_embedded(script: &str, diagnostics: &mut Vec<ParseDiagnostic>) -> Vec<ScriptSegment> {
    let mut segments = Vec::new();
    let mut builder = SentenceBuilder::default();

    for (i, raw) in script.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let mut cursor = 0;
        for caps in inline_marker().captures_iter(line) {
            let Some(whole) = caps.get(0) else { continue };
            builder.push_text(&line[cursor..whole.start()], line_no, &mut segments, diagnostics);
            match parse_line_range(&caps[1]) {
                Ok(range) => builder.push_marker(range, line_no),
                Err(err) => diagnostics.push(ParseDiagnostic {
                    line: line_no,
                    message: format!("{} in marker '{}'", err, whole.as_str()),
                }),
            }
            cursor = whole.end();
        }
        builder.push_text(&line[cursor..], line_no, &mut segments, diagnostics);
        // a line break ends the sentence
        builder.flush(&mut segments, diagnostics);
    }
    segments
}
