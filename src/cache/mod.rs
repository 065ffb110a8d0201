//! Content-addressed artifact cache
//!
//! Every expensive call is keyed by a SHA-256 digest of its semantic inputs.
//! Entries live under one root directory, split per kind, and survive across
//! runs until [`ContentAddressedCache::clear`] wipes the namespace.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::domain::errors::DomainError;
use crate::domain::model::{ClipPlan, LineRange};

/// Which stage an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    TtsAudio,
    ClipSelection,
    VideoClip,
}

impl CacheKind {
    pub const ALL: [CacheKind; 3] = [
        CacheKind::TtsAudio,
        CacheKind::ClipSelection,
        CacheKind::VideoClip,
    ];

    fn dir_name(&self) -> &'static str {
        match self {
            CacheKind::TtsAudio => "tts",
            CacheKind::ClipSelection => "meta",
            CacheKind::VideoClip => "clips",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            CacheKind::TtsAudio => "wav",
            CacheKind::ClipSelection => "json",
            CacheKind::VideoClip => "mp4",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::TtsAudio => "tts_audio",
            CacheKind::ClipSelection => "clip_selection",
            CacheKind::VideoClip => "video_clip",
        }
    }
}

/// Deterministic key derived only from semantic inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: CacheKind,
    digest: String,
}

impl CacheKey {
    /// Hash arbitrary key material for `kind`
    pub fn new(kind: CacheKind, material: &str) -> Self {
        let digest = Sha256::digest(material.as_bytes());
        Self {
            kind,
            digest: digest.iter().map(|b| format!("{:02x}", b)).collect(),
        }
    }

    /// Synthesized narration for one voice and text
    pub fn tts(speaker_id: &str, text: &str) -> Self {
        Self::new(CacheKind::TtsAudio, &format!("{}:{}", speaker_id, text))
    }

    /// Clip selection for a segment; `embedded` tags scripts parsed from inline markers
    pub fn clip_selection(range: LineRange, text: &str, embedded: bool) -> Self {
        let tag = if embedded { "v2:" } else { "" };
        Self::new(
            CacheKind::ClipSelection,
            &format!("clip_selection:{}{}-{}:{}", tag, range.start, range.end, text),
        )
    }

    /// Finished clip for a cutting plan paired with one narration track
    pub fn video_clip(plan: &ClipPlan, audio: &Path, text: &str) -> Self {
        let audio = audio.display();
        let material = match plan {
            ClipPlan::SingleRange(range) => {
                format!("{:.2}-{:.2}:{}:{}", range.start, range.duration(), audio, text)
            }
            ClipPlan::MultiRange(ranges) => {
                let bounds: Vec<String> = ranges
                    .iter()
                    .map(|r| format!("{:.2}-{:.2}", r.start, r.end))
                    .collect();
                format!("multi:{}:{}:{}", bounds.join(","), audio, text)
            }
        };
        Self::new(CacheKind::VideoClip, &material)
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// A stored artifact
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub path: PathBuf,
    pub metadata: Option<serde_json::Value>,
}

/// Entry counts per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub tts_audio: usize,
    pub clip_selections: usize,
    pub video_clips: usize,
}

impl CacheStats {
    pub fn total(&self) -> usize {
        self.tts_audio + self.clip_selections + self.video_clips
    }
}

/// Durable key-to-artifact store shared by all stages
#[derive(Debug, Clone)]
pub struct ContentAddressedCache {
    root: PathBuf,
}

impl ContentAddressedCache {
    /// Open (and create) a cache rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            // Paths handed to external tools must not depend on their working directory.
            std::env::current_dir()
                .map_err(|e| DomainError::CacheIo(format!("cannot resolve {}: {}", root.display(), e)))?
                .join(root)
        };
        let cache = Self { root };
        cache.ensure_layout()?;
        debug!("Cache opened at {}", cache.root.display());
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_layout(&self) -> Result<(), DomainError> {
        for kind in CacheKind::ALL {
            fs::create_dir_all(self.root.join(kind.dir_name())).map_err(|e| {
                DomainError::CacheIo(format!(
                    "cannot create cache directory {}: {}",
                    self.root.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Where the payload for `key` lives
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(key.kind.dir_name())
            .join(format!("{}.{}", key.digest, key.kind.extension()))
    }

    fn metadata_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(key.kind.dir_name())
            .join(format!("{}.meta.json", key.digest))
    }

    /// Look up an entry; empty payloads count as misses
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.path_for(key);
        let size = fs::metadata(&path).ok()?.len();
        if size == 0 {
            return None;
        }
        let metadata = fs::read_to_string(self.metadata_path(key))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok());
        Some(CacheEntry {
            key: key.clone(),
            path,
            metadata,
        })
    }

    /// Store `payload` under `key`, replacing any previous value
    pub fn put(
        &self,
        key: &CacheKey,
        payload: &[u8],
        metadata: Option<&serde_json::Value>,
    ) -> Result<CacheEntry, DomainError> {
        let path = self.path_for(key);
        self.write_atomic(&path, payload)?;
        if let Some(metadata) = metadata {
            self.put_metadata(key, metadata)?;
        }
        debug!(kind = key.kind.as_str(), digest = %key.digest, "Cache entry written");
        Ok(CacheEntry {
            key: key.clone(),
            path,
            metadata: metadata.cloned(),
        })
    }

    /// Attach or replace the metadata blob of an existing entry
    pub fn put_metadata(&self, key: &CacheKey, metadata: &serde_json::Value) -> Result<(), DomainError> {
        let raw = serde_json::to_vec(metadata)
            .map_err(|e| DomainError::CacheIo(format!("cannot encode metadata: {}", e)))?;
        self.write_atomic(&self.metadata_path(key), &raw)
    }

    /// Store the file at `source` under `key`
    pub fn put_file(
        &self,
        key: &CacheKey,
        source: &Path,
        metadata: Option<&serde_json::Value>,
    ) -> Result<CacheEntry, DomainError> {
        let payload = fs::read(source).map_err(|e| {
            DomainError::CacheIo(format!("cannot read {}: {}", source.display(), e))
        })?;
        self.put(key, &payload, metadata)
    }

    /// Decode a JSON payload; unreadable entries are treated as misses
    pub fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let entry = self.get(key)?;
        let raw = fs::read(&entry.path).ok()?;
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring corrupt cache entry {}: {}", entry.path.display(), e);
                None
            }
        }
    }

    pub fn put_json<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<CacheEntry, DomainError> {
        let raw = serde_json::to_vec_pretty(value)
            .map_err(|e| DomainError::CacheIo(format!("cannot encode cache entry: {}", e)))?;
        self.put(key, &raw, None)
    }

    // Concurrent writers race on the rename; both payloads are equivalent.
    fn write_atomic(&self, path: &Path, payload: &[u8]) -> Result<(), DomainError> {
        let dir = path.parent().unwrap_or(&self.root);
        let io_err = |e: std::io::Error| {
            DomainError::CacheIo(format!("cannot write {}: {}", path.display(), e))
        };
        let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        staged.write_all(payload).map_err(io_err)?;
        staged.flush().map_err(io_err)?;
        staged.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    /// Drop one entry and its metadata; a missing entry is not an error
    pub fn remove(&self, key: &CacheKey) -> Result<(), DomainError> {
        for path in [self.path_for(key), self.metadata_path(key)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(DomainError::CacheIo(format!(
                        "cannot remove {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        debug!(kind = key.kind.as_str(), digest = %key.digest, "Cache entry removed");
        Ok(())
    }

    /// Count stored payloads per kind
    pub fn stats(&self) -> CacheStats {
        let count = |kind: CacheKind| {
            WalkDir::new(self.root.join(kind.dir_name()))
                .min_depth(1)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .filter(|e| {
                    e.path()
                        .extension()
                        .map_or(false, |ext| ext == kind.extension())
                })
                .filter(|e| !e.file_name().to_string_lossy().ends_with(".meta.json"))
                .count()
        };
        CacheStats {
            tts_audio: count(CacheKind::TtsAudio),
            clip_selections: count(CacheKind::ClipSelection),
            video_clips: count(CacheKind::VideoClip),
        }
    }

    /// Wipe the whole namespace and recreate an empty layout
    pub fn clear(&self) -> Result<CacheStats, DomainError> {
        let stats = self.stats();
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|e| {
                DomainError::CacheIo(format!("cannot clear {}: {}", self.root.display(), e))
            })?;
        }
        self.ensure_layout()?;
        info!(
            "Cleared cache at {} ({} entries)",
            self.root.display(),
            stats.total()
        );
        Ok(stats)
    }
}
