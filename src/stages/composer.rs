// Video composer - joins the surviving clips in script order

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::errors::*;
use crate::domain::model::*;
use crate::ports::*;

/// Concatenates finished clips into the final video
pub struct VideoComposer {
    media: Arc<dyn MediaToolkitPort>,
}

impl VideoComposer {
    pub fn new(media: Arc<dyn MediaToolkitPort>) -> Self {
        Self { media }
    }

    /// Successful clips in ascending ordinal order
    pub fn ordered_clips(outcomes: &[SegmentOutcome]) -> Vec<VideoArtifact> {
        let mut clips: Vec<VideoArtifact> = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                SegmentOutcome::Succeeded(clip) => Some(clip.clone()),
                _ => None,
            })
            .collect();
        clips.sort_by_key(|clip| clip.ordinal);
        clips
    }

    /// Write the final video; returns the ordinals that made it in
    pub async fn compose(
        &self,
        outcomes: &[SegmentOutcome],
        output: &Path,
    ) -> Result<Vec<usize>, DomainError> {
        let clips = Self::ordered_clips(outcomes);
        if clips.is_empty() {
            return Err(DomainError::CompositionFailed(
                "no segment produced a clip".to_string(),
            ));
        }

        let copy_video = self.signatures_match(&clips).await;
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DomainError::CompositionFailed(format!(
                    "cannot create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let inputs: Vec<PathBuf> = clips.iter().map(|clip| clip.path.clone()).collect();
        info!(
            clips = inputs.len(),
            copy_video,
            "Composing final video into {}",
            output.display()
        );
        self.media
            .concat(&inputs, output, ConcatMode::Final { copy_video })
            .await
            .map_err(|e| DomainError::CompositionFailed(e.to_string()))?;

        Ok(clips.iter().map(|clip| clip.ordinal).collect())
    }

    /// Stream copy is only safe when every clip carries the same video parameters
    async fn signatures_match(&self, clips: &[VideoArtifact]) -> bool {
        let mut first: Option<StreamSignature> = None;
        for clip in clips {
            let signature = match self.media.probe_signature(&clip.path).await {
                Ok(signature) => signature,
                Err(e) => {
                    warn!("Cannot probe {}: {}; re-encoding video", clip.path.display(), e);
                    return false;
                }
            };
            match &first {
                None => first = Some(signature),
                Some(expected) if *expected != signature => return false,
                Some(_) => {}
            }
        }
        true
    }
}
