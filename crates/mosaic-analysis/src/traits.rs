use crate::error::AnalysisResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationLabel {
    pub name: String,
    pub parent_name: Option<String>,
    pub confidence: f32,
}

impl ModerationLabel {
    /// Label name followed by its parent category, if any.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.parent_name.as_deref())
    }
}

/// Outcome of a synchronous image moderation call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationVerdict {
    pub flagged: bool,
    pub labels: Vec<ModerationLabel>,
}

impl ModerationVerdict {
    pub fn clean() -> Self {
        Self {
            flagged: false,
            labels: Vec::new(),
        }
    }

    /// Distinct label and parent names, in first-seen order.
    pub fn label_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.labels
            .iter()
            .flat_map(|l| l.names())
            .filter(|n| seen.insert(n.to_string()))
            .map(str::to_string)
            .collect()
    }
}

/// State of an asynchronous video moderation job.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoModerationStatus {
    InProgress,
    /// Flat list of label and parent names found in the video.
    Succeeded(Vec<String>),
    Failed(String),
}

/// Object and scene detection. Best-effort: provider failures yield an
/// empty set.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect_objects(&self, key: &str) -> BTreeSet<String>;
}

/// Synchronous explicit-content classification of a stored image.
#[async_trait]
pub trait ImageModerator: Send + Sync {
    async fn moderate_image(&self, key: &str) -> AnalysisResult<ModerationVerdict>;
}

#[async_trait]
pub trait VideoModerator: Send + Sync {
    /// Submit a moderation job for `key`, tagged with `asset_id`.
    ///
    /// Resubmitting for the same asset returns the same provider job.
    async fn submit_video_moderation(&self, asset_id: Uuid, key: &str) -> AnalysisResult<String>;

    async fn fetch_video_moderation_labels(
        &self,
        job_id: &str,
    ) -> AnalysisResult<VideoModerationStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_names_are_distinct() {
        let verdict = ModerationVerdict {
            flagged: true,
            labels: vec![
                ModerationLabel {
                    name: "Graphic Violence".to_string(),
                    parent_name: Some("Violence".to_string()),
                    confidence: 97.0,
                },
                ModerationLabel {
                    name: "Violence".to_string(),
                    parent_name: None,
                    confidence: 97.0,
                },
            ],
        };
        assert_eq!(verdict.label_names(), vec!["Graphic Violence", "Violence"]);
        assert!(ModerationVerdict::clean().label_names().is_empty());
    }
}
