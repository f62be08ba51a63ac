//! Asset preloader
//!
//! Starts an image fetch for every segment that has an image reference, all
//! in parallel and without blocking sequencing. Each fetch settles exactly
//! once and reports back through a sink, tagged with the lesson token it was
//! launched under; the player drops settlements whose token is stale.

use crate::error::{ImageLoadError, Result};
use crate::playback::LessonToken;
use async_trait::async_trait;
use lesson_common::events::ImageStatus;
use lesson_common::{Segment, SegmentId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Something that can fetch an image by URL
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetch the image; `Ok` means it is ready to display
    async fn fetch(&self, url: &str) -> std::result::Result<(), ImageLoadError>;
}

/// Image fetcher over HTTP
pub struct HttpImageFetcher {
    http_client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<(), ImageLoadError> {
        debug!(url = %url, "Fetching image");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| ImageLoadError::new(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageLoadError::new(url, format!("HTTP {}", status)));
        }

        if let Some(content_type) = response.headers().get(reqwest::header::CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default();
            if !content_type.starts_with("image/") {
                return Err(ImageLoadError::new(
                    url,
                    format!("unexpected content type {}", content_type),
                ));
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ImageLoadError::new(url, e.to_string()))?;
        if body.is_empty() {
            return Err(ImageLoadError::new(url, "empty body"));
        }

        Ok(())
    }
}

/// Per-segment image preload facts for one lesson
///
/// `loaded` and `errored` are append-only: once a segment settles it never
/// changes status again.
#[derive(Debug, Clone, Default)]
pub struct PreloadStatus {
    pending: HashSet<SegmentId>,
    loaded: HashSet<SegmentId>,
    errored: HashSet<SegmentId>,
}

impl PreloadStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a fetch as started. False if already pending or settled.
    pub fn begin(&mut self, id: SegmentId) -> bool {
        if self.is_settled(id) {
            return false;
        }
        self.pending.insert(id)
    }

    /// Record a settlement. False if the segment had already settled.
    pub fn record(&mut self, id: SegmentId, loaded: bool) -> bool {
        if self.is_settled(id) {
            return false;
        }
        self.pending.remove(&id);
        if loaded {
            self.loaded.insert(id)
        } else {
            self.errored.insert(id)
        }
    }

    pub fn is_loaded(&self, id: SegmentId) -> bool {
        self.loaded.contains(&id)
    }

    pub fn is_errored(&self, id: SegmentId) -> bool {
        self.errored.contains(&id)
    }

    pub fn is_settled(&self, id: SegmentId) -> bool {
        self.is_loaded(id) || self.is_errored(id)
    }

    /// Status as rendered by the host
    ///
    /// Segments never passed to `begin` have no image.
    pub fn status(&self, id: SegmentId) -> ImageStatus {
        if self.loaded.contains(&id) {
            ImageStatus::Loaded
        } else if self.errored.contains(&id) {
            ImageStatus::Errored
        } else if self.pending.contains(&id) {
            ImageStatus::Pending
        } else {
            ImageStatus::NoImage
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Outcome of one image fetch
#[derive(Debug, Clone)]
pub struct ImageSettlement {
    pub lesson: LessonToken,
    pub segment_id: SegmentId,
    pub outcome: std::result::Result<(), ImageLoadError>,
}

/// Receives settlements from fetch tasks
pub type SettlementSink = Arc<dyn Fn(ImageSettlement) + Send + Sync>;

/// Launches image fetches
#[derive(Clone)]
pub struct Preloader {
    /// `None` when preloading is disabled; image segments then stay pending
    fetcher: Option<Arc<dyn ImageFetcher>>,
}

impl Preloader {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            fetcher: Some(fetcher),
        }
    }

    pub fn disabled() -> Self {
        Self { fetcher: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.fetcher.is_some()
    }

    /// Begin fetches for every segment with an image. Returns how many started.
    pub fn preload_all(
        &self,
        lesson: LessonToken,
        segments: &[Segment],
        status: &mut PreloadStatus,
        sink: &SettlementSink,
    ) -> usize {
        segments
            .iter()
            .filter(|segment| self.preload_one(lesson, segment, status, sink))
            .count()
    }

    /// Begin a fetch for one segment unless it has no image, is in flight, or
    /// already settled
    pub fn preload_one(
        &self,
        lesson: LessonToken,
        segment: &Segment,
        status: &mut PreloadStatus,
        sink: &SettlementSink,
    ) -> bool {
        let Some(url) = segment.image() else {
            return false;
        };
        if !status.begin(segment.id) {
            return false;
        }

        let Some(fetcher) = self.fetcher.clone() else {
            return true;
        };

        let url = url.to_string();
        let segment_id = segment.id;
        let sink = Arc::clone(sink);
        tokio::spawn(async move {
            let outcome = fetcher.fetch(&url).await;
            sink(ImageSettlement {
                lesson,
                segment_id,
                outcome,
            });
        });
        true
    }
}
