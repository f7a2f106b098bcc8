// Sensor orchestration
//
// One FeedSensor per configured source runs the poll cycle: ensure the image
// directory, fetch, mirror artwork, dedupe/sort, truncate, publish. A cycle
// that fails publishes an unavailable result; nothing propagates to the poll
// loop, and the next tick retries from scratch.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::aggregate::{dedupe_and_sort, AggregationMode};
use crate::error::SensorError;
use crate::models::{CycleResult, FeedRecord, ImageRequest, ImageRole, MediaOccurrence};
use crate::services::image_cache::ImageCache;

/// One upstream source: fetch raw items, apply source-specific filters, map
/// to the common occurrence shape. Auth, filtering and payload mapping are
/// the adapter's business; ordering, dedup and publication are not.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Unique sensor id, also the image-cache namespace.
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    fn mode(&self) -> AggregationMode {
        AggregationMode::Upcoming
    }

    fn max_items(&self) -> usize;

    /// Whether this adapter mirrors upstream artwork into the local cache
    /// (enables the post-cycle sweep of stale files).
    fn caches_images(&self) -> bool {
        false
    }

    /// Template-binding record published when the real list is empty.
    fn placeholder(&self) -> FeedRecord;

    async fn fetch(&self, now: DateTime<Utc>) -> Result<Vec<MediaOccurrence>, SensorError>;
}

/// Read-only view of a sensor handed to the API layer.
#[derive(Clone)]
pub struct SensorHandle {
    pub id: String,
    pub name: String,
    pub result: Arc<RwLock<CycleResult>>,
}

pub struct FeedSensor {
    adapter: Box<dyn SourceAdapter>,
    image_cache: Arc<ImageCache>,
    result: Arc<RwLock<CycleResult>>,
}

impl FeedSensor {
    pub fn new(adapter: Box<dyn SourceAdapter>, image_cache: Arc<ImageCache>) -> Self {
        Self {
            adapter,
            image_cache,
            result: Arc::new(RwLock::new(CycleResult::unavailable())),
        }
    }

    pub fn handle(&self) -> SensorHandle {
        SensorHandle {
            id: self.adapter.id().to_string(),
            name: self.adapter.name().to_string(),
            result: self.result.clone(),
        }
    }

    /// Run one cycle and publish its result.
    pub async fn update(&self) {
        let result = match self.run_cycle().await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Error updating {} sensor: {}", self.adapter.name(), e);
                CycleResult::unavailable()
            }
        };
        *self.result.write().await = result;
    }

    async fn run_cycle(&self) -> Result<CycleResult, SensorError> {
        self.image_cache
            .ensure_dir()
            .await
            .map_err(|e| SensorError::Image(e.to_string()))?;

        let now = Utc::now();
        let mut occurrences = self.adapter.fetch(now).await?;

        let mut live_keys: HashSet<String> = HashSet::new();
        for occ in &mut occurrences {
            if occ.images.is_empty() {
                continue;
            }
            let key = format!("{}-{}", self.adapter.id(), occ.entity_id);
            self.mirror_images(occ, &key).await;
            live_keys.insert(key);
        }

        let aggregation = dedupe_and_sort(occurrences, self.adapter.mode());
        let state = aggregation.total;

        let mut data: Vec<FeedRecord> = aggregation
            .entities
            .into_iter()
            .take(self.adapter.max_items())
            .map(|entity| entity.payload)
            .collect();

        if data.is_empty() {
            data.push(self.adapter.placeholder());
        }

        if self.adapter.caches_images() {
            let prefix = format!("{}-", self.adapter.id());
            self.image_cache.sweep(&prefix, &live_keys).await;
        }

        Ok(CycleResult {
            state,
            data,
            available: true,
        })
    }

    /// Mirror an occurrence's poster and fanart into the cache. The two
    /// downloads are independent: they run concurrently and a failure of
    /// one neither blocks the other nor drops the record - the payload
    /// field always receives the derived public path.
    async fn mirror_images(&self, occ: &mut MediaOccurrence, key: &str) {
        let poster = take_role(&occ.images, ImageRole::Poster);
        let fanart = take_role(&occ.images, ImageRole::Fanart);

        let (poster_path, fanart_path) = futures::join!(
            self.ensure_one(poster, key),
            self.ensure_one(fanart, key),
        );

        if let Some(path) = poster_path {
            occ.payload.insert("poster".into(), Value::from(path));
        }
        if let Some(path) = fanart_path {
            occ.payload
                .insert("fanart".into(), Value::from(path.clone()));
            occ.payload.insert("banner".into(), Value::from(path));
        }
    }

    async fn ensure_one(&self, request: Option<ImageRequest>, key: &str) -> Option<String> {
        let request = request?;
        let (path, ok) = self
            .image_cache
            .ensure(&request.url, key, request.role, request.auth_header)
            .await;
        if !ok {
            tracing::warn!(
                "Keeping record without cached {} for {}",
                request.role.as_str(),
                key
            );
        }
        Some(path)
    }
}

fn take_role(images: &[ImageRequest], role: ImageRole) -> Option<ImageRequest> {
    images.iter().find(|r| r.role == role).cloned()
}

/// Periodic poll loop for one sensor. The cycle is awaited before the next
/// sleep begins, so two cycles of the same sensor never overlap; sensors
/// run in independent tasks and poll concurrently with each other.
pub async fn run_poller(sensor: FeedSensor, interval: Duration, cancel: CancellationToken) {
    let name = sensor.handle().name;
    tracing::info!("Poller started for {} (every {:?})", name, interval);

    sensor.update().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Poller for {} received shutdown signal", name);
                break;
            }
            _ = tokio::time::sleep(interval) => {
                sensor.update().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{placeholder_record, OccurrenceKind};
    use axum::{routing::get, Router};
    use reqwest::Client;

    struct StubAdapter {
        occurrences: Result<Vec<MediaOccurrence>, String>,
        max_items: usize,
    }

    #[async_trait]
    impl SourceAdapter for StubAdapter {
        fn id(&self) -> &str {
            "stub"
        }

        fn name(&self) -> &str {
            "Stub Mediarr"
        }

        fn max_items(&self) -> usize {
            self.max_items
        }

        fn placeholder(&self) -> FeedRecord {
            placeholder_record(
                ["$title", "$release", "$genres", "$rating", "$studio"],
                "mdi:arrow-down-circle",
            )
        }

        async fn fetch(&self, _now: DateTime<Utc>) -> Result<Vec<MediaOccurrence>, SensorError> {
            match &self.occurrences {
                Ok(occs) => Ok(occs.clone()),
                Err(reason) => Err(SensorError::fetch("stub", reason)),
            }
        }
    }

    fn occurrence(id: &str, title: &str, images: Vec<ImageRequest>) -> MediaOccurrence {
        MediaOccurrence {
            entity_id: id.to_string(),
            title: title.to_string(),
            occurs_at: Utc::now(),
            kind: OccurrenceKind::Episode,
            payload: {
                let mut p = FeedRecord::new();
                p.insert("title".into(), Value::from(title));
                p
            },
            images,
        }
    }

    fn sensor_with(adapter: StubAdapter, dir: &std::path::Path) -> FeedSensor {
        let cache = Arc::new(ImageCache::new(
            Client::new(),
            dir.to_path_buf(),
            "/local/mediarr",
        ));
        FeedSensor::new(Box::new(adapter), cache)
    }

    #[tokio::test]
    async fn test_empty_result_publishes_single_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = sensor_with(
            StubAdapter {
                occurrences: Ok(Vec::new()),
                max_items: 10,
            },
            dir.path(),
        );

        sensor.update().await;

        let result = sensor.handle().result.read().await.clone();
        assert_eq!(result.state, 0);
        assert!(result.available);
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0]["title_default"], "$title");
        assert_eq!(result.data[0]["icon"], "mdi:arrow-down-circle");
    }

    #[tokio::test]
    async fn test_fetch_failure_publishes_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = sensor_with(
            StubAdapter {
                occurrences: Err("boom".to_string()),
                max_items: 10,
            },
            dir.path(),
        );

        sensor.update().await;

        let result = sensor.handle().result.read().await.clone();
        assert_eq!(result.state, 0);
        assert!(!result.available);
        assert!(result.data.is_empty());
    }

    #[tokio::test]
    async fn test_state_counts_before_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let occs = (0..5)
            .map(|i| occurrence(&format!("id-{i}"), &format!("Title {i}"), Vec::new()))
            .collect();
        let sensor = sensor_with(
            StubAdapter {
                occurrences: Ok(occs),
                max_items: 2,
            },
            dir.path(),
        );

        sensor.update().await;

        let result = sensor.handle().result.read().await.clone();
        assert_eq!(result.state, 5);
        assert_eq!(result.data.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_fanart_keeps_record_with_dangling_path() {
        // Upstream serves the poster but 404s the fanart: the record is
        // still published and its fanart field points at a path that does
        // not exist on disk.
        let app = Router::new()
            .route("/poster.jpg", get(|| async { &b"img"[..] }))
            .route(
                "/fanart.jpg",
                get(|| async { axum::http::StatusCode::NOT_FOUND }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let images = vec![
            ImageRequest {
                role: ImageRole::Poster,
                url: format!("http://{}/poster.jpg", addr),
                auth_header: None,
            },
            ImageRequest {
                role: ImageRole::Fanart,
                url: format!("http://{}/fanart.jpg", addr),
                auth_header: None,
            },
        ];
        let sensor = sensor_with(
            StubAdapter {
                occurrences: Ok(vec![occurrence("77", "Show", images)]),
                max_items: 10,
            },
            dir.path(),
        );

        sensor.update().await;

        let result = sensor.handle().result.read().await.clone();
        assert_eq!(result.state, 1);
        let record = &result.data[0];
        assert_eq!(record["poster"], "/local/mediarr/stub-77_poster.jpg");
        assert_eq!(record["fanart"], "/local/mediarr/stub-77_fanart.jpg");
        assert!(dir.path().join("stub-77_poster.jpg").exists());
        assert!(!dir.path().join("stub-77_fanart.jpg").exists());
    }
}
