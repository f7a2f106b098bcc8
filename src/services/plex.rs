// Plex recently-added adapter
// API Documentation: https://plexapi.dev
//
// Walks the server's movie and show library sections and publishes their
// recently added items, newest first. Requests ask for the JSON
// representation of the MediaContainer. Artwork comes from TMDB (resolved
// through the guid's themoviedb reference, falling back to a title search),
// so nothing is mirrored into the local cache.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::aggregate::AggregationMode;
use crate::config::PlexConfig;
use crate::dates::{normalize, NaiveZone};
use crate::error::SensorError;
use crate::models::{placeholder_record, FeedRecord, MediaOccurrence, OccurrenceKind};
use crate::sensor::SourceAdapter;
use crate::services::tmdb::{ImageTriple, MediaType, TmdbClient};

pub struct PlexAdapter {
    client: Client,
    url: String,
    token: String,
    tmdb: Option<Arc<TmdbClient>>,
    max_items: usize,
}

// === API Response Types ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Container<T> {
    media_container: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SectionList {
    #[serde(default)]
    directory: Vec<Section>,
}

#[derive(Debug, Deserialize)]
struct Section {
    key: String,
    #[serde(rename = "type")]
    section_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataList {
    #[serde(default)]
    metadata: Vec<PlexItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlexItem {
    rating_key: String,
    #[serde(rename = "type")]
    item_type: String,
    title: Option<String>,
    year: Option<i32>,
    summary: Option<String>,
    /// Milliseconds.
    duration: Option<i64>,
    originally_available_at: Option<String>,
    /// Unix epoch seconds.
    added_at: Option<i64>,
    guid: Option<String>,
    #[serde(default, rename = "Genre")]
    genres: Vec<GenreTag>,
    // Episode-only fields
    grandparent_title: Option<String>,
    grandparent_rating_key: Option<String>,
    grandparent_guid: Option<String>,
    parent_index: Option<i32>,
    index: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
struct GenreTag {
    tag: String,
}

/// Extract a TMDB id from a Plex guid such as
/// `com.plexapp.agents.themoviedb://603?lang=en`.
pub(crate) fn tmdb_id_from_guid(guid: &str) -> Option<i64> {
    let (_, rest) = guid.split_once("themoviedb://")?;
    let id = rest.split('?').next()?;
    id.parse().ok()
}

impl PlexAdapter {
    pub fn new(client: Client, config: &PlexConfig, tmdb: Option<Arc<TmdbClient>>) -> Self {
        Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            tmdb,
            max_items: config.max_items,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SensorError> {
        let url = format!("{}{}", self.url, path);

        let response = self
            .client
            .get(&url)
            .header("X-Plex-Token", &self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| SensorError::fetch(&url, e))?;

        if !response.status().is_success() {
            return Err(SensorError::fetch(
                &url,
                format!("status {}", response.status()),
            ));
        }

        response.json::<T>().await.map_err(|e| SensorError::fetch(&url, e))
    }

    async fn media_sections(&self) -> Result<Vec<String>, SensorError> {
        let sections: Container<SectionList> = self.get_json("/library/sections").await?;
        Ok(sections
            .media_container
            .directory
            .into_iter()
            .filter(|s| matches!(s.section_type.as_str(), "movie" | "show"))
            .map(|s| s.key)
            .collect())
    }

    async fn recently_added(&self, section_key: &str) -> Vec<PlexItem> {
        let path = format!("/library/sections/{}/recentlyAdded", section_key);
        match self.get_json::<Container<MetadataList>>(&path).await {
            Ok(container) => container.media_container.metadata,
            Err(e) => {
                // One broken section doesn't hide the others.
                tracing::warn!("Plex section {} fetch failed: {}", section_key, e);
                Vec::new()
            }
        }
    }

    async fn item_images(&self, item: &PlexItem, media_type: MediaType) -> ImageTriple {
        let Some(tmdb) = &self.tmdb else {
            return (None, None, None);
        };

        let guid = match media_type {
            MediaType::Tv => item.grandparent_guid.as_deref(),
            MediaType::Movie => item.guid.as_deref(),
        };
        let tmdb_id = match guid.and_then(tmdb_id_from_guid) {
            Some(id) => Some(id),
            None => {
                let title = match media_type {
                    MediaType::Tv => item.grandparent_title.as_deref(),
                    MediaType::Movie => item.title.as_deref(),
                };
                match title {
                    Some(t) => tmdb.search(t, item.year, media_type).await,
                    None => None,
                }
            }
        };

        match tmdb_id {
            Some(id) => tmdb.get_images(id, media_type).await,
            None => (None, None, None),
        }
    }

    /// When the item was added to the library. Prefers the epoch `addedAt`;
    /// older servers only carry the availability date.
    fn added_instant(item: &PlexItem) -> Result<DateTime<Utc>, SensorError> {
        if let Some(epoch) = item.added_at {
            if let Some(dt) = Utc.timestamp_opt(epoch, 0).single() {
                return Ok(dt);
            }
        }
        normalize(
            item.originally_available_at.as_deref().unwrap_or(""),
            NaiveZone::Utc,
        )
    }

    /// Validate and normalize one section item into the common shape.
    /// Fails per item; the caller drops and logs. Show sections also list
    /// season containers, which are not publishable items.
    fn decode_item(
        item: &PlexItem,
        images: ImageTriple,
    ) -> Result<MediaOccurrence, SensorError> {
        let added = Self::added_instant(item)?;
        let (poster, backdrop, main_backdrop) = images;
        let release = item
            .originally_available_at
            .clone()
            .unwrap_or_default();
        let genres = item
            .genres
            .iter()
            .map(|g| g.tag.clone())
            .collect::<Vec<_>>()
            .join(", ");

        let mut payload = FeedRecord::new();
        payload.insert("release".into(), Value::from(release));
        payload.insert(
            "runtime".into(),
            Value::from((item.duration.unwrap_or(0) / 60_000).to_string()),
        );
        payload.insert("genres".into(), Value::from(genres));
        payload.insert("poster".into(), Value::from(poster.unwrap_or_default()));
        payload.insert(
            "fanart".into(),
            Value::from(main_backdrop.clone().or_else(|| backdrop.clone()).unwrap_or_default()),
        );
        payload.insert("banner".into(), Value::from(backdrop.unwrap_or_default()));
        payload.insert("flag".into(), Value::from(1));

        let (title, entity_id) = match item.item_type.as_str() {
            "episode" => {
                let series = item.grandparent_title.clone().ok_or_else(|| {
                    SensorError::parse(&item.rating_key, "episode without grandparentTitle")
                })?;
                let season = item.parent_index.unwrap_or(0);
                let episode = item.index.unwrap_or(0);

                payload.insert("title".into(), Value::from(series.clone()));
                payload.insert(
                    "episode".into(),
                    Value::from(item.title.clone().unwrap_or_default()),
                );
                payload.insert(
                    "number".into(),
                    Value::from(format!("S{:02}E{:02}", season, episode)),
                );
                (
                    series,
                    item.grandparent_rating_key
                        .clone()
                        .unwrap_or_else(|| item.rating_key.clone()),
                )
            }
            "movie" => {
                let title = item.title.clone().ok_or_else(|| {
                    SensorError::parse(&item.rating_key, "movie without title")
                })?;
                let blurb = match item.summary.as_deref() {
                    Some(s) if !s.is_empty() => {
                        let short: String = s.chars().take(100).collect();
                        format!("{}...", short)
                    }
                    _ => "N/A".to_string(),
                };

                payload.insert("title".into(), Value::from(title.clone()));
                payload.insert("episode".into(), Value::from(blurb));
                payload.insert(
                    "number".into(),
                    Value::from(item.year.map(|y| y.to_string()).unwrap_or_default()),
                );
                (title, item.rating_key.clone())
            }
            other => {
                return Err(SensorError::parse(
                    &item.rating_key,
                    format!("unsupported item type '{}'", other),
                ));
            }
        };

        Ok(MediaOccurrence {
            entity_id,
            title,
            occurs_at: added,
            kind: OccurrenceKind::Added,
            payload,
            images: Vec::new(),
        })
    }
}

#[async_trait]
impl SourceAdapter for PlexAdapter {
    fn id(&self) -> &str {
        "plex"
    }

    fn name(&self) -> &str {
        "Plex Mediarr"
    }

    fn mode(&self) -> AggregationMode {
        AggregationMode::RecentlyAdded
    }

    fn max_items(&self) -> usize {
        self.max_items
    }

    fn placeholder(&self) -> FeedRecord {
        placeholder_record(
            ["$title", "$episode", "$release", "$number - $rating - $runtime", "$genres"],
            "mdi:eye-off",
        )
    }

    async fn fetch(&self, _now: DateTime<Utc>) -> Result<Vec<MediaOccurrence>, SensorError> {
        let sections = self.media_sections().await?;
        tracing::debug!("Scanning {} Plex sections", sections.len());

        let mut occurrences = Vec::new();
        for section_key in &sections {
            for item in self.recently_added(section_key).await {
                // Season containers from show sections are expected noise.
                if item.item_type == "season" {
                    continue;
                }
                let media_type = if item.item_type == "episode" {
                    MediaType::Tv
                } else {
                    MediaType::Movie
                };
                let images = self.item_images(&item, media_type).await;
                match Self::decode_item(&item, images) {
                    Ok(occ) => occurrences.push(occ),
                    Err(e) => {
                        tracing::warn!("Skipping Plex item {}: {}", item.rating_key, e);
                    }
                }
            }
        }

        Ok(occurrences)
    }
}
