// Jellyfin recently-added adapter
// API Documentation: https://api.jellyfin.org
//
// Resolves a user id lazily (preferring an administrator), walks that
// user's movie and TV libraries and publishes their latest additions.
// Library items arrive in two shapes, Movie and Episode; each is decoded
// into the common record up front and a malformed item is dropped with a
// warning instead of poisoning the cycle. Artwork comes from the server
// itself and is mirrored into the local cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::aggregate::AggregationMode;
use crate::config::JellyfinConfig;
use crate::dates::{normalize, NaiveZone};
use crate::error::SensorError;
use crate::models::{
    placeholder_record, FeedRecord, ImageRequest, ImageRole, MediaOccurrence, OccurrenceKind,
};
use crate::sensor::SourceAdapter;

/// 10,000 ticks per millisecond; 600,000,000 per minute.
const TICKS_PER_MINUTE: i64 = 600_000_000;

pub struct JellyfinAdapter {
    client: Client,
    url: String,
    token: String,
    max_items: usize,
    user_id: RwLock<Option<String>>,
}

// === API Response Types ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct User {
    id: String,
    policy: Option<UserPolicy>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserPolicy {
    #[serde(default)]
    is_administrator: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ViewsResponse {
    #[serde(default)]
    items: Vec<LibraryView>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LibraryView {
    id: String,
    collection_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LatestItem {
    id: String,
    #[serde(rename = "Type")]
    item_type: String,
    name: Option<String>,
    date_created: Option<String>,
    premiere_date: Option<String>,
    run_time_ticks: Option<i64>,
    #[serde(default)]
    genres: Vec<String>,
    overview: Option<String>,
    production_year: Option<i32>,
    community_rating: Option<f64>,
    // Episode-only fields
    series_name: Option<String>,
    series_id: Option<String>,
    parent_index_number: Option<i32>,
    index_number: Option<i32>,
}

impl JellyfinAdapter {
    pub fn new(client: Client, config: &JellyfinConfig) -> Self {
        Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            max_items: config.max_items,
            user_id: RwLock::new(None),
        }
    }

    fn auth_header(&self) -> (&'static str, String) {
        (
            "Authorization",
            format!("MediaBrowser Token=\"{}\"", self.token),
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, SensorError> {
        let url = format!("{}{}", self.url, path_and_query);
        let (name, value) = self.auth_header();

        let response = self
            .client
            .get(&url)
            .header(name, value)
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

    /// Resolve and cache the user the libraries are read as. Prefers an
    /// administrator account, falls back to the first user listed.
    async fn ensure_user(&self) -> Result<String, SensorError> {
        if let Some(id) = self.user_id.read().await.clone() {
            return Ok(id);
        }

        let users: Vec<User> = self.get_json("/Users").await?;
        let chosen = users
            .iter()
            .find(|u| u.policy.as_ref().is_some_and(|p| p.is_administrator))
            .or_else(|| users.first())
            .ok_or_else(|| SensorError::Auth("Jellyfin reported no users".into()))?;

        let id = chosen.id.clone();
        tracing::debug!("Using Jellyfin user {}", id);
        *self.user_id.write().await = Some(id.clone());
        Ok(id)
    }

    async fn media_libraries(&self, user_id: &str) -> Result<Vec<String>, SensorError> {
        let views: ViewsResponse = self.get_json(&format!("/Users/{}/Views", user_id)).await?;
        Ok(views
            .items
            .into_iter()
            .filter(|v| {
                matches!(
                    v.collection_type.as_deref(),
                    Some("movies") | Some("tvshows")
                )
            })
            .map(|v| v.id)
            .collect())
    }

    async fn latest_in_library(
        &self,
        user_id: &str,
        library_id: &str,
    ) -> Vec<LatestItem> {
        let path = format!(
            "/Users/{}/Items/Latest?ParentId={}&Limit={}&Fields=ProviderIds,Overview,PremiereDate,RunTimeTicks,Genres,ParentIndexNumber,IndexNumber,SeriesName,SeriesId,ProductionYear,CommunityRating&EnableImages=true",
            user_id, library_id, self.max_items
        );
        match self.get_json::<Vec<LatestItem>>(&path).await {
            Ok(items) => items,
            Err(e) => {
                // One broken library doesn't hide the others.
                tracing::warn!("Jellyfin library {} fetch failed: {}", library_id, e);
                Vec::new()
            }
        }
    }

    fn image_requests(&self, item_id: &str) -> Vec<ImageRequest> {
        vec![
            ImageRequest {
                role: ImageRole::Poster,
                url: format!("{}/Items/{}/Images/Primary", self.url, item_id),
                auth_header: Some(self.auth_header()),
            },
            ImageRequest {
                role: ImageRole::Fanart,
                url: format!("{}/Items/{}/Images/Backdrop", self.url, item_id),
                auth_header: Some(self.auth_header()),
            },
        ]
    }

    /// Validate and normalize one library item into the common shape.
    /// Fails per item; the caller drops and logs.
    fn decode_item(&self, item: &LatestItem) -> Result<MediaOccurrence, SensorError> {
        let added = normalize(
            item.date_created.as_deref().unwrap_or(""),
            NaiveZone::Utc,
        )?;
        let runtime = item
            .run_time_ticks
            .map(|t| t / TICKS_PER_MINUTE)
            .unwrap_or(0);
        let genres = item.genres.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
        let rating = item
            .community_rating
            .map(|r| format!("{:.1}", r))
            .unwrap_or_default();

        let mut payload = FeedRecord::new();
        payload.insert("runtime".into(), Value::from(runtime.to_string()));
        payload.insert("genres".into(), Value::from(genres));
        payload.insert("rating".into(), Value::from(rating));
        payload.insert(
            "release".into(),
            Value::from(added.format("%Y-%m-%d").to_string()),
        );
        payload.insert(
            "aired".into(),
            Value::from(
                item.premiere_date
                    .as_deref()
                    .and_then(|d| d.get(..10))
                    .unwrap_or_default(),
            ),
        );
        payload.insert("flag".into(), Value::from(1));

        let (title, entity_id) = match item.item_type.as_str() {
            "Episode" => {
                let series = item.series_name.clone().ok_or_else(|| {
                    SensorError::parse(&item.id, "episode without SeriesName")
                })?;
                let season = item.parent_index_number.unwrap_or(0);
                let episode = item.index_number.unwrap_or(0);

                payload.insert("title".into(), Value::from(series.clone()));
                payload.insert(
                    "episode".into(),
                    Value::from(item.name.clone().unwrap_or_default()),
                );
                payload.insert(
                    "number".into(),
                    Value::from(format!("S{:02}E{:02}", season, episode)),
                );
                (series, item.series_id.clone().unwrap_or_else(|| item.id.clone()))
            }
            "Movie" => {
                let title = item
                    .name
                    .clone()
                    .ok_or_else(|| SensorError::parse(&item.id, "movie without Name"))?;

                payload.insert("title".into(), Value::from(title.clone()));
                payload.insert(
                    "episode".into(),
                    Value::from(item.overview.clone().unwrap_or_default()),
                );
                payload.insert(
                    "number".into(),
                    Value::from(
                        item.production_year
                            .map(|y| y.to_string())
                            .unwrap_or_default(),
                    ),
                );
                (title, item.id.clone())
            }
            other => {
                return Err(SensorError::parse(
                    &item.id,
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
            images: self.image_requests(&item.id),
        })
    }
}

#[async_trait]
impl SourceAdapter for JellyfinAdapter {
    fn id(&self) -> &str {
        "jellyfin"
    }

    fn name(&self) -> &str {
        "Jellyfin Mediarr"
    }

    fn mode(&self) -> AggregationMode {
        AggregationMode::RecentlyAdded
    }

    fn max_items(&self) -> usize {
        self.max_items
    }

    fn caches_images(&self) -> bool {
        true
    }

    fn placeholder(&self) -> FeedRecord {
        placeholder_record(
            ["$title", "$episode", "$release", "$number - $rating - $runtime", "$genres"],
            "mdi:eye-off",
        )
    }

    async fn fetch(&self, _now: DateTime<Utc>) -> Result<Vec<MediaOccurrence>, SensorError> {
        let user_id = self.ensure_user().await?;
        let libraries = self.media_libraries(&user_id).await?;
        tracing::debug!("Scanning {} Jellyfin libraries", libraries.len());

        let mut occurrences = Vec::new();
        for library_id in &libraries {
            for item in self.latest_in_library(&user_id, library_id).await {
                match self.decode_item(&item) {
                    Ok(occ) => occurrences.push(occ),
                    Err(e) => {
                        tracing::warn!("Skipping Jellyfin item {}: {}", item.id, e);
                    }
                }
            }
        }

        Ok(occurrences)
    }
}
