// TMDB metadata client
// API Documentation: https://developer.themoviedb.org/reference/intro/getting-started
//
// Two jobs: best-effort artwork/overview enrichment for the calendar and
// trending adapters, and the discovery list endpoints published as sensors
// of their own. Enrichment failures never abort an item; a failed list
// fetch fails that sensor's cycle.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::SensorError;
use crate::models::{placeholder_record, FeedRecord, MediaOccurrence, OccurrenceKind};
use crate::sensor::SourceAdapter;

const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";
const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p";

/// Upper bound on each in-memory lookup cache. The caches exist to absorb
/// repeat lookups within and across cycles, not to hold every title ever
/// seen; at the cap the cache is dropped wholesale and rebuilt.
const LOOKUP_CACHE_CAP: usize = 1024;

fn insert_capped<V>(cache: &mut HashMap<String, V>, key: String, value: V) {
    if cache.len() >= LOOKUP_CACHE_CAP {
        cache.clear();
    }
    cache.insert(key, value);
}

/// Upstream media classification used in TMDB paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

/// Poster/backdrop/main-backdrop URL triple for one title.
pub type ImageTriple = (Option<String>, Option<String>, Option<String>);

/// TMDB API client with in-memory caches for image and search lookups
/// (the same series recurs across occurrences cycle after cycle).
pub struct TmdbClient {
    client: Client,
    api_key: String,
    base_url: String,
    image_cache: Mutex<HashMap<String, ImageTriple>>,
    search_cache: Mutex<HashMap<String, Option<i64>>>,
}

// === API Response Types ===

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    posters: Vec<ImageEntry>,
    #[serde(default)]
    backdrops: Vec<ImageEntry>,
}

#[derive(Debug, Deserialize)]
struct ImageEntry {
    file_path: Option<String>,
    #[serde(default)]
    vote_count: i64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    tv_results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    overview: Option<String>,
    #[serde(default)]
    genres: Vec<Genre>,
}

#[derive(Debug, Deserialize)]
struct Genre {
    name: String,
}

/// Enrichment fields added to an item when a TMDB id is known.
#[derive(Debug, Clone, Default)]
pub struct TitleDetails {
    pub poster: Option<String>,
    pub backdrop: Option<String>,
    pub overview: Option<String>,
    pub genres: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub results: Vec<ListItem>,
}

/// One entry of a discovery list (trending/now_playing/...).
#[derive(Debug, Clone, Deserialize)]
pub struct ListItem {
    pub id: i64,
    /// Movies carry `title`, shows carry `name`.
    pub title: Option<String>,
    pub name: Option<String>,
    pub media_type: Option<String>,
    pub release_date: Option<String>,
    pub first_air_date: Option<String>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub popularity: Option<f64>,
    pub vote_average: Option<f64>,
}

/// Discovery list endpoints selectable from configuration.
pub const LIST_ENDPOINTS: &[(&str, &str)] = &[
    ("trending", "trending/all/week"),
    ("now_playing", "movie/now_playing"),
    ("upcoming", "movie/upcoming"),
    ("on_air", "tv/on_the_air"),
    ("airing_today", "tv/airing_today"),
];

pub fn list_endpoint_path(key: &str) -> Option<&'static str> {
    LIST_ENDPOINTS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, path)| *path)
}

pub fn poster_url(path: &str) -> String {
    format!("{}/w500{}", TMDB_IMAGE_BASE, path)
}

pub fn backdrop_url(path: &str) -> String {
    format!("{}/original{}", TMDB_IMAGE_BASE, path)
}

impl TmdbClient {
    pub fn new(client: Client, api_key: String) -> Self {
        Self::with_base_url(client, api_key, TMDB_API_BASE)
    }

    /// Point the client at a different API host (tests).
    pub fn with_base_url(client: Client, api_key: String, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.into(),
            image_cache: Mutex::new(HashMap::new()),
            search_cache: Mutex::new(HashMap::new()),
        }
    }

    /// GET an API path (with query already attached). 404 is Ok(None);
    /// any other non-200 is an error for the caller to contain.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path_and_query: &str,
    ) -> Result<Option<T>, SensorError> {
        let url = format!("{}/{}", self.base_url, path_and_query);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| SensorError::fetch(&url, e))?;

        match response.status() {
            s if s.is_success() => {
                let value = response
                    .json::<T>()
                    .await
                    .map_err(|e| SensorError::fetch(&url, e))?;
                Ok(Some(value))
            }
            reqwest::StatusCode::NOT_FOUND => {
                tracing::debug!("TMDB resource not found: {}", url);
                Ok(None)
            }
            s => Err(SensorError::fetch(&url, format!("status {}", s))),
        }
    }

    /// Poster/backdrop/main-backdrop triple for a title. Best-effort:
    /// any failure degrades to an all-None triple with a warning.
    pub async fn get_images(&self, tmdb_id: i64, media_type: MediaType) -> ImageTriple {
        let cache_key = format!("images_{}_{}", media_type.as_str(), tmdb_id);
        if let Some(cached) = self.image_cache.lock().await.get(&cache_key) {
            return cached.clone();
        }

        let path = format!("{}/{}/images", media_type.as_str(), tmdb_id);
        let data: ImagesResponse = match self.get_json(&path).await {
            Ok(Some(data)) => data,
            Ok(None) => return (None, None, None),
            Err(e) => {
                tracing::warn!("TMDB image lookup failed for {}: {}", tmdb_id, e);
                return (None, None, None);
            }
        };

        let poster = data
            .posters
            .first()
            .and_then(|p| p.file_path.as_deref())
            .map(|p| format!("{}/w500{}", TMDB_IMAGE_BASE, p));

        // Most-voted backdrop becomes the list thumbnail, the runner-up the
        // main display image (falling back to the same one).
        let mut backdrops = data.backdrops;
        backdrops.sort_by(|a, b| b.vote_count.cmp(&a.vote_count));

        let backdrop = backdrops
            .first()
            .and_then(|b| b.file_path.as_deref())
            .map(|p| format!("{}/w780{}", TMDB_IMAGE_BASE, p));
        let main_backdrop = backdrops
            .get(1)
            .or_else(|| backdrops.first())
            .and_then(|b| b.file_path.as_deref())
            .map(|p| format!("{}/original{}", TMDB_IMAGE_BASE, p));

        let triple = (poster, backdrop, main_backdrop);
        insert_capped(&mut *self.image_cache.lock().await, cache_key, triple.clone());
        triple
    }

    /// Search for a title's TMDB id. Best-effort, cached per title/year.
    pub async fn search(
        &self,
        title: &str,
        year: Option<i32>,
        media_type: MediaType,
    ) -> Option<i64> {
        if title.is_empty() {
            return None;
        }

        let cache_key = format!("search_{}_{}_{:?}", media_type.as_str(), title, year);
        if let Some(cached) = self.search_cache.lock().await.get(&cache_key) {
            return *cached;
        }

        let mut path = format!(
            "search/{}?query={}",
            media_type.as_str(),
            urlencoding::encode(title)
        );
        if let Some(y) = year {
            path.push_str(&format!("&year={}", y));
        }

        let id = match self.get_json::<SearchResponse>(&path).await {
            Ok(Some(data)) => data.results.first().map(|r| r.id),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("TMDB search failed for '{}': {}", title, e);
                None
            }
        };

        insert_capped(&mut *self.search_cache.lock().await, cache_key, id);
        id
    }

    /// Resolve a TVDB series id to a TMDB id via the external-id lookup.
    pub async fn find_by_tvdb(&self, tvdb_id: i64) -> Option<i64> {
        let path = format!("find/{}?external_source=tvdb_id", tvdb_id);
        match self.get_json::<FindResponse>(&path).await {
            Ok(Some(data)) => data.tv_results.first().map(|r| r.id),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("TMDB tvdb lookup failed for {}: {}", tvdb_id, e);
                None
            }
        }
    }

    /// Poster/backdrop/overview/genres for one known TMDB id.
    pub async fn get_details(&self, tmdb_id: i64, media_type: MediaType) -> Option<TitleDetails> {
        let path = format!("{}/{}", media_type.as_str(), tmdb_id);
        let data: DetailsResponse = match self.get_json(&path).await {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("TMDB details failed for {}: {}", tmdb_id, e);
                return None;
            }
        };

        Some(TitleDetails {
            poster: data.poster_path.as_deref().map(poster_url),
            backdrop: data.backdrop_path.as_deref().map(backdrop_url),
            overview: data.overview,
            genres: data.genres.into_iter().map(|g| g.name).collect(),
        })
    }

    /// Fetch one discovery list. This is the primary collection call of a
    /// discovery sensor, so failures propagate as Fetch errors.
    pub async fn get_list(&self, endpoint_path: &str) -> Result<Vec<ListItem>, SensorError> {
        match self.get_json::<ListResponse>(endpoint_path).await? {
            Some(data) => Ok(data.results),
            None => Err(SensorError::fetch(endpoint_path, "list not found")),
        }
    }
}

/// One configured discovery list published as its own sensor.
pub struct TmdbListAdapter {
    tmdb: Arc<TmdbClient>,
    sensor_id: String,
    display_name: String,
    endpoint_path: &'static str,
    /// Media type forced by the endpoint (None for mixed lists, which
    /// carry a per-item `media_type`).
    fixed_type: Option<MediaType>,
    max_items: usize,
}

impl TmdbListAdapter {
    /// None when `list_key` is not a known endpoint; the caller logs and
    /// skips the entry.
    pub fn new(tmdb: Arc<TmdbClient>, list_key: &str, max_items: usize) -> Option<Self> {
        let endpoint_path = list_endpoint_path(list_key)?;
        let fixed_type = match list_key {
            "now_playing" | "upcoming" => Some(MediaType::Movie),
            "on_air" | "airing_today" => Some(MediaType::Tv),
            _ => None,
        };

        let pretty = list_key
            .split('_')
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");

        Some(Self {
            tmdb,
            sensor_id: format!("tmdb_{}", list_key),
            display_name: format!("TMDB {} Mediarr", pretty),
            endpoint_path,
            fixed_type,
            max_items,
        })
    }

    fn item_type(&self, item: &ListItem) -> Option<MediaType> {
        match self.fixed_type {
            Some(t) => Some(t),
            None => match item.media_type.as_deref() {
                Some("movie") => Some(MediaType::Movie),
                Some("tv") => Some(MediaType::Tv),
                // People and other entities show up on mixed lists.
                _ => None,
            },
        }
    }

    fn build_occurrence(
        &self,
        item: &ListItem,
        media_type: MediaType,
        now: DateTime<Utc>,
    ) -> MediaOccurrence {
        let title = item
            .title
            .clone()
            .or_else(|| item.name.clone())
            .unwrap_or_else(|| "Unknown".into());
        let date = item
            .release_date
            .clone()
            .or_else(|| item.first_air_date.clone())
            .unwrap_or_default();
        let year = date.get(..4).unwrap_or_default().to_string();

        let type_label = match media_type {
            MediaType::Movie => "movie",
            MediaType::Tv => "show",
        };

        let mut payload = FeedRecord::new();
        payload.insert("title".into(), Value::from(title.clone()));
        payload.insert("type".into(), Value::from(type_label));
        payload.insert("year".into(), Value::from(year));
        payload.insert(
            "overview".into(),
            Value::from(item.overview.clone().unwrap_or_default()),
        );
        payload.insert(
            "poster".into(),
            Value::from(
                item.poster_path
                    .as_deref()
                    .map(poster_url)
                    .unwrap_or_default(),
            ),
        );
        payload.insert(
            "fanart".into(),
            Value::from(
                item.backdrop_path
                    .as_deref()
                    .map(backdrop_url)
                    .unwrap_or_default(),
            ),
        );
        payload.insert("tmdb_id".into(), Value::from(item.id.to_string()));
        payload.insert(
            "popularity".into(),
            Value::from(
                item.popularity
                    .map(|p| format!("{:.1}", p))
                    .unwrap_or_default(),
            ),
        );
        payload.insert(
            "rating".into(),
            Value::from(
                item.vote_average
                    .map(|v| format!("{:.1}", v))
                    .unwrap_or_default(),
            ),
        );
        payload.insert("flag".into(), Value::from(1));

        MediaOccurrence {
            // Movie and TV ids are independent TMDB namespaces; mixed lists
            // need the type in the key.
            entity_id: format!("{}-{}", type_label, item.id),
            title,
            occurs_at: now,
            kind: OccurrenceKind::Listed,
            payload,
            images: Vec::new(),
        }
    }
}

#[async_trait]
impl SourceAdapter for TmdbListAdapter {
    fn id(&self) -> &str {
        &self.sensor_id
    }

    fn name(&self) -> &str {
        &self.display_name
    }

    fn max_items(&self) -> usize {
        self.max_items
    }

    fn placeholder(&self) -> FeedRecord {
        placeholder_record(
            ["$title", "$year", "$type", "$rating", "$overview"],
            "mdi:eye-off",
        )
    }

    async fn fetch(&self, now: DateTime<Utc>) -> Result<Vec<MediaOccurrence>, SensorError> {
        let items = self.tmdb.get_list(self.endpoint_path).await?;
        tracing::debug!(
            "Received {} items from TMDB {}",
            items.len(),
            self.endpoint_path
        );

        Ok(items
            .iter()
            .filter_map(|item| {
                self.item_type(item)
                    .map(|media_type| self.build_occurrence(item, media_type, now))
            })
            .collect())
    }
}
