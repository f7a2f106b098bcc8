// Trakt popular-lists adapter
// API Documentation: https://trakt.docs.apiary.io
//
// Trakt requires an OAuth client-credentials token even for public lists.
// The credential is an immutable value swapped atomically behind a lock;
// a request rejected with 401/403 refreshes it and retries exactly once.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::config::TraktConfig;
use crate::error::SensorError;
use crate::models::{placeholder_record, FeedRecord, MediaOccurrence, OccurrenceKind};
use crate::sensor::SourceAdapter;
use crate::services::tmdb::{MediaType, TmdbClient};

const TRAKT_API_BASE: &str = "https://api.trakt.tv";

/// One acquired token. Never mutated; a refresh builds a new value and
/// swaps it in, so requests already in flight keep the credential they
/// started with.
#[derive(Debug, Clone)]
struct AuthCredential {
    header_value: String,
}

impl AuthCredential {
    fn new(access_token: &str) -> Self {
        Self {
            header_value: format!("Bearer {}", access_token),
        }
    }
}

/// Client-credentials session against the Trakt API.
pub struct AuthSession {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    credential: RwLock<Option<Arc<AuthCredential>>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl AuthSession {
    pub fn new(client: Client, config: &TraktConfig) -> Self {
        Self::with_base_url(client, config, TRAKT_API_BASE)
    }

    pub fn with_base_url(client: Client, config: &TraktConfig, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            credential: RwLock::new(None),
        }
    }

    /// Exchange client credentials for a fresh token and install it.
    async fn acquire(&self) -> Result<Arc<AuthCredential>, SensorError> {
        let url = format!("{}/oauth/token", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("trakt-api-version", "2")
            .header("trakt-api-key", &self.client_id)
            .json(&json!({
                "client_id": self.client_id,
                "client_secret": self.client_secret,
                "grant_type": "client_credentials",
            }))
            .send()
            .await
            .map_err(|e| SensorError::Auth(format!("token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SensorError::Auth(format!(
                "token request returned status {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SensorError::Auth(format!("token response malformed: {}", e)))?;

        let credential = Arc::new(AuthCredential::new(&token.access_token));
        *self.credential.write().await = Some(credential.clone());
        tracing::debug!("Acquired new Trakt access token");
        Ok(credential)
    }

    async fn current_or_acquire(&self) -> Result<Arc<AuthCredential>, SensorError> {
        if let Some(cred) = self.credential.read().await.clone() {
            return Ok(cred);
        }
        self.acquire().await
    }

    async fn send(
        &self,
        path: &str,
        credential: &AuthCredential,
    ) -> Result<reqwest::Response, SensorError> {
        let url = format!("{}/{}", self.base_url, path);
        self.client
            .get(&url)
            .header("Content-Type", "application/json")
            .header("trakt-api-version", "2")
            .header("trakt-api-key", &self.client_id)
            .header("Authorization", &credential.header_value)
            .send()
            .await
            .map_err(|e| SensorError::fetch(&url, e))
    }

    /// Authorized GET. On 401/403 the stale credential is dropped, a new
    /// one acquired and the request retried exactly once; a second
    /// rejection fails the call.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SensorError> {
        let credential = self.current_or_acquire().await?;
        let mut response = self.send(path, &credential).await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            tracing::debug!("Trakt rejected token for {}, refreshing", path);
            *self.credential.write().await = None;
            let fresh = self.acquire().await?;
            response = self.send(path, &fresh).await?;

            if matches!(
                response.status(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) {
                return Err(SensorError::Auth(format!(
                    "request to {} rejected after token refresh",
                    path
                )));
            }
        }

        if !response.status().is_success() {
            return Err(SensorError::fetch(
                path,
                format!("status {}", response.status()),
            ));
        }

        response.json::<T>().await.map_err(|e| SensorError::fetch(path, e))
    }
}

// === API Response Types ===

#[derive(Debug, Clone, Deserialize)]
struct PopularItem {
    title: Option<String>,
    year: Option<i32>,
    ids: ItemIds,
}

#[derive(Debug, Clone, Deserialize)]
struct ItemIds {
    trakt: Option<i64>,
    slug: Option<String>,
    tmdb: Option<i64>,
    imdb: Option<String>,
}

pub struct TraktAdapter {
    session: AuthSession,
    tmdb: Option<Arc<TmdbClient>>,
    trending_type: String,
    max_items: usize,
}

impl TraktAdapter {
    pub fn new(client: Client, config: &TraktConfig, tmdb: Option<Arc<TmdbClient>>) -> Self {
        Self {
            session: AuthSession::new(client, config),
            tmdb,
            trending_type: config.trending_type.clone(),
            max_items: config.max_items,
        }
    }

    #[cfg(test)]
    fn with_session(session: AuthSession, trending_type: &str, max_items: usize) -> Self {
        Self {
            session,
            tmdb: None,
            trending_type: trending_type.to_string(),
            max_items,
        }
    }

    fn selected_lists(&self) -> Vec<(&'static str, &'static str, MediaType)> {
        let mut lists = Vec::new();
        if matches!(self.trending_type.as_str(), "shows" | "both") {
            lists.push(("shows/popular", "show", MediaType::Tv));
        }
        if matches!(self.trending_type.as_str(), "movies" | "both") {
            lists.push(("movies/popular", "movie", MediaType::Movie));
        }
        lists
    }

    async fn build_occurrence(
        &self,
        item: &PopularItem,
        item_type: &str,
        media_type: MediaType,
        now: DateTime<Utc>,
    ) -> MediaOccurrence {
        let title = item.title.clone().unwrap_or_else(|| "Unknown".into());

        let details = match (&self.tmdb, item.ids.tmdb) {
            (Some(tmdb), Some(id)) => tmdb.get_details(id, media_type).await,
            _ => None,
        }
        .unwrap_or_default();

        let mut payload = FeedRecord::new();
        payload.insert("title".into(), Value::from(title.clone()));
        payload.insert(
            "year".into(),
            Value::from(item.year.map(|y| y.to_string()).unwrap_or_default()),
        );
        payload.insert("type".into(), Value::from(item_type));
        payload.insert(
            "slug".into(),
            Value::from(item.ids.slug.clone().unwrap_or_default()),
        );
        payload.insert(
            "trakt_id".into(),
            Value::from(item.ids.trakt.map(|v| v.to_string()).unwrap_or_default()),
        );
        payload.insert(
            "tmdb_id".into(),
            Value::from(item.ids.tmdb.map(|v| v.to_string()).unwrap_or_default()),
        );
        payload.insert(
            "imdb_id".into(),
            Value::from(item.ids.imdb.clone().unwrap_or_default()),
        );
        payload.insert(
            "poster".into(),
            Value::from(details.poster.unwrap_or_default()),
        );
        payload.insert(
            "fanart".into(),
            Value::from(details.backdrop.unwrap_or_default()),
        );
        payload.insert(
            "overview".into(),
            Value::from(details.overview.unwrap_or_default()),
        );
        payload.insert(
            "genres".into(),
            Value::from(details.genres.join(", ")),
        );
        payload.insert("flag".into(), Value::from(1));

        let entity_id = match item.ids.trakt {
            Some(id) => format!("{}-{}", item_type, id),
            None => format!("{}-{}", item_type, title),
        };

        MediaOccurrence {
            entity_id,
            title,
            occurs_at: now,
            kind: OccurrenceKind::Listed,
            payload,
            images: Vec::new(),
        }
    }
}

#[async_trait]
impl SourceAdapter for TraktAdapter {
    fn id(&self) -> &str {
        "trakt"
    }

    fn name(&self) -> &str {
        "Trakt Mediarr"
    }

    fn max_items(&self) -> usize {
        self.max_items
    }

    fn placeholder(&self) -> FeedRecord {
        placeholder_record(
            ["$title", "$year", "$type", "$genres", "$overview"],
            "mdi:eye-off",
        )
    }

    async fn fetch(&self, now: DateTime<Utc>) -> Result<Vec<MediaOccurrence>, SensorError> {
        let mut occurrences = Vec::new();

        for (path, item_type, media_type) in self.selected_lists() {
            let path = format!("{}?limit={}", path, self.max_items);
            let items: Vec<PopularItem> = self.session.get_json(&path).await?;
            tracing::debug!("Received {} items from Trakt {}", items.len(), path);

            for item in &items {
                occurrences.push(self.build_occurrence(item, item_type, media_type, now).await);
            }
        }

        Ok(occurrences)
    }
}
