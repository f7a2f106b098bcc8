// Radarr upcoming-movies adapter
//
// Polls the full /api/v3/movie library and keeps monitored, not-yet-
// downloaded movies whose soonest release (digital, physical or theatrical)
// is strictly in the future. Radarr reports release dates without reliable
// offsets, so naive values are read in the host's local zone.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::RadarrConfig;
use crate::dates::{normalize, NaiveZone};
use crate::error::SensorError;
use crate::models::{placeholder_record, FeedRecord, MediaOccurrence, OccurrenceKind};
use crate::sensor::SourceAdapter;
use crate::services::tmdb::{MediaType, TmdbClient};

pub struct RadarrAdapter {
    client: Client,
    url: String,
    api_key: String,
    tmdb: Option<Arc<TmdbClient>>,
    max_items: usize,
}

// === API Response Types ===

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Movie {
    id: i64,
    title: String,
    year: Option<i32>,
    #[serde(default)]
    monitored: bool,
    #[serde(default)]
    has_file: bool,
    digital_release: Option<String>,
    physical_release: Option<String>,
    in_cinemas: Option<String>,
    tmdb_id: Option<i64>,
    #[serde(default)]
    genres: Vec<String>,
    runtime: Option<i64>,
    ratings: Option<Ratings>,
    studio: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Ratings {
    value: Option<f64>,
}

/// Pick the movie's soonest release strictly after `now`, considering all
/// three channels. A malformed date drops that channel only.
pub(crate) fn pick_release(
    movie: &Movie,
    now: DateTime<Utc>,
) -> Option<(OccurrenceKind, DateTime<Utc>)> {
    let candidates = [
        (OccurrenceKind::Digital, movie.digital_release.as_deref()),
        (OccurrenceKind::Physical, movie.physical_release.as_deref()),
        (OccurrenceKind::Theaters, movie.in_cinemas.as_deref()),
    ];

    let mut best: Option<(OccurrenceKind, DateTime<Utc>)> = None;
    for (kind, raw) in candidates {
        let Some(raw) = raw else { continue };
        let date = match normalize(raw, NaiveZone::Local) {
            Ok(dt) => dt,
            Err(e) => {
                tracing::warn!(
                    "Error parsing {} date for '{}': {}",
                    kind.as_str(),
                    movie.title,
                    e
                );
                continue;
            }
        };
        if date <= now {
            continue;
        }
        match best {
            Some((_, current)) if current <= date => {}
            _ => best = Some((kind, date)),
        }
    }
    best
}

impl RadarrAdapter {
    pub fn new(client: Client, config: &RadarrConfig, tmdb: Option<Arc<TmdbClient>>) -> Self {
        Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            tmdb,
            max_items: config.max_items,
        }
    }

    async fn fetch_movies(&self) -> Result<Vec<Movie>, SensorError> {
        let endpoint = format!("{}/api/v3/movie", self.url);

        let response = self
            .client
            .get(&endpoint)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| SensorError::fetch(&endpoint, e))?;

        if !response.status().is_success() {
            return Err(SensorError::fetch(
                &endpoint,
                format!("status {}", response.status()),
            ));
        }

        response
            .json::<Vec<Movie>>()
            .await
            .map_err(|e| SensorError::fetch(&endpoint, e))
    }

    async fn movie_images(&self, movie: &Movie) -> (Option<String>, Option<String>, Option<String>) {
        let Some(tmdb) = &self.tmdb else {
            return (None, None, None);
        };

        let tmdb_id = match movie.tmdb_id {
            Some(id) => Some(id),
            None => tmdb.search(&movie.title, movie.year, MediaType::Movie).await,
        };

        match tmdb_id {
            Some(id) => tmdb.get_images(id, MediaType::Movie).await,
            None => (None, None, None),
        }
    }

    fn build_occurrence(
        movie: &Movie,
        kind: OccurrenceKind,
        release: DateTime<Utc>,
        images: (Option<String>, Option<String>, Option<String>),
    ) -> MediaOccurrence {
        let (poster, backdrop, main_backdrop) = images;
        let date = release.format("%Y-%m-%d").to_string();
        let genres = movie
            .genres
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let rating = movie
            .ratings
            .as_ref()
            .and_then(|r| r.value)
            .map(|v| format!("\u{2605} {:.1}", v))
            .unwrap_or_default();

        let mut payload = FeedRecord::new();
        payload.insert("title".into(), Value::from(movie.title.clone()));
        payload.insert(
            "release".into(),
            Value::from(format!("{} - {}", kind.as_str(), date)),
        );
        payload.insert("aired".into(), Value::from(date));
        payload.insert(
            "year".into(),
            Value::from(movie.year.map(|y| y.to_string()).unwrap_or_default()),
        );
        payload.insert("poster".into(), Value::from(poster.unwrap_or_default()));
        payload.insert(
            "fanart".into(),
            Value::from(main_backdrop.clone().or_else(|| backdrop.clone()).unwrap_or_default()),
        );
        payload.insert("banner".into(), Value::from(backdrop.unwrap_or_default()));
        payload.insert("genres".into(), Value::from(genres));
        payload.insert(
            "runtime".into(),
            Value::from(movie.runtime.unwrap_or(0).to_string()),
        );
        payload.insert("rating".into(), Value::from(rating));
        payload.insert(
            "studio".into(),
            Value::from(movie.studio.clone().unwrap_or_default()),
        );
        payload.insert("flag".into(), Value::from(1));

        MediaOccurrence {
            // Radarr's row id, not the title: two distinct movies may share
            // one title (remakes) and must stay two entities.
            entity_id: movie.id.to_string(),
            title: movie.title.clone(),
            occurs_at: release,
            kind,
            payload,
            images: Vec::new(),
        }
    }
}

#[async_trait]
impl SourceAdapter for RadarrAdapter {
    fn id(&self) -> &str {
        "radarr"
    }

    fn name(&self) -> &str {
        "Radarr Mediarr"
    }

    fn max_items(&self) -> usize {
        self.max_items
    }

    fn placeholder(&self) -> FeedRecord {
        placeholder_record(
            ["$title", "$release", "$genres", "$rating - $runtime", "$studio"],
            "mdi:arrow-down-circle",
        )
    }

    async fn fetch(&self, now: DateTime<Utc>) -> Result<Vec<MediaOccurrence>, SensorError> {
        let movies = self.fetch_movies().await?;
        tracing::debug!("Received {} movies from Radarr", movies.len());

        let mut occurrences = Vec::new();
        for movie in &movies {
            if !movie.monitored || movie.has_file {
                continue;
            }
            let Some((kind, release)) = pick_release(movie, now) else {
                continue;
            };

            let images = self.movie_images(movie).await;
            occurrences.push(Self::build_occurrence(movie, kind, release, images));
        }

        Ok(occurrences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use chrono::TimeZone;

    fn movie(digital: Option<&str>, physical: Option<&str>, cinemas: Option<&str>) -> Movie {
        Movie {
            id: 1,
            title: "Some Movie".into(),
            year: Some(2024),
            monitored: true,
            has_file: false,
            digital_release: digital.map(String::from),
            physical_release: physical.map(String::from),
            in_cinemas: cinemas.map(String::from),
            tmdb_id: None,
            genres: vec!["Drama".into(), "Crime".into(), "Thriller".into(), "War".into()],
            runtime: Some(120),
            ratings: Some(Ratings { value: Some(7.85) }),
            studio: Some("A24".into()),
        }
    }

    #[test]
    fn test_pick_release_prefers_soonest_future_date() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let m = movie(Some("2024-01-10T00:00:00Z"), None, Some("2024-01-05T00:00:00Z"));

        let (kind, date) = pick_release(&m, now).unwrap();
        assert_eq!(kind, OccurrenceKind::Theaters);
        assert_eq!(date, Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_pick_release_skips_past_dates() {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let m = movie(
            Some("2024-03-01T00:00:00Z"),
            None,
            Some("2024-01-05T00:00:00Z"),
        );

        let (kind, _) = pick_release(&m, now).unwrap();
        assert_eq!(kind, OccurrenceKind::Digital);
    }

    #[test]
    fn test_pick_release_skips_malformed_dates_per_channel() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let m = movie(Some("garbage"), Some("2024-04-01T00:00:00Z"), None);

        let (kind, _) = pick_release(&m, now).unwrap();
        assert_eq!(kind, OccurrenceKind::Physical);
    }

    #[test]
    fn test_pick_release_none_when_all_past_or_missing() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let m = movie(Some("2024-01-10T00:00:00Z"), None, None);
        assert!(pick_release(&m, now).is_none());
    }

    #[tokio::test]
    async fn test_fetch_filters_and_maps_movies() {
        let body = r#"[
            {"id": 11, "title": "Wanted", "year": 2024, "monitored": true, "hasFile": false,
             "digitalRelease": "2030-01-10T00:00:00Z",
             "genres": ["Action", "Drama", "Crime", "War"],
             "runtime": 110, "ratings": {"value": 6.5}, "studio": "WB"},
            {"id": 12, "title": "Downloaded", "year": 2023, "monitored": true, "hasFile": true,
             "digitalRelease": "2030-01-10T00:00:00Z"},
            {"id": 13, "title": "Unmonitored", "year": 2023, "monitored": false, "hasFile": false,
             "digitalRelease": "2030-01-10T00:00:00Z"}
        ]"#;

        let app = Router::new().route(
            "/api/v3/movie",
            get(move || async move {
                ([("content-type", "application/json")], body)
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let adapter = RadarrAdapter::new(
            Client::new(),
            &RadarrConfig {
                url: format!("http://{}", addr),
                api_key: "key".into(),
                max_items: 10,
            },
            None,
        );

        let occurrences = adapter
            .fetch(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .await
            .unwrap();

        assert_eq!(occurrences.len(), 1);
        let payload = &occurrences[0].payload;
        assert_eq!(payload["title"], "Wanted");
        assert_eq!(payload["release"], "Digital - 2030-01-10");
        assert_eq!(payload["genres"], "Action, Drama, Crime");
        assert_eq!(payload["rating"], "\u{2605} 6.5");
        assert_eq!(payload["studio"], "WB");
    }

    #[tokio::test]
    async fn test_distinct_movies_sharing_a_title_stay_distinct() {
        use crate::aggregate::{dedupe_and_sort, AggregationMode};

        // A remake: same title, different Radarr ids and release dates.
        let body = r#"[
            {"id": 100, "title": "Dune", "year": 1984, "monitored": true, "hasFile": false,
             "digitalRelease": "2030-01-10T00:00:00Z"},
            {"id": 200, "title": "Dune", "year": 2021, "monitored": true, "hasFile": false,
             "digitalRelease": "2030-02-20T00:00:00Z"}
        ]"#;

        let app = Router::new().route(
            "/api/v3/movie",
            get(move || async move {
                ([("content-type", "application/json")], body)
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let adapter = RadarrAdapter::new(
            Client::new(),
            &RadarrConfig {
                url: format!("http://{}", addr),
                api_key: "key".into(),
                max_items: 10,
            },
            None,
        );

        let occurrences = adapter
            .fetch(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(occurrences.len(), 2);
        assert_ne!(occurrences[0].entity_id, occurrences[1].entity_id);

        let aggregation = dedupe_and_sort(occurrences, AggregationMode::Upcoming);
        assert_eq!(aggregation.total, 2);
    }
}
