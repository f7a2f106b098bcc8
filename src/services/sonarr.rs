// Sonarr calendar adapter
//
// Polls /api/v3/calendar over the configured lookahead window. Both the
// episode and its parent series must be monitored; air dates are normalized
// to UTC and one malformed date drops that episode, never the fetch.
// Occurrences are keyed by series id so the aggregation groups episodes
// of one series into a single published record.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::SonarrConfig;
use crate::dates::{normalize, NaiveZone};
use crate::error::SensorError;
use crate::models::{placeholder_record, FeedRecord, MediaOccurrence, OccurrenceKind};
use crate::sensor::SourceAdapter;
use crate::services::tmdb::{MediaType, TmdbClient};

pub struct SonarrAdapter {
    client: Client,
    url: String,
    api_key: String,
    tmdb: Option<Arc<TmdbClient>>,
    max_items: usize,
    days_to_check: i64,
}

// === API Response Types ===

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarEpisode {
    title: Option<String>,
    air_date_utc: Option<String>,
    air_date: Option<String>,
    #[serde(default)]
    season_number: i32,
    #[serde(default)]
    episode_number: i32,
    #[serde(default)]
    monitored: bool,
    series: Option<CalendarSeries>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarSeries {
    id: i64,
    title: String,
    #[serde(default)]
    monitored: bool,
    tvdb_id: Option<i64>,
    runtime: Option<i64>,
    network: Option<String>,
}

impl SonarrAdapter {
    pub fn new(client: Client, config: &SonarrConfig, tmdb: Option<Arc<TmdbClient>>) -> Self {
        Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            tmdb,
            max_items: config.max_items,
            days_to_check: config.days_to_check,
        }
    }

    async fn fetch_calendar(&self, now: DateTime<Utc>) -> Result<Vec<CalendarEpisode>, SensorError> {
        let endpoint = format!("{}/api/v3/calendar", self.url);
        let end = now + Duration::days(self.days_to_check);

        let response = self
            .client
            .get(&endpoint)
            .header("X-Api-Key", &self.api_key)
            .query(&[
                ("start", now.format("%Y-%m-%d").to_string()),
                ("end", end.format("%Y-%m-%d").to_string()),
                ("includeSeries", "true".to_string()),
            ])
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
            .json::<Vec<CalendarEpisode>>()
            .await
            .map_err(|e| SensorError::fetch(&endpoint, e))
    }

    /// Resolve TMDB artwork for a series, preferring the TVDB external-id
    /// lookup over a title search. Best-effort.
    async fn series_images(
        &self,
        series: &CalendarSeries,
    ) -> (Option<String>, Option<String>, Option<String>) {
        let Some(tmdb) = &self.tmdb else {
            return (None, None, None);
        };

        let tmdb_id = match series.tvdb_id {
            Some(tvdb) => tmdb.find_by_tvdb(tvdb).await,
            None => None,
        };
        let tmdb_id = match tmdb_id {
            Some(id) => Some(id),
            None => tmdb.search(&series.title, None, MediaType::Tv).await,
        };

        match tmdb_id {
            Some(id) => tmdb.get_images(id, MediaType::Tv).await,
            None => (None, None, None),
        }
    }

    fn build_occurrence(
        episode: &CalendarEpisode,
        series: &CalendarSeries,
        air_date: DateTime<Utc>,
        images: (Option<String>, Option<String>, Option<String>),
    ) -> MediaOccurrence {
        let (poster, backdrop, main_backdrop) = images;
        let episode_title = episode.title.clone().unwrap_or_else(|| "Unknown".into());
        let number = format!("S{:02}E{:02}", episode.season_number, episode.episode_number);
        let release = air_date.format("%Y-%m-%d").to_string();

        let mut payload = FeedRecord::new();
        payload.insert(
            "title".into(),
            Value::from(format!(
                "{} - {:02}x{:02}",
                series.title, episode.season_number, episode.episode_number
            )),
        );
        payload.insert("episode".into(), Value::from(episode_title.clone()));
        payload.insert("release".into(), Value::from(release));
        payload.insert("number".into(), Value::from(number.clone()));
        payload.insert(
            "runtime".into(),
            Value::from(series.runtime.unwrap_or(0).to_string()),
        );
        payload.insert(
            "network".into(),
            Value::from(series.network.clone().unwrap_or_else(|| "N/A".into())),
        );
        payload.insert(
            "poster".into(),
            Value::from(poster.unwrap_or_default()),
        );
        payload.insert(
            "fanart".into(),
            Value::from(main_backdrop.clone().or_else(|| backdrop.clone()).unwrap_or_default()),
        );
        payload.insert(
            "banner".into(),
            Value::from(backdrop.unwrap_or_default()),
        );
        payload.insert(
            "season".into(),
            Value::from(episode.season_number.to_string()),
        );
        payload.insert(
            "details".into(),
            Value::from(format!("{}\n{}\n{}", series.title, episode_title, number)),
        );
        payload.insert("flag".into(), Value::from(1));

        MediaOccurrence {
            entity_id: series.id.to_string(),
            title: series.title.clone(),
            occurs_at: air_date,
            kind: OccurrenceKind::Episode,
            payload,
            images: Vec::new(),
        }
    }
}

#[async_trait]
impl SourceAdapter for SonarrAdapter {
    fn id(&self) -> &str {
        "sonarr"
    }

    fn name(&self) -> &str {
        "Sonarr Mediarr"
    }

    fn max_items(&self) -> usize {
        self.max_items
    }

    fn placeholder(&self) -> FeedRecord {
        placeholder_record(
            ["$title", "$episode", "$release", "$number", "$runtime - $network"],
            "mdi:arrow-down-circle",
        )
    }

    async fn fetch(&self, now: DateTime<Utc>) -> Result<Vec<MediaOccurrence>, SensorError> {
        let episodes = self.fetch_calendar(now).await?;
        tracing::debug!("Received {} episodes from Sonarr", episodes.len());

        let window_end = now + Duration::days(self.days_to_check);
        let mut occurrences = Vec::new();

        for episode in &episodes {
            if !episode.monitored {
                continue;
            }
            let Some(series) = &episode.series else {
                continue;
            };
            if !series.monitored {
                continue;
            }

            let raw_date = episode
                .air_date_utc
                .as_deref()
                .or(episode.air_date.as_deref())
                .unwrap_or("");
            let air_date = match normalize(raw_date, NaiveZone::Utc) {
                Ok(dt) => dt,
                Err(e) => {
                    tracing::warn!("Error parsing air date for '{}': {}", series.title, e);
                    continue;
                }
            };

            if air_date <= now || air_date > window_end {
                continue;
            }

            let images = self.series_images(series).await;
            occurrences.push(Self::build_occurrence(episode, series, air_date, images));
        }

        Ok(occurrences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use chrono::TimeZone;

    const CALENDAR_BODY: &str = r#"[
        {
            "title": "Pilot",
            "airDateUtc": "2024-02-01T01:00:00Z",
            "seasonNumber": 1,
            "episodeNumber": 1,
            "monitored": true,
            "series": {"id": 42, "title": "Some Show", "monitored": true,
                       "runtime": 45, "network": "HBO"}
        },
        {
            "title": "Second",
            "airDateUtc": "2024-02-03T01:00:00Z",
            "seasonNumber": 1,
            "episodeNumber": 2,
            "monitored": true,
            "series": {"id": 42, "title": "Some Show", "monitored": true,
                       "runtime": 45, "network": "HBO"}
        },
        {
            "title": "Skipped",
            "airDateUtc": "2024-02-02T01:00:00Z",
            "seasonNumber": 3,
            "episodeNumber": 9,
            "monitored": false,
            "series": {"id": 7, "title": "Unwatched", "monitored": true}
        },
        {
            "title": "Bad Date",
            "airDateUtc": "not-a-date",
            "seasonNumber": 1,
            "episodeNumber": 1,
            "monitored": true,
            "series": {"id": 9, "title": "Broken", "monitored": true}
        }
    ]"#;

    async fn spawn_sonarr(body: &'static str, status: u16) -> String {
        let app = Router::new().route(
            "/api/v3/calendar",
            get(move || async move {
                (
                    axum::http::StatusCode::from_u16(status).unwrap(),
                    [("content-type", "application/json")],
                    body,
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn adapter(url: String) -> SonarrAdapter {
        SonarrAdapter::new(
            Client::new(),
            &SonarrConfig {
                url,
                api_key: "key".into(),
                max_items: 10,
                days_to_check: 60,
            },
            None,
        )
    }

    #[tokio::test]
    async fn test_fetch_filters_and_maps_episodes() {
        let base = spawn_sonarr(CALENDAR_BODY, 200).await;
        let adapter = adapter(base);
        let now = Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap();

        let occurrences = adapter.fetch(now).await.unwrap();

        // Unmonitored and malformed-date episodes dropped, both episodes of
        // series 42 kept.
        assert_eq!(occurrences.len(), 2);
        assert!(occurrences.iter().all(|o| o.entity_id == "42"));
        assert_eq!(occurrences[0].payload["title"], "Some Show - 01x01");
        assert_eq!(occurrences[0].payload["number"], "S01E01");
        assert_eq!(occurrences[0].payload["release"], "2024-02-01");
        assert_eq!(occurrences[0].payload["network"], "HBO");
        assert_eq!(occurrences[1].payload["number"], "S01E02");
    }

    #[tokio::test]
    async fn test_fetch_drops_episodes_outside_window() {
        let base = spawn_sonarr(CALENDAR_BODY, 200).await;
        let adapter = adapter(base);

        // Both air dates are in the past relative to this `now`.
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let occurrences = adapter.fetch(now).await.unwrap();
        assert!(occurrences.is_empty());
    }

    #[tokio::test]
    async fn test_non_200_fails_the_fetch() {
        let base = spawn_sonarr("[]", 500).await;
        let adapter = adapter(base);

        let err = adapter.fetch(Utc::now()).await.unwrap_err();
        assert!(matches!(err, SensorError::Fetch { .. }));
    }
}
