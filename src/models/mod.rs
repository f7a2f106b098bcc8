use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// One published record: a flat mapping of string keys to primitive values,
/// shaped for the dashboard card templates.
pub type FeedRecord = Map<String, Value>;

/// Which dated event an occurrence represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OccurrenceKind {
    /// Movie digital release date
    Digital,
    /// Movie physical release date
    Physical,
    /// Movie theatrical release date
    Theaters,
    /// Next episode air date for a series
    Episode,
    /// Item appeared on a discovery (popular/trending) list
    Listed,
    /// Item was added to a library
    Added,
}

impl OccurrenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OccurrenceKind::Digital => "Digital",
            OccurrenceKind::Physical => "Physical",
            OccurrenceKind::Theaters => "Theaters",
            OccurrenceKind::Episode => "Episode",
            OccurrenceKind::Listed => "Listed",
            OccurrenceKind::Added => "Added",
        }
    }
}

/// Image roles the cache can hold per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Poster,
    Fanart,
}

impl ImageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageRole::Poster => "poster",
            ImageRole::Fanart => "fanart",
        }
    }
}

/// A request to mirror one remote image into the local cache.
/// `auth_header` carries the upstream credential when the image endpoint
/// itself is authenticated (e.g. a media server's /Items/{id}/Images).
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub role: ImageRole,
    pub url: String,
    pub auth_header: Option<(&'static str, String)>,
}

/// One candidate upcoming/recent item before deduplication.
#[derive(Debug, Clone)]
pub struct MediaOccurrence {
    /// Stable identifier of the parent entity within the source namespace
    /// (movie id, series id, trending item id).
    pub entity_id: String,
    pub title: String,
    /// Canonical UTC instant this occurrence happens (release/air/added-at).
    /// Always timezone-normalized before any comparison.
    pub occurs_at: DateTime<Utc>,
    pub kind: OccurrenceKind,
    /// Source-specific fields carried through to the published record.
    pub payload: FeedRecord,
    /// Images to mirror into the local cache before publishing.
    pub images: Vec<ImageRequest>,
}

/// The post-dedup, publish-ready record for one entity.
#[derive(Debug, Clone)]
pub struct AggregatedEntity {
    pub entity_id: String,
    pub title: String,
    /// The chosen instant: earliest future occurrence, or most recent
    /// added-at for recently-added sources.
    pub occurs_at: DateTime<Utc>,
    pub kind: OccurrenceKind,
    pub payload: FeedRecord,
    pub images: Vec<ImageRequest>,
    /// Every group member in arrival order (e.g. all episodes of one series
    /// within the lookahead window). Rebuilt from zero every cycle.
    pub sub_occurrences: Vec<SubOccurrence>,
}

/// A compact view of one group member kept alongside the representative.
#[derive(Debug, Clone)]
pub struct SubOccurrence {
    pub title: String,
    pub occurs_at: DateTime<Utc>,
    pub kind: OccurrenceKind,
}

/// The immutable outcome of one poll cycle, read by the API layer.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    /// Count of deduplicated entities before truncation.
    pub state: usize,
    /// The truncated, ordered list (or a single placeholder record).
    pub data: Vec<FeedRecord>,
    pub available: bool,
}

impl CycleResult {
    /// The state published while a sensor has not completed a cycle yet,
    /// and after any failed cycle.
    pub fn unavailable() -> Self {
        Self {
            state: 0,
            data: Vec::new(),
            available: false,
        }
    }
}

/// Build a placeholder record from per-source template lines and an icon,
/// so display templates always have exactly one row to bind to.
pub fn placeholder_record(lines: [&str; 5], icon: &str) -> FeedRecord {
    let mut record = FeedRecord::new();
    record.insert("title_default".into(), Value::from(lines[0]));
    record.insert("line1_default".into(), Value::from(lines[1]));
    record.insert("line2_default".into(), Value::from(lines[2]));
    record.insert("line3_default".into(), Value::from(lines[3]));
    record.insert("line4_default".into(), Value::from(lines[4]));
    record.insert("icon".into(), Value::from(icon));
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_record_shape() {
        let record = placeholder_record(
            ["$title", "$release", "$genres", "$rating", "$studio"],
            "mdi:arrow-down-circle",
        );
        assert_eq!(record.len(), 6);
        assert_eq!(record["title_default"], "$title");
        assert_eq!(record["icon"], "mdi:arrow-down-circle");
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(OccurrenceKind::Theaters.as_str(), "Theaters");
        assert_eq!(OccurrenceKind::Digital.as_str(), "Digital");
    }
}
