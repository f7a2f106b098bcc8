// Date normalization for heterogeneous upstream date strings
//
// Sources disagree on what a naive timestamp means: Sonarr's calendar and
// TMDB speak UTC, Radarr's release fields are compared against the caller's
// local clock. The assumed zone is therefore a per-adapter parameter.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::SensorError;

/// Zone assigned to timestamps that carry no offset of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaiveZone {
    Utc,
    Local,
}

/// Parse an ISO-8601 date or datetime string into a canonical UTC instant.
///
/// Accepts:
/// - RFC 3339 with an offset or a trailing `Z` (taken as written),
/// - naive datetimes (`2024-01-05T00:00:00`), assigned `naive_zone`,
/// - bare dates (`2024-01-05`), taken as midnight in `naive_zone`.
///
/// Malformed input is a `SensorError::Parse`; callers drop the occurrence
/// and continue, never the whole cycle.
pub fn normalize(raw: &str, naive_zone: NaiveZone) -> Result<DateTime<Utc>, SensorError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SensorError::parse(raw, "empty date string"));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(assume_zone(naive, naive_zone));
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let naive = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| SensorError::parse(raw, "invalid midnight"))?;
        return Ok(assume_zone(naive, naive_zone));
    }

    Err(SensorError::parse(raw, "unrecognized date format"))
}

fn assume_zone(naive: NaiveDateTime, zone: NaiveZone) -> DateTime<Utc> {
    match zone {
        NaiveZone::Utc => Utc.from_utc_datetime(&naive),
        // Ambiguous local times (DST transitions) resolve to the earlier
        // candidate; a skipped local time falls back to UTC interpretation.
        NaiveZone::Local => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
    }
}
