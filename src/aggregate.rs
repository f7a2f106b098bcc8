// Per-entity deduplication and ordering
//
// Every cycle rebuilds the aggregation from zero: occurrences are grouped by
// entity id, one representative survives per group, groups are sorted by the
// chosen instant. Upcoming feeds keep the chronologically nearest future
// occurrence; recently-added feeds keep the most recent past added-at.

use std::collections::HashMap;

use crate::models::{AggregatedEntity, MediaOccurrence, SubOccurrence};

/// How a source's occurrences are deduplicated and ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMode {
    /// Keep the minimum `occurs_at` per entity, sort soonest-first.
    Upcoming,
    /// Keep the maximum `occurs_at` per entity, sort newest-first.
    RecentlyAdded,
}

/// Result of one aggregation pass.
#[derive(Debug)]
pub struct Aggregation {
    /// Distinct entity count before any truncation. Published as the
    /// sensor's state.
    pub total: usize,
    pub entities: Vec<AggregatedEntity>,
}

/// Group by entity id, pick a representative per group, sort.
///
/// Occurrences are consumed in arrival order; `sub_occurrences` records the
/// whole group in that order while the representative pointer tracks the
/// current minimum (or maximum for recently-added). Ties keep the earlier
/// arrival, so upstream rank order survives for undated discovery lists.
pub fn dedupe_and_sort(occurrences: Vec<MediaOccurrence>, mode: AggregationMode) -> Aggregation {
    let mut groups: Vec<AggregatedEntity> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for occ in occurrences {
        match index.get(&occ.entity_id) {
            Some(&i) => {
                let entity = &mut groups[i];
                entity.sub_occurrences.push(SubOccurrence {
                    title: occ.title.clone(),
                    occurs_at: occ.occurs_at,
                    kind: occ.kind,
                });
                let replaces = match mode {
                    AggregationMode::Upcoming => occ.occurs_at < entity.occurs_at,
                    AggregationMode::RecentlyAdded => occ.occurs_at > entity.occurs_at,
                };
                if replaces {
                    entity.title = occ.title;
                    entity.occurs_at = occ.occurs_at;
                    entity.kind = occ.kind;
                    entity.payload = occ.payload;
                    entity.images = occ.images;
                }
            }
            None => {
                index.insert(occ.entity_id.clone(), groups.len());
                groups.push(AggregatedEntity {
                    entity_id: occ.entity_id,
                    title: occ.title.clone(),
                    occurs_at: occ.occurs_at,
                    kind: occ.kind,
                    payload: occ.payload,
                    images: occ.images,
                    sub_occurrences: vec![SubOccurrence {
                        title: occ.title,
                        occurs_at: occ.occurs_at,
                        kind: occ.kind,
                    }],
                });
            }
        }
    }

    match mode {
        AggregationMode::Upcoming => groups.sort_by_key(|e| e.occurs_at),
        AggregationMode::RecentlyAdded => {
            groups.sort_by(|a, b| b.occurs_at.cmp(&a.occurs_at));
        }
    }

    Aggregation {
        total: groups.len(),
        entities: groups,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeedRecord, OccurrenceKind};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, day, 0, 0, 0).unwrap()
    }

    fn occ(entity_id: &str, title: &str, day: u32) -> MediaOccurrence {
        MediaOccurrence {
            entity_id: entity_id.to_string(),
            title: title.to_string(),
            occurs_at: at(day),
            kind: OccurrenceKind::Episode,
            payload: FeedRecord::new(),
            images: Vec::new(),
        }
    }

    #[test]
    fn test_one_entity_per_id_with_min_occurs_at() {
        let result = dedupe_and_sort(
            vec![occ("42", "Ep 2", 3), occ("42", "Ep 1", 1), occ("7", "Other", 2)],
            AggregationMode::Upcoming,
        );
        assert_eq!(result.total, 2);
        let series = result
            .entities
            .iter()
            .find(|e| e.entity_id == "42")
            .unwrap();
        assert_eq!(series.occurs_at, at(1));
        assert_eq!(series.title, "Ep 1");
    }

    #[test]
    fn test_two_episodes_one_series() {
        // Series 42, air dates 2024-02-01 and 2024-02-03: one aggregated
        // entity, occurs_at = 02-01, two sub-occurrences in arrival order.
        let result = dedupe_and_sort(
            vec![occ("42", "Ep A", 1), occ("42", "Ep B", 3)],
            AggregationMode::Upcoming,
        );
        assert_eq!(result.total, 1);
        let entity = &result.entities[0];
        assert_eq!(entity.occurs_at, at(1));
        assert_eq!(entity.sub_occurrences.len(), 2);
        assert_eq!(entity.sub_occurrences[0].title, "Ep A");
        assert_eq!(entity.sub_occurrences[1].title, "Ep B");
    }

    #[test]
    fn test_sorted_non_decreasing() {
        let result = dedupe_and_sort(
            vec![occ("a", "A", 9), occ("b", "B", 2), occ("c", "C", 5)],
            AggregationMode::Upcoming,
        );
        let days: Vec<_> = result.entities.iter().map(|e| e.occurs_at).collect();
        assert!(days.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_recently_added_keeps_newest() {
        let result = dedupe_and_sort(
            vec![occ("m", "Old copy", 2), occ("m", "New copy", 8), occ("n", "Mid", 5)],
            AggregationMode::RecentlyAdded,
        );
        assert_eq!(result.total, 2);
        // Newest first, and the duplicate kept its most recent added-at.
        assert_eq!(result.entities[0].entity_id, "m");
        assert_eq!(result.entities[0].occurs_at, at(8));
        assert_eq!(result.entities[0].title, "New copy");
        assert_eq!(result.entities[1].entity_id, "n");
    }

    #[test]
    fn test_ties_preserve_arrival_order() {
        let mut first = occ("x", "X", 4);
        let mut second = occ("y", "Y", 4);
        first.occurs_at = at(4);
        second.occurs_at = at(4);
        let result = dedupe_and_sort(vec![first, second], AggregationMode::Upcoming);
        assert_eq!(result.entities[0].entity_id, "x");
        assert_eq!(result.entities[1].entity_id, "y");
    }

    #[test]
    fn test_empty_input() {
        let result = dedupe_and_sort(Vec::new(), AggregationMode::Upcoming);
        assert_eq!(result.total, 0);
        assert!(result.entities.is_empty());
    }
}
