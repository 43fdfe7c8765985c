//! Persistence collaborator contract and an in-memory reference store.
//!
//! The planner core depends only on the CRUD operations below, never on a
//! particular schema or query language. [`MemoryStore`] backs the test
//! suite and small embedded deployments; production callers supply their
//! own implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use crate::error::{PlannerError, Result};
use crate::extraction::ExtractedStreet;
use crate::geo_utils::nearest_point_on_polyline;
use crate::types::{
    validate_ring, ProgressionEntry, RouteResult, Segment, SegmentDraft, SegmentStatus, Session,
    Street, Zone,
};
use crate::GeoPoint;

/// Maximum number of segments returned by a radius query.
const RADIUS_QUERY_LIMIT: usize = 100;

/// Storage operations the planner core requires.
pub trait PlannerStore: Send + Sync {
    /// Create a zone from a validated polygon ring.
    fn create_zone(&self, name: &str, polygon: &[GeoPoint]) -> Result<Zone>;

    fn zone(&self, zone_id: &str) -> Result<Zone>;

    fn zones(&self) -> Result<Vec<Zone>>;

    /// Delete a zone and cascade to its streets and segments.
    fn delete_zone(&self, zone_id: &str) -> Result<()>;

    /// Attach an optimized route snapshot to a zone.
    fn save_route(&self, zone_id: &str, route: &RouteResult) -> Result<()>;

    /// Persist an extracted street under a zone.
    fn add_street(&self, zone_id: &str, street: &ExtractedStreet) -> Result<Street>;

    fn streets(&self, zone_id: &str) -> Result<Vec<Street>>;

    /// Persist a segment draft with initial `todo` status and no visit
    /// order.
    fn add_segment(&self, draft: SegmentDraft) -> Result<Segment>;

    /// All segments of a zone, ordered by visit order (unordered last, in
    /// insertion order).
    fn segments(&self, zone_id: &str) -> Result<Vec<Segment>>;

    fn segment(&self, segment_id: &str) -> Result<Segment>;

    fn set_visit_order(&self, segment_id: &str, order: u32) -> Result<()>;

    fn set_segment_status(&self, segment_id: &str, status: SegmentStatus) -> Result<()>;

    /// Not-yet-done segments whose geometry passes within `radius_m` of
    /// `center`, nearest first, capped at an implementation limit.
    fn open_segments_within(&self, center: GeoPoint, radius_m: f64) -> Result<Vec<Segment>>;

    /// Persist a session and its progression set. The tracker writes the
    /// full state through on every mutation; external consumers read it
    /// back with [`PlannerStore::session`].
    fn save_session(&self, session: &Session, progression: &[ProgressionEntry]) -> Result<()>;

    fn session(&self, session_id: &str) -> Result<(Session, Vec<ProgressionEntry>)>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct StoreInner {
    zones: HashMap<String, Zone>,
    /// Streets and segments keep insertion order for stable listings.
    streets: Vec<Street>,
    segments: Vec<Segment>,
    sessions: HashMap<String, (Session, Vec<ProgressionEntry>)>,
    next_zone: u64,
    next_street: u64,
    next_segment: u64,
}

/// Thread-safe in-memory implementation of [`PlannerStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlannerStore for MemoryStore {
    fn create_zone(&self, name: &str, polygon: &[GeoPoint]) -> Result<Zone> {
        if name.trim().is_empty() {
            return Err(PlannerError::validation("zone name must not be empty"));
        }
        let ring = validate_ring(polygon)?;

        let mut inner = self.write()?;
        inner.next_zone += 1;
        let zone = Zone {
            id: format!("zone-{}", inner.next_zone),
            name: name.to_string(),
            polygon: ring,
            route: None,
            created_at: Utc::now(),
        };
        inner.zones.insert(zone.id.clone(), zone.clone());
        Ok(zone)
    }

    fn zone(&self, zone_id: &str) -> Result<Zone> {
        self.read()?
            .zones
            .get(zone_id)
            .cloned()
            .ok_or_else(|| PlannerError::not_found("zone", zone_id))
    }

    fn zones(&self) -> Result<Vec<Zone>> {
        let mut zones: Vec<Zone> = self.read()?.zones.values().cloned().collect();
        zones.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(zones)
    }

    fn delete_zone(&self, zone_id: &str) -> Result<()> {
        let mut inner = self.write()?;
        if inner.zones.remove(zone_id).is_none() {
            return Err(PlannerError::not_found("zone", zone_id));
        }
        inner.streets.retain(|s| s.zone_id != zone_id);
        inner.segments.retain(|s| s.zone_id != zone_id);
        Ok(())
    }

    fn save_route(&self, zone_id: &str, route: &RouteResult) -> Result<()> {
        let mut inner = self.write()?;
        let zone = inner
            .zones
            .get_mut(zone_id)
            .ok_or_else(|| PlannerError::not_found("zone", zone_id))?;
        zone.route = Some(route.clone());
        Ok(())
    }

    fn add_street(&self, zone_id: &str, street: &ExtractedStreet) -> Result<Street> {
        if street.path.len() < 2 {
            return Err(PlannerError::validation(
                "street path needs at least 2 points",
            ));
        }

        let mut inner = self.write()?;
        if !inner.zones.contains_key(zone_id) {
            return Err(PlannerError::not_found("zone", zone_id));
        }

        inner.next_street += 1;
        let record = Street {
            id: format!("street-{}", inner.next_street),
            zone_id: zone_id.to_string(),
            source_id: street.source_id.clone(),
            name: street.name.clone(),
            path: street.path.clone(),
            tags: street.tags.clone(),
            house_numbers: street.house_numbers.clone(),
        };
        inner.streets.push(record.clone());
        Ok(record)
    }

    fn streets(&self, zone_id: &str) -> Result<Vec<Street>> {
        Ok(self
            .read()?
            .streets
            .iter()
            .filter(|s| s.zone_id == zone_id)
            .cloned()
            .collect())
    }

    fn add_segment(&self, draft: SegmentDraft) -> Result<Segment> {
        let mut inner = self.write()?;
        if !inner.zones.contains_key(&draft.zone_id) {
            return Err(PlannerError::not_found("zone", draft.zone_id));
        }

        inner.next_segment += 1;
        let segment = Segment {
            id: format!("seg-{}", inner.next_segment),
            street_id: draft.street_id,
            zone_id: draft.zone_id,
            side: draft.side,
            path: draft.path,
            length_m: draft.length_m,
            visit_order: None,
            status: SegmentStatus::Todo,
        };
        inner.segments.push(segment.clone());
        Ok(segment)
    }

    fn segments(&self, zone_id: &str) -> Result<Vec<Segment>> {
        let mut segments: Vec<Segment> = self
            .read()?
            .segments
            .iter()
            .filter(|s| s.zone_id == zone_id)
            .cloned()
            .collect();
        // Visit order first, unordered segments last in insertion order.
        segments.sort_by_key(|s| (s.visit_order.is_none(), s.visit_order));
        Ok(segments)
    }

    fn segment(&self, segment_id: &str) -> Result<Segment> {
        self.read()?
            .segments
            .iter()
            .find(|s| s.id == segment_id)
            .cloned()
            .ok_or_else(|| PlannerError::not_found("segment", segment_id))
    }

    fn set_visit_order(&self, segment_id: &str, order: u32) -> Result<()> {
        let mut inner = self.write()?;
        let segment = inner
            .segments
            .iter_mut()
            .find(|s| s.id == segment_id)
            .ok_or_else(|| PlannerError::not_found("segment", segment_id))?;
        segment.visit_order = Some(order);
        Ok(())
    }

    fn set_segment_status(&self, segment_id: &str, status: SegmentStatus) -> Result<()> {
        let mut inner = self.write()?;
        let segment = inner
            .segments
            .iter_mut()
            .find(|s| s.id == segment_id)
            .ok_or_else(|| PlannerError::not_found("segment", segment_id))?;
        segment.status = status;
        Ok(())
    }

    fn open_segments_within(&self, center: GeoPoint, radius_m: f64) -> Result<Vec<Segment>> {
        let inner = self.read()?;
        let mut nearby: Vec<(f64, Segment)> = inner
            .segments
            .iter()
            .filter(|s| s.status != SegmentStatus::Done)
            .filter_map(|s| {
                let near = nearest_point_on_polyline(center, &s.path)?;
                (near.distance_m <= radius_m).then(|| (near.distance_m, s.clone()))
            })
            .collect();

        nearby.sort_by(|a, b| a.0.total_cmp(&b.0));
        nearby.truncate(RADIUS_QUERY_LIMIT);
        Ok(nearby.into_iter().map(|(_, s)| s).collect())
    }

    fn save_session(&self, session: &Session, progression: &[ProgressionEntry]) -> Result<()> {
        self.write()?.sessions.insert(
            session.id.clone(),
            (session.clone(), progression.to_vec()),
        );
        Ok(())
    }

    fn session(&self, session_id: &str) -> Result<(Session, Vec<ProgressionEntry>)> {
        self.read()?
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| PlannerError::not_found("session", session_id))
    }
}

impl MemoryStore {
    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreInner>> {
        self.inner.read().map_err(|_| PlannerError::Storage {
            message: "store lock poisoned".to_string(),
        })
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreInner>> {
        self.inner.write().map_err(|_| PlannerError::Storage {
            message: "store lock poisoned".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::destination_point;
    use crate::types::Side;
    use std::collections::HashMap as StdHashMap;

    fn square() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(2.34, 48.85),
            GeoPoint::new(2.36, 48.85),
            GeoPoint::new(2.36, 48.87),
            GeoPoint::new(2.34, 48.87),
        ]
    }

    fn extracted(path: Vec<GeoPoint>) -> ExtractedStreet {
        ExtractedStreet {
            source_id: "1".to_string(),
            name: "street".to_string(),
            path,
            tags: StdHashMap::new(),
            house_numbers: vec![],
        }
    }

    fn draft(zone_id: &str, path: Vec<GeoPoint>) -> SegmentDraft {
        let length_m = crate::geo_utils::polyline_length(&path);
        SegmentDraft {
            street_id: "street-1".to_string(),
            zone_id: zone_id.to_string(),
            side: Side::Undivided,
            path,
            length_m,
        }
    }

    #[test]
    fn test_zone_crud_and_cascade() {
        let store = MemoryStore::new();
        let zone = store.create_zone("Centre", &square()).unwrap();
        assert_eq!(store.zones().unwrap().len(), 1);

        let start = GeoPoint::new(2.35, 48.86);
        let path = vec![start, destination_point(start, 100.0, 0.0)];
        store.add_street(&zone.id, &extracted(path.clone())).unwrap();
        store.add_segment(draft(&zone.id, path)).unwrap();

        store.delete_zone(&zone.id).unwrap();
        assert!(store.zones().unwrap().is_empty());
        assert!(matches!(
            store.zone(&zone.id),
            Err(PlannerError::NotFound { .. })
        ));
        assert!(store.segments(&zone.id).unwrap().is_empty());
    }

    #[test]
    fn test_create_zone_rejects_bad_input() {
        let store = MemoryStore::new();
        assert!(store.create_zone("", &square()).is_err());
        assert!(store
            .create_zone("Zone", &[GeoPoint::new(0.0, 0.0)])
            .is_err());
    }

    #[test]
    fn test_segments_ordering() {
        let store = MemoryStore::new();
        let zone = store.create_zone("Centre", &square()).unwrap();
        let start = GeoPoint::new(2.35, 48.86);
        let path = vec![start, destination_point(start, 100.0, 0.0)];

        let a = store.add_segment(draft(&zone.id, path.clone())).unwrap();
        let b = store.add_segment(draft(&zone.id, path.clone())).unwrap();
        let c = store.add_segment(draft(&zone.id, path)).unwrap();

        store.set_visit_order(&c.id, 1).unwrap();
        store.set_visit_order(&a.id, 2).unwrap();

        let ordered = store.segments(&zone.id).unwrap();
        assert_eq!(ordered[0].id, c.id);
        assert_eq!(ordered[1].id, a.id);
        // Unordered segment comes last.
        assert_eq!(ordered[2].id, b.id);
    }

    #[test]
    fn test_session_round_trip() {
        use crate::types::{Session, SessionStatus};
        use chrono::Utc;

        let store = MemoryStore::new();
        let session = Session {
            id: "session-1".to_string(),
            zone_id: "zone-1".to_string(),
            user_id: None,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            last_position: None,
            route: None,
        };
        let progression = vec![ProgressionEntry {
            segment_id: "seg-1".to_string(),
            done: false,
            started_at: None,
            completed_at: None,
        }];

        store.save_session(&session, &progression).unwrap();
        let (stored, entries) = store.session("session-1").unwrap();
        assert_eq!(stored.zone_id, "zone-1");
        assert_eq!(entries.len(), 1);

        assert!(matches!(
            store.session("session-99"),
            Err(PlannerError::NotFound { .. })
        ));
    }

    #[test]
    fn test_open_segments_within_radius() {
        let store = MemoryStore::new();
        let zone = store.create_zone("Centre", &square()).unwrap();
        let start = GeoPoint::new(2.35, 48.86);

        let near_path = vec![start, destination_point(start, 100.0, 0.0)];
        let far_start = destination_point(start, 5_000.0, 90.0);
        let far_path = vec![far_start, destination_point(far_start, 100.0, 0.0)];

        let near = store.add_segment(draft(&zone.id, near_path)).unwrap();
        let far = store.add_segment(draft(&zone.id, far_path)).unwrap();

        let found = store.open_segments_within(start, 2_000.0).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, near.id);

        // Done segments are excluded.
        store
            .set_segment_status(&near.id, SegmentStatus::Done)
            .unwrap();
        assert!(store.open_segments_within(start, 2_000.0).unwrap().is_empty());
        let _ = far;
    }
}
