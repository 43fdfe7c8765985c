//! Live session tracking for distribution rounds.
//!
//! The tracker owns the state machine of every active session:
//! `Active -> Paused -> Active -> Ended`, with `Ended` terminal. Mutable
//! state is serialized per session id: the outer map lock is held only to
//! resolve the id, so concurrent updates to different sessions never
//! contend. Position updates apply last-write-wins and run nearest-segment
//! detection on every fix received, a linear scan over the session's open
//! segments (zone segment counts sit in the hundreds).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::store::PlannerStore;
use crate::types::{
    ProgressionEntry, ProgressionSummary, RouteResult, SegmentStatus, Session, SessionStatus,
};
use crate::GeoPoint;

/// Default GPS-to-segment proximity threshold in meters.
pub const DETECTION_THRESHOLD_M: f64 = 15.0;

/// Tracker tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// A fix within this distance of an open segment's reference midpoint
    /// marks the segment in progress.
    pub detection_threshold_m: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            detection_threshold_m: DETECTION_THRESHOLD_M,
        }
    }
}

/// Reference point of one segment for GPS detection.
struct DetectionTarget {
    segment_id: String,
    midpoint: Option<GeoPoint>,
    length_m: f64,
}

/// One session's live state, guarded by its own mutex.
struct LiveSession {
    session: Session,
    entries: Vec<ProgressionEntry>,
    targets: Vec<DetectionTarget>,
}

impl LiveSession {
    fn require_active(&self) -> Result<()> {
        match self.session.status {
            SessionStatus::Active => Ok(()),
            SessionStatus::Paused => Err(PlannerError::session_state(format!(
                "session '{}' is paused",
                self.session.id
            ))),
            SessionStatus::Ended => Err(PlannerError::session_state(format!(
                "session '{}' has ended",
                self.session.id
            ))),
        }
    }

    fn entry_mut(&mut self, segment_id: &str) -> Result<&mut ProgressionEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.segment_id == segment_id)
            .ok_or_else(|| PlannerError::not_found("progression entry", segment_id))
    }
}

/// A read-only view of a session and its progression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub progression: Vec<ProgressionEntry>,
    pub summary: ProgressionSummary,
}

/// Outcome of one position update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdate {
    /// Segment detected within the proximity threshold, if any.
    pub detected_segment: Option<String>,
    pub summary: ProgressionSummary,
}

/// Final aggregates computed when a session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub segments_done: usize,
    pub segments_total: usize,
    /// Total distributed street length over completed segments, meters.
    pub distributed_m: f64,
    /// Wall-clock session duration in seconds.
    pub duration_s: f64,
}

/// Owns all live sessions and their progression state.
pub struct SessionTracker {
    store: Arc<dyn PlannerStore>,
    sessions: Mutex<HashMap<String, Arc<Mutex<LiveSession>>>>,
    next_id: AtomicU64,
    config: TrackerConfig,
}

impl SessionTracker {
    pub fn new(store: Arc<dyn PlannerStore>) -> Self {
        Self::with_config(store, TrackerConfig::default())
    }

    pub fn with_config(store: Arc<dyn PlannerStore>, config: TrackerConfig) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            config,
        }
    }

    /// Start a session over a zone: one progression entry per segment
    /// currently in the zone, created atomically with the session.
    pub fn start_session(
        &self,
        zone_id: &str,
        user_id: Option<String>,
        route: Option<RouteResult>,
    ) -> Result<SessionSnapshot> {
        // Fails with NotFound before anything is created.
        self.store.zone(zone_id)?;
        let segments = self.store.segments(zone_id)?;

        let id = format!("session-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let session = Session {
            id: id.clone(),
            zone_id: zone_id.to_string(),
            user_id,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            last_position: None,
            route,
        };

        let entries: Vec<ProgressionEntry> = segments
            .iter()
            .map(|segment| ProgressionEntry {
                segment_id: segment.id.clone(),
                done: false,
                started_at: None,
                completed_at: None,
            })
            .collect();
        let targets: Vec<DetectionTarget> = segments
            .iter()
            .map(|segment| DetectionTarget {
                segment_id: segment.id.clone(),
                midpoint: segment.midpoint(),
                length_m: segment.length_m,
            })
            .collect();

        info!(
            "session '{}' started on zone '{}' with {} segments",
            id,
            zone_id,
            entries.len()
        );

        let live = LiveSession {
            session: session.clone(),
            entries: entries.clone(),
            targets,
        };
        self.persist(&live)?;
        self.sessions
            .lock()
            .unwrap()
            .insert(id, Arc::new(Mutex::new(live)));

        let summary = ProgressionSummary::from_entries(&entries);
        Ok(SessionSnapshot {
            session,
            progression: entries,
            summary,
        })
    }

    /// Store the latest GPS fix (last-write-wins) and run nearest-segment
    /// detection over the session's open segments.
    pub fn update_position(&self, session_id: &str, position: GeoPoint) -> Result<PositionUpdate> {
        if !position.is_valid() {
            return Err(PlannerError::validation(format!(
                "invalid GPS fix: [{}, {}]",
                position.lon, position.lat
            )));
        }

        let live = self.live(session_id)?;
        let mut live = live.lock().unwrap();
        live.require_active()?;

        live.session.last_position = Some(position);

        let detected = self.detect_segment(&mut live, position)?;
        self.persist(&live)?;
        Ok(PositionUpdate {
            detected_segment: detected,
            summary: ProgressionSummary::from_entries(&live.entries),
        })
    }

    /// Nearest open segment within the threshold, marked in progress.
    /// Idempotent when the segment was already started.
    fn detect_segment(&self, live: &mut LiveSession, position: GeoPoint) -> Result<Option<String>> {
        let mut nearest: Option<(f64, String)> = None;

        for entry in live.entries.iter().filter(|e| !e.done) {
            let target = live
                .targets
                .iter()
                .find(|t| t.segment_id == entry.segment_id);
            let Some(midpoint) = target.and_then(|t| t.midpoint) else {
                continue;
            };

            let distance = crate::geo_utils::haversine_distance(position, midpoint);
            if distance <= self.config.detection_threshold_m
                && nearest.as_ref().map_or(true, |(best, _)| distance < *best)
            {
                nearest = Some((distance, entry.segment_id.clone()));
            }
        }

        let Some((distance, segment_id)) = nearest else {
            return Ok(None);
        };

        debug!(
            "session '{}': fix within {:.1}m of segment '{}'",
            live.session.id, distance, segment_id
        );

        let entry = live.entry_mut(&segment_id)?;
        if entry.started_at.is_none() {
            entry.started_at = Some(Utc::now());
        }
        self.store
            .set_segment_status(&segment_id, SegmentStatus::InProgress)?;

        Ok(Some(segment_id))
    }

    /// Explicitly mark a segment as started.
    pub fn start_segment(&self, session_id: &str, segment_id: &str) -> Result<()> {
        let live = self.live(session_id)?;
        let mut live = live.lock().unwrap();
        live.require_active()?;

        let entry = live.entry_mut(segment_id)?;
        if entry.started_at.is_none() {
            entry.started_at = Some(Utc::now());
        }
        self.store
            .set_segment_status(segment_id, SegmentStatus::InProgress)?;
        self.persist(&live)
    }

    /// Mark a progression entry done, stamping `completed_at` and
    /// backfilling `started_at` when detection never saw the segment.
    pub fn complete_segment(
        &self,
        session_id: &str,
        segment_id: &str,
    ) -> Result<ProgressionSummary> {
        let live = self.live(session_id)?;
        let mut live = live.lock().unwrap();
        live.require_active()?;

        let now = Utc::now();
        let entry = live.entry_mut(segment_id)?;
        entry.done = true;
        entry.completed_at = Some(now);
        entry.started_at.get_or_insert(now);

        self.store
            .set_segment_status(segment_id, SegmentStatus::Done)?;
        self.persist(&live)?;

        info!(
            "session '{}': segment '{}' completed",
            live.session.id, segment_id
        );
        Ok(ProgressionSummary::from_entries(&live.entries))
    }

    /// Pause an active session. Progression is untouched.
    pub fn pause_session(&self, session_id: &str) -> Result<()> {
        let live = self.live(session_id)?;
        let mut live = live.lock().unwrap();
        live.require_active()?;
        live.session.status = SessionStatus::Paused;
        self.persist(&live)?;
        info!("session '{}' paused", session_id);
        Ok(())
    }

    /// Resume a paused session. Resuming a session in any other state is a
    /// state violation.
    pub fn resume_session(&self, session_id: &str) -> Result<()> {
        let live = self.live(session_id)?;
        let mut live = live.lock().unwrap();
        match live.session.status {
            SessionStatus::Paused => {
                live.session.status = SessionStatus::Active;
                self.persist(&live)?;
                info!("session '{}' resumed", session_id);
                Ok(())
            }
            SessionStatus::Active => Err(PlannerError::session_state(format!(
                "session '{}' is not paused",
                session_id
            ))),
            SessionStatus::Ended => Err(PlannerError::session_state(format!(
                "session '{}' has ended",
                session_id
            ))),
        }
    }

    /// End a session and compute its final aggregates. The session becomes
    /// immutable; every later mutating call fails.
    pub fn end_session(&self, session_id: &str) -> Result<SessionStats> {
        let live = self.live(session_id)?;
        let mut live = live.lock().unwrap();
        if live.session.status == SessionStatus::Ended {
            return Err(PlannerError::session_state(format!(
                "session '{}' has already ended",
                session_id
            )));
        }

        let ended_at = Utc::now();
        live.session.status = SessionStatus::Ended;
        live.session.ended_at = Some(ended_at);
        self.persist(&live)?;

        let distributed_m = live
            .entries
            .iter()
            .filter(|e| e.done)
            .filter_map(|e| {
                live.targets
                    .iter()
                    .find(|t| t.segment_id == e.segment_id)
                    .map(|t| t.length_m)
            })
            .sum();

        let stats = SessionStats {
            segments_done: live.entries.iter().filter(|e| e.done).count(),
            segments_total: live.entries.len(),
            distributed_m,
            duration_s: (ended_at - live.session.started_at).num_milliseconds() as f64 / 1000.0,
        };

        info!(
            "session '{}' ended: {}/{} segments, {:.0}m distributed",
            session_id, stats.segments_done, stats.segments_total, stats.distributed_m
        );
        Ok(stats)
    }

    /// Read-only view of a session, allowed in any state.
    pub fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot> {
        let live = self.live(session_id)?;
        let live = live.lock().unwrap();
        Ok(SessionSnapshot {
            session: live.session.clone(),
            progression: live.entries.clone(),
            summary: ProgressionSummary::from_entries(&live.entries),
        })
    }

    /// Derived progression aggregates, never stored redundantly.
    pub fn progression(&self, session_id: &str) -> Result<ProgressionSummary> {
        let live = self.live(session_id)?;
        let live = live.lock().unwrap();
        Ok(ProgressionSummary::from_entries(&live.entries))
    }

    /// Write the session and its progression through to the store so
    /// external consumers can read them back.
    fn persist(&self, live: &LiveSession) -> Result<()> {
        self.store.save_session(&live.session, &live.entries)
    }

    fn live(&self, session_id: &str) -> Result<Arc<Mutex<LiveSession>>> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| PlannerError::not_found("session", session_id))
    }
}
