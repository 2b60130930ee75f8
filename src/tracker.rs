//! Markers seen recently, with their last world pose.

use nalgebra as na;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Seconds a marker stays tracked after it was last seen
    pub expiry_secs: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { expiry_secs: 1.0 }
    }
}

impl TrackerConfig {
    pub fn expiry(&self) -> Duration {
        Duration::try_from_secs_f64(self.expiry_secs).unwrap_or(Duration::ZERO)
    }
}

/// A marker pose observed in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: i32,
    pub world: na::Isometry3<f64>,
    /// Position in board coordinates, when it could be determined
    pub label: Option<na::Point3<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedMarker {
    pub world: na::Isometry3<f64>,
    pub label: Option<na::Point3<f64>>,
    pub last_seen: Instant,
}

/// Ids affected by one tracker update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerUpdate {
    pub spawned: Vec<i32>,
    pub moved: Vec<i32>,
    pub expired: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct MarkerTracker {
    expiry: Duration,
    markers: BTreeMap<i32, TrackedMarker>,
}

impl Default for MarkerTracker {
    fn default() -> Self {
        Self::new(&TrackerConfig::default())
    }
}

impl MarkerTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            expiry: config.expiry(),
            markers: BTreeMap::new(),
        }
    }

    pub fn markers(&self) -> &BTreeMap<i32, TrackedMarker> {
        &self.markers
    }

    pub fn get(&self, id: i32) -> Option<&TrackedMarker> {
        self.markers.get(&id)
    }

    /// Records the markers seen at `now`, then drops the stale ones.
    pub fn observe(&mut self, observations: &[Observation], now: Instant) -> TrackerUpdate {
        let mut update = TrackerUpdate::default();

        for obs in observations {
            let tracked = TrackedMarker {
                world: obs.world,
                label: obs.label,
                last_seen: now,
            };
            if self.markers.insert(obs.id, tracked).is_some() {
                update.moved.push(obs.id);
            } else {
                update.spawned.push(obs.id);
            }
        }

        update.expired = self.expire(now);
        update
    }

    /// Removes markers not seen for longer than the expiry and returns their ids.
    pub fn expire(&mut self, now: Instant) -> Vec<i32> {
        let expiry = self.expiry;
        let mut expired = Vec::new();

        self.markers.retain(|id, marker| {
            let stale = now.saturating_duration_since(marker.last_seen) > expiry;
            if stale {
                expired.push(*id);
            }
            !stale
        });

        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seen(id: i32, x: f64) -> Observation {
        Observation {
            id,
            world: na::Isometry3::translation(x, 0.0, 0.0),
            label: None,
        }
    }

    #[test]
    fn test_spawn_move_expire() {
        let mut tracker = MarkerTracker::new(&TrackerConfig::default());
        let t0 = Instant::now();

        let update = tracker.observe(&[seen(7, 0.0), seen(8, 0.0)], t0);
        assert_eq!(update.spawned, vec![7, 8]);
        assert!(update.moved.is_empty() && update.expired.is_empty());

        let t1 = t0 + Duration::from_millis(600);
        let update = tracker.observe(&[seen(7, 0.5)], t1);
        assert_eq!(update.moved, vec![7]);
        assert!(update.expired.is_empty());
        assert_eq!(tracker.get(7).map(|m| m.world.translation.x), Some(0.5));

        // 8 was last seen 1.2 s ago, 7 only 0.6 s ago
        let t2 = t0 + Duration::from_millis(1200);
        let update = tracker.observe(&[], t2);
        assert_eq!(update.expired, vec![8]);
        assert!(tracker.get(7).is_some());

        assert_eq!(tracker.expire(t1 + Duration::from_millis(1001)), vec![7]);
        assert!(tracker.markers().is_empty());
    }

    #[test]
    fn test_exactly_at_expiry_is_kept() {
        let mut tracker = MarkerTracker::new(&TrackerConfig::default());
        let t0 = Instant::now();
        tracker.observe(&[seen(1, 0.0)], t0);

        assert!(tracker.expire(t0 + Duration::from_secs(1)).is_empty());
        assert_eq!(tracker.expire(t0 + Duration::from_millis(1001)), vec![1]);
    }

    #[test]
    fn test_negative_expiry_clamps_to_zero() {
        let config = TrackerConfig { expiry_secs: -3.0 };
        assert_eq!(config.expiry(), Duration::ZERO);
    }
}
