use crate::device::DeviceMetadata;
use crate::event::{AlertEvent, TelemetryEvent};
use crate::history::HistoryRing;
use crate::state_store::DeviceStateSnapshot;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

struct DeviceState {
    history: HistoryRing,
    metadata: Option<DeviceMetadata>,
    /// Bumped on every mutation; lets persistence order snapshots.
    version: u64,
}

/// Single-writer state for one device key: bounded reading history,
/// metadata, and threshold evaluation.
///
/// The interior mutex serializes concurrent ingests for the same key;
/// it is never held across an await, so callers are free to publish
/// alerts or persist snapshots after the fact.
pub struct DeviceStateMachine {
    device_key: String,
    default_min_threshold: i64,
    default_max_threshold: i64,
    state: Mutex<DeviceState>,
}

impl DeviceStateMachine {
    pub fn new(
        device_key: &str,
        queue_length: usize,
        default_min_threshold: i64,
        default_max_threshold: i64,
    ) -> Self {
        Self {
            device_key: device_key.to_string(),
            default_min_threshold,
            default_max_threshold,
            state: Mutex::new(DeviceState {
                history: HistoryRing::new(queue_length),
                metadata: None,
                version: 0,
            }),
        }
    }

    pub fn device_key(&self) -> &str {
        &self.device_key
    }

    fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one reading and evaluate it against the device thresholds.
    ///
    /// The first ingest for a never-configured device synthesizes and
    /// stores default metadata. Returns an alert when the value falls
    /// outside [min, max].
    pub fn ingest(&self, event: TelemetryEvent) -> Option<AlertEvent> {
        let mut state = self.lock_state();

        let metadata = match &state.metadata {
            Some(metadata) => metadata.clone(),
            None => {
                let synthesized = DeviceMetadata::synthesized(
                    &self.device_key,
                    self.default_min_threshold,
                    self.default_max_threshold,
                );
                debug!(
                    device_key = %self.device_key,
                    device_id = synthesized.device_id,
                    "Synthesized default metadata on first ingest"
                );
                state.metadata = Some(synthesized.clone());
                synthesized
            }
        };

        let alert = if event.value < metadata.min_threshold as f64
            || event.value > metadata.max_threshold as f64
        {
            Some(AlertEvent::from_reading(&metadata, &event))
        } else {
            None
        };

        state.history.push(event);
        state.version += 1;
        alert
    }

    /// Current metadata, synthesizing defaults when none exist yet.
    /// A pure read: the synthesized defaults are not stored.
    pub fn metadata(&self) -> DeviceMetadata {
        let state = self.lock_state();
        match &state.metadata {
            Some(metadata) => metadata.clone(),
            None => DeviceMetadata::synthesized(
                &self.device_key,
                self.default_min_threshold,
                self.default_max_threshold,
            ),
        }
    }

    /// Replace the stored metadata wholesale. Last writer wins; history
    /// is not re-evaluated against the new thresholds.
    pub fn set_metadata(&self, metadata: DeviceMetadata) {
        let mut state = self.lock_state();
        state.metadata = Some(metadata);
        state.version += 1;
    }

    pub fn history(&self) -> Vec<TelemetryEvent> {
        self.lock_state().history.to_vec()
    }

    pub fn snapshot(&self) -> DeviceStateSnapshot {
        let state = self.lock_state();
        DeviceStateSnapshot {
            metadata: state.metadata.clone(),
            history: state.history.to_vec(),
            version: state.version,
        }
    }

    pub fn restore(&self, snapshot: DeviceStateSnapshot) {
        let mut state = self.lock_state();
        state.metadata = snapshot.metadata;
        for event in snapshot.history {
            state.history.push(event);
        }
        state.version = snapshot.version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DEFAULT_MAX_THRESHOLD, DEFAULT_MIN_THRESHOLD};

    fn machine(queue_length: usize) -> DeviceStateMachine {
        DeviceStateMachine::new(
            "device001",
            queue_length,
            DEFAULT_MIN_THRESHOLD,
            DEFAULT_MAX_THRESHOLD,
        )
    }

    fn event(value: f64) -> TelemetryEvent {
        TelemetryEvent {
            device_id: 1,
            name: "device001".to_string(),
            value,
            status: "Ok".to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_in_range_value_produces_no_alert() {
        let machine = machine(10);
        assert!(machine.ingest(event(45.0)).is_none());
    }

    #[test]
    fn test_out_of_range_value_produces_alert_with_synthesized_metadata() {
        let machine = machine(10);
        assert!(machine.ingest(event(45.0)).is_none());

        let alert = machine.ingest(event(55.0)).expect("expected an alert");

        assert_eq!(alert.value, 55.0);
        assert_eq!(alert.device_id, 1);
        assert_eq!(alert.name, "device001");
        assert_eq!(alert.min_threshold, 30);
        assert_eq!(alert.max_threshold, 50);
        assert_eq!(alert.model, "Unknown");
    }

    #[test]
    fn test_below_minimum_produces_alert() {
        let machine = machine(10);
        let alert = machine.ingest(event(10.0)).expect("expected an alert");
        assert_eq!(alert.value, 10.0);
    }

    #[test]
    fn test_threshold_bounds_are_inclusive() {
        let machine = machine(10);
        assert!(machine.ingest(event(30.0)).is_none());
        assert!(machine.ingest(event(50.0)).is_none());
        assert!(machine.ingest(event(29.9)).is_some());
        assert!(machine.ingest(event(50.1)).is_some());
    }

    #[test]
    fn test_history_evicts_oldest_first() {
        let machine = machine(3);
        for value in [10.0, 20.0, 30.0, 40.0] {
            machine.ingest(event(value));
        }

        let values: Vec<f64> = machine.history().iter().map(|e| e.value).collect();
        assert_eq!(values, vec![20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_alerting_event_still_recorded_in_history() {
        let machine = machine(3);
        machine.ingest(event(99.0));
        assert_eq!(machine.history().len(), 1);
    }

    #[test]
    fn test_set_metadata_changes_thresholds_going_forward() {
        let machine = machine(10);
        machine.ingest(event(45.0));

        let mut metadata = machine.metadata();
        metadata.min_threshold = 0;
        metadata.max_threshold = 10;
        machine.set_metadata(metadata);

        assert!(machine.ingest(event(5.0)).is_none());
        let alert = machine.ingest(event(15.0)).expect("expected an alert");
        assert_eq!(alert.min_threshold, 0);
        assert_eq!(alert.max_threshold, 10);
    }

    #[test]
    fn test_metadata_read_does_not_persist_synthesized_defaults() {
        let machine = machine(10);

        let metadata = machine.metadata();
        assert_eq!(metadata.device_id, 1);
        assert_eq!(metadata.min_threshold, 30);

        // The read was pure: nothing was stored.
        assert!(machine.snapshot().metadata.is_none());
    }

    #[test]
    fn test_first_ingest_persists_synthesized_metadata() {
        let machine = machine(10);
        machine.ingest(event(45.0));
        assert!(machine.snapshot().metadata.is_some());
    }

    #[test]
    fn test_restore_round_trip() {
        let machine = machine(3);
        machine.ingest(event(45.0));
        machine.ingest(event(46.0));
        let snapshot = machine.snapshot();

        let restored = DeviceStateMachine::new("device001", 3, 30, 50);
        restored.restore(snapshot);

        assert_eq!(restored.history().len(), 2);
        assert_eq!(restored.metadata().device_id, 1);
    }
}
