//! Merged robot state and latest perception snapshot.
//!
//! Telemetry arrives as partial updates: one event may carry only `mode`,
//! another only `battery`. [`TelemetryStore::apply_partial`] merges field by
//! field so a narrow event never erases unrelated known state. Perception is
//! different: each new image replaces the previous snapshot wholesale.
//!
//! The store outlives individual sessions; reconnecting does not clear it.

// ============================================================================
// Imports
// ============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::trace;

// ============================================================================
// TelemetrySnapshot
// ============================================================================

/// Latest known value per telemetry field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    /// Field name → latest value.
    pub fields: Map<String, Value>,
    /// Time of the last merge that changed anything.
    pub updated_at: Option<DateTime<Utc>>,
}

impl TelemetrySnapshot {
    /// Returns a field by name.
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Number of known fields.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if nothing is known yet.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Battery level in percent.
    #[must_use]
    pub fn battery(&self) -> Option<f64> {
        self.get("battery").and_then(Value::as_f64)
    }

    /// Operating mode (`auto` / `manual`).
    #[must_use]
    pub fn mode(&self) -> Option<&str> {
        self.get("mode").and_then(Value::as_str)
    }

    /// Operational status (`idle`, `executing_task`, `paused`, ...).
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.get("status").and_then(Value::as_str)
    }

    /// Mast/tower state as sent by the robot.
    #[must_use]
    pub fn mast(&self) -> Option<&Value> {
        self.get("mast")
    }

    /// Task currently being executed.
    #[must_use]
    pub fn current_task(&self) -> Option<&str> {
        self.get("currentTask").and_then(Value::as_str)
    }
}

// ============================================================================
// PerceptionSnapshot
// ============================================================================

/// The most recent captured image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerceptionSnapshot {
    /// Image location.
    pub image_url: String,
    /// Description from the analysis pipeline, if any.
    pub description: Option<String>,
    /// Capture time (receipt time when the backend sent none).
    pub captured_at: DateTime<Utc>,
}

// ============================================================================
// TelemetryStore
// ============================================================================

/// Holds the merged telemetry snapshot and the latest perception snapshot.
///
/// Reads never wait on the network; they return the latest merge.
#[derive(Debug, Default)]
pub struct TelemetryStore {
    telemetry: RwLock<TelemetrySnapshot>,
    perception: RwLock<Option<PerceptionSnapshot>>,
}

impl TelemetryStore {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the merged telemetry.
    #[must_use]
    pub fn current(&self) -> TelemetrySnapshot {
        self.telemetry.read().clone()
    }

    /// Merges a partial update, last writer wins per field.
    ///
    /// Fields absent from `update` keep their value. Explicit `null` values
    /// are treated as absent. Returns the number of fields whose value
    /// changed.
    pub fn apply_partial(&self, update: Map<String, Value>) -> usize {
        let mut snapshot = self.telemetry.write();
        let mut changed = 0;

        for (field, value) in update {
            if value.is_null() {
                continue;
            }
            if snapshot.fields.get(&field) != Some(&value) {
                snapshot.fields.insert(field, value);
                changed += 1;
            }
        }

        if changed > 0 {
            snapshot.updated_at = Some(Utc::now());
        }

        trace!(changed, known = snapshot.fields.len(), "Telemetry merged");
        changed
    }

    /// Returns the latest perception snapshot.
    #[must_use]
    pub fn perception(&self) -> Option<PerceptionSnapshot> {
        self.perception.read().clone()
    }

    /// Replaces the perception snapshot.
    pub fn replace_perception(&self, snapshot: PerceptionSnapshot) {
        *self.perception.write() = Some(snapshot);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    fn partial(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test partial must be an object"),
        }
    }

    #[test]
    fn test_merge_is_union() {
        let store = TelemetryStore::new();
        store.apply_partial(partial(json!({"battery": 80})));
        store.apply_partial(partial(json!({"mode": "auto"})));

        let snap = store.current();
        assert_eq!(snap.battery(), Some(80.0));
        assert_eq!(snap.mode(), Some("auto"));
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn test_five_partials_in_order() {
        let store = TelemetryStore::new();
        for update in [
            json!({"battery": 90}),
            json!({"battery": 85}),
            json!({"mode": "manual"}),
            json!({"status": "idle"}),
            json!({"battery": 80}),
        ] {
            store.apply_partial(partial(update));
        }

        assert_eq!(
            Value::Object(store.current().fields),
            json!({"battery": 80, "mode": "manual", "status": "idle"})
        );
    }

    #[test]
    fn test_null_does_not_erase() {
        let store = TelemetryStore::new();
        store.apply_partial(partial(json!({"battery": 70, "mode": "auto"})));
        let changed = store.apply_partial(partial(json!({"mode": null})));

        assert_eq!(changed, 0);
        assert_eq!(store.current().mode(), Some("auto"));
    }

    #[test]
    fn test_updated_at_only_moves_on_change() {
        let store = TelemetryStore::new();
        assert!(store.current().updated_at.is_none());

        store.apply_partial(partial(json!({"battery": 70})));
        let first = store.current().updated_at;
        assert!(first.is_some());

        assert_eq!(store.apply_partial(partial(json!({"battery": 70}))), 0);
        assert_eq!(store.current().updated_at, first);
    }

    #[test]
    fn test_accessors() {
        let store = TelemetryStore::new();
        store.apply_partial(partial(json!({
            "status": "executing_task",
            "currentTask": "scan aisle 4",
            "mast": {"height": 1.2},
        })));
        let snap = store.current();
        assert_eq!(snap.status(), Some("executing_task"));
        assert_eq!(snap.current_task(), Some("scan aisle 4"));
        assert_eq!(snap.mast(), Some(&json!({"height": 1.2})));
    }

    #[test]
    fn test_perception_is_replaced() {
        let store = TelemetryStore::new();
        assert!(store.perception().is_none());

        store.replace_perception(PerceptionSnapshot {
            image_url: "a.jpg".into(),
            description: Some("first".into()),
            captured_at: Utc::now(),
        });
        store.replace_perception(PerceptionSnapshot {
            image_url: "b.jpg".into(),
            description: None,
            captured_at: Utc::now(),
        });

        let snap = store.perception().expect("perception");
        assert_eq!(snap.image_url, "b.jpg");
        assert!(snap.description.is_none());
    }

    fn field_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<i64>().prop_map(Value::from),
            "[a-z]{1,8}".prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
        ]
    }

    fn update() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::vec(("[a-e]", field_value()), 0..5)
            .prop_map(|pairs| pairs.into_iter().collect())
    }

    proptest! {
        #[test]
        fn prop_field_coverage_is_monotonic(updates in prop::collection::vec(update(), 1..20)) {
            let store = TelemetryStore::new();
            let mut known = 0;
            for u in updates {
                store.apply_partial(u);
                let now = store.current().len();
                prop_assert!(now >= known);
                known = now;
            }
        }

        #[test]
        fn prop_last_non_null_write_wins(updates in prop::collection::vec(update(), 1..20)) {
            let store = TelemetryStore::new();
            let mut expected = Map::new();
            for u in updates {
                for (k, v) in &u {
                    if !v.is_null() {
                        expected.insert(k.clone(), v.clone());
                    }
                }
                store.apply_partial(u);
            }
            prop_assert_eq!(store.current().fields, expected);
        }
    }
}
