//! Typed contracts for the platform components the engine collaborates with.
//!
//! The engine never talks to radios or sockets itself. Signal quality is read
//! through [`QualityMonitor`] snapshots, and every other feed arrives as a
//! typed event on the evaluator inbox.

use dashmap::DashMap;
use qnsd_events::{AccessNetwork, CarrierId, MeasurementKind, SlotId, Transport};
use serde_json::Value;
use std::collections::HashMap;

/// Snapshot reads against a platform signal monitor.
///
/// Lookups are synchronous and non-blocking: the adapter caches the latest
/// sample per (access network, measurement). `update_thresholds` programs
/// edge-triggered alerts so the platform wakes the engine when a value would
/// flip a policy.
pub trait QualityMonitor: Send + Sync {
    /// Latest sample, or `None` when the monitor has no current value.
    fn current_value(&self, an: AccessNetwork, kind: MeasurementKind) -> Option<i32>;

    /// Replace the programmed alert points for one (an, measurement) pair.
    fn update_thresholds(
        &self,
        an: AccessNetwork,
        kind: MeasurementKind,
        values: Vec<i32>,
    );
}

/// In-memory [`QualityMonitor`] backed by a concurrent map.
///
/// The production wiring feeds it from the platform sampling loop; tests feed
/// it directly.
#[derive(Default)]
pub struct StaticQualityMonitor {
    samples: DashMap<(AccessNetwork, MeasurementKind), i32>,
    programmed: DashMap<(AccessNetwork, MeasurementKind), Vec<i32>>,
}

impl StaticQualityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&self, an: AccessNetwork, kind: MeasurementKind, value: i32) {
        self.samples.insert((an, kind), value);
    }

    pub fn clear_value(&self, an: AccessNetwork, kind: MeasurementKind) {
        self.samples.remove(&(an, kind));
    }

    /// The alert points last programmed by the engine, if any.
    pub fn programmed_thresholds(
        &self,
        an: AccessNetwork,
        kind: MeasurementKind,
    ) -> Option<Vec<i32>> {
        self.programmed.get(&(an, kind)).map(|v| v.clone())
    }
}

impl QualityMonitor for StaticQualityMonitor {
    fn current_value(&self, an: AccessNetwork, kind: MeasurementKind) -> Option<i32> {
        self.samples.get(&(an, kind)).map(|v| *v)
    }

    fn update_thresholds(
        &self,
        an: AccessNetwork,
        kind: MeasurementKind,
        values: Vec<i32>,
    ) {
        self.programmed.insert((an, kind), values);
    }
}

/// A per-evaluation view over both monitors plus transport availability.
///
/// Routes each lookup to the monitor owning the access network. A missing
/// monitor yields `None`, which downstream evaluates as "unsatisfied".
pub struct QualityView<'a> {
    wifi: Option<&'a dyn QualityMonitor>,
    cellular: Option<&'a dyn QualityMonitor>,
    iwlan_available: bool,
    cellular_available: bool,
}

impl<'a> QualityView<'a> {
    pub fn new(
        wifi: Option<&'a dyn QualityMonitor>,
        cellular: Option<&'a dyn QualityMonitor>,
        iwlan_available: bool,
        cellular_available: bool,
    ) -> Self {
        Self {
            wifi,
            cellular,
            iwlan_available,
            cellular_available,
        }
    }

    pub fn current_value(
        &self,
        an: AccessNetwork,
        kind: MeasurementKind,
    ) -> Option<i32> {
        let monitor = match an.transport() {
            Transport::Wlan => self.wifi,
            Transport::Wwan => self.cellular,
            Transport::Invalid => None,
        }?;

        monitor.current_value(an, kind)
    }

    pub fn is_available(&self, an: AccessNetwork) -> bool {
        match an.transport() {
            Transport::Wlan => self.iwlan_available,
            Transport::Wwan => self.cellular_available,
            Transport::Invalid => false,
        }
    }
}

/// Immutable carrier configuration bundle, keyed by `(slot, carrier_id)`.
///
/// Values are raw JSON scalars/arrays straight from the configuration
/// transport; the policy store compiles them into typed tables. Missing or
/// mistyped entries read as `None` and fall back to defaults downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierBundle {
    pub slot: SlotId,
    pub carrier_id: CarrierId,
    entries: HashMap<String, Value>,
}

impl CarrierBundle {
    pub fn new(slot: SlotId, carrier_id: CarrierId) -> Self {
        Self {
            slot,
            carrier_id,
            entries: HashMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.entries.insert(key.to_owned(), value);
        self
    }

    pub fn string_array(&self, key: &str) -> Option<Vec<String>> {
        let arr = self.entries.get(key)?.as_array()?;
        arr.iter()
            .map(|v| v.as_str().map(str::to_owned))
            .collect::<Option<Vec<_>>>()
    }

    pub fn int_array(&self, key: &str) -> Option<Vec<i64>> {
        let arr = self.entries.get(key)?.as_array()?;
        arr.iter().map(|v| v.as_i64()).collect::<Option<Vec<_>>>()
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.entries.get(key)?.as_bool()
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.entries.get(key)?.as_i64()
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.entries.get(key)?.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn it_routes_lookups_to_the_owning_monitor() {
        // Arrange
        let wifi = StaticQualityMonitor::new();
        let cellular = StaticQualityMonitor::new();
        wifi.set_value(AccessNetwork::Iwlan, MeasurementKind::Rssi, -60);
        cellular.set_value(AccessNetwork::Eutran, MeasurementKind::Rsrp, -95);

        let view = QualityView::new(Some(&wifi), Some(&cellular), true, true);

        // Assert
        assert_eq!(
            view.current_value(AccessNetwork::Iwlan, MeasurementKind::Rssi),
            Some(-60)
        );
        assert_eq!(
            view.current_value(AccessNetwork::Eutran, MeasurementKind::Rsrp),
            Some(-95)
        );
        assert_eq!(
            view.current_value(AccessNetwork::Eutran, MeasurementKind::Rssi),
            None
        );
    }

    #[test]
    fn it_reads_none_when_a_monitor_is_absent() {
        let cellular = StaticQualityMonitor::new();
        cellular.set_value(AccessNetwork::Eutran, MeasurementKind::Rsrp, -95);

        let view = QualityView::new(None, Some(&cellular), true, true);

        assert_eq!(
            view.current_value(AccessNetwork::Iwlan, MeasurementKind::Rssi),
            None
        );
        assert_eq!(
            view.current_value(AccessNetwork::Eutran, MeasurementKind::Rsrp),
            Some(-95)
        );
    }

    #[test]
    fn it_reports_availability_per_transport() {
        let view = QualityView::new(None, None, true, false);

        assert!(view.is_available(AccessNetwork::Iwlan));
        assert!(!view.is_available(AccessNetwork::Eutran));
        assert!(!view.is_available(AccessNetwork::Unknown));
    }

    #[test]
    fn it_reads_typed_values_out_of_a_bundle() {
        let bundle = CarrierBundle::new(SlotId(0), CarrierId::Id(310))
            .with("guard_timer_enabled", json!(true))
            .with("max_iwlan_handovers_during_call", json!(3))
            .with("domestic_roaming_plmns", json!(["310260", "310410"]));

        assert_eq!(bundle.bool("guard_timer_enabled"), Some(true));
        assert_eq!(bundle.int("max_iwlan_handovers_during_call"), Some(3));
        assert_eq!(
            bundle.string_array("domestic_roaming_plmns"),
            Some(vec!["310260".to_owned(), "310410".to_owned()])
        );
        assert_eq!(bundle.bool("missing"), None);
    }
}
