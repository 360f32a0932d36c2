use crate::collaborators::QualityView;
use qnsd_events::{AccessNetwork, MeasurementKind, Transport};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Comparison applied to the current sample.
///
/// `Available` / `Unavailable` are the sentinels used with
/// [`MeasurementKind::Availability`]; the threshold value is unused there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThresholdOp {
    Gte,
    Lte,
    Available,
    Unavailable,
}

/// Immutable signal predicate against one (access network, measurement).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Threshold {
    pub access_network: AccessNetwork,
    pub measurement: MeasurementKind,
    pub op: ThresholdOp,
    /// Signed value in the measurement's native unit (dBm, dB).
    pub value: i32,
    /// Hold-down credited to the Wi-Fi side before a crossed transition
    /// counts. Consumed by the monitor programming, not by evaluation.
    pub backhaul_grace_ms: u32,
}

impl Threshold {
    pub fn new(
        access_network: AccessNetwork,
        measurement: MeasurementKind,
        op: ThresholdOp,
        value: i32,
    ) -> Self {
        Self {
            access_network,
            measurement,
            op,
            value,
            backhaul_grace_ms: 0,
        }
    }

    pub fn with_backhaul_grace(mut self, grace: Duration) -> Self {
        self.backhaul_grace_ms = grace.as_millis() as u32;
        self
    }

    /// Evaluate against the current snapshot. A measurement with no current
    /// sample is unsatisfied, never an error.
    pub fn satisfied(&self, quality: &QualityView<'_>) -> bool {
        match self.op {
            ThresholdOp::Available => quality.is_available(self.access_network),
            ThresholdOp::Unavailable => !quality.is_available(self.access_network),
            ThresholdOp::Gte => quality
                .current_value(self.access_network, self.measurement)
                .is_some_and(|v| v >= self.value),
            ThresholdOp::Lte => quality
                .current_value(self.access_network, self.measurement)
                .is_some_and(|v| v <= self.value),
        }
    }

    /// Whether this predicate needs a live sample (availability sentinels
    /// are answered from the evaluator's world model instead).
    pub fn needs_measurement(&self) -> bool {
        !matches!(self.op, ThresholdOp::Available | ThresholdOp::Unavailable)
    }

    pub fn transport(&self) -> Transport {
        self.access_network.transport()
    }
}

/// AND-conjunction of thresholds. Satisfied iff every member is satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdGroup {
    thresholds: Vec<Threshold>,
}

impl ThresholdGroup {
    /// Empty groups are rejected at policy load time.
    pub fn new(thresholds: Vec<Threshold>) -> Option<Self> {
        if thresholds.is_empty() {
            return None;
        }
        Some(Self { thresholds })
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    pub fn satisfied(&self, quality: &QualityView<'_>) -> bool {
        self.thresholds.iter().all(|t| t.satisfied(quality))
    }

    /// Members currently unsatisfied, in group order.
    pub fn unsatisfied(&self, quality: &QualityView<'_>) -> Vec<&Threshold> {
        self.thresholds
            .iter()
            .filter(|t| !t.satisfied(quality))
            .collect()
    }

    pub fn has_iwlan_threshold(&self) -> bool {
        self.thresholds
            .iter()
            .any(|t| t.access_network == AccessNetwork::Iwlan)
    }

    /// A cellular-side `AVAILABILITY = UNAVAILABLE` member.
    pub fn has_cellular_unavailable_threshold(&self) -> bool {
        self.thresholds.iter().any(|t| {
            t.transport() == Transport::Wwan
                && t.measurement == MeasurementKind::Availability
                && t.op == ThresholdOp::Unavailable
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StaticQualityMonitor;

    fn view<'a>(
        wifi: &'a StaticQualityMonitor,
        cellular: &'a StaticQualityMonitor,
    ) -> QualityView<'a> {
        QualityView::new(Some(wifi), Some(cellular), true, true)
    }

    #[test]
    fn it_compares_against_the_current_sample() {
        let wifi = StaticQualityMonitor::new();
        let cellular = StaticQualityMonitor::new();
        wifi.set_value(AccessNetwork::Iwlan, MeasurementKind::Rssi, -60);

        let good = Threshold::new(
            AccessNetwork::Iwlan,
            MeasurementKind::Rssi,
            ThresholdOp::Gte,
            -65,
        );
        let bad = Threshold::new(
            AccessNetwork::Iwlan,
            MeasurementKind::Rssi,
            ThresholdOp::Lte,
            -70,
        );

        assert!(good.satisfied(&view(&wifi, &cellular)));
        assert!(!bad.satisfied(&view(&wifi, &cellular)));
    }

    #[test]
    fn it_is_unsatisfied_without_a_sample() {
        let wifi = StaticQualityMonitor::new();
        let cellular = StaticQualityMonitor::new();

        let t = Threshold::new(
            AccessNetwork::Eutran,
            MeasurementKind::Rsrp,
            ThresholdOp::Gte,
            -110,
        );

        assert!(!t.satisfied(&view(&wifi, &cellular)));
    }

    #[test]
    fn it_answers_availability_from_the_world_model() {
        let wifi = StaticQualityMonitor::new();
        let cellular = StaticQualityMonitor::new();
        let v = QualityView::new(Some(&wifi), Some(&cellular), true, false);

        let wifi_up = Threshold::new(
            AccessNetwork::Iwlan,
            MeasurementKind::Availability,
            ThresholdOp::Available,
            0,
        );
        let cell_down = Threshold::new(
            AccessNetwork::Eutran,
            MeasurementKind::Availability,
            ThresholdOp::Unavailable,
            0,
        );

        assert!(wifi_up.satisfied(&v));
        assert!(cell_down.satisfied(&v));
    }

    #[test]
    fn it_rejects_empty_groups() {
        assert!(ThresholdGroup::new(vec![]).is_none());
    }

    #[test]
    fn it_requires_every_member_of_a_group() {
        // Arrange
        let wifi = StaticQualityMonitor::new();
        let cellular = StaticQualityMonitor::new();
        wifi.set_value(AccessNetwork::Iwlan, MeasurementKind::Rssi, -60);
        cellular.set_value(AccessNetwork::Eutran, MeasurementKind::Rsrp, -120);

        let group = ThresholdGroup::new(vec![
            Threshold::new(
                AccessNetwork::Iwlan,
                MeasurementKind::Rssi,
                ThresholdOp::Gte,
                -65,
            ),
            Threshold::new(
                AccessNetwork::Eutran,
                MeasurementKind::Rsrp,
                ThresholdOp::Lte,
                -115,
            ),
        ])
        .unwrap();

        // Act + Assert: both members hold
        assert!(group.satisfied(&view(&wifi, &cellular)));

        // One member flips, the conjunction fails
        cellular.set_value(AccessNetwork::Eutran, MeasurementKind::Rsrp, -90);
        assert!(!group.satisfied(&view(&wifi, &cellular)));
        assert_eq!(group.unsatisfied(&view(&wifi, &cellular)).len(), 1);
    }

    #[test]
    fn it_spots_wifi_groups_with_cellular_unavailable_members() {
        let group = ThresholdGroup::new(vec![
            Threshold::new(
                AccessNetwork::Iwlan,
                MeasurementKind::Rssi,
                ThresholdOp::Gte,
                -75,
            ),
            Threshold::new(
                AccessNetwork::Eutran,
                MeasurementKind::Availability,
                ThresholdOp::Unavailable,
                0,
            ),
        ])
        .unwrap();

        assert!(group.has_iwlan_threshold());
        assert!(group.has_cellular_unavailable_threshold());
    }
}
