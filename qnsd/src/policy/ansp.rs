use crate::collaborators::QualityView;
use crate::policy::precondition::PreCondition;
use crate::policy::threshold::{Threshold, ThresholdGroup};
use qnsd_events::{CallType, SessionType, Transport};
use serde::{Deserialize, Serialize};

/// Access-Network Selection Policy.
///
/// Advocates moving the session to `target_transport` whenever its
/// pre-condition holds and at least one threshold group is satisfied
/// (the groups form a disjunction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ansp {
    session: SessionType,
    target_transport: Transport,
    precondition: PreCondition,
    groups: Vec<ThresholdGroup>,
}

#[bon::bon]
impl Ansp {
    #[builder]
    pub fn new(
        session: SessionType,
        target_transport: Transport,
        precondition: PreCondition,
        groups: Vec<ThresholdGroup>,
    ) -> Self {
        Self {
            session,
            target_transport,
            precondition,
            groups,
        }
    }
}

impl Ansp {
    pub fn session(&self) -> SessionType {
        self.session
    }

    pub fn target_transport(&self) -> Transport {
        self.target_transport
    }

    pub fn precondition(&self) -> &PreCondition {
        &self.precondition
    }

    pub fn groups(&self) -> &[ThresholdGroup] {
        &self.groups
    }

    /// Pre-condition match with the emergency relaxation: a policy bound to
    /// the EMERGENCY session whose condition names a VOICE call also matches
    /// an incoming EMERGENCY call. The reverse never holds for other
    /// sessions.
    pub fn satisfies_precondition(&self, pc: &PreCondition) -> bool {
        if self.precondition.matches(pc) {
            return true;
        }

        if self.session == SessionType::Emergency
            && pc.call_type == CallType::Emergency
            && self.precondition.call_type == CallType::Voice
        {
            let relaxed = PreCondition {
                call_type: CallType::Voice,
                ..*pc
            };
            return self.precondition.matches(&relaxed);
        }

        false
    }

    /// True if at least one group is satisfied. A missing quality source
    /// forces `false`.
    pub fn satisfied_by_any_threshold_group(
        &self,
        quality: Option<&QualityView<'_>>,
    ) -> bool {
        let Some(quality) = quality else {
            return false;
        };

        self.groups.iter().any(|g| g.satisfied(quality))
    }

    /// Unsatisfied members of the best group (fewest unsatisfied, ties broken
    /// by group order). The evaluator programs the quality monitors with
    /// these: "alert me when any of them would flip".
    pub fn unmatched_thresholds(&self, quality: &QualityView<'_>) -> Vec<Threshold> {
        self.groups
            .iter()
            .map(|g| g.unsatisfied(quality))
            .min_by_key(|unsatisfied| unsatisfied.len())
            .unwrap_or_default()
            .into_iter()
            .cloned()
            .collect()
    }

    /// A group pairing an IWLAN threshold with a cellular
    /// `AVAILABILITY = UNAVAILABLE` member means Wi-Fi measurements matter
    /// even while cellular is absent.
    pub fn has_wifi_threshold_without_cellular_condition(&self) -> bool {
        self.groups
            .iter()
            .any(|g| g.has_iwlan_threshold() && g.has_cellular_unavailable_threshold())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StaticQualityMonitor;
    use crate::policy::threshold::ThresholdOp;
    use qnsd_events::{AccessNetwork, Coverage, MeasurementKind, WfcPreference};

    fn wifi_rssi_gte(value: i32) -> ThresholdGroup {
        ThresholdGroup::new(vec![Threshold::new(
            AccessNetwork::Iwlan,
            MeasurementKind::Rssi,
            ThresholdOp::Gte,
            value,
        )])
        .unwrap()
    }

    fn ims_wlan_ansp(call_type: CallType, session: SessionType) -> Ansp {
        Ansp::builder()
            .session(session)
            .target_transport(Transport::Wlan)
            .precondition(PreCondition::plain(
                call_type,
                WfcPreference::WifiPreferred,
                Coverage::Home,
            ))
            .groups(vec![wifi_rssi_gte(-75)])
            .build()
    }

    #[test]
    fn it_matches_emergency_calls_asymmetrically() {
        let emergency_ansp = ims_wlan_ansp(CallType::Voice, SessionType::Emergency);
        let ims_ansp = ims_wlan_ansp(CallType::Voice, SessionType::Ims);

        let incoming = PreCondition::plain(
            CallType::Emergency,
            WfcPreference::WifiPreferred,
            Coverage::Home,
        );

        assert!(emergency_ansp.satisfies_precondition(&incoming));
        assert!(!ims_ansp.satisfies_precondition(&incoming));
    }

    #[test]
    fn it_fires_when_any_group_is_satisfied() {
        // Arrange: two groups, only the second will hold
        let wifi = StaticQualityMonitor::new();
        let cellular = StaticQualityMonitor::new();
        wifi.set_value(AccessNetwork::Iwlan, MeasurementKind::Rssi, -70);

        let ansp = Ansp::builder()
            .session(SessionType::Ims)
            .target_transport(Transport::Wlan)
            .precondition(PreCondition::plain(
                CallType::Idle,
                WfcPreference::WifiPreferred,
                Coverage::Home,
            ))
            .groups(vec![wifi_rssi_gte(-60), wifi_rssi_gte(-75)])
            .build();

        let view = QualityView::new(Some(&wifi), Some(&cellular), true, true);

        // Act + Assert
        assert!(ansp.satisfied_by_any_threshold_group(Some(&view)));
        assert!(!ansp.satisfied_by_any_threshold_group(None));
    }

    #[test]
    fn it_reports_the_best_groups_unmatched_members() {
        // Group 0 misses two members, group 1 misses one; the report comes
        // from group 1.
        let wifi = StaticQualityMonitor::new();
        let cellular = StaticQualityMonitor::new();
        wifi.set_value(AccessNetwork::Iwlan, MeasurementKind::Rssi, -80);

        let two_missing = ThresholdGroup::new(vec![
            Threshold::new(
                AccessNetwork::Iwlan,
                MeasurementKind::Rssi,
                ThresholdOp::Gte,
                -75,
            ),
            Threshold::new(
                AccessNetwork::Eutran,
                MeasurementKind::Rsrp,
                ThresholdOp::Gte,
                -100,
            ),
        ])
        .unwrap();

        let one_missing = wifi_rssi_gte(-75);

        let ansp = Ansp::builder()
            .session(SessionType::Ims)
            .target_transport(Transport::Wlan)
            .precondition(PreCondition::plain(
                CallType::Idle,
                WfcPreference::WifiPreferred,
                Coverage::Home,
            ))
            .groups(vec![two_missing, one_missing])
            .build();

        let view = QualityView::new(Some(&wifi), Some(&cellular), true, true);
        let unmatched = ansp.unmatched_thresholds(&view);

        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].access_network, AccessNetwork::Iwlan);
        assert_eq!(unmatched[0].value, -75);
    }

    #[test]
    fn it_detects_wifi_groups_that_ignore_cellular_presence() {
        let mixed = ThresholdGroup::new(vec![
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

        let ansp = Ansp::builder()
            .session(SessionType::Ims)
            .target_transport(Transport::Wlan)
            .precondition(PreCondition::plain(
                CallType::Idle,
                WfcPreference::WifiPreferred,
                Coverage::Home,
            ))
            .groups(vec![mixed])
            .build();

        assert!(ansp.has_wifi_threshold_without_cellular_condition());

        let plain = ims_wlan_ansp(CallType::Idle, SessionType::Ims);
        assert!(!plain.has_wifi_threshold_without_cellular_condition());
    }
}
