use crate::policy::ansp::Ansp;
use crate::policy::precondition::{GuardingDirection, PreCondition};
use crate::policy::store::PolicySnapshot;
use crate::policy::threshold::{Threshold, ThresholdGroup, ThresholdOp};
use qnsd_events::{
    AccessNetwork, CallType, Coverage, MeasurementKind, SessionType, Transport,
    WfcPreference,
};
use std::collections::HashMap;
use std::sync::Arc;

const SESSIONS: [SessionType; 5] = [
    SessionType::Ims,
    SessionType::Emergency,
    SessionType::Mms,
    SessionType::Xcap,
    SessionType::Cbs,
];
const CALL_TYPES: [CallType; 4] = [
    CallType::Idle,
    CallType::Voice,
    CallType::Video,
    CallType::Emergency,
];
const PREFERENCES: [WfcPreference; 3] = [
    WfcPreference::WifiOnly,
    WfcPreference::WifiPreferred,
    WfcPreference::CellularPreferred,
];
const COVERAGES: [Coverage; 2] = [Coverage::Home, Coverage::Roaming];

/// All selection policies compiled from one carrier snapshot, keyed by
/// session. Rebuilt on every carrier-config reload.
#[derive(Debug, Clone, Default)]
pub struct PolicyMap {
    by_session: HashMap<SessionType, Vec<Arc<Ansp>>>,
}

impl PolicyMap {
    pub fn from_ansps(ansps: Vec<Ansp>) -> Self {
        let mut by_session: HashMap<SessionType, Vec<Arc<Ansp>>> = HashMap::new();
        for ansp in ansps {
            by_session
                .entry(ansp.session())
                .or_default()
                .push(Arc::new(ansp));
        }
        Self { by_session }
    }

    /// Derive the policy set from the snapshot's threshold tables.
    ///
    /// Per (session, coverage, preference, call type) two policies are
    /// synthesized: one advocating WLAN, one advocating WWAN. Entry happens
    /// at `good`, exit at `bad`, so the pair forms a hysteresis band. When
    /// guard-timer hysteresis-on-preference is supported, guarded variants
    /// with relaxed (sticky) entry thresholds are added as well.
    pub fn build(snapshot: &PolicySnapshot) -> Self {
        let mut ansps = Vec::new();

        for session in SESSIONS {
            for coverage in COVERAGES {
                for pref in PREFERENCES {
                    for call_type in CALL_TYPES {
                        build_for(
                            snapshot, session, coverage, pref, call_type, &mut ansps,
                        );
                    }
                }
            }
        }

        Self::from_ansps(ansps)
    }

    pub fn ansps(&self, session: SessionType) -> &[Arc<Ansp>] {
        self.by_session
            .get(&session)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_session.values().all(Vec::is_empty)
    }
}

/// Returns the policies whose pre-condition is satisfied by the evaluator's
/// current one.
#[derive(Debug, Clone, Default)]
pub struct AnspMatcher {
    map: PolicyMap,
}

impl AnspMatcher {
    pub fn new(map: PolicyMap) -> Self {
        Self { map }
    }

    pub fn rebuild(&mut self, snapshot: &PolicySnapshot) {
        self.map = PolicyMap::build(snapshot);
    }

    pub fn replace(&mut self, map: PolicyMap) {
        self.map = map;
    }

    pub fn matching(
        &self,
        session: SessionType,
        pc: &PreCondition,
    ) -> Vec<Arc<Ansp>> {
        self.map
            .ansps(session)
            .iter()
            .filter(|ansp| ansp.satisfies_precondition(pc))
            .cloned()
            .collect()
    }
}

fn build_for(
    snapshot: &PolicySnapshot,
    session: SessionType,
    coverage: Coverage,
    pref: WfcPreference,
    call_type: CallType,
    out: &mut Vec<Ansp>,
) {
    let pc = PreCondition::plain(call_type, pref, coverage);

    let mut groups_to_wlan = wlan_groups(snapshot, call_type, pref, false);
    // roaming option: pick IWLAN on availability alone, no signal check
    if coverage == Coverage::Roaming && snapshot.iwlan_selection_without_ss_in_roaming
    {
        groups_to_wlan.extend(ThresholdGroup::new(vec![Threshold::new(
            AccessNetwork::Iwlan,
            MeasurementKind::Availability,
            ThresholdOp::Available,
            0,
        )]));
    }
    if !groups_to_wlan.is_empty() {
        out.push(
            Ansp::builder()
                .session(session)
                .target_transport(Transport::Wlan)
                .precondition(pc)
                .groups(groups_to_wlan)
                .build(),
        );
    }

    let groups_to_wwan = wwan_groups(snapshot, call_type, pref, false);
    if !groups_to_wwan.is_empty() {
        out.push(
            Ansp::builder()
                .session(session)
                .target_transport(Transport::Wwan)
                .precondition(pc)
                .groups(groups_to_wwan)
                .build(),
        );
    }

    if snapshot.is_guard_timer_hysteresis_on_preference_supported() {
        let sticky_wlan = wlan_groups(snapshot, call_type, pref, true);
        if !sticky_wlan.is_empty() {
            out.push(
                Ansp::builder()
                    .session(session)
                    .target_transport(Transport::Wlan)
                    .precondition(PreCondition::guarded(
                        call_type,
                        pref,
                        coverage,
                        GuardingDirection::Wifi,
                    ))
                    .groups(sticky_wlan)
                    .build(),
            );
        }

        let sticky_wwan = wwan_groups(snapshot, call_type, pref, true);
        if !sticky_wwan.is_empty() {
            out.push(
                Ansp::builder()
                    .session(session)
                    .target_transport(Transport::Wwan)
                    .precondition(PreCondition::guarded(
                        call_type,
                        pref,
                        coverage,
                        GuardingDirection::Cellular,
                    ))
                    .groups(sticky_wwan)
                    .build(),
            );
        }
    }
}

/// Groups advocating a move to (or stay on) WLAN.
fn wlan_groups(
    snapshot: &PolicySnapshot,
    call_type: CallType,
    pref: WfcPreference,
    sticky: bool,
) -> Vec<ThresholdGroup> {
    let mut groups = Vec::new();

    let wifi = wifi_entry_thresholds(snapshot, call_type, pref, sticky);

    match pref {
        WfcPreference::WifiOnly | WfcPreference::WifiPreferred => {
            // Wi-Fi good on its own is enough to advocate WLAN.
            if let Some(group) = ThresholdGroup::new(wifi.clone()) {
                groups.push(group);
            } else if let Some(group) = ThresholdGroup::new(vec![Threshold::new(
                AccessNetwork::Iwlan,
                MeasurementKind::Availability,
                ThresholdOp::Available,
                0,
            )]) {
                groups.push(group);
            }
        }
        WfcPreference::CellularPreferred => {
            // WLAN only when cellular degraded below its exit point.
            for an in cellular_ans(snapshot) {
                let kind = PolicySnapshot::default_measurement(an);
                let triplet = snapshot.threshold(an, call_type, kind, pref);
                let Some(exit) = triplet.worst.or(triplet.bad) else {
                    continue;
                };
                let mut members = vec![Threshold::new(an, kind, ThresholdOp::Lte, exit)];
                members.extend(wifi.clone());
                if let Some(group) = ThresholdGroup::new(members) {
                    groups.push(group);
                }
            }
        }
    }

    // Rollover: cellular gone entirely, any workable Wi-Fi wins.
    let mut rollover = wifi_exit_floor(snapshot, call_type, pref);
    rollover.push(Threshold::new(
        AccessNetwork::Eutran,
        MeasurementKind::Availability,
        ThresholdOp::Unavailable,
        0,
    ));
    if let Some(group) = ThresholdGroup::new(rollover) {
        groups.push(group);
    }

    groups
}

/// Groups advocating a move to (or stay on) WWAN.
fn wwan_groups(
    snapshot: &PolicySnapshot,
    call_type: CallType,
    pref: WfcPreference,
    sticky: bool,
) -> Vec<ThresholdGroup> {
    let mut groups = Vec::new();

    if pref == WfcPreference::WifiOnly {
        return groups;
    }

    match pref {
        WfcPreference::WifiPreferred => {
            // Leave Wi-Fi only once it degrades past the exit point.
            let wifi_kind = MeasurementKind::Rssi;
            let triplet =
                snapshot.threshold(AccessNetwork::Iwlan, call_type, wifi_kind, pref);
            let exit = if sticky {
                triplet.worst.or(triplet.bad)
            } else {
                triplet.bad
            };
            if let Some(exit) = exit {
                if let Some(group) = ThresholdGroup::new(vec![
                    Threshold::new(
                        AccessNetwork::Iwlan,
                        wifi_kind,
                        ThresholdOp::Lte,
                        exit,
                    ),
                    Threshold::new(
                        AccessNetwork::Eutran,
                        MeasurementKind::Availability,
                        ThresholdOp::Available,
                        0,
                    ),
                ]) {
                    groups.push(group);
                }
            }
            // Wi-Fi vanished altogether.
            if let Some(group) = ThresholdGroup::new(vec![
                Threshold::new(
                    AccessNetwork::Iwlan,
                    MeasurementKind::Availability,
                    ThresholdOp::Unavailable,
                    0,
                ),
                Threshold::new(
                    AccessNetwork::Eutran,
                    MeasurementKind::Availability,
                    ThresholdOp::Available,
                    0,
                ),
            ]) {
                groups.push(group);
            }
        }
        WfcPreference::CellularPreferred => {
            let mut any_threshold = false;
            for an in cellular_ans(snapshot) {
                let kind = PolicySnapshot::default_measurement(an);
                let triplet = snapshot.threshold(an, call_type, kind, pref);
                let entry = if sticky {
                    triplet.worst.or(triplet.bad)
                } else {
                    triplet.bad
                };
                let Some(entry) = entry else { continue };
                any_threshold = true;
                if let Some(group) = ThresholdGroup::new(vec![Threshold::new(
                    an,
                    kind,
                    ThresholdOp::Gte,
                    entry,
                )]) {
                    groups.push(group);
                }
            }
            if !any_threshold {
                if let Some(group) = ThresholdGroup::new(vec![Threshold::new(
                    AccessNetwork::Eutran,
                    MeasurementKind::Availability,
                    ThresholdOp::Available,
                    0,
                )]) {
                    groups.push(group);
                }
            }
        }
        WfcPreference::WifiOnly => unreachable!(),
    }

    groups
}

/// Wi-Fi thresholds that must hold to *enter* WLAN. Sticky variants relax
/// the entry point to the exit point (stay until it actually degrades).
fn wifi_entry_thresholds(
    snapshot: &PolicySnapshot,
    call_type: CallType,
    pref: WfcPreference,
    sticky: bool,
) -> Vec<Threshold> {
    let kind = MeasurementKind::Rssi;
    let triplet = snapshot.threshold(AccessNetwork::Iwlan, call_type, kind, pref);
    let entry = if sticky {
        triplet.bad.or(triplet.good)
    } else {
        triplet.good
    };

    match entry {
        Some(value) => {
            let mut threshold =
                Threshold::new(AccessNetwork::Iwlan, kind, ThresholdOp::Gte, value);
            threshold.backhaul_grace_ms = 3_000;
            vec![threshold]
        }
        None => Vec::new(),
    }
}

/// The weakest Wi-Fi condition under which WLAN is still workable.
fn wifi_exit_floor(
    snapshot: &PolicySnapshot,
    call_type: CallType,
    pref: WfcPreference,
) -> Vec<Threshold> {
    let kind = MeasurementKind::Rssi;
    let triplet = snapshot.threshold(AccessNetwork::Iwlan, call_type, kind, pref);

    match triplet.worst.or(triplet.bad) {
        Some(value) => vec![Threshold::new(
            AccessNetwork::Iwlan,
            kind,
            ThresholdOp::Gte,
            value,
        )],
        None => vec![Threshold::new(
            AccessNetwork::Iwlan,
            MeasurementKind::Availability,
            ThresholdOp::Available,
            0,
        )],
    }
}

fn cellular_ans(snapshot: &PolicySnapshot) -> Vec<AccessNetwork> {
    let mut ans: Vec<AccessNetwork> = snapshot
        .thresholds
        .keys()
        .map(|(an, _, _)| *an)
        .filter(|an| an.transport() == Transport::Wwan)
        .collect();
    ans.sort_by_key(|an| *an as u8);
    ans.dedup();
    if ans.is_empty() {
        ans.push(AccessNetwork::Eutran);
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{QualityView, StaticQualityMonitor};
    use crate::policy::store::CarrierPolicyStore;
    use crate::collaborators::CarrierBundle;
    use qnsd_events::{CarrierId, SlotId};
    use serde_json::json;

    fn snapshot_with_thresholds() -> Arc<PolicySnapshot> {
        let store = CarrierPolicyStore::new();
        let bundle = CarrierBundle::new(SlotId(0), CarrierId::Id(310))
            .with("iwlan_rssi_thresholds_idle", json!([-65, -75]))
            .with("eutran_rsrp_thresholds_idle", json!([-100, -110, -115]));
        store.reload(&bundle, &CarrierBundle::new(SlotId(0), CarrierId::Unknown));
        store.snapshot()
    }

    #[test]
    fn it_matches_only_policies_with_the_current_precondition() {
        let snapshot = snapshot_with_thresholds();
        let matcher = AnspMatcher::new(PolicyMap::build(&snapshot));

        let pc = PreCondition::plain(
            CallType::Idle,
            WfcPreference::WifiPreferred,
            Coverage::Home,
        );
        let matched = matcher.matching(SessionType::Ims, &pc);

        assert!(!matched.is_empty());
        assert!(matched.iter().all(|a| a.satisfies_precondition(&pc)));
        assert!(matched
            .iter()
            .all(|a| a.precondition().coverage == Coverage::Home));
    }

    #[test]
    fn it_fires_the_wlan_policy_on_good_wifi() {
        // Arrange
        let snapshot = snapshot_with_thresholds();
        let matcher = AnspMatcher::new(PolicyMap::build(&snapshot));
        let wifi = StaticQualityMonitor::new();
        let cellular = StaticQualityMonitor::new();
        wifi.set_value(AccessNetwork::Iwlan, MeasurementKind::Rssi, -60);
        cellular.set_value(AccessNetwork::Eutran, MeasurementKind::Rsrp, -90);
        let view = QualityView::new(Some(&wifi), Some(&cellular), true, true);

        let pc = PreCondition::plain(
            CallType::Idle,
            WfcPreference::WifiPreferred,
            Coverage::Home,
        );

        // Act
        let satisfied_targets: Vec<Transport> = matcher
            .matching(SessionType::Ims, &pc)
            .iter()
            .filter(|a| a.satisfied_by_any_threshold_group(Some(&view)))
            .map(|a| a.target_transport())
            .collect();

        // Assert
        assert!(satisfied_targets.contains(&Transport::Wlan));
        assert!(!satisfied_targets.contains(&Transport::Wwan));
    }

    #[test]
    fn it_fires_the_wwan_policy_when_wifi_degrades() {
        let snapshot = snapshot_with_thresholds();
        let matcher = AnspMatcher::new(PolicyMap::build(&snapshot));
        let wifi = StaticQualityMonitor::new();
        let cellular = StaticQualityMonitor::new();
        wifi.set_value(AccessNetwork::Iwlan, MeasurementKind::Rssi, -80);
        cellular.set_value(AccessNetwork::Eutran, MeasurementKind::Rsrp, -90);
        let view = QualityView::new(Some(&wifi), Some(&cellular), true, true);

        let pc = PreCondition::plain(
            CallType::Idle,
            WfcPreference::WifiPreferred,
            Coverage::Home,
        );

        let satisfied_targets: Vec<Transport> = matcher
            .matching(SessionType::Ims, &pc)
            .iter()
            .filter(|a| a.satisfied_by_any_threshold_group(Some(&view)))
            .map(|a| a.target_transport())
            .collect();

        assert!(satisfied_targets.contains(&Transport::Wwan));
        assert!(!satisfied_targets.contains(&Transport::Wlan));
    }

    #[test]
    fn it_builds_guarded_variants_only_when_supported() {
        let mut snapshot = (*snapshot_with_thresholds()).clone();
        assert!(PolicyMap::build(&snapshot)
            .ansps(SessionType::Ims)
            .iter()
            .all(|a| a.precondition().guarding.is_none()));

        snapshot.guard_timer.hysteresis_on_preference = true;
        let map = PolicyMap::build(&snapshot);
        assert!(map
            .ansps(SessionType::Ims)
            .iter()
            .any(|a| a.precondition().guarding.is_some()));
    }

    #[test]
    fn it_always_offers_a_rollover_group_for_dead_cellular() {
        let snapshot = snapshot_with_thresholds();
        let map = PolicyMap::build(&snapshot);

        assert!(map
            .ansps(SessionType::Ims)
            .iter()
            .filter(|a| a.target_transport() == Transport::Wlan)
            .any(|a| a.has_wifi_threshold_without_cellular_condition()));
    }
}
