use crate::collaborators::CarrierBundle;
use crate::policy::parser::{
    self, FallbackRule, HandoverRule, ParseWarning, RuleKind,
};
use qnsd_events::{
    AccessNetwork, CallType, CarrierId, Coverage, MeasurementKind,
    ProvisioningKey, ProvisioningSnapshot, RtpDegradeReason, SessionType,
    Transport, WfcPreference,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;

/// Per-session policy expressing "prefer Wi-Fi only when ...".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RatPreference {
    #[default]
    Default,
    WifiOnly,
    WifiWhenWfcAvailable,
    WifiWhenNoCellular,
    WifiWhenHomeIsNotAvailable,
}

/// Carrier-configured signal triplet. `None` is the INVALID sentinel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThresholdTriplet {
    pub good: Option<i32>,
    pub bad: Option<i32>,
    pub worst: Option<i32>,
}

impl ThresholdTriplet {
    pub fn is_invalid(&self) -> bool {
        self.good.is_none() && self.bad.is_none() && self.worst.is_none()
    }
}

/// Which fallback table to consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    Unreg,
    HoRegFail,
}

/// Ordered fallback rules. First matching rule in configuration order wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallbackRuleTable {
    rules: Vec<FallbackRule>,
}

impl FallbackRuleTable {
    pub fn new(rules: Vec<FallbackRule>) -> Self {
        Self { rules }
    }

    /// Fallback duration for the cause, 0 when no rule applies.
    pub fn lookup(&self, cause: u32, pref: WfcPreference) -> u64 {
        self.rules
            .iter()
            .find(|rule| {
                rule.covers(cause)
                    && rule.preference.map_or(true, |p| p.applies_to(pref))
            })
            .map(|rule| rule.time_ms)
            .unwrap_or(0)
    }
}

/// Guard-timer (hysteresis) configuration, per side and call type.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardTimerConfig {
    pub enabled: bool,
    pub hysteresis_on_preference: bool,
    pub wwan_default_ms: u64,
    pub wlan_default_ms: u64,
    pub wwan_per_call_ms: HashMap<CallType, u64>,
    pub wlan_per_call_ms: HashMap<CallType, u64>,
}

impl Default for GuardTimerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hysteresis_on_preference: false,
            wwan_default_ms: 30_000,
            wlan_default_ms: 30_000,
            wwan_per_call_ms: HashMap::new(),
            wlan_per_call_ms: HashMap::new(),
        }
    }
}

impl GuardTimerConfig {
    /// Guard duration for the side in ms; 0 disables the guard.
    pub fn value_ms(&self, transport: Transport, call_type: CallType) -> u64 {
        if !self.enabled {
            return 0;
        }
        match transport {
            Transport::Wwan => self
                .wwan_per_call_ms
                .get(&call_type)
                .copied()
                .unwrap_or(self.wwan_default_ms),
            Transport::Wlan => self
                .wlan_per_call_ms
                .get(&call_type)
                .copied()
                .unwrap_or(self.wlan_default_ms),
            Transport::Invalid => 0,
        }
    }
}

/// Initial-PDN-failure fallback tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdnFallbackConfig {
    pub enabled: bool,
    /// 0 means "use the retry timer instead of a counter".
    pub retry_count: u32,
    pub retry_time_ms: u64,
    pub max_fallbacks: u32,
    pub guard_time_ms: u64,
}

impl Default for PdnFallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_count: 3,
            retry_time_ms: 0,
            max_fallbacks: 2,
            guard_time_ms: 30_000,
        }
    }
}

type ThresholdKey = (AccessNetwork, CallType, MeasurementKind);

/// One compiled, immutable carrier policy. Reads never observe a half-loaded
/// configuration: `reload` builds a fresh snapshot off-store and swaps it in.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySnapshot {
    pub carrier_id: CarrierId,
    pub handover_rules: Vec<HandoverRule>,
    /// Overrides in ROAMING coverage; falls back to the base set when empty.
    pub handover_rules_roaming: Vec<HandoverRule>,
    pub vops_required_home: bool,
    pub vops_required_roaming: bool,
    pub mmtel_required_home: bool,
    pub mmtel_required_roaming: bool,
    /// IMS PDN permitted without VoPS; disables the MMTEL requirement.
    pub ims_pdn_without_vops_home: bool,
    pub ims_pdn_without_vops_roaming: bool,
    pub rat_preference: HashMap<SessionType, RatPreference>,
    /// Ordered most-preferred first; also the per-session AN allow-list.
    pub allowed_access_networks: HashMap<SessionType, Vec<AccessNetwork>>,
    pub thresholds: HashMap<ThresholdKey, ThresholdTriplet>,
    pub threshold_overrides: HashMap<(ThresholdKey, WfcPreference), ThresholdTriplet>,
    pub unreg_fallback: FallbackRuleTable,
    pub ho_reg_fail_fallback: FallbackRuleTable,
    pub international_roaming_plmns: Vec<String>,
    pub domestic_roaming_plmns: Vec<String>,
    /// Sessions for which the PLMN lists adjust the coverage reading.
    pub check_roaming_plmn_sessions: Vec<SessionType>,
    pub max_iwlan_handovers_during_call: u32,
    /// RTP degradation reasons that count toward the in-call handover cap.
    pub rtp_fallback_reasons: Vec<RtpDegradeReason>,
    pub guard_timer: GuardTimerConfig,
    pub rtp_restrict_wwan_ms: u64,
    pub rtp_restrict_wlan_ms: u64,
    pub pdn_fallback: PdnFallbackConfig,
    pub allow_wfc_on_airplane: bool,
    pub block_iwlan_in_international_roam_without_wwan: bool,
    pub allow_ims_over_iwlan_in_cellular_limited: bool,
    pub iwlan_selection_without_ss_in_roaming: bool,
    pub in_call_ho_wlan_to_wwan_without_vops: bool,
    pub default_wfc_mode_home: WfcPreference,
    pub default_wfc_mode_roaming: WfcPreference,
    pub non_preferred_cooldown_wwan_ms: u64,
    pub non_preferred_cooldown_wlan_ms: u64,
    /// Sessions riding a different APN on IWLAN than on cellular: no
    /// in-place handover, so the handover policy table is skipped.
    pub sessions_with_separate_iwlan_apn: Vec<SessionType>,
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        let all_ans = vec![
            AccessNetwork::Eutran,
            AccessNetwork::Ngran,
            AccessNetwork::Iwlan,
        ];
        let mut allowed = HashMap::new();
        for session in [
            SessionType::Ims,
            SessionType::Emergency,
            SessionType::Mms,
            SessionType::Xcap,
            SessionType::Cbs,
        ] {
            allowed.insert(session, all_ans.clone());
        }

        Self {
            carrier_id: CarrierId::Unknown,
            handover_rules: Vec::new(),
            handover_rules_roaming: Vec::new(),
            vops_required_home: false,
            vops_required_roaming: false,
            mmtel_required_home: false,
            mmtel_required_roaming: false,
            ims_pdn_without_vops_home: false,
            ims_pdn_without_vops_roaming: false,
            rat_preference: HashMap::new(),
            allowed_access_networks: allowed,
            thresholds: HashMap::new(),
            threshold_overrides: HashMap::new(),
            unreg_fallback: FallbackRuleTable::default(),
            ho_reg_fail_fallback: FallbackRuleTable::default(),
            international_roaming_plmns: Vec::new(),
            domestic_roaming_plmns: Vec::new(),
            check_roaming_plmn_sessions: Vec::new(),
            max_iwlan_handovers_during_call: 3,
            rtp_fallback_reasons: vec![
                RtpDegradeReason::Jitter,
                RtpDegradeReason::PacketLoss,
                RtpDegradeReason::NoRtpReceived,
            ],
            guard_timer: GuardTimerConfig::default(),
            rtp_restrict_wwan_ms: 120_000,
            rtp_restrict_wlan_ms: 120_000,
            pdn_fallback: PdnFallbackConfig::default(),
            allow_wfc_on_airplane: true,
            block_iwlan_in_international_roam_without_wwan: false,
            allow_ims_over_iwlan_in_cellular_limited: false,
            iwlan_selection_without_ss_in_roaming: false,
            in_call_ho_wlan_to_wwan_without_vops: false,
            default_wfc_mode_home: WfcPreference::WifiPreferred,
            default_wfc_mode_roaming: WfcPreference::WifiPreferred,
            non_preferred_cooldown_wwan_ms: 0,
            non_preferred_cooldown_wlan_ms: 0,
            sessions_with_separate_iwlan_apn: Vec::new(),
        }
    }
}

impl PolicySnapshot {
    /// First matching rule wins; no match yields the unmatched default
    /// (`false`).
    pub fn is_handover_allowed(
        &self,
        session: SessionType,
        from: AccessNetwork,
        to: AccessNetwork,
        coverage: Coverage,
    ) -> bool {
        let roaming = coverage == Coverage::Roaming;
        let rules = if roaming && !self.handover_rules_roaming.is_empty() {
            &self.handover_rules_roaming
        } else {
            &self.handover_rules
        };

        rules
            .iter()
            .find(|rule| rule.matches(session, from, to, roaming))
            .map(|rule| rule.kind == RuleKind::Allowed)
            .unwrap_or(false)
    }

    /// Configured triplet, with the WFC-preference override taking priority.
    /// An all-`None` triplet is the INVALID sentinel.
    pub fn threshold(
        &self,
        an: AccessNetwork,
        call_type: CallType,
        kind: MeasurementKind,
        pref: WfcPreference,
    ) -> ThresholdTriplet {
        let key = (an, call_type, kind);
        self.threshold_overrides
            .get(&(key, pref))
            .or_else(|| self.thresholds.get(&key))
            .copied()
            .unwrap_or_default()
    }

    /// Fallback duration in ms; 0 means "no fallback".
    pub fn fallback_time(
        &self,
        cause: u32,
        pref: WfcPreference,
        kind: FallbackKind,
    ) -> u64 {
        let table = match kind {
            FallbackKind::Unreg => &self.unreg_fallback,
            FallbackKind::HoRegFail => &self.ho_reg_fail_fallback,
        };
        table.lookup(cause, pref)
    }

    pub fn is_vops_required(&self, coverage: Coverage) -> bool {
        match coverage {
            Coverage::Home => self.vops_required_home,
            Coverage::Roaming => self.vops_required_roaming,
        }
    }

    pub fn is_mmtel_required(&self, coverage: Coverage) -> bool {
        match coverage {
            Coverage::Home => self.mmtel_required_home && !self.ims_pdn_without_vops_home,
            Coverage::Roaming => {
                self.mmtel_required_roaming && !self.ims_pdn_without_vops_roaming
            }
        }
    }

    pub fn is_access_network_allowed(
        &self,
        session: SessionType,
        an: AccessNetwork,
    ) -> bool {
        self.allowed_access_networks
            .get(&session)
            .map(|ans| ans.contains(&an))
            .unwrap_or(false)
    }

    pub fn rat_preference(&self, session: SessionType) -> RatPreference {
        self.rat_preference.get(&session).copied().unwrap_or_default()
    }

    pub fn is_guard_timer_hysteresis_on_preference_supported(&self) -> bool {
        self.guard_timer.enabled && self.guard_timer.hysteresis_on_preference
    }

    pub fn guard_timer_ms(&self, transport: Transport, call_type: CallType) -> u64 {
        self.guard_timer.value_ms(transport, call_type)
    }

    pub fn rtp_restrict_ms(&self, transport: Transport) -> u64 {
        match transport {
            Transport::Wwan => self.rtp_restrict_wwan_ms,
            Transport::Wlan => self.rtp_restrict_wlan_ms,
            Transport::Invalid => 0,
        }
    }

    pub fn cooldown_on_mode_change_ms(&self, preferred: Transport) -> u64 {
        match preferred {
            Transport::Wwan => self.non_preferred_cooldown_wwan_ms,
            Transport::Wlan => self.non_preferred_cooldown_wlan_ms,
            Transport::Invalid => 0,
        }
    }

    pub fn uses_separate_iwlan_apn(&self, session: SessionType) -> bool {
        self.sessions_with_separate_iwlan_apn.contains(&session)
    }

    /// Default signal measurement per access network.
    pub fn default_measurement(an: AccessNetwork) -> MeasurementKind {
        match an {
            AccessNetwork::Eutran => MeasurementKind::Rsrp,
            AccessNetwork::Ngran => MeasurementKind::Ssrsrp,
            AccessNetwork::Utran => MeasurementKind::Rscp,
            AccessNetwork::Geran | AccessNetwork::Iwlan | AccessNetwork::Unknown => {
                MeasurementKind::Rssi
            }
        }
    }
}

/// What changed in a reload, plus the diagnostics it produced.
#[derive(Debug, Default)]
pub struct ReloadOutcome {
    pub handover_rules_changed: bool,
    pub thresholds_changed: bool,
    pub warnings: Vec<ParseWarning>,
}

/// Owns the compiled carrier configuration for one slot.
///
/// Shared across every evaluator on the slot. Readers clone the current
/// `Arc` and never observe a half-built configuration; a reload compiles the
/// next snapshot off-store and swaps it in under a short write lock. A
/// poisoned lock is recovered rather than surfaced: the last published
/// snapshot is always better than no policy at all.
pub struct CarrierPolicyStore {
    snapshot: RwLock<Arc<PolicySnapshot>>,
    provisioning: RwLock<ProvisioningSnapshot>,
}

impl Default for CarrierPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CarrierPolicyStore {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(PolicySnapshot::default())),
            provisioning: RwLock::new(ProvisioningSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Atomically replace the compiled policy from a fresh bundle. Missing
    /// keys fall back to `defaults`, then to documented built-ins. The store
    /// never fails to load; malformed rules are dropped with a warning.
    pub fn reload(
        &self,
        bundle: &CarrierBundle,
        defaults: &CarrierBundle,
    ) -> ReloadOutcome {
        let prior = self.snapshot();
        let mut warnings = Vec::new();
        let mut next = compile(bundle, defaults, &mut warnings);

        let provisioning = self
            .provisioning
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        apply_provisioning_overrides(&mut next, &provisioning);

        for warning in &warnings {
            warn!("carrier config: {warning}");
        }

        let outcome = ReloadOutcome {
            handover_rules_changed: next.handover_rules != prior.handover_rules
                || next.handover_rules_roaming != prior.handover_rules_roaming,
            thresholds_changed: next.thresholds != prior.thresholds
                || next.threshold_overrides != prior.threshold_overrides,
            warnings,
        };

        self.publish(next);

        outcome
    }

    /// Merge service-provisioning overrides and republish the snapshot.
    pub fn apply_provisioning(&self, provisioning: &ProvisioningSnapshot) {
        *self
            .provisioning
            .write()
            .unwrap_or_else(PoisonError::into_inner) = provisioning.clone();

        let mut next = (*self.snapshot()).clone();
        apply_provisioning_overrides(&mut next, provisioning);
        self.publish(next);
    }

    fn publish(&self, next: PolicySnapshot) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }
}

fn compile(
    bundle: &CarrierBundle,
    defaults: &CarrierBundle,
    warnings: &mut Vec<ParseWarning>,
) -> PolicySnapshot {
    let mut snapshot = PolicySnapshot {
        carrier_id: bundle.carrier_id,
        ..PolicySnapshot::default()
    };

    let string_array = |key: &str| -> Option<Vec<String>> {
        bundle.string_array(key).or_else(|| defaults.string_array(key))
    };
    let int_array =
        |key: &str| -> Option<Vec<i64>> { bundle.int_array(key).or_else(|| defaults.int_array(key)) };
    let get_bool = |key: &str| -> Option<bool> { bundle.bool(key).or_else(|| defaults.bool(key)) };
    let get_int = |key: &str| -> Option<i64> { bundle.int(key).or_else(|| defaults.int(key)) };
    let get_str = |key: &str| -> Option<String> {
        bundle
            .str(key)
            .map(str::to_owned)
            .or_else(|| defaults.str(key).map(str::to_owned))
    };

    if let Some(rules) = string_array("handover_policy") {
        let parsed = parser::parse_handover_rules(&rules);
        snapshot.handover_rules = parsed.value;
        warnings.extend(parsed.warnings);
    }
    if let Some(rules) = string_array("handover_policy_roaming") {
        let parsed = parser::parse_handover_rules(&rules);
        snapshot.handover_rules_roaming = parsed.value;
        warnings.extend(parsed.warnings);
    }
    if let Some(rules) = string_array("unreg_fallback_rules") {
        let parsed = parser::parse_fallback_rules(&rules);
        snapshot.unreg_fallback = FallbackRuleTable::new(parsed.value);
        warnings.extend(parsed.warnings);
    }
    if let Some(rules) = string_array("ho_reg_fail_fallback_rules") {
        let parsed = parser::parse_fallback_rules(&rules);
        snapshot.ho_reg_fail_fallback = FallbackRuleTable::new(parsed.value);
        warnings.extend(parsed.warnings);
    }

    // Coverage masks arrive as int arrays: 0 = home, 1 = roaming.
    if let Some(mask) = int_array("vops_required_coverage") {
        snapshot.vops_required_home = mask.contains(&0);
        snapshot.vops_required_roaming = mask.contains(&1);
    }
    if let Some(mask) = int_array("mmtel_required_coverage") {
        snapshot.mmtel_required_home = mask.contains(&0);
        snapshot.mmtel_required_roaming = mask.contains(&1);
    }
    if let Some(mask) = int_array("ims_pdn_without_vops_coverage") {
        snapshot.ims_pdn_without_vops_home = mask.contains(&0);
        snapshot.ims_pdn_without_vops_roaming = mask.contains(&1);
    }

    if let Some(entries) = string_array("rat_preference") {
        for entry in entries {
            match parse_rat_preference_entry(&entry) {
                Ok((session, pref)) => {
                    snapshot.rat_preference.insert(session, pref);
                }
                Err(reason) => warnings.push(ParseWarning {
                    rule: entry.clone(),
                    reason,
                }),
            }
        }
    }

    if let Some(entries) = string_array("allowed_access_networks") {
        for entry in entries {
            match parse_allowed_an_entry(&entry) {
                Ok((session, ans)) => {
                    snapshot.allowed_access_networks.insert(session, ans);
                }
                Err(reason) => warnings.push(ParseWarning {
                    rule: entry.clone(),
                    reason,
                }),
            }
        }
    }

    compile_thresholds(bundle, defaults, &mut snapshot);

    if let Some(plmns) = string_array("international_roaming_plmns") {
        snapshot.international_roaming_plmns = plmns;
    }
    if let Some(plmns) = string_array("domestic_roaming_plmns") {
        snapshot.domestic_roaming_plmns = plmns;
    }
    if let Some(sessions) = string_array("check_roaming_plmns_sessions") {
        snapshot.check_roaming_plmn_sessions = sessions
            .iter()
            .filter_map(|s| parse_session(s).ok())
            .collect();
    }

    if let Some(n) = get_int("max_iwlan_handovers_during_call") {
        snapshot.max_iwlan_handovers_during_call = n.max(0) as u32;
    }

    if let Some(reasons) = string_array("rtp_fallback_reasons") {
        snapshot.rtp_fallback_reasons = reasons
            .iter()
            .filter_map(|r| match r.to_ascii_lowercase().as_str() {
                "jitter" => Some(RtpDegradeReason::Jitter),
                "packet_loss" => Some(RtpDegradeReason::PacketLoss),
                "no_rtp" => Some(RtpDegradeReason::NoRtpReceived),
                _ => None,
            })
            .collect();
    }

    if let Some(enabled) = get_bool("guard_timer_enabled") {
        snapshot.guard_timer.enabled = enabled;
    }
    if let Some(on) = get_bool("guard_timer_hysteresis_on_preference") {
        snapshot.guard_timer.hysteresis_on_preference = on;
    }
    if let Some(ms) = get_int("guard_timer_wwan_ms") {
        snapshot.guard_timer.wwan_default_ms = ms.max(0) as u64;
    }
    if let Some(ms) = get_int("guard_timer_wlan_ms") {
        snapshot.guard_timer.wlan_default_ms = ms.max(0) as u64;
    }
    for (call_type, token) in call_type_tokens() {
        if let Some(ms) = get_int(&format!("guard_timer_wwan_{token}_ms")) {
            snapshot
                .guard_timer
                .wwan_per_call_ms
                .insert(call_type, ms.max(0) as u64);
        }
        if let Some(ms) = get_int(&format!("guard_timer_wlan_{token}_ms")) {
            snapshot
                .guard_timer
                .wlan_per_call_ms
                .insert(call_type, ms.max(0) as u64);
        }
    }

    if let Some(ms) = get_int("rtp_low_quality_restrict_wwan_ms") {
        snapshot.rtp_restrict_wwan_ms = ms.max(0) as u64;
    }
    if let Some(ms) = get_int("rtp_low_quality_restrict_wlan_ms") {
        snapshot.rtp_restrict_wlan_ms = ms.max(0) as u64;
    }

    if let Some(tuple) = int_array("initial_data_connection_fallback") {
        if tuple.len() == 5 {
            snapshot.pdn_fallback = PdnFallbackConfig {
                enabled: tuple[0] != 0,
                retry_count: tuple[1].max(0) as u32,
                retry_time_ms: tuple[2].max(0) as u64,
                max_fallbacks: tuple[3].max(0) as u32,
                guard_time_ms: tuple[4].max(0) as u64,
            };
        } else {
            warnings.push(ParseWarning {
                rule: format!("{tuple:?}"),
                reason: "initial_data_connection_fallback needs 5 entries".into(),
            });
        }
    }

    if let Some(b) = get_bool("allow_wfc_on_airplane_mode") {
        snapshot.allow_wfc_on_airplane = b;
    }
    if let Some(b) = get_bool("block_iwlan_in_international_roam_without_wwan") {
        snapshot.block_iwlan_in_international_roam_without_wwan = b;
    }
    if let Some(b) = get_bool("allow_ims_over_iwlan_in_cellular_limited") {
        snapshot.allow_ims_over_iwlan_in_cellular_limited = b;
    }
    if let Some(b) = get_bool("iwlan_selection_without_ss_in_roaming") {
        snapshot.iwlan_selection_without_ss_in_roaming = b;
    }
    if let Some(b) = get_bool("in_call_ho_wlan_to_wwan_without_vops") {
        snapshot.in_call_ho_wlan_to_wwan_without_vops = b;
    }

    if let Some(mode) = get_str("default_wfc_mode_home") {
        if let Ok(pref) = parse_wfc_mode(&mode) {
            snapshot.default_wfc_mode_home = pref;
        }
    }
    if let Some(mode) = get_str("default_wfc_mode_roaming") {
        if let Ok(pref) = parse_wfc_mode(&mode) {
            snapshot.default_wfc_mode_roaming = pref;
        }
    }

    if let Some(ms) = get_int("non_preferred_cooldown_wwan_ms") {
        snapshot.non_preferred_cooldown_wwan_ms = ms.max(0) as u64;
    }
    if let Some(ms) = get_int("non_preferred_cooldown_wlan_ms") {
        snapshot.non_preferred_cooldown_wlan_ms = ms.max(0) as u64;
    }

    if let Some(sessions) = string_array("sessions_with_separate_iwlan_apn") {
        snapshot.sessions_with_separate_iwlan_apn = sessions
            .iter()
            .filter_map(|s| parse_session(s).ok())
            .collect();
    }

    snapshot
}

/// Threshold keys look like `eutran_rsrp_thresholds_idle` with an optional
/// `_wifi_preferred` style suffix; values are `[good, bad]` or
/// `[good, bad, worst]`.
fn compile_thresholds(
    bundle: &CarrierBundle,
    defaults: &CarrierBundle,
    snapshot: &mut PolicySnapshot,
) {
    let ans = [
        (AccessNetwork::Eutran, "eutran"),
        (AccessNetwork::Ngran, "ngran"),
        (AccessNetwork::Utran, "utran"),
        (AccessNetwork::Geran, "geran"),
        (AccessNetwork::Iwlan, "iwlan"),
    ];
    let kinds = [
        (MeasurementKind::Rsrp, "rsrp"),
        (MeasurementKind::Rsrq, "rsrq"),
        (MeasurementKind::Rssnr, "rssnr"),
        (MeasurementKind::Ssrsrp, "ssrsrp"),
        (MeasurementKind::Ssrsrq, "ssrsrq"),
        (MeasurementKind::Sssinr, "sssinr"),
        (MeasurementKind::Rscp, "rscp"),
        (MeasurementKind::Rssi, "rssi"),
    ];
    let prefs = [
        (WfcPreference::WifiOnly, "wifi_only"),
        (WfcPreference::WifiPreferred, "wifi_preferred"),
        (WfcPreference::CellularPreferred, "cellular_preferred"),
    ];

    let int_array = |key: &str| -> Option<Vec<i64>> {
        bundle.int_array(key).or_else(|| defaults.int_array(key))
    };

    for (an, an_token) in ans {
        for (kind, kind_token) in kinds {
            for (call_type, ct_token) in call_type_tokens() {
                let base = format!("{an_token}_{kind_token}_thresholds_{ct_token}");

                if let Some(values) = int_array(&base) {
                    if let Some(triplet) = triplet_from(&values) {
                        snapshot.thresholds.insert((an, call_type, kind), triplet);
                    }
                }

                for (pref, pref_token) in prefs {
                    let key = format!("{base}_{pref_token}");
                    if let Some(values) = int_array(&key) {
                        if let Some(triplet) = triplet_from(&values) {
                            snapshot
                                .threshold_overrides
                                .insert(((an, call_type, kind), pref), triplet);
                        }
                    }
                }
            }
        }
    }
}

fn triplet_from(values: &[i64]) -> Option<ThresholdTriplet> {
    match values {
        [good, bad] => Some(ThresholdTriplet {
            good: Some(*good as i32),
            bad: Some(*bad as i32),
            worst: None,
        }),
        [good, bad, worst] => Some(ThresholdTriplet {
            good: Some(*good as i32),
            bad: Some(*bad as i32),
            worst: Some(*worst as i32),
        }),
        _ => None,
    }
}

fn apply_provisioning_overrides(
    snapshot: &mut PolicySnapshot,
    provisioning: &ProvisioningSnapshot,
) {
    let lte_key = (AccessNetwork::Eutran, CallType::Idle, MeasurementKind::Rsrp);
    let lte = ThresholdTriplet {
        good: provisioning.get(ProvisioningKey::LteThreshold1),
        bad: provisioning.get(ProvisioningKey::LteThreshold2),
        worst: provisioning.get(ProvisioningKey::LteThreshold3),
    };
    if !lte.is_invalid() {
        let mut merged = snapshot.thresholds.get(&lte_key).copied().unwrap_or_default();
        merged.good = lte.good.or(merged.good);
        merged.bad = lte.bad.or(merged.bad);
        merged.worst = lte.worst.or(merged.worst);
        snapshot.thresholds.insert(lte_key, merged);
    }

    let wifi_key = (AccessNetwork::Iwlan, CallType::Idle, MeasurementKind::Rssi);
    let wifi = ThresholdTriplet {
        good: provisioning.get(ProvisioningKey::WifiThresholdA),
        bad: provisioning.get(ProvisioningKey::WifiThresholdB),
        worst: None,
    };
    if !wifi.is_invalid() {
        let mut merged = snapshot
            .thresholds
            .get(&wifi_key)
            .copied()
            .unwrap_or_default();
        merged.good = wifi.good.or(merged.good);
        merged.bad = wifi.bad.or(merged.bad);
        snapshot.thresholds.insert(wifi_key, merged);
    }

    if let Some(secs) = provisioning.get(ProvisioningKey::LteEpdgTimerSec) {
        snapshot.guard_timer.wwan_default_ms = secs.max(0) as u64 * 1000;
    }
    if let Some(secs) = provisioning.get(ProvisioningKey::WifiEpdgTimerSec) {
        snapshot.guard_timer.wlan_default_ms = secs.max(0) as u64 * 1000;
    }
}

fn call_type_tokens() -> [(CallType, &'static str); 4] {
    [
        (CallType::Idle, "idle"),
        (CallType::Voice, "voice"),
        (CallType::Video, "video"),
        (CallType::Emergency, "emergency"),
    ]
}

fn parse_session(token: &str) -> Result<SessionType, String> {
    match token.trim().to_ascii_lowercase().as_str() {
        "ims" => Ok(SessionType::Ims),
        "emergency" => Ok(SessionType::Emergency),
        "mms" => Ok(SessionType::Mms),
        "xcap" => Ok(SessionType::Xcap),
        "cbs" => Ok(SessionType::Cbs),
        other => Err(format!("unknown session {other:?}")),
    }
}

fn parse_rat_preference_entry(
    entry: &str,
) -> Result<(SessionType, RatPreference), String> {
    let (session, pref) = entry
        .split_once('=')
        .ok_or_else(|| format!("not a session=preference entry: {entry:?}"))?;
    let session = parse_session(session)?;
    let pref = match pref.trim().to_ascii_lowercase().as_str() {
        "default" => RatPreference::Default,
        "wifi_only" => RatPreference::WifiOnly,
        "wifi_when_wfc_available" => RatPreference::WifiWhenWfcAvailable,
        "wifi_when_no_cellular" => RatPreference::WifiWhenNoCellular,
        "wifi_when_home_is_not_available" => RatPreference::WifiWhenHomeIsNotAvailable,
        other => return Err(format!("unknown rat preference {other:?}")),
    };
    Ok((session, pref))
}

fn parse_allowed_an_entry(
    entry: &str,
) -> Result<(SessionType, Vec<AccessNetwork>), String> {
    let (session, ans) = entry
        .split_once('=')
        .ok_or_else(|| format!("not a session=networks entry: {entry:?}"))?;
    let session = parse_session(session)?;
    let ans = ans
        .split('|')
        .map(|token| match token.trim().to_ascii_uppercase().as_str() {
            "EUTRAN" => Ok(AccessNetwork::Eutran),
            "NGRAN" => Ok(AccessNetwork::Ngran),
            "UTRAN" => Ok(AccessNetwork::Utran),
            "GERAN" => Ok(AccessNetwork::Geran),
            "IWLAN" => Ok(AccessNetwork::Iwlan),
            other => Err(format!("unknown access network {other:?}")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((session, ans))
}

fn parse_wfc_mode(mode: &str) -> Result<WfcPreference, String> {
    match mode.trim().to_ascii_lowercase().as_str() {
        "wifi_only" | "wifi-only" => Ok(WfcPreference::WifiOnly),
        "wifi_preferred" | "wifi-preferred" => Ok(WfcPreference::WifiPreferred),
        "cellular_preferred" | "cellular-preferred" => {
            Ok(WfcPreference::CellularPreferred)
        }
        other => Err(format!("unknown wfc mode {other:?}")),
    }
}
