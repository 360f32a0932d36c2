//! Coverage determination, the rat-preference allow filter and the VoPS
//! check.

use crate::policy::store::{PolicySnapshot, RatPreference};
use qnsd_events::{
    AccessNetwork, CallType, Coverage, RoamingType, SessionType, TelephonyInfo,
    Transport,
};

/// Coverage after the PLMN-list adjustments: the domestic list demotes a
/// roaming reading to HOME, the international list promotes a
/// domestic-roaming reading to ROAMING. On a PLMN in both lists the
/// promotion wins.
pub fn determine_coverage(
    telephony: &TelephonyInfo,
    session: SessionType,
    snapshot: &PolicySnapshot,
) -> Coverage {
    let mut coverage = telephony.coverage();

    if !snapshot.check_roaming_plmn_sessions.contains(&session) {
        return coverage;
    }

    if coverage == Coverage::Roaming
        && snapshot.domestic_roaming_plmns.contains(&telephony.plmn)
    {
        coverage = Coverage::Home;
    }

    if telephony.roaming_type == RoamingType::DomesticRoaming
        && snapshot
            .international_roaming_plmns
            .contains(&telephony.plmn)
    {
        coverage = Coverage::Roaming;
    }

    coverage
}

/// The inputs the allow filter needs from the evaluator's world model.
#[derive(Debug, Clone, Copy)]
pub struct AllowanceInputs {
    pub airplane_mode: bool,
    pub wfc_usable: bool,
    pub wifi_enabled: bool,
    pub cross_sim_active: bool,
    pub ims_registered_wlan: bool,
    pub cellular_available: bool,
    pub international_roaming: bool,
    pub coverage: Coverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportAllowance {
    pub wwan: bool,
    pub wlan: bool,
}

impl TransportAllowance {
    pub fn allows(&self, transport: Transport) -> bool {
        match transport {
            Transport::Wwan => self.wwan,
            Transport::Wlan => self.wlan,
            Transport::Invalid => false,
        }
    }
}

/// The rat-preference filter plus the airplane / roaming / WFC gates.
pub fn allowed_transports(
    session: SessionType,
    inputs: AllowanceInputs,
    snapshot: &PolicySnapshot,
) -> TransportAllowance {
    let mut wwan = true;
    let mut wlan = true;

    match snapshot.rat_preference(session) {
        RatPreference::Default => {}
        RatPreference::WifiOnly => wwan = false,
        RatPreference::WifiWhenWfcAvailable => {
            wlan = inputs.ims_registered_wlan;
            wwan = !inputs.ims_registered_wlan;
        }
        RatPreference::WifiWhenNoCellular => {
            wlan = !inputs.cellular_available;
        }
        RatPreference::WifiWhenHomeIsNotAvailable => {
            wwan = inputs.cellular_available && inputs.coverage == Coverage::Home;
            wlan = !wwan;
        }
    }

    if inputs.airplane_mode && !snapshot.allow_wfc_on_airplane {
        wlan = false;
    }

    if inputs.international_roaming
        && !inputs.cellular_available
        && snapshot.block_iwlan_in_international_roam_without_wwan
        && !(session == SessionType::Ims
            && snapshot.allow_ims_over_iwlan_in_cellular_limited)
    {
        wlan = false;
    }

    if !inputs.wfc_usable && !inputs.cross_sim_active {
        wlan = false;
    }
    if !inputs.wifi_enabled && !inputs.cross_sim_active {
        wlan = false;
    }

    TransportAllowance { wwan, wlan }
}

/// Whether the cellular access network passes the VoPS constraint for this
/// session and call.
pub fn vops_ok(
    session: SessionType,
    an: AccessNetwork,
    coverage: Coverage,
    call_type: CallType,
    last_transport: Transport,
    telephony: &TelephonyInfo,
    snapshot: &PolicySnapshot,
) -> bool {
    if !matches!(session, SessionType::Ims | SessionType::Emergency) {
        return true;
    }

    // in-call moves off WLAN may skip the VoPS condition entirely
    if last_transport == Transport::Wlan
        && snapshot.in_call_ho_wlan_to_wwan_without_vops
        && call_type != CallType::Idle
    {
        return true;
    }

    let table_requires = match session {
        SessionType::Emergency => snapshot.is_vops_required(coverage),
        _ => snapshot.is_mmtel_required(coverage),
    };
    if !table_requires || !an.supports_ims_pdn() {
        return true;
    }

    match call_type {
        CallType::Emergency => telephony.vops_emergency,
        _ => telephony.vops_normal,
    }
}
