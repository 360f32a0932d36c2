//! Shared vocabulary between the qualified-network engine and its
//! collaborators: radio access networks, transports, session kinds and the
//! typed event payloads the engine consumes and produces.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Radio access-network type as reported by the telephony stack.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum AccessNetwork {
    /// LTE.
    Eutran,
    /// 5G NR.
    Ngran,
    /// UMTS / 3G.
    Utran,
    /// GSM / 2G.
    Geran,
    /// IP over Wi-Fi tunnel.
    Iwlan,
    Unknown,
}

impl AccessNetwork {
    /// The transport group this access network rides on.
    pub fn transport(self) -> Transport {
        match self {
            AccessNetwork::Iwlan => Transport::Wlan,
            AccessNetwork::Unknown => Transport::Invalid,
            _ => Transport::Wwan,
        }
    }

    /// Cellular ANs on which an IMS PDN can exist (PS capable).
    pub fn supports_ims_pdn(self) -> bool {
        matches!(self, AccessNetwork::Eutran | AccessNetwork::Ngran)
    }
}

/// Device-side bearer group.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Transport {
    /// Cellular packet-switched.
    Wwan,
    /// IWLAN tunnel.
    Wlan,
    Invalid,
}

impl Transport {
    /// The opposite side. `Invalid` maps to itself.
    pub fn other(self) -> Transport {
        match self {
            Transport::Wwan => Transport::Wlan,
            Transport::Wlan => Transport::Wwan,
            Transport::Invalid => Transport::Invalid,
        }
    }
}

/// Logical data context the engine decides for.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum SessionType {
    Ims,
    Emergency,
    Mms,
    Xcap,
    Cbs,
}

#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum CallType {
    Idle,
    Voice,
    Video,
    Emergency,
}

/// Wi-Fi-calling mode chosen by the user (or the carrier default).
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum WfcPreference {
    WifiOnly,
    WifiPreferred,
    CellularPreferred,
}

#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Coverage {
    Home,
    Roaming,
}

/// Roaming flavour as reported by telephony, before PLMN-list adjustments.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum RoamingType {
    NotRoaming,
    DomesticRoaming,
    InternationalRoaming,
}

/// Signal measurement kinds the quality monitors can sample.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum MeasurementKind {
    Rsrp,
    Rsrq,
    Rssnr,
    Ssrsrp,
    Ssrsrq,
    Sssinr,
    Rscp,
    Rssi,
    Availability,
}

/// Circuit-switched call state stream from telephony.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum CallState {
    Idle,
    Ringing,
    Offhook,
}

/// IMS registration state over a given transport.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum ImsRegState {
    Registered,
    Unregistered,
    /// Registration failed while moving between access networks.
    AccessNetworkChangeFailed,
}

/// One event on the data-call control plane.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum DataConnectionEvent {
    Started,
    Connected,
    Disconnected,
    Failed,
    HandoverStarted,
    HandoverSuccess,
    HandoverFailed,
}

/// Lifecycle phase of the data call after the event was applied.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum DataConnectionPhase {
    Connecting,
    Connected,
    Handover,
    Inactive,
}

/// Single-radio voice-call continuity handover progress.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum SrvccState {
    Started,
    Completed,
    Failed,
    Canceled,
}

/// Why the RTP monitor flagged the active call as degraded.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum RtpDegradeReason {
    Jitter,
    PacketLoss,
    NoRtpReceived,
}

/// SIM slot index. qnsd keeps one engine set per slot.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct SlotId(pub u8);

/// Carrier identity attached to a config bundle. `Unknown` is delivered as a
/// real event (SIM removed, yet-unidentified SIM) and resets the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CarrierId {
    Id(u32),
    Unknown,
}

/// Snapshot of the cellular registration state, coverage and VoPS flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelephonyInfo {
    pub registered: bool,
    pub data_network_type: AccessNetwork,
    pub voice_network_type: AccessNetwork,
    pub plmn: String,
    pub roaming_type: RoamingType,
    pub cellular_available: bool,
    /// VoPS support for emergency bearers at the current cell.
    pub vops_emergency: bool,
    /// VoPS support for normal bearers at the current cell.
    pub vops_normal: bool,
    pub voice_barring: bool,
    pub emergency_barring: bool,
}

impl Default for TelephonyInfo {
    fn default() -> Self {
        Self {
            registered: false,
            data_network_type: AccessNetwork::Unknown,
            voice_network_type: AccessNetwork::Unknown,
            plmn: String::new(),
            roaming_type: RoamingType::NotRoaming,
            cellular_available: false,
            vops_emergency: false,
            vops_normal: false,
            voice_barring: false,
            emergency_barring: false,
        }
    }
}

impl TelephonyInfo {
    /// Coverage as telephony sees it, before PLMN-list adjustments.
    pub fn coverage(&self) -> Coverage {
        match self.roaming_type {
            RoamingType::NotRoaming => Coverage::Home,
            _ => Coverage::Roaming,
        }
    }
}

/// IMS registration event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImsStatus {
    pub transport: Transport,
    pub state: ImsRegState,
    pub reason_code: Option<u32>,
}

/// IWLAN tunnel availability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IwlanStatus {
    pub available: bool,
    pub in_cross_sim: bool,
}

/// One data-call status event from the data subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataConnectionStatus {
    pub event: DataConnectionEvent,
    pub phase: DataConnectionPhase,
    pub transport: Transport,
    pub apn_setting: Option<String>,
}

/// User-facing Wi-Fi-calling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub wfc_enabled_home: bool,
    pub wfc_enabled_roaming: bool,
    pub wfc_mode_home: WfcPreference,
    pub wfc_mode_roaming: WfcPreference,
    pub wfc_platform_enabled: bool,
    pub cross_sim_enabled: bool,
    pub wifi_enabled: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            wfc_enabled_home: false,
            wfc_enabled_roaming: false,
            wfc_mode_home: WfcPreference::WifiPreferred,
            wfc_mode_roaming: WfcPreference::WifiPreferred,
            wfc_platform_enabled: true,
            cross_sim_enabled: false,
            wifi_enabled: true,
        }
    }
}

/// Service-provisioning keys pushed by the carrier over the air.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum ProvisioningKey {
    LteThreshold1,
    LteThreshold2,
    LteThreshold3,
    WifiThresholdA,
    WifiThresholdB,
    LteEpdgTimerSec,
    WifiEpdgTimerSec,
}

/// Integer provisioning values, merged into the carrier policy as overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningSnapshot {
    pub values: HashMap<ProvisioningKey, i32>,
}

impl ProvisioningSnapshot {
    pub fn get(&self, key: ProvisioningKey) -> Option<i32> {
        self.values.get(&key).copied()
    }
}

/// The engine's output: the ordered access-network preference for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifiedNetworksInfo {
    pub session: SessionType,
    pub access_networks: Vec<AccessNetwork>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_maps_access_networks_onto_transports() {
        assert_eq!(AccessNetwork::Iwlan.transport(), Transport::Wlan);
        assert_eq!(AccessNetwork::Eutran.transport(), Transport::Wwan);
        assert_eq!(AccessNetwork::Ngran.transport(), Transport::Wwan);
        assert_eq!(AccessNetwork::Utran.transport(), Transport::Wwan);
        assert_eq!(AccessNetwork::Geran.transport(), Transport::Wwan);
        assert_eq!(AccessNetwork::Unknown.transport(), Transport::Invalid);
    }

    #[test]
    fn it_flips_transport_sides() {
        assert_eq!(Transport::Wwan.other(), Transport::Wlan);
        assert_eq!(Transport::Wlan.other(), Transport::Wwan);
        assert_eq!(Transport::Invalid.other(), Transport::Invalid);
    }

    #[test]
    fn it_reads_coverage_from_roaming_type() {
        let mut info = TelephonyInfo::default();
        assert_eq!(info.coverage(), Coverage::Home);

        info.roaming_type = RoamingType::DomesticRoaming;
        assert_eq!(info.coverage(), Coverage::Roaming);

        info.roaming_type = RoamingType::InternationalRoaming;
        assert_eq!(info.coverage(), Coverage::Roaming);
    }

    #[test]
    fn it_round_trips_qualified_networks_info_through_serde() {
        let info = QualifiedNetworksInfo {
            session: SessionType::Ims,
            access_networks: vec![AccessNetwork::Iwlan, AccessNetwork::Eutran],
        };

        let json = serde_json::to_string(&info).unwrap();
        let back: QualifiedNetworksInfo = serde_json::from_str(&json).unwrap();

        assert_eq!(back, info);
    }
}
