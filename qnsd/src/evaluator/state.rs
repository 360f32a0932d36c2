use crate::policy::store::PolicySnapshot;
use qnsd_events::{
    CallState, CallType, Coverage, DataConnectionPhase, IwlanStatus,
    ProvisioningSnapshot, TelephonyInfo, Transport, UserSettings, WfcPreference,
};

/// The evaluator's cached world model, rebuilt purely from live event feeds.
#[derive(Debug, Clone)]
pub struct WorldModel {
    pub iwlan: IwlanStatus,
    pub telephony: TelephonyInfo,
    pub airplane_mode: bool,
    pub call_type: CallType,
    pub call_state: CallState,
    pub settings: UserSettings,
    pub wfc_try_connection: bool,
    pub emergency_preferred_transport: Option<Transport>,
    pub data_phase: DataConnectionPhase,
    pub last_data_transport: Transport,
    pub last_apn_setting: Option<String>,
    pub ims_registered_wlan: bool,
    pub ims_registered_wwan: bool,
    pub provisioning: ProvisioningSnapshot,
}

impl Default for WorldModel {
    fn default() -> Self {
        Self {
            iwlan: IwlanStatus::default(),
            telephony: TelephonyInfo::default(),
            airplane_mode: false,
            call_type: CallType::Idle,
            call_state: CallState::Idle,
            settings: UserSettings::default(),
            wfc_try_connection: false,
            emergency_preferred_transport: None,
            data_phase: DataConnectionPhase::Inactive,
            last_data_transport: Transport::Invalid,
            last_apn_setting: None,
            ims_registered_wlan: false,
            ims_registered_wwan: false,
            provisioning: ProvisioningSnapshot::default(),
        }
    }
}

impl WorldModel {
    /// The WFC mode in effect for the coverage, falling back to the carrier
    /// default when the user has no setting.
    pub fn effective_preference(
        &self,
        coverage: Coverage,
        snapshot: &PolicySnapshot,
    ) -> WfcPreference {
        match coverage {
            Coverage::Home if self.settings.wfc_enabled_home => {
                self.settings.wfc_mode_home
            }
            Coverage::Roaming if self.settings.wfc_enabled_roaming => {
                self.settings.wfc_mode_roaming
            }
            Coverage::Home => snapshot.default_wfc_mode_home,
            Coverage::Roaming => snapshot.default_wfc_mode_roaming,
        }
    }

    /// User + platform switches that gate Wi-Fi calling as a whole.
    pub fn wfc_usable(&self, coverage: Coverage) -> bool {
        if !self.settings.wfc_platform_enabled {
            return false;
        }
        match coverage {
            Coverage::Home => self.settings.wfc_enabled_home,
            Coverage::Roaming => self.settings.wfc_enabled_roaming,
        }
    }

    pub fn cross_sim_active(&self) -> bool {
        self.settings.cross_sim_enabled && self.iwlan.in_cross_sim
    }

    pub fn data_active(&self) -> bool {
        matches!(
            self.data_phase,
            DataConnectionPhase::Connected | DataConnectionPhase::Handover
        )
    }

    /// The side a WFC preference keeps traffic on.
    pub fn preferred_transport(pref: WfcPreference) -> Transport {
        match pref {
            WfcPreference::WifiOnly | WfcPreference::WifiPreferred => Transport::Wlan,
            WfcPreference::CellularPreferred => Transport::Wwan,
        }
    }
}
