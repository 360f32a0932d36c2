//! The access-network evaluator: one single-threaded task per
//! (slot, session) with a serialised inbox. Consumes status events, keeps a
//! cached world model, and publishes an ordered qualified-network list
//! whenever the decision changes.

pub mod filters;
pub mod state;
pub mod timer;

use crate::channel::ResultChannel;
use crate::collaborators::{CarrierBundle, QualityMonitor, QualityView};
use crate::evaluator::filters::{AllowanceInputs, TransportAllowance};
use crate::evaluator::state::WorldModel;
use crate::evaluator::timer::{TimerKey, TimerTower};
use crate::policy::matcher::{AnspMatcher, PolicyMap};
use crate::policy::precondition::{GuardingDirection, PreCondition};
use crate::policy::store::{CarrierPolicyStore, PolicySnapshot};
use crate::restriction::{RestrictionKind, RestrictionManager};
use color_eyre::Result;
use qnsd_events::{
    AccessNetwork, CallState, CallType, Coverage, DataConnectionEvent,
    DataConnectionStatus, ImsRegState, ImsStatus, IwlanStatus,
    ProvisioningSnapshot, QualifiedNetworksInfo, RoamingType, RtpDegradeReason,
    SessionType, SlotId, SrvccState, TelephonyInfo, Transport, UserSettings,
    WfcPreference,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

/// Everything that can land on an evaluator inbox, in dispatch order.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    IwlanStatusChanged(IwlanStatus),
    TelephonyInfoChanged(TelephonyInfo),
    CallTypeChanged(CallType),
    CallStateChanged(CallState),
    SrvccStateChanged(SrvccState),
    DataConnectionChanged(DataConnectionStatus),
    EmergencyPreferredTransportChanged(Transport),
    ProvisioningChanged(ProvisioningSnapshot),
    WfcTryConnectionStateChanged(bool),
    ImsRegistrationChanged(ImsStatus),
    WfcSettingsChanged(UserSettings),
    AirplaneModeChanged(bool),
    CarrierConfigChanged(CarrierBundle),
    RtpLowQuality { reason: RtpDegradeReason },
    ThrottlingChanged {
        on: bool,
        deadline_in: Duration,
        transport: Transport,
    },
    TimerFired(TimerKey),
    Close,
}

/// Cheap cloneable front to one evaluator's inbox. Sends after `close()` are
/// silently dropped.
#[derive(Clone)]
pub struct EvaluatorHandle {
    slot: SlotId,
    session: SessionType,
    tx: flume::Sender<EngineEvent>,
}

impl EvaluatorHandle {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn session(&self) -> SessionType {
        self.session
    }

    pub fn update_iwlan_status(&self, status: IwlanStatus) {
        self.send(EngineEvent::IwlanStatusChanged(status));
    }

    pub fn update_telephony_info(&self, info: TelephonyInfo) {
        self.send(EngineEvent::TelephonyInfoChanged(info));
    }

    pub fn update_call_type(&self, call_type: CallType) {
        self.send(EngineEvent::CallTypeChanged(call_type));
    }

    pub fn update_call_state(&self, state: CallState) {
        self.send(EngineEvent::CallStateChanged(state));
    }

    pub fn notify_srvcc(&self, state: SrvccState) {
        self.send(EngineEvent::SrvccStateChanged(state));
    }

    pub fn update_data_connection(&self, status: DataConnectionStatus) {
        self.send(EngineEvent::DataConnectionChanged(status));
    }

    pub fn update_emergency_preferred_transport(&self, transport: Transport) {
        self.send(EngineEvent::EmergencyPreferredTransportChanged(transport));
    }

    pub fn update_provisioning(&self, snapshot: ProvisioningSnapshot) {
        self.send(EngineEvent::ProvisioningChanged(snapshot));
    }

    pub fn update_wfc_try_connection(&self, connecting: bool) {
        self.send(EngineEvent::WfcTryConnectionStateChanged(connecting));
    }

    pub fn notify_ims_registration(&self, status: ImsStatus) {
        self.send(EngineEvent::ImsRegistrationChanged(status));
    }

    pub fn update_wfc_settings(&self, settings: UserSettings) {
        self.send(EngineEvent::WfcSettingsChanged(settings));
    }

    pub fn update_airplane_mode(&self, enabled: bool) {
        self.send(EngineEvent::AirplaneModeChanged(enabled));
    }

    pub fn update_carrier_config(&self, bundle: CarrierBundle) {
        self.send(EngineEvent::CarrierConfigChanged(bundle));
    }

    pub fn notify_rtp_low_quality(&self, reason: RtpDegradeReason) {
        self.send(EngineEvent::RtpLowQuality { reason });
    }

    pub fn notify_throttling(
        &self,
        on: bool,
        deadline_in: Duration,
        transport: Transport,
    ) {
        self.send(EngineEvent::ThrottlingChanged {
            on,
            deadline_in,
            transport,
        });
    }

    /// Idempotent; the task drains, cancels its timers and exits.
    pub fn close(&self) {
        self.send(EngineEvent::Close);
    }

    fn send(&self, event: EngineEvent) {
        self.tx.send(event).ok();
    }
}

pub struct AccessNetworkEvaluator {
    slot: SlotId,
    session: SessionType,
    store: Arc<CarrierPolicyStore>,
    asset_defaults: CarrierBundle,
    matcher: AnspMatcher,
    restrictions: RestrictionManager,
    channel: Arc<ResultChannel>,
    wifi_monitor: Option<Arc<dyn QualityMonitor>>,
    cellular_monitor: Option<Arc<dyn QualityMonitor>>,
    inbox: flume::Receiver<EngineEvent>,
    tx: flume::Sender<EngineEvent>,
    world: WorldModel,
    last_notified: Option<Vec<AccessNetwork>>,
}

impl AccessNetworkEvaluator {
    pub fn new(
        slot: SlotId,
        session: SessionType,
        store: Arc<CarrierPolicyStore>,
        channel: Arc<ResultChannel>,
    ) -> Self {
        let (tx, inbox) = flume::unbounded();
        let timers = TimerTower::new(tx.clone());
        let matcher = AnspMatcher::new(PolicyMap::build(&store.snapshot()));

        Self {
            slot,
            session,
            store,
            asset_defaults: CarrierBundle::new(slot, qnsd_events::CarrierId::Unknown),
            matcher,
            restrictions: RestrictionManager::new(session, timers),
            channel,
            wifi_monitor: None,
            cellular_monitor: None,
            inbox,
            tx,
            world: WorldModel::default(),
            last_notified: None,
        }
    }

    pub fn with_wifi_monitor(mut self, monitor: Arc<dyn QualityMonitor>) -> Self {
        self.wifi_monitor = Some(monitor);
        self
    }

    pub fn with_cellular_monitor(mut self, monitor: Arc<dyn QualityMonitor>) -> Self {
        self.cellular_monitor = Some(monitor);
        self
    }

    /// Baseline configuration used for keys a carrier bundle omits.
    pub fn with_asset_defaults(mut self, defaults: CarrierBundle) -> Self {
        self.asset_defaults = defaults;
        self
    }

    /// Test seam: run against a pre-built policy map instead of one compiled
    /// from carrier configuration.
    pub fn with_policy_map(mut self, map: PolicyMap) -> Self {
        self.matcher.replace(map);
        self
    }

    pub fn handle(&self) -> EvaluatorHandle {
        EvaluatorHandle {
            slot: self.slot,
            session: self.session,
            tx: self.tx.clone(),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        info!(slot = %self.slot, session = %self.session, "evaluator started");
        self.evaluate();

        while let Ok(event) = self.inbox.recv_async().await {
            if matches!(event, EngineEvent::Close) {
                break;
            }
            self.process(event);
        }

        self.restrictions.close();
        info!(slot = %self.slot, session = %self.session, "evaluator closed");
        Ok(())
    }

    fn process(&mut self, event: EngineEvent) {
        let snapshot = self.store.snapshot();

        match event {
            EngineEvent::IwlanStatusChanged(status) => {
                self.world.iwlan = status;
            }

            EngineEvent::TelephonyInfoChanged(info) => {
                let old_cov = filters::determine_coverage(
                    &self.world.telephony,
                    self.session,
                    &snapshot,
                );
                let old_pref = self.world.effective_preference(old_cov, &snapshot);
                let an_changed =
                    info.data_network_type != self.world.telephony.data_network_type;

                self.world.telephony = info;

                if an_changed {
                    self.restrictions.on_cellular_an_changed(
                        self.world.telephony.data_network_type,
                        &snapshot,
                    );
                }

                let new_cov = filters::determine_coverage(
                    &self.world.telephony,
                    self.session,
                    &snapshot,
                );
                let new_pref = self.world.effective_preference(new_cov, &snapshot);
                if new_pref != old_pref || new_cov != old_cov {
                    self.restrictions.on_wfc_preference_changed(
                        new_pref,
                        WorldModel::preferred_transport(new_pref),
                        &snapshot,
                    );
                }
            }

            EngineEvent::CallTypeChanged(call_type) => {
                self.world.call_type = call_type;
                self.restrictions.set_call_type(call_type, &snapshot);
            }

            EngineEvent::CallStateChanged(state) => {
                self.world.call_state = state;
                self.restrictions.on_call_state_changed(
                    state,
                    self.world.telephony.voice_network_type,
                    &snapshot,
                );
            }

            EngineEvent::SrvccStateChanged(state) => {
                self.restrictions.on_srvcc(state);
            }

            EngineEvent::DataConnectionChanged(status) => {
                self.world.data_phase = status.phase;
                if status.transport != Transport::Invalid
                    && matches!(
                        status.event,
                        DataConnectionEvent::Connected
                            | DataConnectionEvent::HandoverSuccess
                    )
                {
                    self.world.last_data_transport = status.transport;
                }
                if status.apn_setting.is_some() {
                    self.world.last_apn_setting = status.apn_setting.clone();
                }
                self.restrictions
                    .on_data_connection_changed(&status, &snapshot);
            }

            EngineEvent::EmergencyPreferredTransportChanged(transport) => {
                self.world.emergency_preferred_transport = Some(transport);
            }

            EngineEvent::ProvisioningChanged(provisioning) => {
                self.world.provisioning = provisioning.clone();
                self.store.apply_provisioning(&provisioning);
                self.matcher.rebuild(&self.store.snapshot());
            }

            EngineEvent::WfcTryConnectionStateChanged(connecting) => {
                self.world.wfc_try_connection = connecting;
            }

            EngineEvent::ImsRegistrationChanged(status) => {
                let registered = status.state == ImsRegState::Registered;
                match status.transport {
                    Transport::Wlan => self.world.ims_registered_wlan = registered,
                    Transport::Wwan => self.world.ims_registered_wwan = registered,
                    Transport::Invalid => {}
                }
                self.restrictions
                    .on_ims_registration_changed(&status, &snapshot);
            }

            EngineEvent::WfcSettingsChanged(settings) => {
                let cov = filters::determine_coverage(
                    &self.world.telephony,
                    self.session,
                    &snapshot,
                );
                let old_pref = self.world.effective_preference(cov, &snapshot);
                let old_usable = self.world.wfc_usable(cov);
                let old_wifi = self.world.settings.wifi_enabled;

                self.world.settings = settings;

                if old_usable && !self.world.wfc_usable(cov) {
                    self.restrictions.on_wfc_enabled_changed(false);
                }
                if old_wifi && !self.world.settings.wifi_enabled {
                    self.restrictions.on_wifi_enabled_changed(false);
                }
                let new_pref = self.world.effective_preference(cov, &snapshot);
                if new_pref != old_pref {
                    self.restrictions.on_wfc_preference_changed(
                        new_pref,
                        WorldModel::preferred_transport(new_pref),
                        &snapshot,
                    );
                }
            }

            EngineEvent::AirplaneModeChanged(enabled) => {
                self.world.airplane_mode = enabled;
                self.restrictions.on_airplane_mode_changed(enabled);
            }

            EngineEvent::CarrierConfigChanged(bundle) => {
                let outcome = self.store.reload(&bundle, &self.asset_defaults);
                if outcome.handover_rules_changed || outcome.thresholds_changed {
                    debug!(
                        slot = %self.slot,
                        session = %self.session,
                        "carrier policy changed, rebuilding selection policies"
                    );
                }
                self.matcher.rebuild(&self.store.snapshot());
            }

            EngineEvent::RtpLowQuality { reason } => {
                self.restrictions.on_rtp_low_quality(reason, &snapshot);
            }

            EngineEvent::ThrottlingChanged {
                on,
                deadline_in,
                transport,
            } => {
                self.restrictions.notify_throttling(
                    on,
                    Instant::now() + deadline_in,
                    transport,
                );
            }

            EngineEvent::TimerFired(key) => {
                self.restrictions.on_timer_fired(key, &snapshot);
            }

            EngineEvent::Close => {}
        }

        self.evaluate();
    }

    /// Recompute the qualified-network list and publish it if it changed.
    fn evaluate(&mut self) {
        let snapshot = self.store.snapshot();
        let coverage =
            filters::determine_coverage(&self.world.telephony, self.session, &snapshot);
        let pref = self.world.effective_preference(coverage, &snapshot);

        let allowance = filters::allowed_transports(
            self.session,
            AllowanceInputs {
                airplane_mode: self.world.airplane_mode,
                wfc_usable: self.world.wfc_usable(coverage),
                wifi_enabled: self.world.settings.wifi_enabled,
                cross_sim_active: self.world.cross_sim_active(),
                ims_registered_wlan: self.world.ims_registered_wlan,
                cellular_available: self.world.telephony.cellular_available,
                international_roaming: self.world.telephony.roaming_type
                    == RoamingType::InternationalRoaming,
                coverage,
            },
            &snapshot,
        );

        let view = QualityView::new(
            self.wifi_monitor.as_deref(),
            self.cellular_monitor.as_deref(),
            self.world.iwlan.available,
            self.world.telephony.cellular_available,
        );

        let ansps = self.matching_ansps(pref, coverage, &snapshot);

        let satisfied: Vec<Transport> = ansps
            .iter()
            .filter(|a| a.satisfied_by_any_threshold_group(Some(&view)))
            .map(|a| a.target_transport())
            .collect();

        // Emergency sessions may be pinned to a transport by the platform.
        let decision = if self.session == SessionType::Emergency {
            match self.world.emergency_preferred_transport {
                Some(preferred) => self
                    .transport_list(preferred, coverage, &snapshot)
                    .filter(|_| self.transport_usable(preferred, allowance, &snapshot, coverage)),
                None => self.decide(&satisfied, pref, allowance, coverage, &snapshot),
            }
        } else {
            self.decide(&satisfied, pref, allowance, coverage, &snapshot)
        };

        self.program_monitors(&ansps, &view);

        let Some(list) = decision else {
            // nothing usable or a barred in-place handover: keep the last
            // notified list
            return;
        };

        if self.last_notified.as_ref() != Some(&list) {
            self.last_notified = Some(list.clone());
            self.channel.publish(QualifiedNetworksInfo {
                session: self.session,
                access_networks: list,
            });
        }
    }

    fn matching_ansps(
        &self,
        pref: WfcPreference,
        coverage: Coverage,
        snapshot: &PolicySnapshot,
    ) -> Vec<Arc<crate::policy::Ansp>> {
        let mut pc = PreCondition::plain(self.world.call_type, pref, coverage);

        if snapshot.is_guard_timer_hysteresis_on_preference_supported() {
            let ledger = self.restrictions.ledger();
            if ledger.has(Transport::Wwan, RestrictionKind::Guarding) {
                pc.guarding = Some(GuardingDirection::Wifi);
            } else if ledger.has(Transport::Wlan, RestrictionKind::Guarding) {
                pc.guarding = Some(GuardingDirection::Cellular);
            }
        }

        let matched = self.matcher.matching(self.session, &pc);
        if !matched.is_empty() || pc.guarding.is_none() {
            return matched;
        }
        // no guarded policies configured: fall back to the plain condition
        self.matcher.matching(self.session, &pc.without_guarding())
    }

    /// Pick the target transport: satisfied policies first in preference
    /// order, then any still-usable side (a restriction on the current side
    /// forces traffic to the other one). `None` keeps the last list.
    fn decide(
        &self,
        satisfied: &[Transport],
        pref: WfcPreference,
        allowance: TransportAllowance,
        coverage: Coverage,
        snapshot: &PolicySnapshot,
    ) -> Option<Vec<AccessNetwork>> {
        let order: &[Transport] = match pref {
            WfcPreference::WifiOnly => &[Transport::Wlan],
            WfcPreference::WifiPreferred => &[Transport::Wlan, Transport::Wwan],
            WfcPreference::CellularPreferred => &[Transport::Wwan, Transport::Wlan],
        };

        // inside the hysteresis band nothing fires; stay where we are if
        // the current side is still workable
        let mut fallback_order = Vec::with_capacity(3);
        if order.contains(&self.world.last_data_transport) {
            fallback_order.push(self.world.last_data_transport);
        }
        fallback_order.extend_from_slice(order);

        let chosen = order
            .iter()
            .copied()
            .find(|t| {
                satisfied.contains(t)
                    && self.transport_usable(*t, allowance, snapshot, coverage)
                    && self.transport_list(*t, coverage, snapshot).is_some()
            })
            .or_else(|| {
                fallback_order.iter().copied().find(|t| {
                    self.transport_usable(*t, allowance, snapshot, coverage)
                        && self.transport_list(*t, coverage, snapshot).is_some()
                })
            })?;

        let mut list = self.transport_list(chosen, coverage, snapshot)?;

        // An in-place handover must be permitted by the carrier policy.
        if self.move_barred_by_handover_policy(chosen, &list, coverage, snapshot) {
            return None;
        }

        // Emergency fallback: offer the other side's networks as well.
        if self.session == SessionType::Emergency {
            if let Some(other) = self.transport_list(chosen.other(), coverage, snapshot)
            {
                if allowance.allows(chosen.other()) {
                    list.extend(other);
                }
            }
        }

        Some(list)
    }

    fn transport_usable(
        &self,
        transport: Transport,
        allowance: TransportAllowance,
        snapshot: &PolicySnapshot,
        coverage: Coverage,
    ) -> bool {
        if !allowance.allows(transport) || !self.transport_available(transport) {
            return false;
        }

        let ledger = self.restrictions.ledger();
        if !ledger.is_restricted(transport) {
            return true;
        }

        // Every restriction is of a single-transport-tolerant kind and the
        // other side is itself unusable.
        let other = transport.other();
        let other_usable = allowance.allows(other)
            && self.transport_available(other)
            && !ledger.is_restricted(other)
            && self.transport_list(other, coverage, snapshot).is_some();

        ledger.allowed_on_single_transport(transport) && !other_usable
    }

    fn transport_available(&self, transport: Transport) -> bool {
        match transport {
            Transport::Wlan => self.world.iwlan.available,
            Transport::Wwan => self.world.telephony.cellular_available,
            Transport::Invalid => false,
        }
    }

    /// The ordered networks the transport would contribute, `None` when it
    /// has nothing to offer for this session right now.
    fn transport_list(
        &self,
        transport: Transport,
        coverage: Coverage,
        snapshot: &PolicySnapshot,
    ) -> Option<Vec<AccessNetwork>> {
        let list: Vec<AccessNetwork> = match transport {
            Transport::Wlan => [AccessNetwork::Iwlan]
                .into_iter()
                .filter(|an| snapshot.is_access_network_allowed(self.session, *an))
                .collect(),
            Transport::Wwan => {
                let an = self.world.telephony.data_network_type;
                (an.transport() == Transport::Wwan
                    && snapshot.is_access_network_allowed(self.session, an)
                    && filters::vops_ok(
                        self.session,
                        an,
                        coverage,
                        self.world.call_type,
                        self.world.last_data_transport,
                        &self.world.telephony,
                        snapshot,
                    ))
                .then(|| vec![an])
                .unwrap_or_default()
            }
            Transport::Invalid => Vec::new(),
        };

        (!list.is_empty()).then_some(list)
    }

    /// With an active data call on the other side, the carrier handover
    /// table has to permit every target AN, otherwise the previous decision
    /// stands. Sessions on a separate IWLAN APN get fresh bearers instead of
    /// handovers and skip the table.
    fn move_barred_by_handover_policy(
        &self,
        chosen: Transport,
        list: &[AccessNetwork],
        coverage: Coverage,
        snapshot: &PolicySnapshot,
    ) -> bool {
        let last = self.world.last_data_transport;
        if last == Transport::Invalid || last == chosen || !self.world.data_active() {
            return false;
        }
        if snapshot.uses_separate_iwlan_apn(self.session) {
            return false;
        }

        let from = match last {
            Transport::Wlan => AccessNetwork::Iwlan,
            Transport::Wwan => self.world.telephony.data_network_type,
            Transport::Invalid => return false,
        };

        !list.iter().all(|to| {
            snapshot.is_handover_allowed(self.session, from, *to, coverage)
        })
    }

    /// Program the quality monitors with the thresholds that would flip a
    /// currently-unsatisfied policy.
    fn program_monitors(
        &self,
        ansps: &[Arc<crate::policy::Ansp>],
        view: &QualityView<'_>,
    ) {
        let mut wanted: HashMap<(AccessNetwork, qnsd_events::MeasurementKind), Vec<i32>> =
            HashMap::new();

        for ansp in ansps {
            if ansp.satisfied_by_any_threshold_group(Some(view)) {
                continue;
            }
            for threshold in ansp.unmatched_thresholds(view) {
                if !threshold.needs_measurement() {
                    continue;
                }
                wanted
                    .entry((threshold.access_network, threshold.measurement))
                    .or_default()
                    .push(threshold.value);
            }
        }

        for ((an, kind), mut values) in wanted {
            values.sort_unstable();
            values.dedup();
            let monitor = match an.transport() {
                Transport::Wlan => self.wifi_monitor.as_deref(),
                Transport::Wwan => self.cellular_monitor.as_deref(),
                Transport::Invalid => None,
            };
            if let Some(monitor) = monitor {
                monitor.update_thresholds(an, kind, values);
            }
        }
    }
}
