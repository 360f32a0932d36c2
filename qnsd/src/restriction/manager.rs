use crate::evaluator::timer::{TimerKey, TimerTower};
use crate::policy::store::{FallbackKind, PolicySnapshot};
use crate::restriction::{ReleaseEvents, RestrictionKind, RestrictionLedger};
use qnsd_events::{
    AccessNetwork, CallState, CallType, DataConnectionEvent, DataConnectionPhase,
    DataConnectionStatus, ImsRegState, ImsStatus, RtpDegradeReason, SessionType,
    SrvccState, Transport, WfcPreference,
};
use std::collections::HashMap;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Hold-down on the source side while a handover is in flight.
const HANDOVER_START_GUARD_MS: u64 = 3_000;

const BOTH_TRANSPORTS: [Transport; 2] = [Transport::Wwan, Transport::Wlan];

/// Drives the restriction ledger from call, data-connection, IMS and
/// throttling events. Every mutating method returns `true` when the
/// transport verdict may have flipped, so the evaluator re-evaluates.
pub struct RestrictionManager {
    session: SessionType,
    ledger: RestrictionLedger,
    timers: TimerTower,
    call_type: CallType,
    wfc_preference: WfcPreference,
    active_data_transport: Option<Transport>,
    rtp_low_events_on_wlan: u32,
    pdn_fail_counts: HashMap<Transport, u32>,
    pdn_fallback_count: u32,
    pdn_fallbacks_exhausted: bool,
    pending_throttle: HashMap<Transport, Instant>,
}

impl RestrictionManager {
    pub fn new(session: SessionType, timers: TimerTower) -> Self {
        Self {
            session,
            ledger: RestrictionLedger::new(),
            timers,
            call_type: CallType::Idle,
            wfc_preference: WfcPreference::WifiPreferred,
            active_data_transport: None,
            rtp_low_events_on_wlan: 0,
            pdn_fail_counts: HashMap::new(),
            pdn_fallback_count: 0,
            pdn_fallbacks_exhausted: false,
            pending_throttle: HashMap::new(),
        }
    }

    pub fn ledger(&self) -> &RestrictionLedger {
        &self.ledger
    }

    pub fn active_data_transport(&self) -> Option<Transport> {
        self.active_data_transport
    }

    /// Call-type transitions recompute guard deadlines: the new deadline is
    /// the later of the remaining time and the new call type's guard value;
    /// a value of 0 releases the guard immediately.
    pub fn set_call_type(
        &mut self,
        call_type: CallType,
        snapshot: &PolicySnapshot,
    ) -> bool {
        let mut changed = false;

        if call_type == CallType::Idle && self.call_type != CallType::Idle {
            changed |= self.process_release_both(ReleaseEvents::CALL_END);
            self.rtp_low_events_on_wlan = 0;
        }

        for transport in BOTH_TRANSPORTS {
            if !self.ledger.has(transport, RestrictionKind::Guarding) {
                continue;
            }
            let guard_ms = snapshot.guard_timer_ms(transport, call_type);
            if guard_ms == 0 {
                self.ledger.release(transport, RestrictionKind::Guarding);
                self.timers
                    .cancel(TimerKey::Restriction(transport, RestrictionKind::Guarding));
                changed = true;
            } else {
                // add() keeps the later deadline, which is exactly
                // max(remaining, new guard value)
                changed |= self.add_timed(
                    transport,
                    RestrictionKind::Guarding,
                    ReleaseEvents::DISCONNECT
                        | ReleaseEvents::HANDOVER_COMPLETE_TO_OTHER_SIDE,
                    Duration::from_millis(guard_ms),
                );
            }
        }

        self.call_type = call_type;
        changed
    }

    /// CS voice activity on a cellular AN without an IMS PDN bars IWLAN for
    /// the duration of the call.
    pub fn on_call_state_changed(
        &mut self,
        state: CallState,
        cellular_an: AccessNetwork,
        _snapshot: &PolicySnapshot,
    ) -> bool {
        match state {
            CallState::Offhook if !cellular_an.supports_ims_pdn() => self
                .ledger
                .add(
                    Transport::Wlan,
                    RestrictionKind::RestrictIwlanCsCall,
                    ReleaseEvents::CALL_END,
                    Duration::ZERO,
                ),
            CallState::Idle => self.process_release_both(ReleaseEvents::CALL_END),
            _ => false,
        }
    }

    pub fn on_srvcc(&mut self, state: SrvccState) -> bool {
        match state {
            SrvccState::Started => self.ledger.add(
                Transport::Wlan,
                RestrictionKind::RestrictIwlanCsCall,
                ReleaseEvents::CALL_END | ReleaseEvents::HANDOVER_FAILED,
                Duration::ZERO,
            ),
            SrvccState::Failed | SrvccState::Canceled => self
                .ledger
                .process_release_event(Transport::Wlan, ReleaseEvents::HANDOVER_FAILED),
            // stays until CALL_END
            SrvccState::Completed => false,
        }
    }

    pub fn on_data_connection_changed(
        &mut self,
        status: &DataConnectionStatus,
        snapshot: &PolicySnapshot,
    ) -> bool {
        let mut changed = false;

        match status.event {
            DataConnectionEvent::HandoverSuccess => {
                let guarded = status.transport.other();
                changed |= self.ledger.process_release_event(
                    guarded,
                    ReleaseEvents::HANDOVER_COMPLETE_TO_OTHER_SIDE,
                );

                let guard_ms = snapshot.guard_timer_ms(guarded, self.call_type);
                if guard_ms > 0 {
                    changed |= self.add_timed(
                        guarded,
                        RestrictionKind::Guarding,
                        ReleaseEvents::DISCONNECT
                            | ReleaseEvents::HANDOVER_COMPLETE_TO_OTHER_SIDE,
                        Duration::from_millis(guard_ms),
                    );
                }
                self.active_data_transport = Some(status.transport);
            }

            DataConnectionEvent::HandoverStarted => {
                changed |= self.add_timed(
                    status.transport,
                    RestrictionKind::Guarding,
                    ReleaseEvents::HANDOVER_FAILED
                        | ReleaseEvents::HANDOVER_COMPLETE_TO_OTHER_SIDE
                        | ReleaseEvents::DISCONNECT,
                    Duration::from_millis(HANDOVER_START_GUARD_MS),
                );
            }

            DataConnectionEvent::HandoverFailed => {
                changed |= self.process_release_both(ReleaseEvents::HANDOVER_FAILED);
            }

            DataConnectionEvent::Connected => {
                self.active_data_transport = Some(status.transport);
                // the connecting side sheds everything data-released; the
                // other side only its PDN-failure fallback
                changed |= self
                    .ledger
                    .process_release_event(status.transport, ReleaseEvents::DATA_CONNECTED);
                changed |= self.ledger.release(
                    status.transport.other(),
                    RestrictionKind::FallbackOnDataConnectionFail,
                );
                self.pdn_fail_counts.clear();
                self.pdn_fallback_count = 0;
                self.pdn_fallbacks_exhausted = false;
                for transport in BOTH_TRANSPORTS {
                    self.timers.cancel(TimerKey::PdnRetry(transport));
                }
            }

            DataConnectionEvent::Disconnected => {
                self.active_data_transport = None;
                changed |= self.process_release_both(ReleaseEvents::DISCONNECT);
                changed |= self.apply_pending_throttle(status.transport);
            }

            DataConnectionEvent::Failed => {
                changed |= self.on_data_connection_failed(status.transport, snapshot);
            }

            DataConnectionEvent::Started => {}
        }

        if status.phase == DataConnectionPhase::Inactive {
            self.active_data_transport = None;
        }

        changed
    }

    /// Initial PDN bring-up failure accounting. A retry count of 0 switches
    /// to timer mode: the first failure arms the retry timer and later
    /// failures re-arm it; expiry triggers the fallback.
    fn on_data_connection_failed(
        &mut self,
        transport: Transport,
        snapshot: &PolicySnapshot,
    ) -> bool {
        let cfg = snapshot.pdn_fallback;
        if !cfg.enabled || self.pdn_fallbacks_exhausted {
            return false;
        }

        if cfg.retry_count == 0 {
            self.timers.arm(
                TimerKey::PdnRetry(transport),
                Instant::now() + Duration::from_millis(cfg.retry_time_ms),
            );
            return false;
        }

        let count = self.pdn_fail_counts.entry(transport).or_insert(0);
        *count += 1;
        if *count >= cfg.retry_count {
            return self.trigger_pdn_fallback(transport, snapshot);
        }

        false
    }

    fn trigger_pdn_fallback(
        &mut self,
        transport: Transport,
        snapshot: &PolicySnapshot,
    ) -> bool {
        let cfg = snapshot.pdn_fallback;
        debug!(%transport, "initial data connection failures crossed the threshold");

        let changed = self.add_timed(
            transport,
            RestrictionKind::FallbackOnDataConnectionFail,
            ReleaseEvents::DATA_CONNECTED
                | ReleaseEvents::AIRPLANE_ON
                | ReleaseEvents::WFC_OFF
                | ReleaseEvents::WIFI_OFF,
            Duration::from_millis(cfg.guard_time_ms),
        );

        self.pdn_fail_counts.remove(&transport);
        self.pdn_fallback_count += 1;
        if self.pdn_fallback_count >= cfg.max_fallbacks {
            self.pdn_fallbacks_exhausted = true;
        }

        changed
    }

    /// RTP degradation restricts the active-call transport; repeated events
    /// on IWLAN during one call pin it off until the call ends.
    pub fn on_rtp_low_quality(
        &mut self,
        reason: RtpDegradeReason,
        snapshot: &PolicySnapshot,
    ) -> bool {
        if !snapshot.rtp_fallback_reasons.contains(&reason) {
            return false;
        }
        let Some(transport) = self.active_data_transport else {
            return false;
        };

        let restrict_ms = snapshot.rtp_restrict_ms(transport);
        let mut changed = false;
        if restrict_ms > 0 {
            changed |= self.add_timed(
                transport,
                RestrictionKind::RtpLowQuality,
                ReleaseEvents::CALL_END,
                Duration::from_millis(restrict_ms),
            );
        }

        if transport == Transport::Wlan {
            self.rtp_low_events_on_wlan += 1;
            if self.rtp_low_events_on_wlan >= snapshot.max_iwlan_handovers_during_call
            {
                changed |= self.ledger.add(
                    Transport::Wlan,
                    RestrictionKind::RestrictIwlanInCall,
                    ReleaseEvents::CALL_END,
                    Duration::ZERO,
                );
            }
        }

        changed
    }

    pub fn on_ims_registration_changed(
        &mut self,
        status: &ImsStatus,
        snapshot: &PolicySnapshot,
    ) -> bool {
        let transport = if status.transport == Transport::Invalid {
            Transport::Wlan
        } else {
            status.transport
        };

        match status.state {
            ImsRegState::Registered => {
                self.process_release_both(ReleaseEvents::IMS_REGISTERED)
            }
            ImsRegState::Unregistered => self.arm_ims_fallback(
                transport,
                status.reason_code,
                FallbackKind::Unreg,
                snapshot,
            ),
            ImsRegState::AccessNetworkChangeFailed => self.arm_ims_fallback(
                transport,
                status.reason_code,
                FallbackKind::HoRegFail,
                snapshot,
            ),
        }
    }

    fn arm_ims_fallback(
        &mut self,
        transport: Transport,
        reason_code: Option<u32>,
        kind: FallbackKind,
        snapshot: &PolicySnapshot,
    ) -> bool {
        let Some(cause) = reason_code else {
            return false;
        };
        let time_ms = snapshot.fallback_time(cause, self.wfc_preference, kind);
        if time_ms == 0 {
            return false;
        }

        self.add_timed(
            transport,
            RestrictionKind::FallbackToWwanImsRegiFail,
            ReleaseEvents::IMS_REGISTERED,
            Duration::from_millis(time_ms),
        )
    }

    /// Mode / roaming-preference change: cool the non-preferred side down
    /// and, when hysteresis-on-preference is supported, refresh the guard
    /// holding the device on the newly preferred side.
    pub fn on_wfc_preference_changed(
        &mut self,
        preference: WfcPreference,
        preferred: Transport,
        snapshot: &PolicySnapshot,
    ) -> bool {
        self.wfc_preference = preference;
        let mut changed = false;

        let cooldown_ms = snapshot.cooldown_on_mode_change_ms(preferred);
        if cooldown_ms > 0 && preferred != Transport::Invalid {
            changed |= self.add_timed(
                preferred.other(),
                RestrictionKind::NonPreferredTransport,
                ReleaseEvents::DATA_CONNECTED,
                Duration::from_millis(cooldown_ms),
            );
        }

        if snapshot.is_guard_timer_hysteresis_on_preference_supported()
            && preferred != Transport::Invalid
        {
            let guarded = preferred.other();
            if self.ledger.has(guarded, RestrictionKind::Guarding) {
                let guard_ms = snapshot.guard_timer_ms(guarded, self.call_type);
                if guard_ms > 0 {
                    changed |= self.add_timed(
                        guarded,
                        RestrictionKind::Guarding,
                        ReleaseEvents::DISCONNECT
                            | ReleaseEvents::HANDOVER_COMPLETE_TO_OTHER_SIDE,
                        Duration::from_millis(guard_ms),
                    );
                }
            }
        }

        changed
    }

    /// Throttling from the data subsystem. While a data call is active on
    /// the transport the restriction is deferred and applied with whatever
    /// time remains once the call disconnects.
    pub fn notify_throttling(
        &mut self,
        on: bool,
        deadline: Instant,
        transport: Transport,
    ) -> bool {
        if transport == Transport::Invalid {
            return false;
        }

        if !on {
            self.pending_throttle.remove(&transport);
            self.timers
                .cancel(TimerKey::Restriction(transport, RestrictionKind::Throttling));
            return self.ledger.release(transport, RestrictionKind::Throttling);
        }

        let now = Instant::now();
        if deadline <= now {
            return false;
        }

        if self.active_data_transport == Some(transport) {
            self.pending_throttle.insert(transport, deadline);
            return false;
        }

        self.add_throttle_until(transport, deadline)
    }

    fn apply_pending_throttle(&mut self, transport: Transport) -> bool {
        let Some(deadline) = self.pending_throttle.remove(&transport) else {
            return false;
        };
        if deadline <= Instant::now() {
            return false;
        }
        self.add_throttle_until(transport, deadline)
    }

    fn add_throttle_until(&mut self, transport: Transport, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let changed = self.ledger.add(
            transport,
            RestrictionKind::Throttling,
            ReleaseEvents::AIRPLANE_ON | ReleaseEvents::WIFI_OFF,
            remaining,
        );
        if changed {
            self.timers.arm(
                TimerKey::Restriction(transport, RestrictionKind::Throttling),
                deadline,
            );
        }
        changed
    }

    /// A cellular AN with no IMS support cancels the fallbacks that would
    /// otherwise push this session onto it.
    pub fn on_cellular_an_changed(
        &mut self,
        an: AccessNetwork,
        snapshot: &PolicySnapshot,
    ) -> bool {
        if an.transport() != Transport::Wwan {
            return false;
        }
        if snapshot.is_access_network_allowed(self.session, an) && an.supports_ims_pdn()
        {
            return false;
        }

        let mut changed = false;
        for transport in BOTH_TRANSPORTS {
            changed |= self
                .ledger
                .release(transport, RestrictionKind::FallbackToWwanImsRegiFail);
            changed |= self
                .ledger
                .release(transport, RestrictionKind::FallbackOnDataConnectionFail);
        }
        changed
    }

    pub fn on_airplane_mode_changed(&mut self, enabled: bool) -> bool {
        if !enabled {
            return false;
        }
        self.process_release_both(ReleaseEvents::AIRPLANE_ON)
    }

    pub fn on_wfc_enabled_changed(&mut self, enabled: bool) -> bool {
        if enabled {
            return false;
        }
        self.process_release_both(ReleaseEvents::WFC_OFF)
    }

    pub fn on_wifi_enabled_changed(&mut self, enabled: bool) -> bool {
        if enabled {
            return false;
        }
        self.process_release_both(ReleaseEvents::WIFI_OFF)
    }

    pub fn on_timer_fired(
        &mut self,
        key: TimerKey,
        snapshot: &PolicySnapshot,
    ) -> bool {
        match key {
            TimerKey::Restriction(..) => self.ledger.purge_expired(),
            TimerKey::PdnRetry(transport) => {
                self.trigger_pdn_fallback(transport, snapshot)
            }
        }
    }

    pub fn close(&mut self) {
        self.timers.cancel_all();
    }

    fn add_timed(
        &mut self,
        transport: Transport,
        kind: RestrictionKind,
        releases: ReleaseEvents,
        duration: Duration,
    ) -> bool {
        let changed = self.ledger.add(transport, kind, releases, duration);
        if changed {
            if let Some(deadline) = self.ledger.deadline(transport, kind) {
                self.timers.arm(TimerKey::Restriction(transport, kind), deadline);
            }
        }
        changed
    }

    fn process_release_both(&mut self, event: ReleaseEvents) -> bool {
        let mut changed = false;
        for transport in BOTH_TRANSPORTS {
            changed |= self.ledger.process_release_event(transport, event);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EngineEvent;

    fn manager(session: SessionType) -> (RestrictionManager, flume::Receiver<EngineEvent>) {
        let (tx, rx) = flume::unbounded();
        (RestrictionManager::new(session, TimerTower::new(tx)), rx)
    }

    fn connected(transport: Transport) -> DataConnectionStatus {
        DataConnectionStatus {
            event: DataConnectionEvent::Connected,
            phase: DataConnectionPhase::Connected,
            transport,
            apn_setting: None,
        }
    }

    fn ho_success(transport: Transport) -> DataConnectionStatus {
        DataConnectionStatus {
            event: DataConnectionEvent::HandoverSuccess,
            phase: DataConnectionPhase::Connected,
            transport,
            apn_setting: None,
        }
    }

    fn disconnected(transport: Transport) -> DataConnectionStatus {
        DataConnectionStatus {
            event: DataConnectionEvent::Disconnected,
            phase: DataConnectionPhase::Inactive,
            transport,
            apn_setting: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn it_guards_the_source_side_after_a_handover() {
        let (mut mgr, _rx) = manager(SessionType::Ims);
        let snapshot = PolicySnapshot::default();

        mgr.on_data_connection_changed(&ho_success(Transport::Wlan), &snapshot);

        assert!(mgr.ledger().has(Transport::Wwan, RestrictionKind::Guarding));
        assert!(!mgr.ledger().has(Transport::Wlan, RestrictionKind::Guarding));

        // default guard is 30s
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!mgr.ledger().has(Transport::Wwan, RestrictionKind::Guarding));
    }

    #[tokio::test(start_paused = true)]
    async fn it_releases_the_guard_on_disconnect() {
        let (mut mgr, _rx) = manager(SessionType::Ims);
        let snapshot = PolicySnapshot::default();

        mgr.on_data_connection_changed(&ho_success(Transport::Wlan), &snapshot);
        assert!(mgr.ledger().has(Transport::Wwan, RestrictionKind::Guarding));

        mgr.on_data_connection_changed(&disconnected(Transport::Wlan), &snapshot);
        assert!(!mgr.ledger().has(Transport::Wwan, RestrictionKind::Guarding));
    }

    #[tokio::test(start_paused = true)]
    async fn it_extends_the_guard_when_a_call_starts() {
        let (mut mgr, _rx) = manager(SessionType::Ims);
        let mut snapshot = PolicySnapshot::default();
        snapshot
            .guard_timer
            .wwan_per_call_ms
            .insert(CallType::Voice, 90_000);

        mgr.on_data_connection_changed(&ho_success(Transport::Wlan), &snapshot);
        tokio::time::advance(Duration::from_secs(20)).await;

        mgr.set_call_type(CallType::Voice, &snapshot);

        // 10s remained; the voice value of 90s wins
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(mgr.ledger().has(Transport::Wwan, RestrictionKind::Guarding));
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!mgr.ledger().has(Transport::Wwan, RestrictionKind::Guarding));
    }

    #[tokio::test(start_paused = true)]
    async fn it_defers_throttling_while_data_is_active() {
        let (mut mgr, _rx) = manager(SessionType::Ims);
        let snapshot = PolicySnapshot::default();

        mgr.on_data_connection_changed(&connected(Transport::Wwan), &snapshot);

        let deadline = Instant::now() + Duration::from_secs(12);
        mgr.notify_throttling(true, deadline, Transport::Wwan);
        assert!(!mgr.ledger().has(Transport::Wwan, RestrictionKind::Throttling));

        // disconnect 5s later: 7s remain
        tokio::time::advance(Duration::from_secs(5)).await;
        mgr.on_data_connection_changed(&disconnected(Transport::Wwan), &snapshot);
        assert!(mgr.ledger().has(Transport::Wwan, RestrictionKind::Throttling));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(mgr.ledger().has(Transport::Wwan, RestrictionKind::Throttling));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!mgr.ledger().has(Transport::Wwan, RestrictionKind::Throttling));
    }

    #[tokio::test(start_paused = true)]
    async fn it_ignores_throttling_deadlines_already_past() {
        let (mut mgr, _rx) = manager(SessionType::Ims);

        let deadline = Instant::now();
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!mgr.notify_throttling(true, deadline, Transport::Wwan));
        assert!(!mgr.ledger().is_restricted(Transport::Wwan));
    }

    #[tokio::test(start_paused = true)]
    async fn it_pins_iwlan_off_after_repeated_rtp_events() {
        let (mut mgr, _rx) = manager(SessionType::Ims);
        let mut snapshot = PolicySnapshot::default();
        snapshot.max_iwlan_handovers_during_call = 2;

        mgr.on_data_connection_changed(&connected(Transport::Wlan), &snapshot);
        mgr.set_call_type(CallType::Voice, &snapshot);

        mgr.on_rtp_low_quality(RtpDegradeReason::Jitter, &snapshot);
        assert!(mgr.ledger().has(Transport::Wlan, RestrictionKind::RtpLowQuality));
        assert!(!mgr
            .ledger()
            .has(Transport::Wlan, RestrictionKind::RestrictIwlanInCall));

        mgr.on_rtp_low_quality(RtpDegradeReason::PacketLoss, &snapshot);
        assert!(mgr
            .ledger()
            .has(Transport::Wlan, RestrictionKind::RestrictIwlanInCall));

        // call end lifts both
        mgr.set_call_type(CallType::Idle, &snapshot);
        assert!(!mgr.ledger().is_restricted(Transport::Wlan));
    }

    #[tokio::test(start_paused = true)]
    async fn it_falls_back_after_enough_pdn_failures() {
        let (mut mgr, _rx) = manager(SessionType::Ims);
        let mut snapshot = PolicySnapshot::default();
        snapshot.pdn_fallback.enabled = true;
        snapshot.pdn_fallback.retry_count = 2;
        snapshot.pdn_fallback.max_fallbacks = 1;

        let failed = DataConnectionStatus {
            event: DataConnectionEvent::Failed,
            phase: DataConnectionPhase::Connecting,
            transport: Transport::Wlan,
            apn_setting: None,
        };

        mgr.on_data_connection_changed(&failed, &snapshot);
        assert!(!mgr
            .ledger()
            .has(Transport::Wlan, RestrictionKind::FallbackOnDataConnectionFail));

        mgr.on_data_connection_changed(&failed, &snapshot);
        assert!(mgr
            .ledger()
            .has(Transport::Wlan, RestrictionKind::FallbackOnDataConnectionFail));

        // max_fallbacks reached: further failures no longer arm it
        mgr.ledger
            .release(Transport::Wlan, RestrictionKind::FallbackOnDataConnectionFail);
        mgr.on_data_connection_changed(&failed, &snapshot);
        mgr.on_data_connection_changed(&failed, &snapshot);
        assert!(!mgr
            .ledger()
            .has(Transport::Wlan, RestrictionKind::FallbackOnDataConnectionFail));

        // a successful connection resets the exhaustion
        mgr.on_data_connection_changed(&connected(Transport::Wlan), &snapshot);
        mgr.on_data_connection_changed(&disconnected(Transport::Wlan), &snapshot);
        mgr.on_data_connection_changed(&failed, &snapshot);
        mgr.on_data_connection_changed(&failed, &snapshot);
        assert!(mgr
            .ledger()
            .has(Transport::Wlan, RestrictionKind::FallbackOnDataConnectionFail));
    }

    #[tokio::test(start_paused = true)]
    async fn it_arms_ims_fallback_from_the_unreg_table() {
        use crate::policy::parser::parse_fallback_rule;
        use crate::policy::store::FallbackRuleTable;

        let (mut mgr, _rx) = manager(SessionType::Ims);
        let mut snapshot = PolicySnapshot::default();
        snapshot.unreg_fallback = FallbackRuleTable::new(vec![
            parse_fallback_rule("cause=321~378, time=60000").unwrap(),
        ]);

        let unregistered = ImsStatus {
            transport: Transport::Wlan,
            state: ImsRegState::Unregistered,
            reason_code: Some(350),
        };
        mgr.on_ims_registration_changed(&unregistered, &snapshot);
        assert!(mgr
            .ledger()
            .has(Transport::Wlan, RestrictionKind::FallbackToWwanImsRegiFail));

        // registration success lifts it
        let registered = ImsStatus {
            transport: Transport::Wwan,
            state: ImsRegState::Registered,
            reason_code: None,
        };
        mgr.on_ims_registration_changed(&registered, &snapshot);
        assert!(!mgr
            .ledger()
            .has(Transport::Wlan, RestrictionKind::FallbackToWwanImsRegiFail));
    }

    #[tokio::test(start_paused = true)]
    async fn it_cancels_fallbacks_on_an_ims_incapable_cellular_an() {
        let (mut mgr, _rx) = manager(SessionType::Ims);
        let snapshot = PolicySnapshot::default();

        mgr.ledger.add(
            Transport::Wlan,
            RestrictionKind::FallbackToWwanImsRegiFail,
            ReleaseEvents::IMS_REGISTERED,
            Duration::from_secs(60),
        );

        assert!(mgr.on_cellular_an_changed(AccessNetwork::Utran, &snapshot));
        assert!(!mgr
            .ledger()
            .has(Transport::Wlan, RestrictionKind::FallbackToWwanImsRegiFail));
    }

    #[tokio::test(start_paused = true)]
    async fn it_blocks_iwlan_during_cs_calls_on_legacy_rats() {
        let (mut mgr, _rx) = manager(SessionType::Ims);
        let snapshot = PolicySnapshot::default();

        mgr.on_call_state_changed(CallState::Offhook, AccessNetwork::Utran, &snapshot);
        assert!(mgr
            .ledger()
            .has(Transport::Wlan, RestrictionKind::RestrictIwlanCsCall));

        mgr.on_call_state_changed(CallState::Idle, AccessNetwork::Utran, &snapshot);
        assert!(!mgr.ledger().is_restricted(Transport::Wlan));
    }

    #[tokio::test(start_paused = true)]
    async fn it_releases_the_srvcc_block_on_handover_failure() {
        let (mut mgr, _rx) = manager(SessionType::Ims);

        mgr.on_srvcc(SrvccState::Started);
        assert!(mgr
            .ledger()
            .has(Transport::Wlan, RestrictionKind::RestrictIwlanCsCall));

        mgr.on_srvcc(SrvccState::Failed);
        assert!(!mgr
            .ledger()
            .has(Transport::Wlan, RestrictionKind::RestrictIwlanCsCall));
    }

    #[tokio::test(start_paused = true)]
    async fn it_cools_the_non_preferred_side_down_on_mode_change() {
        let (mut mgr, _rx) = manager(SessionType::Ims);
        let mut snapshot = PolicySnapshot::default();
        snapshot.non_preferred_cooldown_wlan_ms = 5_000;

        mgr.on_wfc_preference_changed(
            WfcPreference::WifiPreferred,
            Transport::Wlan,
            &snapshot,
        );

        assert!(mgr
            .ledger()
            .has(Transport::Wwan, RestrictionKind::NonPreferredTransport));

        // a data call on the cooled side lifts it early
        mgr.on_data_connection_changed(&connected(Transport::Wwan), &snapshot);
        assert!(!mgr
            .ledger()
            .has(Transport::Wwan, RestrictionKind::NonPreferredTransport));
    }
}
