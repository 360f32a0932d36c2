//! Per-transport restrictions with independent release conditions and
//! monotonic deadlines.

pub mod manager;

pub use manager::RestrictionManager;

use bitflags::bitflags;
use qnsd_events::Transport;
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

bitflags! {
    /// Events that can release a restriction entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReleaseEvents: u16 {
        const CALL_END = 1;
        const DISCONNECT = 1 << 1;
        const WFC_OFF = 1 << 2;
        const WIFI_OFF = 1 << 3;
        const AIRPLANE_ON = 1 << 4;
        const IMS_REGISTERED = 1 << 5;
        const HANDOVER_COMPLETE_TO_OTHER_SIDE = 1 << 6;
        const DATA_CONNECTED = 1 << 7;
        const HANDOVER_FAILED = 1 << 8;
    }
}

/// The orthogonal restriction families. At most one entry of each kind is
/// active per transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestrictionKind {
    /// Post-handover hysteresis barring a bounce back to the source side.
    Guarding,
    /// Imposed by the data subsystem with an absolute deadline.
    Throttling,
    /// Penalty after the RTP monitor flags the active call as degraded.
    RtpLowQuality,
    /// IWLAN pinned off for the rest of the call after too many bounces.
    RestrictIwlanInCall,
    /// IWLAN blocked during a CS voice call / SRVCC handover.
    RestrictIwlanCsCall,
    /// Cooldown discouraging the non-preferred side after a mode change.
    NonPreferredTransport,
    /// Drive traffic back to cellular after an IMS registration failure.
    FallbackToWwanImsRegiFail,
    /// Drive traffic to the other side after initial PDN bring-up failures.
    FallbackOnDataConnectionFail,
}

impl RestrictionKind {
    /// Kinds that still permit the transport when the other side is itself
    /// unusable.
    pub fn allows_single_transport(self) -> bool {
        matches!(
            self,
            RestrictionKind::RestrictIwlanInCall
                | RestrictionKind::FallbackToWwanImsRegiFail
                | RestrictionKind::FallbackOnDataConnectionFail
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    /// `None` is an infinite deadline: released only by events.
    deadline: Option<Instant>,
    releases: ReleaseEvents,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

/// The per-transport restriction sets. All deadline reads are lazy against
/// the monotonic clock, so an entry is gone the instant its deadline passes
/// even before the timer fires.
#[derive(Debug, Default)]
pub struct RestrictionLedger {
    entries: HashMap<Transport, HashMap<RestrictionKind, Entry>>,
}

impl RestrictionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert an entry. `duration` zero means an infinite deadline released
    /// only by `releases`; zero with an empty release mask is a no-op. An
    /// existing entry is never shortened: the later deadline wins and the
    /// release masks are unioned.
    pub fn add(
        &mut self,
        transport: Transport,
        kind: RestrictionKind,
        releases: ReleaseEvents,
        duration: Duration,
    ) -> bool {
        if transport == Transport::Invalid {
            return false;
        }
        if duration.is_zero() && releases.is_empty() {
            return false;
        }

        let deadline = (!duration.is_zero()).then(|| Instant::now() + duration);
        let slot = self.entries.entry(transport).or_default();

        match slot.get_mut(&kind) {
            Some(existing) => {
                existing.deadline = match (existing.deadline, deadline) {
                    (Some(old), Some(new)) => Some(old.max(new)),
                    // infinite beats any finite deadline
                    _ => None,
                };
                existing.releases |= releases;
            }
            None => {
                slot.insert(kind, Entry { deadline, releases });
            }
        }

        true
    }

    pub fn release(&mut self, transport: Transport, kind: RestrictionKind) -> bool {
        self.entries
            .get_mut(&transport)
            .and_then(|slot| slot.remove(&kind))
            .is_some()
    }

    /// Remove every entry whose release mask contains `event`.
    pub fn process_release_event(
        &mut self,
        transport: Transport,
        event: ReleaseEvents,
    ) -> bool {
        let Some(slot) = self.entries.get_mut(&transport) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|_, entry| !entry.releases.intersects(event));
        before != slot.len()
    }

    pub fn is_restricted(&self, transport: Transport) -> bool {
        self.active_kinds(transport).next().is_some()
    }

    pub fn is_restricted_except_guarding(&self, transport: Transport) -> bool {
        self.active_kinds(transport)
            .any(|kind| kind != RestrictionKind::Guarding)
    }

    pub fn has(&self, transport: Transport, kind: RestrictionKind) -> bool {
        let now = Instant::now();
        self.entries
            .get(&transport)
            .and_then(|slot| slot.get(&kind))
            .is_some_and(|entry| !entry.expired(now))
    }

    /// The transport stays usable despite restrictions when every active
    /// entry is of a kind that tolerates single-transport operation. The
    /// caller still has to establish that the other side is unusable.
    pub fn allowed_on_single_transport(&self, transport: Transport) -> bool {
        self.active_kinds(transport)
            .all(|kind| kind.allows_single_transport())
    }

    /// Deadline of the entry, if it is active and finite.
    pub fn deadline(
        &self,
        transport: Transport,
        kind: RestrictionKind,
    ) -> Option<Instant> {
        let now = Instant::now();
        self.entries
            .get(&transport)
            .and_then(|slot| slot.get(&kind))
            .filter(|entry| !entry.expired(now))
            .and_then(|entry| entry.deadline)
    }

    /// Drop entries whose deadline has passed. Returns true when anything
    /// was removed.
    pub fn purge_expired(&mut self) -> bool {
        let now = Instant::now();
        let mut purged = false;
        for slot in self.entries.values_mut() {
            let before = slot.len();
            slot.retain(|_, entry| !entry.expired(now));
            purged |= before != slot.len();
        }
        purged
    }

    fn active_kinds(
        &self,
        transport: Transport,
    ) -> impl Iterator<Item = RestrictionKind> + '_ {
        let now = Instant::now();
        self.entries
            .get(&transport)
            .into_iter()
            .flat_map(move |slot| {
                slot.iter()
                    .filter(move |(_, entry)| !entry.expired(now))
                    .map(|(kind, _)| *kind)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn it_honours_deadlines_to_the_millisecond() {
        let mut ledger = RestrictionLedger::new();
        ledger.add(
            Transport::Wwan,
            RestrictionKind::Guarding,
            ReleaseEvents::DISCONNECT,
            Duration::from_millis(500),
        );

        assert!(ledger.has(Transport::Wwan, RestrictionKind::Guarding));

        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(ledger.has(Transport::Wwan, RestrictionKind::Guarding));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!ledger.has(Transport::Wwan, RestrictionKind::Guarding));
        assert!(!ledger.is_restricted(Transport::Wwan));
    }

    #[tokio::test(start_paused = true)]
    async fn it_never_shortens_an_existing_entry() {
        let mut ledger = RestrictionLedger::new();
        ledger.add(
            Transport::Wlan,
            RestrictionKind::RtpLowQuality,
            ReleaseEvents::CALL_END,
            Duration::from_secs(60),
        );
        // a shorter re-add keeps the later deadline
        ledger.add(
            Transport::Wlan,
            RestrictionKind::RtpLowQuality,
            ReleaseEvents::DISCONNECT,
            Duration::from_secs(10),
        );

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(ledger.has(Transport::Wlan, RestrictionKind::RtpLowQuality));

        // the release masks were unioned
        assert!(ledger
            .process_release_event(Transport::Wlan, ReleaseEvents::DISCONNECT));
        assert!(!ledger.has(Transport::Wlan, RestrictionKind::RtpLowQuality));
    }

    #[tokio::test(start_paused = true)]
    async fn it_keeps_infinite_entries_until_released() {
        let mut ledger = RestrictionLedger::new();
        ledger.add(
            Transport::Wlan,
            RestrictionKind::RestrictIwlanInCall,
            ReleaseEvents::CALL_END,
            Duration::ZERO,
        );

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(ledger.has(Transport::Wlan, RestrictionKind::RestrictIwlanInCall));

        ledger.process_release_event(Transport::Wlan, ReleaseEvents::CALL_END);
        assert!(!ledger.is_restricted(Transport::Wlan));
    }

    #[test]
    fn it_ignores_invalid_transports_and_empty_adds() {
        let mut ledger = RestrictionLedger::new();

        assert!(!ledger.add(
            Transport::Invalid,
            RestrictionKind::Guarding,
            ReleaseEvents::DISCONNECT,
            Duration::from_secs(1),
        ));
        assert!(!ledger.is_restricted(Transport::Invalid));

        // zero duration with no release events is a no-op
        assert!(!ledger.add(
            Transport::Wwan,
            RestrictionKind::Guarding,
            ReleaseEvents::empty(),
            Duration::ZERO,
        ));
        assert!(!ledger.is_restricted(Transport::Wwan));
    }

    #[tokio::test(start_paused = true)]
    async fn it_separates_guarding_from_other_restrictions() {
        let mut ledger = RestrictionLedger::new();
        ledger.add(
            Transport::Wwan,
            RestrictionKind::Guarding,
            ReleaseEvents::DISCONNECT,
            Duration::from_secs(90),
        );

        assert!(ledger.is_restricted(Transport::Wwan));
        assert!(!ledger.is_restricted_except_guarding(Transport::Wwan));

        ledger.add(
            Transport::Wwan,
            RestrictionKind::Throttling,
            ReleaseEvents::empty(),
            Duration::from_secs(10),
        );
        assert!(ledger.is_restricted_except_guarding(Transport::Wwan));
    }

    #[tokio::test(start_paused = true)]
    async fn it_tracks_the_single_transport_allow_list() {
        let mut ledger = RestrictionLedger::new();
        ledger.add(
            Transport::Wlan,
            RestrictionKind::FallbackToWwanImsRegiFail,
            ReleaseEvents::IMS_REGISTERED,
            Duration::from_secs(60),
        );
        assert!(ledger.allowed_on_single_transport(Transport::Wlan));

        ledger.add(
            Transport::Wlan,
            RestrictionKind::RtpLowQuality,
            ReleaseEvents::CALL_END,
            Duration::from_secs(60),
        );
        assert!(!ledger.allowed_on_single_transport(Transport::Wlan));
    }

    #[tokio::test(start_paused = true)]
    async fn it_releases_only_matching_masks() {
        let mut ledger = RestrictionLedger::new();
        ledger.add(
            Transport::Wlan,
            RestrictionKind::RtpLowQuality,
            ReleaseEvents::CALL_END,
            Duration::from_secs(60),
        );
        ledger.add(
            Transport::Wlan,
            RestrictionKind::NonPreferredTransport,
            ReleaseEvents::DATA_CONNECTED,
            Duration::from_secs(60),
        );

        ledger.process_release_event(Transport::Wlan, ReleaseEvents::CALL_END);

        assert!(!ledger.has(Transport::Wlan, RestrictionKind::RtpLowQuality));
        assert!(ledger.has(Transport::Wlan, RestrictionKind::NonPreferredTransport));
    }
}
