use crate::channel::ResultChannel;
use crate::collaborators::{CarrierBundle, QualityMonitor};
use crate::evaluator::{AccessNetworkEvaluator, EvaluatorHandle};
use crate::policy::store::CarrierPolicyStore;
use crate::Tasks;
use color_eyre::Result;
use qnsd_events::{CarrierId, SessionType, SlotId};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// A running engine for one slot: one evaluator task per session, the shared
/// policy store and the result channel consumers subscribe on.
pub struct Engine {
    pub tasks: Tasks,
    handles: Vec<EvaluatorHandle>,
    pub channel: Arc<ResultChannel>,
    pub store: Arc<CarrierPolicyStore>,
}

impl Engine {
    pub fn handle(&self, session: SessionType) -> Option<&EvaluatorHandle> {
        self.handles.iter().find(|h| h.session() == session)
    }

    pub fn handles(&self) -> &[EvaluatorHandle] {
        &self.handles
    }

    pub fn close_all(&self) {
        for handle in &self.handles {
            handle.close();
        }
    }
}

#[bon::builder(finish_fn = run)]
pub async fn program(
    slot: SlotId,
    sessions: Vec<SessionType>,
    wifi_monitor: Arc<dyn QualityMonitor>,
    cellular_monitor: Arc<dyn QualityMonitor>,
    asset_defaults: Option<CarrierBundle>,
) -> Result<Engine> {
    let store = Arc::new(CarrierPolicyStore::new());
    let channel = ResultChannel::new();
    let defaults = asset_defaults.unwrap_or_else(|| baseline_policy(slot));

    info!(
        "qnsd starting on slot {slot} for sessions: {}",
        sessions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    // seed the store so evaluators have a policy before the first carrier
    // config delivery
    store.reload(&CarrierBundle::new(slot, CarrierId::Unknown), &defaults);

    let mut tasks = Vec::new();
    let mut handles = Vec::new();

    for session in sessions {
        let evaluator = AccessNetworkEvaluator::new(
            slot,
            session,
            Arc::clone(&store),
            Arc::clone(&channel),
        )
        .with_wifi_monitor(Arc::clone(&wifi_monitor))
        .with_cellular_monitor(Arc::clone(&cellular_monitor))
        .with_asset_defaults(defaults.clone());

        handles.push(evaluator.handle());
        tasks.push(evaluator.spawn());
    }

    Ok(Engine {
        tasks,
        handles,
        channel,
        store,
    })
}

/// Baseline policy applied until a carrier bundle arrives: handovers
/// permitted in both directions, stock signal bands.
pub fn baseline_policy(slot: SlotId) -> CarrierBundle {
    CarrierBundle::new(slot, CarrierId::Unknown)
        .with(
            "handover_policy",
            json!([
                "source=EUTRAN|NGRAN|UTRAN|GERAN, target=IWLAN, type=allowed, capabilities=IMS|EMERGENCY|MMS|XCAP|CBS",
                "source=IWLAN, target=EUTRAN|NGRAN|UTRAN|GERAN, type=allowed, capabilities=IMS|EMERGENCY|MMS|XCAP|CBS",
            ]),
        )
        .with("iwlan_rssi_thresholds_idle", json!([-65, -75]))
        .with("iwlan_rssi_thresholds_voice", json!([-60, -70]))
        .with("eutran_rsrp_thresholds_idle", json!([-100, -115, -120]))
        .with("eutran_rsrp_thresholds_voice", json!([-100, -115, -120]))
        .with("guard_timer_enabled", json!(true))
        .with("guard_timer_wwan_ms", json!(30_000))
        .with("guard_timer_wlan_ms", json!(30_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StaticQualityMonitor;
    use qnsd_events::{
        AccessNetwork, IwlanStatus, MeasurementKind, TelephonyInfo, UserSettings,
        WfcPreference,
    };

    #[tokio::test(start_paused = true)]
    async fn it_runs_one_evaluator_per_session() {
        // Arrange
        let wifi = Arc::new(StaticQualityMonitor::new());
        let cellular = Arc::new(StaticQualityMonitor::new());
        wifi.set_value(AccessNetwork::Iwlan, MeasurementKind::Rssi, -60);

        let engine = program()
            .slot(SlotId(0))
            .sessions(vec![SessionType::Ims, SessionType::Mms])
            .wifi_monitor(Arc::clone(&wifi) as Arc<dyn QualityMonitor>)
            .cellular_monitor(Arc::clone(&cellular) as Arc<dyn QualityMonitor>)
            .run()
            .await
            .unwrap();

        let (_id, results) = engine.channel.subscribe();

        // Act: both sessions see the same world
        for handle in engine.handles() {
            handle.update_wfc_settings(UserSettings {
                wfc_enabled_home: true,
                wfc_mode_home: WfcPreference::WifiPreferred,
                ..UserSettings::default()
            });
            handle.update_iwlan_status(IwlanStatus {
                available: true,
                in_cross_sim: false,
            });
            handle.update_telephony_info(TelephonyInfo {
                cellular_available: true,
                data_network_type: AccessNetwork::Eutran,
                ..TelephonyInfo::default()
            });
        }
        tokio::task::yield_now().await;
        tokio::time::advance(std::time::Duration::from_millis(10)).await;

        engine.close_all();
        for task in engine.tasks {
            task.await.unwrap().unwrap();
        }

        // Assert: each session published an IWLAN recommendation
        let published: Vec<_> = results.drain().collect();
        assert!(published
            .iter()
            .any(|info| info.session == SessionType::Ims
                && info.access_networks == vec![AccessNetwork::Iwlan]));
        assert!(published
            .iter()
            .any(|info| info.session == SessionType::Mms
                && info.access_networks == vec![AccessNetwork::Iwlan]));
    }
}
