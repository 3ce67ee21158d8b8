use std::time::Duration;

use heatpump_sync::protocol::decode_snapshot;
use heatpump_sync::{
    Device, Error, FieldId, FieldState, FieldsConfig, NoticeKind, Reconciler, ReconcilerTiming,
    SnapshotOutcome,
};
use serde_json::json;
use tokio::time::Instant;

fn reconciler() -> Reconciler {
    Reconciler::new(FieldsConfig::default().specs(), ReconcilerTiming::default())
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[test]
fn slider_drag_waits_for_device_to_catch_up() {
    let mut r = reconciler();
    let t0 = Instant::now();
    let field = FieldId::ThermostatTarget;

    assert_eq!(r.on_poll_snapshot(field, 21.0, t0).unwrap(), SnapshotOutcome::Rendered);
    assert_eq!(r.render_value(field), Some(21.0));

    r.begin_interaction(field).unwrap();
    assert_eq!(r.record_intent(field, 22.5, true, t0).unwrap(), 22.5);
    r.release_interaction_lock(field, t0).unwrap();
    r.fire_due(t0 + ms(100));
    assert_eq!(r.state(field), FieldState::Pending);

    assert_eq!(
        r.on_poll_snapshot(field, 22.3, t0 + ms(500)).unwrap(),
        SnapshotOutcome::Applying
    );
    assert_eq!(r.render_value(field), Some(22.5));

    assert_eq!(
        r.on_poll_snapshot(field, 22.5, t0 + ms(1000)).unwrap(),
        SnapshotOutcome::CaughtUp
    );
    let state = r.field(field).unwrap();
    assert_eq!(state.pending_value, None);
    assert_eq!(state.confirmed_value, Some(22.5));
    assert_eq!(r.render_value(field), Some(22.5));
    assert_eq!(r.state(field), FieldState::Idle);
}

#[test]
fn polls_never_move_a_held_slider() {
    let mut r = reconciler();
    let t0 = Instant::now();
    let field = FieldId::ThermostatTarget;
    r.on_poll_snapshot(field, 21.0, t0).unwrap();

    r.begin_interaction(field).unwrap();
    r.record_intent(field, 22.0, true, t0).unwrap();

    for (i, polled) in [19.0, 20.5, 23.0, 22.0, 24.0, 18.0].into_iter().enumerate() {
        r.on_poll_snapshot(field, polled, t0 + ms(100 * i as u64)).unwrap();
        assert_eq!(r.render_value(field), Some(22.0), "moved after poll {polled}");
    }
    assert!(r.field(field).unwrap().interaction_lock);
}

#[test]
fn held_slider_without_intent_keeps_its_value() {
    let mut r = reconciler();
    let t0 = Instant::now();
    let field = FieldId::FlowTarget;
    r.on_poll_snapshot(field, 35.0, t0).unwrap();
    r.begin_interaction(field).unwrap();

    assert_eq!(r.on_poll_snapshot(field, 38.0, t0).unwrap(), SnapshotOutcome::Held);
    assert_eq!(r.render_value(field), Some(35.0));
    assert_eq!(r.field(field).unwrap().confirmed_value, Some(38.0));

    r.release_interaction_lock(field, t0).unwrap();
    r.fire_due(t0 + ms(100));
    assert_eq!(r.render_value(field), Some(38.0));
}

#[test]
fn pending_clears_within_one_matching_snapshot() {
    let mut r = reconciler();
    let t0 = Instant::now();
    let field = FieldId::FlowTarget;
    r.on_poll_snapshot(field, 35.0, t0).unwrap();
    r.record_intent(field, 45.0, false, t0).unwrap();

    for polled in [35.0, 40.0, 44.5] {
        r.on_poll_snapshot(field, polled, t0 + ms(200)).unwrap();
        assert_eq!(r.render_value(field), Some(45.0));
    }

    r.on_poll_snapshot(field, 44.95, t0 + ms(400)).unwrap();
    assert_eq!(r.field(field).unwrap().pending_value, None);
    assert_eq!(r.render_value(field), Some(44.95));

    r.on_poll_snapshot(field, 45.0, t0 + ms(600)).unwrap();
    assert_eq!(r.render_value(field), r.field(field).unwrap().confirmed_value);
}

#[test]
fn dispatch_failure_always_returns_to_idle() {
    let t0 = Instant::now();
    let field = FieldId::AutoOffset;

    let setups = [
        "idle",
        "interacting",
        "pending",
        "interacting+pending",
        "releasing",
        "debouncing",
    ];

    for name in setups {
        let mut r = reconciler();
        r.on_poll_snapshot(field, 0.0, t0).unwrap();
        match name {
            "interacting" => r.begin_interaction(field).unwrap(),
            "pending" => {
                r.record_intent(field, 3.0, false, t0).unwrap();
            }
            "interacting+pending" => {
                r.record_intent(field, -2.0, true, t0).unwrap();
            }
            "releasing" => {
                r.record_intent(field, 1.0, true, t0).unwrap();
                r.release_interaction_lock(field, t0).unwrap();
            }
            "debouncing" => {
                r.adjust(field, 2.0, t0).unwrap();
            }
            _ => {}
        }

        let notice = r.on_dispatch_failure(field, "connection refused");
        assert_eq!(notice.kind, NoticeKind::DispatchFailed, "{name}");
        assert_eq!(notice.field, field);

        let state = r.field(field).unwrap();
        assert_eq!(state.pending_value, None, "{name}");
        assert!(!state.interaction_lock, "{name}");
        assert!(state.debounce_session().is_none(), "{name}");
        assert_eq!(r.state(field), FieldState::Idle, "{name}");
        assert_eq!(r.render_value(field), Some(0.0), "{name}");
        assert!(r.fire_due(t0 + Duration::from_secs(10)).is_empty(), "{name}");
    }
}

#[test]
fn failure_on_one_field_leaves_others_alone() {
    let mut r = reconciler();
    let t0 = Instant::now();
    r.on_poll_snapshot(FieldId::Power, 0.0, t0).unwrap();
    r.on_poll_snapshot(FieldId::AutoOffset, 0.0, t0).unwrap();
    r.record_intent(FieldId::Power, 1.0, false, t0).unwrap();
    r.record_intent(FieldId::AutoOffset, 2.0, false, t0).unwrap();

    r.on_dispatch_failure(FieldId::AutoOffset, "HTTP 500");
    assert_eq!(r.field(FieldId::Power).unwrap().pending_value, Some(1.0));
    assert_eq!(r.render_value(FieldId::Power), Some(1.0));
}

#[test]
fn failed_power_on_reverts_switch() {
    let mut r = reconciler();
    let t0 = Instant::now();
    r.on_poll_snapshot(FieldId::Power, 0.0, t0).unwrap();

    r.record_intent(FieldId::Power, 1.0, false, t0).unwrap();
    assert_eq!(r.render_value(FieldId::Power), Some(1.0));
    assert_eq!(r.state(FieldId::Power), FieldState::Pending);

    let notice = r.on_dispatch_failure(FieldId::Power, "error sending request");
    assert!(notice.message.contains("error sending request"));
    assert_eq!(r.render_value(FieldId::Power), Some(0.0));
}

#[test]
fn offset_presses_coalesce_into_one_intent() {
    let mut r = reconciler();
    let t0 = Instant::now();
    let field = FieldId::AutoOffset;
    r.on_poll_snapshot(field, 0.0, t0).unwrap();

    assert_eq!(r.adjust(field, 2.0, t0).unwrap(), 2.0);
    assert_eq!(r.render_value(field), Some(2.0));
    assert_eq!(r.adjust(field, 3.0, t0 + ms(1000)).unwrap(), 5.0);
    assert_eq!(r.render_value(field), Some(5.0));
    assert_eq!(r.state(field), FieldState::Interacting);

    // the second press restarted the window
    assert!(r.fire_due(t0 + ms(2500)).is_empty());

    let intents = r.fire_due(t0 + ms(3000));
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].field, field);
    assert_eq!(intents[0].value, 5.0);
    assert_eq!(r.field(field).unwrap().pending_value, Some(5.0));
    assert_eq!(r.state(field), FieldState::Pending);
}

#[test]
fn many_steps_yield_one_clamped_intent() {
    let mut r = reconciler();
    let t0 = Instant::now();
    let field = FieldId::ThermostatTarget;
    r.on_poll_snapshot(field, 20.0, t0).unwrap();

    for i in 0..10 {
        r.adjust(field, 0.5, t0 + ms(100 * i)).unwrap();
    }
    assert_eq!(r.render_value(field), Some(24.0));
    assert_eq!(r.field(field).unwrap().debounce_session().unwrap().adjustments, 10);

    let intents = r.fire_due(t0 + Duration::from_secs(5));
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].value, 24.0);
    assert!(r.fire_due(t0 + Duration::from_secs(10)).is_empty());
}

#[test]
fn offset_steps_clamp_at_range_edge() {
    let mut r = reconciler();
    let t0 = Instant::now();
    r.on_poll_snapshot(FieldId::AutoOffset, 4.0, t0).unwrap();
    r.adjust(FieldId::AutoOffset, 2.0, t0).unwrap();
    r.adjust(FieldId::AutoOffset, 3.0, t0).unwrap();
    let intents = r.fire_due(t0 + Duration::from_secs(2));
    assert_eq!(intents[0].value, 5.0);
}

#[test]
fn adjust_seeds_from_pending_value() {
    let mut r = reconciler();
    let t0 = Instant::now();
    r.on_poll_snapshot(FieldId::AutoOffset, 0.0, t0).unwrap();
    r.record_intent(FieldId::AutoOffset, 2.0, false, t0).unwrap();
    assert_eq!(r.adjust(FieldId::AutoOffset, 1.0, t0).unwrap(), 3.0);
}

#[test]
fn poll_during_debounce_is_held() {
    let mut r = reconciler();
    let t0 = Instant::now();
    r.on_poll_snapshot(FieldId::AutoOffset, 0.0, t0).unwrap();
    r.adjust(FieldId::AutoOffset, 3.0, t0).unwrap();
    assert_eq!(
        r.on_poll_snapshot(FieldId::AutoOffset, 0.0, t0 + ms(500)).unwrap(),
        SnapshotOutcome::Held
    );
    assert_eq!(r.render_value(FieldId::AutoOffset), Some(3.0));
}

#[test]
fn out_of_range_intents_are_clamped_idempotently() {
    let mut r = reconciler();
    let t0 = Instant::now();
    let spec = r.field(FieldId::FlowTarget).unwrap().spec.clone();

    let mut v = -100.0;
    while v < 200.0 {
        let pending = r.record_intent(FieldId::FlowTarget, v, false, t0).unwrap();
        assert!((20.0..=60.0).contains(&pending), "{v} -> {pending}");
        assert_eq!(spec.normalize(FieldId::FlowTarget, pending).unwrap(), pending);
        v += 7.3;
    }
}

#[test]
fn discrete_fields_reject_unknown_states() {
    let mut r = reconciler();
    let t0 = Instant::now();
    let err = r.record_intent(FieldId::LgMode, 2.0, false, t0).unwrap_err();
    assert!(matches!(err, Error::Validation { field: FieldId::LgMode, .. }));
    assert_eq!(r.field(FieldId::LgMode).unwrap().pending_value, None);

    assert!(r.record_intent(FieldId::Power, 0.5, false, t0).is_err());
    assert_eq!(r.record_intent(FieldId::ThermostatMode, 3.0, false, t0).unwrap(), 3.0);
}

#[test]
fn discrete_confirmation_requires_exact_match() {
    let mut r = reconciler();
    let t0 = Instant::now();
    r.on_poll_snapshot(FieldId::LgMode, 3.0, t0).unwrap();
    r.record_intent(FieldId::LgMode, 4.0, false, t0).unwrap();
    assert_eq!(
        r.on_poll_snapshot(FieldId::LgMode, 3.0, t0 + ms(500)).unwrap(),
        SnapshotOutcome::Applying
    );
    assert_eq!(
        r.on_poll_snapshot(FieldId::LgMode, 4.0, t0 + ms(1000)).unwrap(),
        SnapshotOutcome::CaughtUp
    );
}

#[test]
fn unconfirmed_intent_expires() {
    let timing = ReconcilerTiming {
        pending_timeout: Duration::from_secs(5),
        ..ReconcilerTiming::default()
    };
    let mut r = Reconciler::new(FieldsConfig::default().specs(), timing);
    assert_eq!(r.timing().pending_timeout, Duration::from_secs(5));
    let t0 = Instant::now();
    r.on_poll_snapshot(FieldId::FlowTarget, 40.0, t0).unwrap();
    r.record_intent(FieldId::FlowTarget, 45.0, false, t0).unwrap();

    assert_eq!(
        r.on_poll_snapshot(FieldId::FlowTarget, 40.0, t0 + Duration::from_secs(1)).unwrap(),
        SnapshotOutcome::Applying
    );
    assert_eq!(
        r.on_poll_snapshot(FieldId::FlowTarget, 40.0, t0 + Duration::from_secs(6)).unwrap(),
        SnapshotOutcome::Expired
    );
    assert_eq!(r.render_value(FieldId::FlowTarget), Some(40.0));
    assert_eq!(r.state(FieldId::FlowTarget), FieldState::Idle);
}

#[test]
fn server_default_does_not_move_a_held_slider() {
    let mut r = reconciler();
    let t0 = Instant::now();
    r.on_poll_snapshot(FieldId::FlowTarget, 35.0, t0).unwrap();
    r.begin_interaction(FieldId::FlowTarget).unwrap();

    r.adopt_server_value(FieldId::FlowTarget, 40.0, t0).unwrap();
    assert_eq!(r.render_value(FieldId::FlowTarget), Some(35.0));
    assert_eq!(r.state(FieldId::FlowTarget), FieldState::InteractingPending);
}

#[test]
fn server_default_renders_when_idle() {
    let mut r = reconciler();
    let t0 = Instant::now();
    r.on_poll_snapshot(FieldId::FlowTarget, 35.0, t0).unwrap();
    r.adopt_server_value(FieldId::FlowTarget, 40.0, t0).unwrap();
    assert_eq!(r.render_value(FieldId::FlowTarget), Some(40.0));
    r.on_poll_snapshot(FieldId::FlowTarget, 35.0, t0 + ms(500)).unwrap();
    assert_eq!(r.render_value(FieldId::FlowTarget), Some(40.0));
}

#[test]
fn preview_without_commit_falls_back_after_release() {
    let mut r = reconciler();
    let t0 = Instant::now();
    let field = FieldId::ThermostatTarget;
    r.on_poll_snapshot(field, 21.0, t0).unwrap();

    r.begin_interaction(field).unwrap();
    assert_eq!(r.preview(field, 23.2).unwrap(), 23.0);
    assert_eq!(r.render_value(field), Some(23.0));
    assert_eq!(r.field(field).unwrap().pending_value, None);
    assert_eq!(r.state(field), FieldState::Interacting);

    r.release_interaction_lock(field, t0).unwrap();
    assert!(r.fire_due(t0 + ms(100)).is_empty());
    assert_eq!(r.render_value(field), Some(21.0));
    assert_eq!(r.state(field), FieldState::Idle);
}

/// Shape of `GET /status` as served by the heat pump service: the LG mode
/// comes as a `mode_setting` label rather than a register value.
fn service_status(mode_setting: &str, with_offset: bool) -> serde_json::Value {
    let mut body = json!({
        "is_on": true,
        "water_pump_running": true,
        "compressor_running": true,
        "operating_mode": "Heating",
        "mode_setting": mode_setting,
        "target_temperature": 40.0,
        "flow_temperature": 38.0,
        "return_temperature": 34.0,
        "flow_rate": 0.0,
        "outdoor_temperature": 4.0,
        "water_pressure": 0.0,
        "error_code": 0,
        "has_error": false
    });
    if with_offset {
        body["auto_mode_offset"] = json!(0);
    }
    body
}

#[test]
fn lg_mode_confirms_from_mode_setting_label() {
    let mut r = reconciler();
    let t0 = Instant::now();
    let before = decode_snapshot(Device::HeatPump, service_status("Auto", true)).unwrap();
    r.apply_snapshot(&before, t0);
    assert_eq!(r.render_value(FieldId::LgMode), Some(3.0));

    r.record_intent(FieldId::LgMode, 4.0, false, t0).unwrap();
    let after = decode_snapshot(Device::HeatPump, service_status("Heat", true)).unwrap();
    let outcomes = r.apply_snapshot(&after, t0 + ms(500));
    assert!(outcomes.contains(&(FieldId::LgMode, SnapshotOutcome::CaughtUp)));
    assert_eq!(r.state(FieldId::LgMode), FieldState::Idle);
}

#[test]
fn pending_expires_when_snapshot_omits_the_field() {
    let mut r = reconciler();
    let t0 = Instant::now();
    let snapshot = decode_snapshot(Device::HeatPump, service_status("Auto", false)).unwrap();
    r.record_intent(FieldId::AutoOffset, 2.0, false, t0).unwrap();
    r.record_intent(FieldId::AiMode, 1.0, false, t0).unwrap();
    r.record_intent(FieldId::ThermostatTarget, 22.0, false, t0).unwrap();

    assert!(
        !r.apply_snapshot(&snapshot, t0 + Duration::from_secs(5))
            .iter()
            .any(|(_, o)| *o == SnapshotOutcome::Expired)
    );
    assert_eq!(r.state(FieldId::AutoOffset), FieldState::Pending);

    let mut expired: Vec<FieldId> = r
        .apply_snapshot(&snapshot, t0 + Duration::from_secs(120))
        .into_iter()
        .filter(|(_, o)| *o == SnapshotOutcome::Expired)
        .map(|(f, _)| f)
        .collect();
    expired.sort();
    assert_eq!(expired, vec![FieldId::AutoOffset, FieldId::AiMode]);
    assert_eq!(r.state(FieldId::AutoOffset), FieldState::Idle);
    assert_eq!(r.state(FieldId::AiMode), FieldState::Idle);
    // a heat pump snapshot says nothing about the thermostat
    assert_eq!(r.state(FieldId::ThermostatTarget), FieldState::Pending);
}

#[test]
fn slider_grabbed_before_first_poll_holds_first_value() {
    let mut r = reconciler();
    let t0 = Instant::now();
    let field = FieldId::FlowTarget;
    r.begin_interaction(field).unwrap();
    assert_eq!(r.render_value(field), None);

    r.on_poll_snapshot(field, 35.0, t0).unwrap();
    assert_eq!(r.render_value(field), Some(35.0));
    r.on_poll_snapshot(field, 38.0, t0 + ms(500)).unwrap();
    assert_eq!(r.render_value(field), Some(35.0));

    r.release_interaction_lock(field, t0 + ms(600)).unwrap();
    r.fire_due(t0 + ms(700));
    assert_eq!(r.render_value(field), Some(38.0));
}
