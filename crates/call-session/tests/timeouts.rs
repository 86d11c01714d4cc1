//! Timers evaluated during drive steps, and transport-level failures

mod common;

use common::*;
use pretty_assertions::assert_eq;

use rvoip_call_session::{
    CallLogStatus, CallState, DialogId, FinalResponse, MediaEvent, MediaParameters,
    ReasonKind, SessionConfig, SignalingEvent, ToneEvent,
};

fn config(adjust: impl FnOnce(&mut SessionConfig)) -> SessionConfig {
    let mut config = quiet_config();
    adjust(&mut config);
    config
}

#[test]
fn test_unanswered_incoming_call_times_out() {
    let mut endpoint = Endpoint::scripted(config(|c| c.incoming_timeout_secs = 30));
    let dialog = DialogId::new();
    endpoint.inject(
        dialog,
        incoming_invite(Some(peer_offer(&MediaParameters::default()))),
    );
    endpoint.step();
    let id = endpoint.only_session();
    let handle = endpoint.handle(&id);

    endpoint.advance(29);
    assert_eq!(handle.state(), CallState::IncomingReceived);

    endpoint.advance(1);
    assert_eq!(handle.state(), CallState::Released);
    assert_eq!(endpoint.last_final().code, 486);
    let reason = handle.reason().unwrap();
    assert_eq!(reason.kind, ReasonKind::NotAnswered);
    assert_eq!(reason.code, 486);
    assert_eq!(endpoint.registry.call_logs().unwrap()[0].status, CallLogStatus::Missed);
    assert_eq!(
        endpoint.listener.tones(&id),
        vec![ToneEvent::RingtoneStarted, ToneEvent::RingtoneStopped]
    );
}

#[test]
fn test_missing_media_ends_established_call() {
    let mut endpoint = Endpoint::scripted(config(|c| c.no_media_timeout_secs = 30));
    let (call, _dialog) = established_outgoing(&mut endpoint);

    endpoint.advance(20);
    endpoint.inject_media(call.id(), MediaEvent::Activity);
    endpoint.step();
    endpoint.advance(20);
    assert_eq!(call.state(), CallState::StreamsRunning);

    endpoint.advance(10);
    assert_eq!(call.state(), CallState::Released);
    assert_eq!(endpoint.sent_names().last(), Some(&"BYE"));
    let reason = call.reason().unwrap();
    assert_eq!(reason.kind, ReasonKind::IOError);
    assert_eq!(reason.phrase, "No RTP received");
    assert_eq!(endpoint.registry.call_logs().unwrap()[0].status, CallLogStatus::Success);
}

#[test]
fn test_held_call_uses_hold_window() {
    let mut endpoint = Endpoint::scripted(config(|c| {
        c.no_media_timeout_secs = 30;
        c.no_media_on_hold_timeout_secs = 0;
    }));
    let (call, dialog) = established_outgoing(&mut endpoint);

    endpoint.registry.pause(call.id()).unwrap();
    let offer = endpoint.last_offer();
    endpoint.inject(
        dialog,
        update_response("a", FinalResponse::ok(Some(peer_answer(&offer)))),
    );
    endpoint.step();
    assert_eq!(call.state(), CallState::Paused);

    endpoint.advance(300);
    assert_eq!(call.state(), CallState::Paused);
}

#[test]
fn test_unacknowledged_answer_is_hung_up() {
    let mut endpoint = Endpoint::scripted(quiet_config());
    let dialog = DialogId::new();
    endpoint.inject(
        dialog,
        incoming_invite(Some(peer_offer(&MediaParameters::default()))),
    );
    endpoint.step();
    let id = endpoint.only_session();
    let handle = endpoint.handle(&id);
    endpoint.registry.accept(&id, None).unwrap();
    assert!(matches!(
        endpoint.registry.pause(&id),
        Err(rvoip_call_session::SessionError::InvalidState { .. })
    ));

    endpoint.inject(dialog, SignalingEvent::AckTimeout);
    endpoint.step();

    assert_eq!(endpoint.sent_names().last(), Some(&"BYE"));
    assert_eq!(handle.state(), CallState::Released);
    let reason = handle.reason().unwrap();
    assert_eq!(reason.kind, ReasonKind::NoResponse);
    assert_eq!(reason.phrase, "ACK not received");
}

#[test]
fn test_invite_without_response_fails_with_error_tone() {
    let mut endpoint = Endpoint::scripted(quiet_config());
    let call = endpoint.call("sip:remote@test");
    let dialog = call.snapshot().dialog.unwrap();

    endpoint.inject(dialog, SignalingEvent::TransactionTimeout);
    endpoint.step();

    assert!(endpoint.listener.states(call.id()).contains(&CallState::Error));
    let reason = call.reason().unwrap();
    assert_eq!(reason.kind, ReasonKind::NoResponse);
    assert_eq!(reason.code, 408);
    assert_eq!(
        endpoint.listener.tones(call.id()),
        vec![ToneEvent::ErrorTone(ReasonKind::NoResponse)]
    );
    assert_eq!(endpoint.registry.call_logs().unwrap()[0].status, CallLogStatus::Aborted);
}

#[test]
fn test_late_rejection_refines_timeout_outcome() {
    let mut endpoint = Endpoint::scripted(quiet_config());
    let call = endpoint.call("sip:remote@test");
    let dialog = call.snapshot().dialog.unwrap();

    endpoint.inject(dialog, SignalingEvent::TransactionTimeout);
    endpoint.inject(dialog, final_response("a", FinalResponse::new(486, "Busy Here")));
    endpoint.step();

    assert!(endpoint.listener.states(call.id()).contains(&CallState::Error));
    assert_eq!(call.state(), CallState::Released);
    let reason = call.reason().unwrap();
    assert_eq!(reason.kind, ReasonKind::Busy);
    assert_eq!(reason.code, 486);
    let (last_outcome, _) = endpoint.listener.outcomes(call.id()).pop().unwrap();
    assert_eq!(last_outcome.kind, ReasonKind::Busy);
    let log = &endpoint.registry.call_logs().unwrap()[0];
    assert_eq!(log.status, CallLogStatus::Aborted);
    assert_eq!(log.reason_code, 486);
}

#[test]
fn test_concrete_outcome_is_not_replaced() {
    let mut endpoint = Endpoint::scripted(quiet_config());
    let call = endpoint.call("sip:remote@test");
    let dialog = call.snapshot().dialog.unwrap();

    endpoint.inject(dialog, final_response("a", FinalResponse::new(486, "Busy Here")));
    endpoint.inject(dialog, final_response("a", FinalResponse::new(603, "Decline")));
    endpoint.step();

    let reason = call.reason().unwrap();
    assert_eq!(reason.kind, ReasonKind::Busy);
    assert_eq!(reason.code, 486);
}

#[test]
fn test_update_without_response_ends_call() {
    let mut endpoint = Endpoint::scripted(quiet_config());
    let (call, dialog) = established_outgoing(&mut endpoint);

    endpoint.registry.pause(call.id()).unwrap();
    endpoint.inject(dialog, SignalingEvent::TransactionTimeout);
    endpoint.step();

    assert!(endpoint.listener.states(call.id()).contains(&CallState::End));
    assert!(!endpoint.listener.states(call.id()).contains(&CallState::Error));
    assert_eq!(call.reason().unwrap().kind, ReasonKind::NoResponse);
}

#[test]
fn test_timeout_on_stable_call_is_ignored() {
    let mut endpoint = Endpoint::scripted(quiet_config());
    let (call, dialog) = established_outgoing(&mut endpoint);

    endpoint.inject(dialog, SignalingEvent::TransactionTimeout);
    endpoint.step();
    assert_eq!(call.state(), CallState::StreamsRunning);
}

#[test]
fn test_maximum_call_duration() {
    let mut endpoint = Endpoint::scripted(config(|c| c.in_call_timeout_secs = 60));
    let (call, _dialog) = established_outgoing(&mut endpoint);

    endpoint.advance(59);
    assert_eq!(call.state(), CallState::StreamsRunning);
    endpoint.advance(1);

    assert_eq!(call.state(), CallState::Released);
    assert_eq!(endpoint.sent_names().last(), Some(&"BYE"));
    assert_eq!(call.reason().unwrap().kind, ReasonKind::Success);
    let log = &endpoint.registry.call_logs().unwrap()[0];
    assert_eq!(log.duration_secs, 60);
}

#[test]
fn test_transport_failure_loses_dialog() {
    let mut endpoint = Endpoint::scripted(quiet_config());
    let (call, dialog) = established_outgoing(&mut endpoint);

    endpoint.inject(
        dialog,
        SignalingEvent::TransportFailure {
            message: "connection reset".into(),
        },
    );
    endpoint.step();

    assert_eq!(call.state(), CallState::Released);
    let reason = call.reason().unwrap();
    assert_eq!(reason.kind, ReasonKind::IOError);
    assert_eq!(reason.phrase, "Dialog lost");
}

#[test]
fn test_stream_failure_hangs_up() {
    let mut endpoint = Endpoint::scripted(quiet_config());
    let (call, _dialog) = established_outgoing(&mut endpoint);

    endpoint.inject_media(
        call.id(),
        MediaEvent::StreamFailure {
            message: "ICE failed".into(),
        },
    );
    endpoint.step();

    assert_eq!(call.state(), CallState::Released);
    assert_eq!(endpoint.sent_names().last(), Some(&"BYE"));
    assert_eq!(call.reason().unwrap().phrase, "ICE failed");
}

#[test]
fn test_send_failure_during_call_setup_on_callee() {
    let mut endpoint = Endpoint::scripted(quiet_config());
    let dialog = DialogId::new();
    endpoint.inject(
        dialog,
        incoming_invite(Some(peer_offer(&MediaParameters::default()))),
    );
    endpoint.step();
    let id = endpoint.only_session();
    let handle = endpoint.handle(&id);

    endpoint
        .transport
        .fail_send
        .store(true, std::sync::atomic::Ordering::SeqCst);
    endpoint.registry.accept(&id, None).unwrap();

    assert_eq!(handle.reason().unwrap().phrase, "Dialog lost");
    endpoint.step();
    assert_eq!(handle.state(), CallState::Released);
}
