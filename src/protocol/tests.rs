use super::*;
use serde_json::json;

#[test]
fn test_event_classification() {
    let start = ChallengeEvent::Start(StartPayload {
        kind: ChallengeKind::Inferno,
        mode: ChallengeMode::Regular,
        stage: Stage(1),
        party: vec!["alice".to_string()],
        spectator: false,
    });
    let end = ChallengeEvent::End(EndPayload {
        challenge_ticks: 10,
        overall_ticks: 12,
    });
    let metadata = ChallengeEvent::Metadata(MetadataUpdate::default());
    let bulk = ChallengeEvent::Bulk(GameplayEvent::new("npc_spawn", json!({"id": 1})));

    assert_eq!(start.class(), EventClass::Lifecycle);
    assert_eq!(end.class(), EventClass::Lifecycle);
    assert_eq!(metadata.class(), EventClass::Metadata);
    assert_eq!(bulk.class(), EventClass::Bulk);
}

#[test]
fn test_stage_ordering() {
    assert!(Stage(5) > Stage(3));
    assert!(Stage(3) >= Stage(3));
    assert_eq!(Stage(2).to_string(), "stage 2");
}

#[test]
fn test_decode_start_response_without_session() {
    let codec = JsonCodec;
    let bytes = br#"{"type":"start_response","request_id":4,"session_id":null,"error":"maintenance"}"#;

    let message = codec.decode(bytes).unwrap();
    assert_eq!(
        message,
        ServerMessage::StartResponse {
            request_id: 4,
            session_id: None,
            error: Some("maintenance".to_string()),
        }
    );
}

#[test]
fn test_decode_unknown_error_kind() {
    let codec = JsonCodec;
    let bytes = br#"{"type":"server_error","kind":"rate_limited","session_id":null,"message":null,"username":null}"#;

    match codec.decode(bytes).unwrap() {
        ServerMessage::ServerError { kind, .. } => assert_eq!(kind, ServerErrorKind::Unknown),
        other => panic!("unexpected message: {:?}", other),
    }
}

#[test]
fn test_decode_confirmation_request() {
    let codec = JsonCodec;
    let bytes = br#"{"type":"confirmation_request","session_id":"abc","kind":"theatre_of_blood","stage":3,"party":["alice","bob"],"username":"alice"}"#;

    match codec.decode(bytes).unwrap() {
        ServerMessage::ConfirmationRequest(request) => {
            assert_eq!(request.session_id, "abc");
            assert_eq!(request.stage, Stage(3));
            assert_eq!(request.party.len(), 2);
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[test]
fn test_malformed_bytes_rejected() {
    let codec = JsonCodec;
    let result = codec.decode(b"not json at all");
    assert!(matches!(result, Err(CodecError::Malformed(_))));

    let result = codec.decode(br#"{"type":"no_such_message"}"#);
    assert!(matches!(result, Err(CodecError::Malformed(_))));
}

#[test]
fn test_client_message_tagging() {
    let codec = JsonCodec;
    let bytes = codec.encode(&ClientMessage::Pong).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["type"], "pong");

    let decoded = codec.decode_client(&bytes).unwrap();
    assert_eq!(decoded, ClientMessage::Pong);
}
