//! Integration tests for the sync client
//!
//! Each test spawns a real client task over a channel transport and plays the
//! recording server itself. Tests that depend on timeouts run on paused time.

use challenge_sync::protocol::{
    ChallengeEvent, ChallengeKind, ChallengeMode, ClientMessage, Codec, ConfirmationRequest,
    EndPayload, GameplayEvent, JsonCodec, MetadataUpdate, ServerErrorKind, ServerMessage, Stage,
    StageStatus, StageUpdate, StartPayload,
};
use challenge_sync::simulation::CollectingSink;
use challenge_sync::sync::{
    EncounterProbe, EncounterSnapshot, NoEncounter, Notification, SharedEncounter, StartFailure,
    Status, SyncClient, SyncConfig, SyncHandle,
};
use challenge_sync::transport::{ChannelTransport, TransportEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

struct TestServer {
    frames: mpsc::UnboundedReceiver<TransportEvent>,
    client: SyncHandle,
}

impl TestServer {
    async fn next_event(&mut self) -> TransportEvent {
        self.frames
            .recv()
            .await
            .expect("Transport should stay alive while the client runs")
    }

    async fn next(&mut self) -> ClientMessage {
        match self.next_event().await {
            TransportEvent::Frame(bytes) => JsonCodec
                .decode_client(&bytes)
                .expect("Client should only send valid frames"),
            TransportEvent::Closed(reason) => panic!("Transport closed unexpectedly: {}", reason),
        }
    }

    fn reply(&self, message: ServerMessage) {
        let bytes = JsonCodec
            .encode_server(&message)
            .expect("Server message should encode");
        self.client
            .on_message(bytes)
            .expect("Client should accept messages");
    }

    fn ack_start(&self, request_id: u32, session_id: &str) {
        self.reply(ServerMessage::StartResponse {
            request_id,
            session_id: Some(session_id.to_string()),
            error: None,
        });
    }
}

struct Fixture {
    client: SyncHandle,
    server: TestServer,
    sink: CollectingSink,
    task: JoinHandle<()>,
}

impl Fixture {
    fn spawn(config: SyncConfig, probe: Arc<dyn EncounterProbe>) -> Self {
        let (transport, frames) = ChannelTransport::new();
        let sink = CollectingSink::new();
        let (client, task) = SyncClient::spawn(
            config,
            Arc::new(transport),
            Arc::new(JsonCodec),
            Arc::new(sink.clone()),
            probe,
        );
        let server = TestServer {
            frames,
            client: client.clone(),
        };
        Self {
            client,
            server,
            sink,
            task,
        }
    }

    /// Start at tick 0 and acknowledge the first request as `session_id`
    async fn activate(&mut self, session_id: &str) {
        self.client.start(0, tob_payload()).unwrap();
        match self.server.next().await {
            ClientMessage::StartRequest { request_id, .. } => {
                self.server.ack_start(request_id, session_id)
            }
            other => panic!("Expected a start request, got {:?}", other),
        }
        let snapshot = self.client.snapshot().await.unwrap();
        assert_eq!(snapshot.status, Status::Active);
    }

    async fn stop(self) {
        self.client.shutdown().unwrap();
        self.task.await.expect("Client task should exit cleanly");
    }
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        start_timeout_ms: 100,
        start_retries: 2,
        end_timeout_ms: 100,
        history_refresh_delay_ms: 50,
    }
}

fn tob_payload() -> StartPayload {
    StartPayload {
        kind: ChallengeKind::TheatreOfBlood,
        mode: ChallengeMode::Regular,
        stage: Stage(1),
        party: vec!["alice".to_string(), "bob".to_string()],
        spectator: false,
    }
}

fn bulk(kind: &str) -> ChallengeEvent {
    ChallengeEvent::Bulk(GameplayEvent::new(kind, json!({ "hitpoints": 100 })))
}

#[tokio::test(start_paused = true)]
async fn test_start_retries_with_linear_backoff_then_replays() {
    let mut fixture = Fixture::spawn(fast_config(), Arc::new(NoEncounter));
    let started = Instant::now();

    fixture.client.start(0, tob_payload()).unwrap();
    fixture.client.on_local_event(0, bulk("npc_spawn")).unwrap();
    fixture.client.on_local_event(0, bulk("npc_update")).unwrap();
    fixture.client.on_local_event(1, bulk("player_attack")).unwrap();
    fixture
        .client
        .on_local_event(
            1,
            ChallengeEvent::Metadata(MetadataUpdate {
                mode: None,
                stage_update: Some(StageUpdate {
                    stage: Stage(1),
                    status: StageStatus::Started,
                    ticks: None,
                }),
            }),
        )
        .unwrap();

    assert!(matches!(
        fixture.server.next().await,
        ClientMessage::StartRequest { request_id: 1, .. }
    ));
    assert!(matches!(
        fixture.server.next().await,
        ClientMessage::StartRequest { request_id: 2, .. }
    ));
    assert!(started.elapsed() >= Duration::from_millis(100));

    // The first attempt's acknowledgment is stale once it was retried
    fixture.server.ack_start(1, "late");
    fixture.server.ack_start(2, "abc123");

    match fixture.server.next().await {
        ClientMessage::EventBatch { session_id, events } => {
            assert_eq!(session_id, "abc123");
            let ticks: Vec<u32> = events.iter().map(|e| e.tick).collect();
            assert_eq!(ticks, vec![0, 0, 1]);
        }
        other => panic!("Expected the buffered batch, got {:?}", other),
    }
    assert!(matches!(
        fixture.server.next().await,
        ClientMessage::UpdateRequest { ref session_id, .. } if session_id == "abc123"
    ));

    let snapshot = fixture.client.snapshot().await.unwrap();
    assert_eq!(snapshot.status, Status::Active);
    assert_eq!(snapshot.session_id.as_deref(), Some("abc123"));
    assert_eq!(snapshot.last_request_id, 2);
    assert_eq!(snapshot.pending_bulk_events, 0);

    fixture.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_gives_up_after_retry_budget() {
    let config = SyncConfig {
        start_retries: 1,
        ..fast_config()
    };
    let mut fixture = Fixture::spawn(config, Arc::new(NoEncounter));

    fixture.client.start(0, tob_payload()).unwrap();
    fixture.client.on_local_event(0, bulk("npc_spawn")).unwrap();
    assert!(matches!(
        fixture.server.next().await,
        ClientMessage::StartRequest { request_id: 1, .. }
    ));
    assert!(matches!(
        fixture.server.next().await,
        ClientMessage::StartRequest { request_id: 2, .. }
    ));

    // Second attempt waits twice the base timeout
    sleep(Duration::from_millis(500)).await;

    let snapshot = fixture.client.snapshot().await.unwrap();
    assert_eq!(snapshot.status, Status::Idle);
    assert_eq!(snapshot.pending_bulk_events, 0);
    assert!(
        fixture
            .sink
            .notifications()
            .contains(&Notification::StartFailed(StartFailure::TimedOut {
                attempts: 2
            }))
    );

    fixture.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_end_acknowledged_schedules_history_refresh() {
    let mut fixture = Fixture::spawn(fast_config(), Arc::new(NoEncounter));
    fixture.activate("abc123").await;

    fixture.client.on_local_event(3, bulk("npc_update")).unwrap();
    fixture
        .client
        .end(
            4,
            EndPayload {
                challenge_ticks: 4,
                overall_ticks: 4,
            },
        )
        .unwrap();

    assert!(matches!(
        fixture.server.next().await,
        ClientMessage::EventBatch { ref events, .. } if events.len() == 1 && events[0].tick == 3
    ));
    let request_id = match fixture.server.next().await {
        ClientMessage::EndRequest {
            request_id,
            session_id,
            challenge_ticks,
            ..
        } => {
            assert_eq!(session_id, "abc123");
            assert_eq!(challenge_ticks, 4);
            request_id
        }
        other => panic!("Expected an end request, got {:?}", other),
    };
    assert_eq!(request_id, 2);

    fixture
        .server
        .reply(ServerMessage::EndResponse { request_id });
    assert_eq!(fixture.client.snapshot().await.unwrap().status, Status::Idle);

    sleep(Duration::from_millis(100)).await;
    let notifications = fixture.sink.notifications();
    assert!(notifications.contains(&Notification::SessionEnded {
        session_id: "abc123".to_string(),
        acknowledged: true,
    }));
    assert!(notifications.contains(&Notification::HistoryRefresh));

    fixture.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_end_timeout_closes_session_locally() {
    let mut fixture = Fixture::spawn(fast_config(), Arc::new(NoEncounter));
    fixture.activate("abc123").await;

    fixture
        .client
        .end(
            1,
            EndPayload {
                challenge_ticks: 1,
                overall_ticks: 1,
            },
        )
        .unwrap();
    assert!(matches!(
        fixture.server.next().await,
        ClientMessage::EndRequest { request_id: 2, .. }
    ));

    sleep(Duration::from_millis(200)).await;
    assert_eq!(fixture.client.snapshot().await.unwrap().status, Status::Idle);

    // A late acknowledgment changes nothing
    fixture
        .server
        .reply(ServerMessage::EndResponse { request_id: 2 });
    assert_eq!(fixture.client.snapshot().await.unwrap().status, Status::Idle);

    let notifications = fixture.sink.notifications();
    assert!(notifications.contains(&Notification::SessionEnded {
        session_id: "abc123".to_string(),
        acknowledged: false,
    }));
    assert!(!notifications.contains(&Notification::SessionEnded {
        session_id: "abc123".to_string(),
        acknowledged: true,
    }));

    fixture.stop().await;
}

#[tokio::test]
async fn test_disconnect_then_confirmation_resumes_session() {
    let encounter = Arc::new(SharedEncounter::new());
    encounter.set(EncounterSnapshot {
        kind: ChallengeKind::TheatreOfBlood,
        stage: Stage(2),
        party: vec!["Alice".to_string(), "bob".to_string()],
    });
    let mut fixture = Fixture::spawn(fast_config(), encounter);
    fixture.activate("abc123").await;

    fixture.client.on_disconnect("connection reset").unwrap();
    let snapshot = fixture.client.snapshot().await.unwrap();
    assert_eq!(snapshot.status, Status::Idle);
    assert!(snapshot.session_id.is_none());

    fixture
        .server
        .reply(ServerMessage::ConfirmationRequest(ConfirmationRequest {
            session_id: "abc123".to_string(),
            kind: ChallengeKind::TheatreOfBlood,
            stage: Stage(1),
            party: vec!["bob".to_string(), "alice".to_string()],
            username: "alice".to_string(),
        }));

    match fixture.server.next().await {
        ClientMessage::ConfirmationResponse {
            session_id,
            valid,
            spectator,
        } => {
            assert_eq!(session_id, "abc123");
            assert!(valid);
            assert_eq!(spectator, Some(false));
        }
        other => panic!("Expected a confirmation response, got {:?}", other),
    }

    let snapshot = fixture.client.snapshot().await.unwrap();
    assert_eq!(snapshot.status, Status::Active);
    assert_eq!(snapshot.session_id.as_deref(), Some("abc123"));

    fixture.client.on_local_event(10, bulk("npc_update")).unwrap();
    fixture.client.on_tick(11).unwrap();
    assert!(matches!(
        fixture.server.next().await,
        ClientMessage::EventBatch { ref session_id, .. } if session_id == "abc123"
    ));
    assert!(
        fixture
            .sink
            .notifications()
            .contains(&Notification::SessionConfirmed {
                session_id: "abc123".to_string(),
                spectator: false,
            })
    );

    fixture.stop().await;
}

#[tokio::test]
async fn test_confirmation_without_encounter_is_rejected() {
    let mut fixture = Fixture::spawn(fast_config(), Arc::new(NoEncounter));

    fixture
        .server
        .reply(ServerMessage::ConfirmationRequest(ConfirmationRequest {
            session_id: "abc123".to_string(),
            kind: ChallengeKind::Inferno,
            stage: Stage(1),
            party: vec!["alice".to_string()],
            username: "alice".to_string(),
        }));

    assert_eq!(
        fixture.server.next().await,
        ClientMessage::ConfirmationResponse {
            session_id: "abc123".to_string(),
            valid: false,
            spectator: None,
        }
    );
    assert_eq!(fixture.client.snapshot().await.unwrap().status, Status::Idle);

    fixture.stop().await;
}

#[tokio::test]
async fn test_unauthenticated_closes_transport() {
    let mut fixture = Fixture::spawn(fast_config(), Arc::new(NoEncounter));
    fixture.activate("abc123").await;

    fixture.server.reply(ServerMessage::ServerError {
        kind: ServerErrorKind::Unauthenticated,
        session_id: None,
        message: None,
        username: None,
    });

    assert_eq!(
        fixture.server.next_event().await,
        TransportEvent::Closed("unauthenticated".to_string())
    );
    let snapshot = fixture.client.snapshot().await.unwrap();
    assert_eq!(snapshot.status, Status::Idle);
    assert!(snapshot.starts_blocked);

    fixture.stop().await;
}

#[tokio::test]
async fn test_ping_answered_while_idle() {
    let mut fixture = Fixture::spawn(fast_config(), Arc::new(NoEncounter));

    fixture.server.reply(ServerMessage::Ping);
    assert_eq!(fixture.server.next().await, ClientMessage::Pong);

    fixture.stop().await;
}
