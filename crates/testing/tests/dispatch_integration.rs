//! End-to-end exercises of `relay_gateway::dispatch::dispatch` wired up with
//! the fakes from `relay_testing`, standing in for the real HTTP mux, process
//! supervisor, event bus, and upload sink a production origin would supply.

use std::sync::Arc;

use serde_json::json;

use relay_gateway::collaborators::ProcessSupervisor;
use relay_gateway::dispatch::{Collaborators, ConnectionTables, dispatch};
use relay_protocol::message::RelayMessage;
use relay_protocol::utils::b64_encode;

use relay_testing::{
    FakeEmptyBus, FakeEmptySupervisor, FakeHttpMux, FakePassthroughAugmenter, FakeProcess,
    FakeSupervisor, FakeUploadSink, fake_process_snapshot,
};

fn collaborators_with(
    http_mux: Arc<FakeHttpMux>,
    supervisor: Arc<dyn ProcessSupervisor>,
) -> Collaborators {
    Collaborators {
        http_mux,
        supervisor,
        event_bus: Arc::new(FakeEmptyBus),
        upload_sink: FakeUploadSink::new(),
        make_augmenter: Arc::new(|| Box::new(FakePassthroughAugmenter)),
    }
}

#[tokio::test]
async fn request_is_forwarded_to_the_http_mux_and_echoed_back_as_a_response() {
    let http_mux = Arc::new(FakeHttpMux::new(200, json!({"ok": true})));
    let collaborators = collaborators_with(http_mux.clone(), Arc::new(FakeEmptySupervisor));
    let mut tables = ConnectionTables::new();
    let (out_tx, _out_rx) = flume::unbounded();

    let replies = dispatch(
        RelayMessage::Request {
            id: "req-1".to_string(),
            method: "GET".to_string(),
            path: "/status".to_string(),
            headers: None,
            body: None,
        },
        &collaborators,
        &mut tables,
        out_tx,
    )
    .await;

    assert_eq!(replies.len(), 1);
    match &replies[0] {
        RelayMessage::Response { id, status, body, .. } => {
            assert_eq!(id, "req-1");
            assert_eq!(*status, 200);
            assert_eq!(body.as_ref().unwrap(), &json!({"ok": true}));
        }
        other => panic!("expected a response, got {other:?}"),
    }

    let seen = http_mux.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path, "/status");
    assert_eq!(
        seen[0].headers.get("X-Ws-Relay").map(String::as_str),
        Some("true")
    );
}

#[tokio::test]
async fn session_subscribe_replays_history_then_live_events_via_the_out_channel() {
    let snapshot = fake_process_snapshot("P1", "SESS1");
    let process = Arc::new(FakeProcess {
        snapshot,
        history: vec![json!({"text": "hello"})],
        streaming: None,
    });
    let supervisor: Arc<dyn ProcessSupervisor> = Arc::new(FakeSupervisor {
        session_id: "SESS1".to_string(),
        process,
    });
    let http_mux = Arc::new(FakeHttpMux::new(200, json!(null)));
    let collaborators = collaborators_with(http_mux, supervisor);
    let mut tables = ConnectionTables::new();
    let (out_tx, out_rx) = flume::unbounded();

    let replies = dispatch(
        RelayMessage::Subscribe {
            subscription_id: "SUB1".to_string(),
            channel: "session".to_string(),
            session_id: Some("SESS1".to_string()),
            last_event_id: None,
        },
        &collaborators,
        &mut tables,
        out_tx,
    )
    .await;

    assert!(replies.is_empty(), "subscribe itself produces no direct reply");

    let events: Vec<RelayMessage> = out_rx.drain().collect();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        RelayMessage::Event { event_type, .. } if event_type == "connected"
    ));
    assert!(matches!(
        &events[1],
        RelayMessage::Event { event_type, .. } if event_type == "message"
    ));

    let unsub = dispatch(
        RelayMessage::Unsubscribe {
            subscription_id: "SUB1".to_string(),
        },
        &collaborators,
        &mut tables,
        flume::unbounded().0,
    )
    .await;
    assert!(unsub.is_empty());
}

#[tokio::test]
async fn session_subscribe_without_a_matching_process_returns_not_found() {
    let http_mux = Arc::new(FakeHttpMux::new(200, json!(null)));
    let collaborators = collaborators_with(http_mux, Arc::new(FakeEmptySupervisor));
    let mut tables = ConnectionTables::new();
    let (out_tx, _out_rx) = flume::unbounded();

    let replies = dispatch(
        RelayMessage::Subscribe {
            subscription_id: "SUB1".to_string(),
            channel: "session".to_string(),
            session_id: Some("SESS1".to_string()),
            last_event_id: None,
        },
        &collaborators,
        &mut tables,
        out_tx,
    )
    .await;

    assert_eq!(replies.len(), 1);
    match &replies[0] {
        RelayMessage::Response { id, status, .. } => {
            assert_eq!(id, "SUB1");
            assert_eq!(*status, 404);
        }
        other => panic!("expected a response, got {other:?}"),
    }
}

#[tokio::test]
async fn upload_happy_path_reports_progress_and_completes() {
    let http_mux = Arc::new(FakeHttpMux::new(200, json!(null)));
    let collaborators = collaborators_with(http_mux, Arc::new(FakeEmptySupervisor));
    let mut tables = ConnectionTables::new();
    let (out_tx, _out_rx) = flume::unbounded();

    let payload = b"hello upload";
    let start = dispatch(
        RelayMessage::UploadStart {
            upload_id: "U1".to_string(),
            project_id: "proj".to_string(),
            session_id: "SESS1".to_string(),
            filename: "greeting.txt".to_string(),
            size: payload.len() as u64,
            mime_type: "text/plain".to_string(),
        },
        &collaborators,
        &mut tables,
        out_tx.clone(),
    )
    .await;
    assert!(matches!(
        &start[0],
        RelayMessage::UploadProgress { upload_id, bytes_received: 0 } if upload_id == "U1"
    ));

    let chunk = dispatch(
        RelayMessage::UploadChunk {
            upload_id: "U1".to_string(),
            offset: 0,
            data: b64_encode(payload),
        },
        &collaborators,
        &mut tables,
        out_tx.clone(),
    )
    .await;
    // The chunk finishes the upload, crossing the final progress boundary.
    assert_eq!(chunk.len(), 1);
    assert!(matches!(
        &chunk[0],
        RelayMessage::UploadProgress { upload_id, bytes_received } if upload_id == "U1" && *bytes_received == payload.len() as u64
    ));

    let end = dispatch(
        RelayMessage::UploadEnd {
            upload_id: "U1".to_string(),
        },
        &collaborators,
        &mut tables,
        out_tx,
    )
    .await;
    assert_eq!(end.len(), 1);
    match &end[0] {
        RelayMessage::UploadComplete { upload_id, file } => {
            assert_eq!(upload_id, "U1");
            assert_eq!(file["filename"], json!("greeting.txt"));
            assert_eq!(file["size"], json!(payload.len() as u64));
        }
        other => panic!("expected upload_complete, got {other:?}"),
    }
}

#[tokio::test]
async fn upload_chunk_with_wrong_offset_is_rejected_and_drops_the_upload() {
    let http_mux = Arc::new(FakeHttpMux::new(200, json!(null)));
    let collaborators = collaborators_with(http_mux, Arc::new(FakeEmptySupervisor));
    let mut tables = ConnectionTables::new();
    let (out_tx, _out_rx) = flume::unbounded();

    dispatch(
        RelayMessage::UploadStart {
            upload_id: "U1".to_string(),
            project_id: "proj".to_string(),
            session_id: "SESS1".to_string(),
            filename: "f.bin".to_string(),
            size: 10,
            mime_type: "application/octet-stream".to_string(),
        },
        &collaborators,
        &mut tables,
        out_tx.clone(),
    )
    .await;

    let chunk = dispatch(
        RelayMessage::UploadChunk {
            upload_id: "U1".to_string(),
            offset: 5,
            data: b64_encode(b"xxxxx"),
        },
        &collaborators,
        &mut tables,
        out_tx.clone(),
    )
    .await;

    assert_eq!(chunk.len(), 1);
    assert!(matches!(&chunk[0], RelayMessage::UploadError { upload_id, .. } if upload_id == "U1"));

    // The upload was dropped on mismatch; a second end for the same id is
    // treated as unknown.
    let end = dispatch(
        RelayMessage::UploadEnd {
            upload_id: "U1".to_string(),
        },
        &collaborators,
        &mut tables,
        out_tx,
    )
    .await;
    assert!(matches!(&end[0], RelayMessage::UploadError { upload_id, .. } if upload_id == "U1"));
}

#[tokio::test]
async fn duplicate_subscription_id_is_rejected() {
    let snapshot = fake_process_snapshot("P1", "SESS1");
    let process = Arc::new(FakeProcess {
        snapshot,
        history: vec![],
        streaming: None,
    });
    let supervisor: Arc<dyn ProcessSupervisor> = Arc::new(FakeSupervisor {
        session_id: "SESS1".to_string(),
        process,
    });
    let http_mux = Arc::new(FakeHttpMux::new(200, json!(null)));
    let collaborators = collaborators_with(http_mux, supervisor);
    let mut tables = ConnectionTables::new();

    let first = dispatch(
        RelayMessage::Subscribe {
            subscription_id: "SUB1".to_string(),
            channel: "session".to_string(),
            session_id: Some("SESS1".to_string()),
            last_event_id: None,
        },
        &collaborators,
        &mut tables,
        flume::unbounded().0,
    )
    .await;
    assert!(first.is_empty());

    let second = dispatch(
        RelayMessage::Subscribe {
            subscription_id: "SUB1".to_string(),
            channel: "activity".to_string(),
            session_id: None,
            last_event_id: None,
        },
        &collaborators,
        &mut tables,
        flume::unbounded().0,
    )
    .await;
    assert_eq!(second.len(), 1);
    match &second[0] {
        RelayMessage::Response { id, status, .. } => {
            assert_eq!(id, "SUB1");
            assert_eq!(*status, 400);
        }
        other => panic!("expected a response, got {other:?}"),
    }
}
