//! The two subscribable channels, `session` and `activity`, both exposed
//! through the same `subscribe` message.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use flume::Sender;
use serde_json::{Value, json};

use relay_protocol::message::RelayMessage;

use crate::collaborators::{
    BusEvent, EventBus, MarkdownAugmenter, Process, ProcessState, ProcessSupervisor, Unsubscribe,
};
use crate::errors::DispatchError;

fn process_state_str(state: ProcessState) -> &'static str {
    match state {
        ProcessState::Starting => "starting",
        ProcessState::Running => "running",
        ProcessState::WaitingInput => "waiting_input",
        ProcessState::Stopped => "stopped",
    }
}

struct EventIdCounter(AtomicU64);

impl EventIdCounter {
    fn new() -> Arc<Self> {
        Arc::new(EventIdCounter(AtomicU64::new(0)))
    }

    fn next(&self) -> String {
        self.0.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

/// Opens the `session` channel: emits `connected`, replays message history,
/// emits a catch-up `pending` event for any partial streaming text, then
/// forwards every live process event. Ordering matches the ordering
/// guarantee: `connected` precedes history, which precedes catch-up, which
/// precedes the first live event.
pub fn open_session_channel(
    subscription_id: &str,
    session_id: Option<&str>,
    supervisor: &dyn ProcessSupervisor,
    out: Sender<RelayMessage>,
    mut augmenter: Box<dyn MarkdownAugmenter>,
) -> Result<Unsubscribe, DispatchError> {
    let session_id = session_id.ok_or(DispatchError::MissingSessionId)?;
    let process = supervisor
        .get_process_for_session(session_id)
        .ok_or_else(|| DispatchError::NoProcessForSession(session_id.to_string()))?;

    let counter = EventIdCounter::new();
    let subscription_id = subscription_id.to_string();

    let snapshot = process.snapshot();
    let _ = out.send(RelayMessage::Event {
        subscription_id: subscription_id.clone(),
        event_type: "connected".to_string(),
        event_id: Some(counter.next()),
        data: json!({
            "processId": snapshot.process_id,
            "sessionId": snapshot.session_id,
            "state": process_state_str(snapshot.state),
            "permissionMode": snapshot.permission_mode,
            "modeVersion": snapshot.mode_version,
            "provider": snapshot.provider,
            "model": snapshot.model,
            "waitingInputRequest": snapshot.waiting_input_request,
        }),
    });

    for message in process.message_history() {
        let _ = out.send(RelayMessage::Event {
            subscription_id: subscription_id.clone(),
            event_type: "message".to_string(),
            event_id: Some(counter.next()),
            data: message,
        });
    }

    if let Some(partial) = process.streaming_content() {
        let rendered = augmenter.augment(&partial);
        let _ = out.send(RelayMessage::Event {
            subscription_id: subscription_id.clone(),
            event_type: "pending".to_string(),
            event_id: Some(counter.next()),
            data: json!({ "html": rendered }),
        });
    }

    let live_counter = counter.clone();
    let live_subscription_id = subscription_id.clone();
    let live_out = out.clone();
    let unsubscribe = process.subscribe(Box::new(move |event: BusEvent| {
        let _ = live_out.send(RelayMessage::Event {
            subscription_id: live_subscription_id.clone(),
            event_type: event.event_type,
            event_id: Some(live_counter.next()),
            data: event.data,
        });
    }));

    Ok(detach_on_close(process, unsubscribe))
}

/// Wraps a process's raw unsubscribe closer so tearing down the subscription
/// also clears its streaming-text accumulator, per the channel's close
/// contract.
fn detach_on_close(process: Arc<dyn Process>, unsubscribe: Unsubscribe) -> Unsubscribe {
    Box::new(move || {
        unsubscribe();
        process.clear_streaming_text();
    })
}

/// Opens the `activity` channel: emits `connected`, then forwards every
/// event-bus event unmodified.
pub fn open_activity_channel(
    subscription_id: &str,
    bus: &dyn EventBus,
    out: Sender<RelayMessage>,
) -> Unsubscribe {
    let counter = EventIdCounter::new();
    let subscription_id_owned = subscription_id.to_string();

    let _ = out.send(RelayMessage::Event {
        subscription_id: subscription_id_owned.clone(),
        event_type: "connected".to_string(),
        event_id: Some(counter.next()),
        data: Value::Null,
    });

    bus.subscribe(Box::new(move |event: BusEvent| {
        let _ = out.send(RelayMessage::Event {
            subscription_id: subscription_id_owned.clone(),
            event_type: event.event_type,
            event_id: Some(counter.next()),
            data: event.data,
        });
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{EventListener, Process, ProcessSnapshot, Unsubscribe};
    use std::sync::Mutex;

    struct FakeAugmenter;
    impl MarkdownAugmenter for FakeAugmenter {
        fn augment(&mut self, delta: &str) -> String {
            format!("<p>{delta}</p>")
        }
    }

    struct FakeProcess {
        history: Vec<Value>,
        partial: Option<String>,
        cleared: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Process for FakeProcess {
        fn snapshot(&self) -> ProcessSnapshot {
            ProcessSnapshot {
                process_id: "P1".into(),
                session_id: "SESS1".into(),
                state: ProcessState::Running,
                permission_mode: "default".into(),
                mode_version: 1,
                provider: "anthropic".into(),
                model: "test-model".into(),
                waiting_input_request: None,
            }
        }
        fn message_history(&self) -> Vec<Value> {
            self.history.clone()
        }
        fn streaming_content(&self) -> Option<String> {
            self.partial.clone()
        }
        fn accumulate_streaming_text(&self, _delta: &str) {}
        fn clear_streaming_text(&self) {
            self.cleared.store(true, std::sync::atomic::Ordering::SeqCst);
        }
        fn subscribe(&self, _listener: EventListener) -> Unsubscribe {
            Box::new(|| {})
        }
    }

    struct FakeSupervisor(FakeProcess);
    impl ProcessSupervisor for FakeSupervisor {
        fn get_process_for_session(&self, session_id: &str) -> Option<std::sync::Arc<dyn Process>> {
            if session_id == "SESS1" {
                Some(std::sync::Arc::new(FakeProcess {
                    history: self.0.history.clone(),
                    partial: self.0.partial.clone(),
                    cleared: self.0.cleared.clone(),
                }))
            } else {
                None
            }
        }
    }

    #[test]
    fn session_channel_orders_connected_before_history_before_catchup() {
        let supervisor = FakeSupervisor(FakeProcess {
            history: vec![json!({"text": "hello"})],
            partial: Some("wor".into()),
            cleared: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        });
        let (tx, rx) = flume::unbounded();
        let _closer = open_session_channel(
            "S1",
            Some("SESS1"),
            &supervisor,
            tx,
            Box::new(FakeAugmenter),
        )
        .unwrap();

        let event_types: Vec<String> = rx
            .drain()
            .map(|msg| match msg {
                RelayMessage::Event { event_type, .. } => event_type,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(event_types, vec!["connected", "message", "pending"]);
    }

    #[test]
    fn session_channel_without_session_id_is_rejected() {
        let supervisor = FakeSupervisor(FakeProcess {
            history: vec![],
            partial: None,
            cleared: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        });
        let (tx, _rx) = flume::unbounded();
        let result = open_session_channel("S1", None, &supervisor, tx, Box::new(FakeAugmenter));
        assert!(matches!(result, Err(DispatchError::MissingSessionId)));
    }

    #[test]
    fn session_channel_missing_process_is_not_found() {
        let supervisor = FakeSupervisor(FakeProcess {
            history: vec![],
            partial: None,
            cleared: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        });
        let (tx, _rx) = flume::unbounded();
        let result = open_session_channel(
            "S1",
            Some("NOPE"),
            &supervisor,
            tx,
            Box::new(FakeAugmenter),
        );
        assert!(matches!(result, Err(DispatchError::NoProcessForSession(_))));
    }

    #[test]
    fn closing_the_session_channel_clears_the_streaming_text_accumulator() {
        let cleared = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let supervisor = FakeSupervisor(FakeProcess {
            history: vec![],
            partial: None,
            cleared: cleared.clone(),
        });
        let (tx, _rx) = flume::unbounded();
        let closer = open_session_channel(
            "S1",
            Some("SESS1"),
            &supervisor,
            tx,
            Box::new(FakeAugmenter),
        )
        .unwrap();

        assert!(!cleared.load(std::sync::atomic::Ordering::SeqCst));
        closer();
        assert!(cleared.load(std::sync::atomic::Ordering::SeqCst));
    }

    struct FakeBus {
        listeners: Mutex<Vec<EventListener>>,
    }
    impl EventBus for FakeBus {
        fn subscribe(&self, listener: EventListener) -> Unsubscribe {
            self.listeners.lock().unwrap().push(listener);
            Box::new(|| {})
        }
    }

    #[test]
    fn activity_channel_emits_connected_first() {
        let bus = FakeBus {
            listeners: Mutex::new(Vec::new()),
        };
        let (tx, rx) = flume::unbounded();
        let _closer = open_activity_channel("S2", &bus, tx);
        let msg = rx.try_recv().unwrap();
        assert!(matches!(msg, RelayMessage::Event { event_type, .. } if event_type == "connected"));
    }
}
