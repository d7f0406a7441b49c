//! Event submission: store the event, then broadcast it.
//!
//! Storage and broadcast are independent. A failed insert (including a
//! payload that does not have the event shape) does not stop the broadcast,
//! and a broadcast reaching nobody does not fail the submission.
//!
//! Events arriving on producer sockets are broadcast first and handed to the
//! [`EventRecorder`], a single writer task that stores them in arrival order.

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::mpsc;

use super::db::{DashboardDb, DbHandle};
use super::hub::Broadcaster;
use super::models::{NewEvent, RealtimeEvent};
use super::ws::WsMessage;

/// Store `payload` and broadcast the stored record on `new_event`.
///
/// If the payload cannot be stored it is broadcast exactly as submitted and
/// the storage error is returned.
pub async fn submit_event(
    db: &DbHandle,
    broadcaster: &dyn Broadcaster,
    payload: Value,
) -> Result<RealtimeEvent> {
    match store(db, payload.clone()).await {
        Ok(event) => {
            let record = serde_json::to_value(&event).context("Failed to encode stored event")?;
            broadcaster.broadcast(&WsMessage::NewEvent(record));
            Ok(event)
        }
        Err(e) => {
            tracing::warn!(error = ?e, "Failed to store event, broadcasting as submitted");
            broadcaster.broadcast(&WsMessage::NewEvent(payload));
            Err(e)
        }
    }
}

async fn store(db: &DbHandle, payload: Value) -> Result<RealtimeEvent> {
    let event = parse_event(payload)?;
    db.call(move |db| db.create_event(&event)).await
}

fn parse_event(payload: Value) -> Result<NewEvent> {
    serde_json::from_value(payload).context("Payload is not a valid event")
}

/// Most events written under one database lock.
const RECORD_BATCH: usize = 50;

/// Queue in front of the single task that stores already-broadcast events.
///
/// Every payload goes through one channel and one writer, so ids and
/// `created_at` follow the order in which `record` was called.
#[derive(Clone)]
pub struct EventRecorder {
    tx: mpsc::UnboundedSender<Value>,
}

impl EventRecorder {
    /// Start the writer task. Must be called from inside a tokio runtime.
    /// The task ends once every clone of the recorder has been dropped.
    pub fn spawn(db: DbHandle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

        tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut batch = vec![first];
                while batch.len() < RECORD_BATCH {
                    match rx.try_recv() {
                        Ok(payload) => batch.push(payload),
                        Err(_) => break,
                    }
                }

                let size = batch.len();
                match db.call(move |db| Ok(store_batch(db, batch))).await {
                    Ok(stored) if stored < size => {
                        tracing::debug!(stored, size, "Stored partial event batch");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = ?e, size, "Failed to store relayed events"),
                }
            }
            tracing::debug!("Event recorder stopped");
        });

        Self { tx }
    }

    /// Queue `payload` for storage. Returns false if the writer is gone.
    pub fn record(&self, payload: Value) -> bool {
        if self.tx.send(payload).is_err() {
            tracing::warn!("Event recorder stopped, relayed event not stored");
            return false;
        }
        true
    }
}

/// Store each payload in order. Failures are logged and skipped.
fn store_batch(db: &DashboardDb, batch: Vec<Value>) -> usize {
    let mut stored = 0;
    for payload in batch {
        match parse_event(payload).and_then(|event| db.create_event(&event)) {
            Ok(_) => stored += 1,
            Err(e) => tracing::warn!(error = ?e, "Failed to store relayed event"),
        }
    }
    stored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::db::DashboardDb;
    use crate::relay::hub::FanOut;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<WsMessage>>,
    }

    impl Broadcaster for Recorder {
        fn broadcast(&self, msg: &WsMessage) -> FanOut {
            self.sent.lock().unwrap().push(msg.clone());
            FanOut {
                delivered: 1,
                ..Default::default()
            }
        }
    }

    fn db() -> DbHandle {
        DbHandle::new(DashboardDb::new_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_submit_broadcasts_stored_record() {
        let db = db();
        let recorder = Recorder::default();

        let event = submit_event(
            &db,
            &recorder,
            json!({"event_type": "task_started", "agent_name": "Dev", "message": "go"}),
        )
        .await
        .unwrap();

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            WsMessage::NewEvent(data) => {
                assert_eq!(data["id"], json!(event.id));
                assert_eq!(data["message"], "go");
                assert!(data["created_at"].is_string());
            }
            other => panic!("Expected NewEvent, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unstorable_payload_still_broadcast_verbatim() {
        let db = db();
        let recorder = Recorder::default();
        let payload = json!({"agent": "Dev", "note": "missing event_type"});

        let result = submit_event(&db, &recorder, payload.clone()).await;
        assert!(result.is_err());

        assert_eq!(
            *recorder.sent.lock().unwrap(),
            vec![WsMessage::NewEvent(payload)]
        );
        assert_eq!(db.call(|db| db.count_events()).await.unwrap(), 0);
    }

    async fn wait_for_count(db: &DbHandle, expected: i64) {
        for _ in 0..200 {
            if db.call(|db| db.count_events()).await.unwrap() >= expected {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("expected {} stored events", expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_recorder_stores_in_arrival_order() {
        let db = db();
        let recorder = EventRecorder::spawn(db.clone());

        for i in 0..200 {
            assert!(recorder.record(json!({"event_type": format!("e{}", i)})));
        }
        wait_for_count(&db, 200).await;

        let mut events = db.call(|db| db.list_recent_events(500)).await.unwrap();
        events.reverse();
        let types: Vec<String> = events.into_iter().map(|e| e.event_type).collect();
        let expected: Vec<String> = (0..200).map(|i| format!("e{}", i)).collect();
        assert_eq!(types, expected);
    }

    #[tokio::test]
    async fn test_recorder_skips_unstorable_payloads() {
        let db = db();
        let recorder = EventRecorder::spawn(db.clone());

        recorder.record(json!({"event_type": "first"}));
        recorder.record(json!("not an object"));
        recorder.record(json!({"event_type": "second"}));
        wait_for_count(&db, 2).await;

        let events = db.call(|db| db.list_recent_events(10)).await.unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["second", "first"]);
    }
}
