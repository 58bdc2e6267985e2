//! Mint event listener.
//!
//! [`MintListener`] is a two-state machine (`Idle`, `Listening`) over an
//! [`EventSource`]. Raw events are normalized into [`MintRecord`]s and
//! handed to the mint callback; events that cannot be normalized are
//! reported and skipped without touching the subscription.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use crate::diagnostics::{Diagnostic, SharedSink};
use crate::error::{MalformedEventError, SubscriptionError};
use crate::flow::cadence;
use crate::model::{scalar_to_string, MintRecord};
use crate::task::BackgroundTask;

/// Which events to deliver: one event name on one collection contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventFilter {
    pub contract_address: String,
    pub asset_type: String,
    pub event_name: String,
}

impl EventFilter {
    /// `A.<address-without-0x>.<asset-type>.<event-name>`
    pub fn event_type(&self) -> String {
        format!(
            "A.{}.{}.{}",
            cadence::bare_address(&self.contract_address),
            self.asset_type,
            self.event_name
        )
    }
}

/// An event as delivered by the source, payload already decoded to plain JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub event_type: String,
    pub transaction_id: String,
    pub block_height: u64,
    pub data: Value,
}

pub type EventHandler = Arc<dyn Fn(Vec<RawEvent>) + Send + Sync>;

/// Capability to subscribe to on-chain events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Establishes the subscription. Batches are passed to `handler` until
    /// the returned [`Subscription`] is released.
    async fn subscribe(
        &self,
        filter: &EventFilter,
        handler: EventHandler,
    ) -> Result<Subscription, SubscriptionError>;
}

/// Releases the underlying subscription on `unsubscribe` or drop.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn from_task(task: BackgroundTask) -> Self {
        Self::new(move || drop(task))
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

pub type MintCallback = Arc<dyn Fn(MintRecord) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    Idle,
    Listening,
}

pub struct MintListener {
    source: Arc<dyn EventSource>,
    filter: EventFilter,
    on_mint: MintCallback,
    sink: SharedSink,
    subscription: tokio::sync::Mutex<Option<Subscription>>,
    last_error: Mutex<Option<String>>,
}

impl MintListener {
    pub fn new(
        source: Arc<dyn EventSource>,
        filter: EventFilter,
        on_mint: MintCallback,
        sink: SharedSink,
    ) -> Self {
        Self {
            source,
            filter,
            on_mint,
            sink,
            subscription: tokio::sync::Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    pub async fn status(&self) -> ListenerStatus {
        match *self.subscription.lock().await {
            Some(_) => ListenerStatus::Listening,
            None => ListenerStatus::Idle,
        }
    }

    /// Message of the last failed subscription attempt, cleared on retry.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Idle → Listening. A no-op while already listening.
    pub async fn start_listening(&self) -> Result<(), SubscriptionError> {
        let mut slot = self.subscription.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        self.set_error(None);

        let event_type = self.filter.event_type();
        match self.source.subscribe(&self.filter, self.batch_handler()).await {
            Ok(subscription) => {
                *slot = Some(subscription);
                self.sink.record(Diagnostic::ListenerStarted { event_type });
                Ok(())
            }
            Err(e) => {
                self.set_error(Some(e.to_string()));
                self.sink.record(Diagnostic::SubscriptionFailed {
                    event_type,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Listening → Idle, releasing the subscription.
    pub async fn stop_listening(&self) {
        if let Some(subscription) = self.subscription.lock().await.take() {
            subscription.unsubscribe();
            self.sink.record(Diagnostic::ListenerStopped {
                event_type: self.filter.event_type(),
            });
        }
    }

    fn batch_handler(&self) -> EventHandler {
        let contract_address = self.filter.contract_address.clone();
        let on_mint = Arc::clone(&self.on_mint);
        let sink = Arc::clone(&self.sink);
        Arc::new(move |events: Vec<RawEvent>| {
            for event in &events {
                match normalize(&contract_address, event) {
                    Ok(record) => on_mint(record),
                    Err(e) => sink.record(Diagnostic::MalformedEvent {
                        transaction_id: e.transaction_id,
                        reason: e.reason,
                    }),
                }
            }
        })
    }

    fn set_error(&self, error: Option<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }
}

/// Turns a raw deposit event into a [`MintRecord`].
///
/// The token id comes from `id`, the owner from `to` and the metadata from
/// `metadata` (empty when absent). The record is attributed to the
/// listener's contract.
pub fn normalize(contract_address: &str, event: &RawEvent) -> Result<MintRecord, MalformedEventError> {
    let malformed = |reason: &str| MalformedEventError {
        transaction_id: event.transaction_id.clone(),
        reason: reason.to_string(),
    };

    let data = event
        .data
        .as_object()
        .ok_or_else(|| malformed("payload is not an object"))?;
    let token_id = data
        .get("id")
        .and_then(scalar_to_string)
        .ok_or_else(|| malformed("missing token id"))?;
    let owner = data
        .get("to")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing recipient"))?;
    let metadata = match data.get("metadata") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    Ok(MintRecord {
        transaction_id: event.transaction_id.clone(),
        contract_address: contract_address.to_string(),
        token_id,
        owner: owner.to_string(),
        metadata,
        observed_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out subscriptions and keeps the handler so tests can push events.
    #[derive(Default)]
    struct ManualSource {
        subscribes: AtomicUsize,
        active: Arc<AtomicUsize>,
        handler: Mutex<Option<EventHandler>>,
        fail: bool,
    }

    impl ManualSource {
        fn push(&self, events: Vec<RawEvent>) {
            let handler = self.handler.lock().unwrap().clone().expect("not subscribed");
            handler(events);
        }
    }

    #[async_trait]
    impl EventSource for ManualSource {
        async fn subscribe(
            &self,
            filter: &EventFilter,
            handler: EventHandler,
        ) -> Result<Subscription, SubscriptionError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SubscriptionError::new(&filter.event_type(), "node unreachable"));
            }
            *self.handler.lock().unwrap() = Some(handler);
            self.active.fetch_add(1, Ordering::SeqCst);
            let active = Arc::clone(&self.active);
            Ok(Subscription::new(move || {
                active.fetch_sub(1, Ordering::SeqCst);
            }))
        }
    }

    fn filter() -> EventFilter {
        EventFilter {
            contract_address: "0xf8d6e0586b0a20c7".into(),
            asset_type: "GhibliNFT".into(),
            event_name: "Deposit".into(),
        }
    }

    fn deposit(tx: &str, data: Value) -> RawEvent {
        RawEvent {
            event_type: filter().event_type(),
            transaction_id: tx.into(),
            block_height: 1,
            data,
        }
    }

    fn listener(source: Arc<ManualSource>) -> (MintListener, Arc<Mutex<Vec<MintRecord>>>, Arc<MemorySink>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = MemorySink::new();
        let store = Arc::clone(&seen);
        let listener = MintListener::new(
            source,
            filter(),
            Arc::new(move |record| store.lock().unwrap().push(record)),
            sink.clone(),
        );
        (listener, seen, sink)
    }

    #[test]
    fn event_type_strips_address_prefix() {
        assert_eq!(filter().event_type(), "A.f8d6e0586b0a20c7.GhibliNFT.Deposit");
    }

    #[test]
    fn normalize_reads_id_owner_and_metadata() {
        let event = deposit(
            "tx1",
            json!({"id": 42, "to": "0x01", "metadata": {"name": "Totoro"}}),
        );
        let record = normalize("0xabc", &event).unwrap();
        assert_eq!(record.token_id, "42");
        assert_eq!(record.owner, "0x01");
        assert_eq!(record.contract_address, "0xabc");
        assert_eq!(record.metadata["name"], json!("Totoro"));
    }

    #[test]
    fn normalize_rejects_incomplete_events() {
        let err = normalize("0xabc", &deposit("tx1", json!({"to": "0x01"}))).unwrap_err();
        assert_eq!(err.reason, "missing token id");
        let err = normalize("0xabc", &deposit("tx2", json!({"id": 1, "to": null}))).unwrap_err();
        assert_eq!(err.reason, "missing recipient");
        let err = normalize("0xabc", &deposit("tx3", Value::Null)).unwrap_err();
        assert_eq!(err.transaction_id, "tx3");
    }

    #[test]
    fn normalize_accepts_empty_transaction_id() {
        let record = normalize("0xabc", &deposit("", json!({"id": 1, "to": "0x01"}))).unwrap();
        assert_eq!(record.transaction_id, "");
        assert_eq!(record.token_id, "1");
    }

    #[tokio::test]
    async fn second_start_is_a_noop() {
        let source = Arc::new(ManualSource::default());
        let (listener, _, _) = listener(source.clone());

        listener.start_listening().await.unwrap();
        listener.start_listening().await.unwrap();

        assert_eq!(source.subscribes.load(Ordering::SeqCst), 1);
        assert_eq!(source.active.load(Ordering::SeqCst), 1);
        assert_eq!(listener.status().await, ListenerStatus::Listening);
    }

    #[tokio::test]
    async fn stop_releases_the_subscription() {
        let source = Arc::new(ManualSource::default());
        let (listener, _, _) = listener(source.clone());

        listener.start_listening().await.unwrap();
        listener.stop_listening().await;

        assert_eq!(source.active.load(Ordering::SeqCst), 0);
        assert_eq!(listener.status().await, ListenerStatus::Idle);

        listener.start_listening().await.unwrap();
        assert_eq!(source.subscribes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_events_are_skipped() {
        let source = Arc::new(ManualSource::default());
        let (listener, seen, sink) = listener(source.clone());
        listener.start_listening().await.unwrap();

        source.push(vec![
            deposit("tx1", json!({"id": "1", "to": "0x01"})),
            deposit("tx2", json!({"to": "0x02"})),
            deposit("tx3", json!({"id": "3", "to": "0x03"})),
        ]);

        let tokens: Vec<String> = seen.lock().unwrap().iter().map(|r| r.token_id.clone()).collect();
        assert_eq!(tokens, vec!["1", "3"]);
        assert_eq!(
            sink.count(|d| matches!(d, Diagnostic::MalformedEvent { transaction_id, .. } if transaction_id == "tx2")),
            1
        );
        assert_eq!(listener.status().await, ListenerStatus::Listening);
    }

    #[tokio::test]
    async fn failed_subscription_stays_idle_with_error() {
        let source = Arc::new(ManualSource {
            fail: true,
            ..ManualSource::default()
        });
        let (listener, _, sink) = listener(source);

        let err = listener.start_listening().await.unwrap_err();
        assert_eq!(err.message, "node unreachable");
        assert_eq!(listener.status().await, ListenerStatus::Idle);
        assert!(listener.last_error().unwrap().contains("node unreachable"));
        assert_eq!(
            sink.count(|d| matches!(d, Diagnostic::SubscriptionFailed { .. })),
            1
        );
    }
}
