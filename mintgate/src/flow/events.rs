use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::diagnostics::{Diagnostic, SharedSink};
use crate::error::{FlowError, SubscriptionError};
use crate::flow::cadence;
use crate::flow::client::{FlowAccessClient, MAX_EVENT_RANGE};
use crate::listener::{EventFilter, EventHandler, EventSource, RawEvent, Subscription};
use crate::task::{cancelled, BackgroundTask};

/// [`EventSource`] that polls sealed blocks through the Access API.
///
/// Only events sealed after the subscription was established are
/// delivered.
#[derive(Clone)]
pub struct FlowEventSource {
    client: FlowAccessClient,
    poll_interval: Duration,
    sink: SharedSink,
}

impl FlowEventSource {
    pub fn new(client: FlowAccessClient, poll_interval: Duration, sink: SharedSink) -> Self {
        Self {
            client,
            poll_interval,
            sink,
        }
    }
}

#[async_trait]
impl EventSource for FlowEventSource {
    async fn subscribe(
        &self,
        filter: &EventFilter,
        handler: EventHandler,
    ) -> Result<Subscription, SubscriptionError> {
        let event_type = filter.event_type();
        let cursor = self
            .client
            .latest_sealed_height()
            .await
            .map_err(|e| SubscriptionError::new(&event_type, e))?;
        debug!(event_type = %event_type, height = cursor, "event cursor established");

        let mut poller = EventPoller {
            client: self.client.clone(),
            event_type,
            cursor,
            handler,
            sink: Arc::clone(&self.sink),
        };
        let period = self.poll_interval;
        let task = BackgroundTask::spawn("flow-event-poller", move |mut cancel| async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled(&mut cancel) => break,
                    _ = ticker.tick() => poller.poll_once().await,
                }
            }
        });
        Ok(Subscription::from_task(task))
    }
}

struct EventPoller {
    client: FlowAccessClient,
    event_type: String,
    /// Last height whose events were delivered.
    cursor: u64,
    handler: EventHandler,
    sink: SharedSink,
}

impl EventPoller {
    /// Delivers the next range of sealed blocks. The cursor only moves on
    /// success, so a failed range is retried on the next tick.
    async fn poll_once(&mut self) {
        match self.next_batch().await {
            Ok(Some((events, end))) => {
                self.cursor = end;
                if !events.is_empty() {
                    (self.handler)(events);
                }
            }
            Ok(None) => {}
            Err(e) => self.sink.record(Diagnostic::EventPollFailed {
                event_type: self.event_type.clone(),
                error: e.to_string(),
            }),
        }
    }

    async fn next_batch(&self) -> Result<Option<(Vec<RawEvent>, u64)>, FlowError> {
        let sealed = self.client.latest_sealed_height().await?;
        if sealed <= self.cursor {
            return Ok(None);
        }
        let start = self.cursor + 1;
        let end = sealed.min(self.cursor + MAX_EVENT_RANGE);

        let blocks = self.client.events(&self.event_type, start, end).await?;
        let events = blocks
            .into_iter()
            .flat_map(|block| {
                let height = block.block_height;
                block.events.into_iter().map(move |event| RawEvent {
                    // undecodable payloads are reported downstream as malformed
                    data: cadence::decode_base64(&event.payload).unwrap_or(Value::Null),
                    event_type: event.event_type,
                    transaction_id: event.transaction_id,
                    block_height: height,
                })
            })
            .collect();
        Ok(Some((events, end)))
    }
}
