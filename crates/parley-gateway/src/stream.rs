use std::time::Duration;

use futures_util::Stream;
use tokio::time::{Instant, interval_at};
use tracing::{debug, warn};

use parley_types::events::GatewayEvent;

use crate::bus::{EventBus, Subscription};

/// Heartbeat interval: keeps proxies from closing an idle stream.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("conversation id is required")]
    MissingConversationId,

    #[error("events unavailable")]
    Unavailable,
}

/// One client's view of one conversation's events.
///
/// The bus subscription is taken in `open`, so a bus that shuts down before
/// the response starts is reported to the caller instead of producing an
/// empty stream. Everything the stream holds is released when it is dropped,
/// polled or not.
pub struct LiveStream {
    subscription: Subscription,
    conversation_id: String,
    heartbeat: Duration,
}

impl LiveStream {
    pub fn open(bus: &EventBus, conversation_id: &str) -> Result<Self, StreamError> {
        let conversation_id = conversation_id.trim();
        if conversation_id.is_empty() {
            return Err(StreamError::MissingConversationId);
        }

        let subscription = bus.subscribe_channel().map_err(|e| {
            warn!(conversation = %conversation_id, "live stream could not subscribe: {}", e);
            StreamError::Unavailable
        })?;
        debug!(conversation = %conversation_id, "live stream subscribed");

        Ok(Self {
            subscription,
            conversation_id: conversation_id.to_string(),
            heartbeat: HEARTBEAT_INTERVAL,
        })
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// `connected` first, then this conversation's events in bus order with
    /// a `ping` every heartbeat. Ends when the bus shuts down.
    pub fn into_events(self) -> impl Stream<Item = GatewayEvent> + Send + 'static {
        let Self {
            mut subscription,
            conversation_id,
            heartbeat,
        } = self;

        async_stream::stream! {
            yield GatewayEvent::Connected;

            let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
            loop {
                let next = tokio::select! {
                    event = subscription.recv() => event,
                    _ = ticker.tick() => Some(GatewayEvent::Ping),
                };

                match next {
                    Some(event) if forwards(&event, &conversation_id) => yield event,
                    Some(_) => {}
                    None => {
                        debug!(conversation = %conversation_id, "bus closed, ending live stream");
                        break;
                    }
                }
            }
        }
    }
}

fn forwards(event: &GatewayEvent, conversation_id: &str) -> bool {
    match event.conversation_id() {
        Some(id) => id == conversation_id,
        None => matches!(event, GatewayEvent::Ping),
    }
}
