use std::convert::Infallible;

use axum::response::sse::{Event, Sse};
use futures_util::{Stream, StreamExt};
use tracing::{error, info};

use parley_types::events::GatewayEvent;

use crate::stream::LiveStream;

/// Serve a live stream over SSE. Each event goes out as its JSON encoding in
/// `data:` with the event kind as the SSE event name.
pub fn sse_response(live: LiveStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(conversation = %live.conversation_id(), "live stream connected");

    let events = live.into_events().filter_map(|event| async move { encode(&event).map(Ok) });
    Sse::new(events)
}

fn encode(event: &GatewayEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.kind()).data(json)),
        Err(e) => {
            error!("Failed to encode {} event: {}", event.kind(), e);
            None
        }
    }
}
