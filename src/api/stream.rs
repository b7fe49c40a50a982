//! Live alert stream over server-sent events

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{stream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::provider::Subscription;
use crate::server::state::AppState;

/// First frame sent on every stream
pub const HANDSHAKE: &str = "connected";

/// Pump bus messages to one viewer
///
/// The forwarder holds at most one message in flight. It stops when the
/// viewer goes away (receiver dropped), the bus closes, or `shutdown`
/// fires, and always releases the subscription.
pub fn spawn_forwarder(
    mut sub: Box<dyn Subscription>,
    shutdown: CancellationToken,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = shutdown.cancelled() => break,
                next = sub.next() => match next {
                    Ok(Some(payload)) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Stream subscription failed");
                        break;
                    }
                },
            }
        }

        if let Err(e) = sub.close().await {
            tracing::debug!(error = %e, "Failed to close stream subscription");
        }
        tracing::debug!("Viewer stream closed");
    });

    rx
}

/// Handshake frame followed by one frame per bus message
pub fn event_stream(
    rx: mpsc::Receiver<String>,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    stream::once(async { Ok(Event::default().data(HANDSHAKE)) })
        .chain(ReceiverStream::new(rx).map(|payload| Ok(Event::default().data(payload))))
}

/// GET /events - Stream new alerts as they are accepted.
///
/// No backlog is replayed; a reconnecting viewer re-fetches state from
/// `/api/alerts`.
pub async fn handler(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let sub = state.store.bus().subscribe().await?;
    tracing::debug!("Viewer stream opened");

    let rx = spawn_forwarder(sub, state.shutdown.clone());
    Ok(Sse::new(event_stream(rx)).keep_alive(KeepAlive::default()))
}
