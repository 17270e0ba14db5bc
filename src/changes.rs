//! Row-level change notifications.
//!
//! Mutating server functions publish a [`ChangeEvent`] on the server's [`ChangeFeed`]. The
//! admin view listens to the participants table through Server-Sent Events served at
//! [`PARTICIPANT_CHANGES_PATH`], using a [`ChangeSubscription`] in the browser.

use serde::{Deserialize, Serialize};

pub const PARTICIPANT_CHANGES_PATH: &str = "/api/changes/participants";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Participants,
    Votes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    /// Id of the changed row.
    pub id: i32,
}

impl ChangeEvent {
    pub fn new(table: Table, kind: ChangeKind, id: i32) -> Self {
        ChangeEvent { table, kind, id }
    }
}

#[cfg(feature = "ssr")]
pub use self::server::{participant_changes, ChangeFeed, Subscription};

#[cfg(feature = "ssr")]
mod server {
    use std::convert::Infallible;

    use axum::response::sse::{Event, KeepAlive, Sse};
    use axum::Extension;
    use futures::Stream;
    use tokio::sync::broadcast::{self, error::RecvError};
    use tracing::{debug, info, warn};

    use super::{ChangeEvent, Table};

    /// Publish/subscribe hub shared by every request. Cloning yields another handle to the
    /// same channel.
    #[derive(Debug, Clone)]
    pub struct ChangeFeed {
        sender: broadcast::Sender<ChangeEvent>,
    }

    impl ChangeFeed {
        pub const CAPACITY: usize = 64;

        pub fn new() -> Self {
            Self::with_capacity(Self::CAPACITY)
        }

        pub fn with_capacity(capacity: usize) -> Self {
            let (sender, _) = broadcast::channel(capacity);
            ChangeFeed { sender }
        }

        /// Returns how many subscribers the event was handed to. Having none is fine.
        pub fn publish(&self, event: ChangeEvent) -> usize {
            let delivered = self.sender.send(event).unwrap_or(0);
            debug!(?event, delivered, "Published change");
            delivered
        }

        pub fn subscribe(&self, table: Table) -> Subscription {
            Subscription {
                table,
                receiver: self.sender.subscribe(),
            }
        }
    }

    impl Default for ChangeFeed {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Stream of changes to one table.
    #[derive(Debug)]
    pub struct Subscription {
        table: Table,
        receiver: broadcast::Receiver<ChangeEvent>,
    }

    impl Subscription {
        pub fn table(&self) -> Table {
            self.table
        }

        /// Waits for the next change to this subscription's table. Returns None once every
        /// feed handle has been dropped.
        pub async fn next(&mut self) -> Option<ChangeEvent> {
            loop {
                match self.receiver.recv().await {
                    Ok(event) if event.table == self.table => return Some(event),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(table = ?self.table, skipped, "Change subscriber fell behind");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }
    }

    /// Streams participant changes to the browser as Server-Sent Events, one JSON-encoded
    /// [`ChangeEvent`] per message.
    pub async fn participant_changes(
        Extension(feed): Extension<ChangeFeed>,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        info!("Client subscribed to participant changes");
        let subscription = feed.subscribe(Table::Participants);
        let stream = futures::stream::unfold(subscription, |mut subscription| async move {
            let change = subscription.next().await?;
            let event = match serde_json::to_string(&change) {
                Ok(payload) => Event::default().data(payload),
                Err(e) => {
                    warn!(error = %e, "Failed to encode change");
                    Event::default().comment("encoding error")
                }
            };
            Some((Ok(event), subscription))
        });
        Sse::new(stream).keep_alive(KeepAlive::default())
    }
}

#[cfg(feature = "hydrate")]
pub use self::client::ChangeSubscription;

#[cfg(feature = "hydrate")]
mod client {
    use leptos::logging::warn;
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::{JsCast, JsValue};
    use web_sys::{EventSource, MessageEvent};

    use super::ChangeEvent;

    /// Browser side of a change feed. Owned by the component that opened it and closed with
    /// [`ChangeSubscription::dispose`].
    pub struct ChangeSubscription {
        source: EventSource,
        _on_message: Closure<dyn FnMut(MessageEvent)>,
    }

    impl ChangeSubscription {
        pub fn open<F>(url: &str, mut handler: F) -> Result<Self, JsValue>
        where
            F: FnMut(ChangeEvent) + 'static,
        {
            let source = EventSource::new(url)?;
            let on_message = Closure::<dyn FnMut(MessageEvent)>::new(move |msg: MessageEvent| {
                let Some(data) = msg.data().as_string() else {
                    return;
                };
                match serde_json::from_str::<ChangeEvent>(&data) {
                    Ok(event) => handler(event),
                    Err(e) => warn!("Ignoring malformed change event {:?}: {}", data, e),
                }
            });
            source.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
            Ok(ChangeSubscription {
                source,
                _on_message: on_message,
            })
        }

        pub fn dispose(self) {
            self.source.set_onmessage(None);
            self.source.close();
        }
    }
}
