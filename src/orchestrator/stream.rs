use crate::types::ChatEvent;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Cancels an in-flight streamed turn.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Receiving half of a streamed turn.
///
/// Dropping it cancels the producer: nothing further is generated, cached or
/// appended to the conversation.
pub struct ChatStream {
    rx: mpsc::Receiver<ChatEvent>,
    _cancel_on_drop: DropGuard,
}

impl ChatStream {
    pub(crate) fn new(rx: mpsc::Receiver<ChatEvent>, token: CancellationToken) -> Self {
        Self {
            rx,
            _cancel_on_drop: token.drop_guard(),
        }
    }

    /// Wire-encoded records, one per event.
    pub fn into_sse(self) -> impl Stream<Item = String> + Send {
        self.map(|event| event.to_sse())
    }
}

impl Stream for ChatStream {
    type Item = ChatEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
