//! HTTP body side of a sink

use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::registry::ListenerRegistry;
use super::sink::Sink;

/// Closes the sink and leaves the registry when the response is dropped
struct DisconnectGuard {
    sink: Arc<Sink>,
    registry: ListenerRegistry,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.sink.close() {
            tracing::debug!(
                listener = %self.sink.id(),
                bytes = self.sink.bytes_sent(),
                "Listener disconnected"
            );
        }
        self.registry.remove(self.sink.id());
    }
}

/// Bytes queued for one listener, ending when the sink is closed
pub struct ListenerStream {
    inner: BoxStream<'static, Bytes>,
    _guard: DisconnectGuard,
}

impl ListenerStream {
    pub fn new(sink: Arc<Sink>, rx: mpsc::Receiver<Bytes>, registry: ListenerRegistry) -> Self {
        let inner = ReceiverStream::new(rx)
            .take_until(sink.cancel_token().cancelled_owned())
            .boxed();
        Self {
            inner,
            _guard: DisconnectGuard { sink, registry },
        }
    }
}

impl Stream for ListenerStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx).map(|chunk| chunk.map(Ok))
    }
}
