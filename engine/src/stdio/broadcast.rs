//! A fan-out writer with dynamic subscription. Every write is delivered
//! to all current subscribers in program order; a failing subscriber is
//! dropped silently and never blocks the others or the file sinks.

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Boxed downstream writer, typically the response body of an attach or
/// logs-follow HTTP stream.
pub type Subscriber = Box<dyn AsyncWrite + Send + Unpin>;

pub struct BroadcastWriter {
    subscribers: tokio::sync::Mutex<Vec<Subscriber>>,
}

impl Default for BroadcastWriter {
    fn default() -> Self {
        BroadcastWriter::new()
    }
}

impl BroadcastWriter {
    pub fn new() -> BroadcastWriter {
        BroadcastWriter {
            subscribers: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Add a subscriber; it receives every byte written from now on.
    pub async fn subscribe(&self, subscriber: Subscriber) {
        self.subscribers.lock().await.push(subscriber);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Fan the buffer out to all subscribers. Write errors are absorbed:
    /// the failed subscriber is removed, the rest still receive the
    /// bytes.
    pub async fn write(&self, buf: &[u8]) {
        let mut subscribers = self.subscribers.lock().await;
        let mut alive = Vec::with_capacity(subscribers.len());
        for mut subscriber in subscribers.drain(..) {
            match subscriber.write_all(buf).await {
                Ok(()) => alive.push(subscriber),
                Err(error) => {
                    debug!(%error, "dropping failed stdio subscriber");
                }
            }
        }
        *subscribers = alive;
    }

    /// Shut all subscribers down and clear the list; used by the exit
    /// monitor to finalise attach streams. The owning file sink is
    /// unaffected.
    pub async fn close_subscribers(&self) {
        let mut subscribers = self.subscribers.lock().await;
        for subscriber in subscribers.iter_mut() {
            let _ = subscriber.shutdown().await;
        }
        subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin,
        sync::Arc,
        task::{Context, Poll},
    };

    use parking_lot::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    struct Recorder {
        data: Arc<Mutex<Vec<u8>>>,
        fail: bool,
    }

    impl AsyncWrite for Recorder {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            if self.fail {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "gone",
                )));
            }
            self.data.lock().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn mid_stream_subscriber_sees_subsequent_bytes() {
        let writer = BroadcastWriter::new();
        let early = Recorder::default();
        writer.subscribe(Box::new(early.clone())).await;

        writer.write(b"one ").await;

        let late = Recorder::default();
        writer.subscribe(Box::new(late.clone())).await;
        writer.write(b"two").await;

        assert_eq!(early.data.lock().as_slice(), b"one two");
        assert_eq!(late.data.lock().as_slice(), b"two");
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_affect_others() {
        let writer = BroadcastWriter::new();
        let bad = Recorder {
            fail: true,
            ..Default::default()
        };
        let good = Recorder::default();
        writer.subscribe(Box::new(bad)).await;
        writer.subscribe(Box::new(good.clone())).await;

        writer.write(b"payload").await;
        assert_eq!(good.data.lock().as_slice(), b"payload");
        assert_eq!(writer.subscriber_count().await, 1);

        writer.write(b" more").await;
        assert_eq!(good.data.lock().as_slice(), b"payload more");
    }

    #[tokio::test]
    async fn close_clears_all_subscribers() {
        let writer = BroadcastWriter::new();
        writer.subscribe(Box::new(Recorder::default())).await;
        writer.subscribe(Box::new(Recorder::default())).await;
        writer.close_subscribers().await;
        assert_eq!(writer.subscriber_count().await, 0);
    }
}
