//! Streaming implementation for forwarding a body while capturing a copy
//!
//! [`CapturingStream`] sits between the upstream body and the caller. Each
//! chunk goes straight through and a cheap `Bytes` clone is sent to a capture
//! task over an unbounded channel, so a slow capture consumer never stalls
//! forwarding. The capture task drains the channel into a bounded buffer with
//! [`collect_tap`].

use crate::proxy::capture_buffer::{BoundedCaptureBuffer, CapturedBody};
use bytes::Bytes;
use futures_util::Stream;
use pin_project_lite::pin_project;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::sync::mpsc;

/// What the forwarding side tells the capture side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSignal {
    Chunk(Bytes),
    Failed(String),
    Finished,
}

pin_project! {
    /// Stream adapter that copies every chunk to a capture channel
    pub struct CapturingStream<S> {
        #[pin]
        inner: S,
        tap: Option<mpsc::UnboundedSender<CaptureSignal>>,
    }
}

impl<S> CapturingStream<S> {
    /// Wrap `inner`; the receiver gets every chunk plus one terminal signal
    pub fn new(inner: S) -> (Self, mpsc::UnboundedReceiver<CaptureSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                inner,
                tap: Some(tx),
            },
            rx,
        )
    }
}

impl<S, E> Stream for CapturingStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let next = ready!(this.inner.poll_next(cx));

        match &next {
            Some(Ok(chunk)) => {
                if let Some(tap) = this.tap.as_ref() {
                    // a closed receiver only means nobody is capturing
                    let _ = tap.send(CaptureSignal::Chunk(chunk.clone()));
                }
            }
            Some(Err(e)) => {
                if let Some(tap) = this.tap.take() {
                    let _ = tap.send(CaptureSignal::Failed(e.to_string()));
                }
            }
            None => {
                if let Some(tap) = this.tap.take() {
                    let _ = tap.send(CaptureSignal::Finished);
                }
            }
        }

        Poll::Ready(next)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// How the forwarded stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The upstream body ended normally
    Completed,
    /// The upstream body failed mid-stream
    Failed(String),
    /// The stream was dropped before it ended, usually a caller disconnect
    Abandoned,
}

/// Result of draining a capture channel
#[derive(Debug, Clone)]
pub struct TapOutcome {
    pub body: CapturedBody,
    pub end: StreamEnd,
}

/// Drain the capture channel into `buffer` until the stream settles
pub async fn collect_tap(
    mut rx: mpsc::UnboundedReceiver<CaptureSignal>,
    mut buffer: BoundedCaptureBuffer,
) -> TapOutcome {
    let end = loop {
        match rx.recv().await {
            Some(CaptureSignal::Chunk(chunk)) => buffer.push(&chunk),
            Some(CaptureSignal::Failed(message)) => break StreamEnd::Failed(message),
            Some(CaptureSignal::Finished) => break StreamEnd::Completed,
            None => break StreamEnd::Abandoned,
        }
    };

    TapOutcome {
        body: buffer.finish(),
        end,
    }
}
