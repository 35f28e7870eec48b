//! Response interception.
//!
//! [`CaptureBody`] decorates an `http_body::Body` and [`CaptureWriter`]
//! decorates a `tokio::io::AsyncWrite`. Both forward every chunk unchanged,
//! in order, while appending a copy to an in-memory buffer. The buffer is
//! unbounded.
//!
//! Each decorator fires its completion hook exactly once, on whichever
//! terminal signal comes first: the stream finished, it failed, or it was
//! dropped before finishing. Later signals are ignored.

use bytes::{Bytes, BytesMut};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::AsyncWrite;

/// How a response stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Everything was handed to the client.
    Finished,
    /// The stream reported an error.
    Errored,
    /// The stream was dropped before it finished.
    Closed,
}

/// Outcome handed to the completion hook.
#[derive(Debug, Clone)]
pub struct Completion {
    pub termination: Termination,
    /// Every chunk seen, in order.
    pub body: Bytes,
}

impl Completion {
    pub fn is_finished(&self) -> bool {
        self.termination == Termination::Finished
    }
}

/// Hook fired once per stream.
pub type OnComplete = Box<dyn FnOnce(Completion) + Send + Sync + 'static>;

/// Accumulator plus once-only completion hook.
struct Tap {
    buffer: BytesMut,
    on_complete: Option<OnComplete>,
}

impl Tap {
    fn new(on_complete: OnComplete) -> Self {
        Self {
            buffer: BytesMut::new(),
            on_complete: Some(on_complete),
        }
    }

    fn record(&mut self, chunk: &[u8]) {
        if self.on_complete.is_some() {
            self.buffer.extend_from_slice(chunk);
        }
    }

    fn complete(&mut self, termination: Termination) {
        if let Some(on_complete) = self.on_complete.take() {
            let body = self.buffer.split().freeze();
            on_complete(Completion { termination, body });
        }
    }

    fn is_complete(&self) -> bool {
        self.on_complete.is_none()
    }
}

impl Drop for Tap {
    fn drop(&mut self) {
        self.complete(Termination::Closed);
    }
}

impl fmt::Debug for Tap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tap")
            .field("buffered", &self.buffer.len())
            .field("complete", &self.is_complete())
            .finish()
    }
}

pin_project! {
    /// Body decorator that records every data frame.
    ///
    /// Frames, trailers, size hints and errors reach the caller exactly as
    /// the inner body produced them.
    #[derive(Debug)]
    pub struct CaptureBody<B> {
        #[pin]
        inner: B,
        tap: Tap,
    }
}

impl<B: Body> CaptureBody<B> {
    /// Wrap `inner`. A body that is already at its end completes as
    /// finished right away, since nothing will poll it.
    pub fn new<F>(inner: B, on_complete: F) -> Self
    where
        F: FnOnce(Completion) + Send + Sync + 'static,
    {
        let mut tap = Tap::new(Box::new(on_complete));
        if inner.is_end_stream() {
            tap.complete(Termination::Finished);
        }
        Self { inner, tap }
    }
}

impl<B> Body for CaptureBody<B>
where
    B: Body,
    B::Data: AsRef<[u8]>,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        match ready!(this.inner.as_mut().poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.tap.record(data.as_ref());
                }
                if this.inner.is_end_stream() {
                    this.tap.complete(Termination::Finished);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(e)) => {
                this.tap.complete(Termination::Errored);
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.tap.complete(Termination::Finished);
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

pin_project! {
    /// Writer decorator that records every byte the inner writer accepts.
    ///
    /// Return values, including `Poll::Pending` backpressure and short
    /// writes, are passed through untouched. Only the accepted prefix of a
    /// buffer is recorded, so a retried write is never captured twice.
    #[derive(Debug)]
    pub struct CaptureWriter<W> {
        #[pin]
        inner: W,
        tap: Tap,
    }
}

impl<W> CaptureWriter<W> {
    pub fn new<F>(inner: W, on_complete: F) -> Self
    where
        F: FnOnce(Completion) + Send + Sync + 'static,
    {
        Self {
            inner,
            tap: Tap::new(Box::new(on_complete)),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

impl<W: AsyncWrite> AsyncWrite for CaptureWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let result = ready!(this.inner.poll_write(cx, buf));
        match &result {
            Ok(written) => this.tap.record(&buf[..*written]),
            Err(_) => this.tap.complete(Termination::Errored),
        }
        Poll::Ready(result)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let result = ready!(this.inner.poll_flush(cx));
        if result.is_err() {
            this.tap.complete(Termination::Errored);
        }
        Poll::Ready(result)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let result = ready!(this.inner.poll_shutdown(cx));
        let termination = if result.is_ok() {
            Termination::Finished
        } else {
            Termination::Errored
        };
        this.tap.complete(termination);
        Poll::Ready(result)
    }
}
