//! Bounded in-memory byte pipe whose read end is an HTTP request body.
//!
//! The writer half is driven by a producer task; the reader half is handed to
//! hyper as the outgoing body. At most `capacity` chunks are in flight, so a
//! producer that outpaces the connection suspends on [`PipeWriter::write`]
//! until hyper drains the queue.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use hyper::body::{Body, Bytes, Frame};
use tokio::sync::mpsc;

/// Default number of chunks that may be queued in a pipe.
pub const DEFAULT_CAPACITY: usize = 4;

/// Create a pipe holding at most `capacity` queued chunks.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let closed = Arc::new(AtomicBool::new(false));
    (
        PipeWriter {
            tx,
            closed: Arc::clone(&closed),
        },
        PipeReader {
            rx,
            closed,
            done: false,
        },
    )
}

/// Write half of a [`pipe`].
///
/// Must be finished with [`close`](Self::close) or
/// [`close_with_error`](Self::close_with_error). Dropping it otherwise is
/// reported to the reader as an unexpected end of stream.
#[derive(Debug)]
pub struct PipeWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    closed: Arc<AtomicBool>,
}

impl PipeWriter {
    /// Queue a chunk, suspending while the pipe is full.
    ///
    /// Fails with [`io::ErrorKind::BrokenPipe`] once the reader is gone.
    pub async fn write(&mut self, data: Bytes) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Ok(data))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))
    }

    /// Abort the pipe. The reader yields `err` and then ends.
    pub async fn close_with_error(self, err: io::Error) {
        // The reader may already have gone away; nothing left to notify then.
        let _ = self.tx.send(Err(err)).await;
    }

    /// Signal a clean end of stream.
    pub fn close(self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the reader half has been dropped.
    pub fn is_reader_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read half of a [`pipe`], usable directly as a hyper request body.
#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    closed: Arc<AtomicBool>,
    done: bool,
}

impl Body for PipeReader {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(data))) => Poll::Ready(Some(Ok(Frame::data(data)))),
            Poll::Ready(Some(Err(e))) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.done = true;
                if self.closed.load(Ordering::SeqCst) {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "pipe writer dropped before close",
                    ))))
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}
