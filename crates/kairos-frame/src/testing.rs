use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

enum Step {
    Data(Vec<u8>),
    Error(io::ErrorKind),
    Pending,
}

/// Reader that returns scripted chunks, one per `read` call.
///
/// A chunk larger than the caller's buffer is split and the remainder served
/// by the next read. After the script runs out the reader reports EOF.
pub(crate) struct ChunkedReader {
    steps: VecDeque<Step>,
}

impl ChunkedReader {
    pub(crate) fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        Self {
            steps: chunks
                .into_iter()
                .map(|chunk| Step::Data(chunk.as_ref().to_vec()))
                .collect(),
        }
    }

    /// Fail the read after the scripted chunks.
    pub(crate) fn then_error(mut self, kind: io::ErrorKind) -> Self {
        self.steps.push_back(Step::Error(kind));
        self
    }

    /// Stall forever after the scripted chunks.
    pub(crate) fn then_pending(mut self) -> Self {
        self.steps.push_back(Step::Pending);
        self
    }
}

impl AsyncRead for ChunkedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.steps.pop_front() {
            None => Poll::Ready(Ok(())),
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.remaining());
                buf.put_slice(&data[..n]);
                if n < data.len() {
                    this.steps.push_front(Step::Data(data.split_off(n)));
                }
                Poll::Ready(Ok(()))
            }
            Some(Step::Error(kind)) => Poll::Ready(Err(io::Error::from(kind))),
            Some(Step::Pending) => {
                this.steps.push_front(Step::Pending);
                Poll::Pending
            }
        }
    }
}
