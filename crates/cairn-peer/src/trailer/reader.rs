//! Blocking-read adapter over a reassembly transfer.
//!
//! The engine itself is event-driven; legacy stream consumers want a
//! synchronous read call instead. The adapter bridges the two with a
//! channel: each read arms the engine's want-next flag and then blocks
//! until the consumer callback pushes the bytes through, the transfer
//! closes, or the wait exceeds the timeout. A timed-out transfer is
//! presumed wedged and force-closed with a kill so the peer stops
//! sending and no thread parks forever.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::demux::TrailerDemux;
use super::reassembly::{TrailerConsumer, TrailerReassembly};
use super::TrailerError;

/// Longest a blocking read will wait before declaring the sender stalled.
pub const READ_TIMEOUT: Duration = Duration::from_secs(300);

enum ReadEvent {
    Data(Bytes),
    Closed,
}

/// Feeds engine callbacks into the reader's channel. Sending never
/// blocks, so this is safe to run under the transfer lock.
struct ChannelConsumer {
    tx: mpsc::Sender<ReadEvent>,
}

impl TrailerConsumer for ChannelConsumer {
    fn data(&mut self, bytes: &Bytes) -> anyhow::Result<()> {
        self.tx
            .send(ReadEvent::Data(bytes.clone()))
            .map_err(|_| anyhow::anyhow!("blocking reader dropped"))
    }

    fn closed(&mut self) {
        let _ = self.tx.send(ReadEvent::Closed);
    }
}

pub struct BlockingTrailerReader {
    trailer: Arc<TrailerReassembly>,
    rx: mpsc::Receiver<ReadEvent>,
    timeout: Duration,
    finished: bool,
}

impl BlockingTrailerReader {
    /// Open a transfer on `trailer_id` and consume it synchronously.
    pub fn open(demux: &Arc<TrailerDemux>, trailer_id: u16) -> Result<Self, TrailerError> {
        Self::open_with_timeout(demux, trailer_id, READ_TIMEOUT)
    }

    /// As [`open`](Self::open) with a custom stall timeout.
    pub fn open_with_timeout(
        demux: &Arc<TrailerDemux>,
        trailer_id: u16,
        timeout: Duration,
    ) -> Result<Self, TrailerError> {
        let (tx, rx) = mpsc::channel();
        let trailer = demux.open(trailer_id, Box::new(ChannelConsumer { tx }))?;
        Ok(Self {
            trailer,
            rx,
            timeout,
            finished: false,
        })
    }

    /// Block until the next in-order piece of the stream.
    ///
    /// `Ok(None)` means the transfer closed normally. Exceeding the
    /// timeout force-closes the transfer with a kill and errors.
    pub fn read_next(&mut self) -> Result<Option<Bytes>, TrailerError> {
        if self.finished {
            return Ok(None);
        }
        self.trailer.request_next();
        match self.rx.recv_timeout(self.timeout) {
            Ok(ReadEvent::Data(bytes)) => Ok(Some(bytes)),
            Ok(ReadEvent::Closed) | Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                Ok(None)
            }
            Err(RecvTimeoutError::Timeout) => {
                let trailer_id = self.trailer.trailer_id();
                tracing::warn!(trailer_id, "trailer read stalled, killing transfer");
                self.trailer.close(true);
                self.finished = true;
                Err(TrailerError::ReadTimeout { trailer_id })
            }
        }
    }

    /// End the transfer early. `kill` asks the peer to stop sending.
    pub fn close(&mut self, kill: bool) {
        self.finished = true;
        self.trailer.close(kill);
    }
}

impl Drop for BlockingTrailerReader {
    fn drop(&mut self) {
        if !self.finished {
            self.trailer.close(false);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
