//! Reassemble a relay byte stream into track updates.
//!
//! TCP delivers arbitrary chunks. Bytes are buffered until the 8-byte prefix
//! is present, the tag gives the record length, and a record is only cut
//! from the buffer once all of its bytes have arrived. Records of different
//! lengths can therefore be interleaved freely.

use bytes::BytesMut;

use crate::types::*;
use crate::wire;

/// Initial buffer capacity: room for a few hundred records.
const INITIAL_CAPACITY: usize = 16 * 1024;

#[derive(Debug)]
pub struct StreamReassembler {
    buf: BytesMut,
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReassembler {
    pub fn new() -> Self {
        StreamReassembler {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Direct access for readers that fill the buffer in place (`read_buf`).
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes waiting for the rest of their record.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop everything buffered, e.g. after a reconnect.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Cut and decode the next complete record.
    ///
    /// `Ok(None)` when fewer bytes than the next record are buffered. On an
    /// unknown tag nothing is consumed and the error is returned every time
    /// until the caller clears the buffer. A record that fails to decode for
    /// any other reason has already been removed.
    pub fn next_record(&mut self) -> Result<Option<TrackUpdate>> {
        let Some(len) = wire::peek_record_len(&self.buf)? else {
            return Ok(None);
        };
        if self.buf.len() < len {
            return Ok(None);
        }
        let record = self.buf.split_to(len);
        wire::decode(&record).map(Some)
    }

    /// Decode every complete record currently buffered, in order.
    ///
    /// Stops at the first desynchronizing error, which is the last item.
    pub fn drain(&mut self) -> Vec<Result<TrackUpdate>> {
        let mut out = Vec::new();
        loop {
            match self.next_record() {
                Ok(Some(update)) => out.push(Ok(update)),
                Ok(None) => break,
                Err(e) => {
                    let desync = e.is_desync();
                    out.push(Err(e));
                    if desync {
                        break;
                    }
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
