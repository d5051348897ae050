//! Split-message chunking and reassembly.
//!
//! A sender splits an encoded message that exceeds
//! [`crate::MAX_MESSAGE_SIZE`] into ordered fragments of at most
//! [`crate::SPLIT_CHUNK_SIZE`] bytes. The receiver reassembles them in a
//! [`SplitAccumulator`] keyed by the transfer's uuid; fragments may
//! arrive in any order because each one carries its slot index.

use crate::error::ProtocolError;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Splits `text` into fragments of at most `chunk_size` bytes, cut on
/// UTF-8 character boundaries. Concatenating the fragments in order
/// reproduces `text` exactly.
pub fn split_message(text: &str, chunk_size: usize) -> Result<Vec<String>, ProtocolError> {
    if chunk_size == 0 {
        return Err(ProtocolError::InvalidChunkSize(chunk_size));
    }

    let mut chunks = Vec::with_capacity(text.len() / chunk_size + 1);
    let mut rest = text;
    while !rest.is_empty() {
        let mut end = chunk_size.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        chunks.push(rest[..end].to_string());
        rest = &rest[end..];
    }
    Ok(chunks)
}

/// Outcome of pushing one fragment into the accumulator.
#[derive(Debug)]
pub struct SplitProgress {
    /// Bytes received so far for this transfer.
    pub completed_size: u64,
    /// The reassembled payload, present exactly once when the transfer
    /// completes.
    pub full_text: Option<String>,
}

impl SplitProgress {
    pub fn is_completed(&self) -> bool {
        self.full_text.is_some()
    }
}

struct Accumulation {
    full_size: u64,
    completed_size: u64,
    chunks: Vec<Option<String>>,
    last_touch: Instant,
}

/// Per-transfer reassembly buffers, keyed by uuid.
///
/// Owned by the receiving side of a connection. Entries are removed when
/// a transfer completes; abandoned entries (peer died mid-stream) are
/// reclaimed by [`SplitAccumulator::evict_idle`].
#[derive(Default)]
pub struct SplitAccumulator {
    transfers: HashMap<Uuid, Accumulation>,
}

impl SplitAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes one fragment at its declared index.
    ///
    /// The first fragment seen for a uuid fixes the transfer's declared
    /// size; a later fragment disagreeing about it drops the transfer.
    /// Overwriting an occupied slot is allowed (last write wins) and the
    /// replaced fragment's length is uncounted first, so a retransmit
    /// never double-counts toward completion.
    pub fn push(
        &mut self,
        uuid: Uuid,
        full_size: u64,
        index: u32,
        body: String,
    ) -> Result<SplitProgress, ProtocolError> {
        let acc = self.transfers.entry(uuid).or_insert_with(|| Accumulation {
            full_size,
            completed_size: 0,
            chunks: Vec::new(),
            last_touch: Instant::now(),
        });

        if acc.full_size != full_size {
            let declared = acc.full_size;
            self.transfers.remove(&uuid);
            return Err(ProtocolError::SizeMismatch {
                uuid,
                declared,
                got: full_size,
            });
        }

        let slot = index as usize;
        if acc.chunks.len() <= slot {
            acc.chunks.resize_with(slot + 1, || None);
        }
        if let Some(prev) = acc.chunks[slot].take() {
            acc.completed_size -= prev.len() as u64;
        }
        acc.completed_size += body.len() as u64;
        acc.chunks[slot] = Some(body);
        acc.last_touch = Instant::now();

        let completed_size = acc.completed_size;
        if completed_size > acc.full_size {
            self.transfers.remove(&uuid);
            return Err(ProtocolError::SizeMismatch {
                uuid,
                declared: full_size,
                got: completed_size,
            });
        }

        let full_text = if completed_size == acc.full_size {
            let acc = self.transfers.remove(&uuid).unwrap();
            Some(acc.chunks.into_iter().flatten().collect())
        } else {
            None
        };

        Ok(SplitProgress {
            completed_size,
            full_text,
        })
    }

    /// Drops a partial transfer. Returns whether an entry existed.
    pub fn clear(&mut self, uuid: &Uuid) -> bool {
        self.transfers.remove(uuid).is_some()
    }

    /// Drops every transfer not touched within `ttl`. Returns how many
    /// entries were reclaimed.
    pub fn evict_idle(&mut self, ttl: Duration) -> usize {
        let before = self.transfers.len();
        self.transfers.retain(|_, acc| acc.last_touch.elapsed() < ttl);
        before - self.transfers.len()
    }

    /// Number of in-flight transfers.
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}
