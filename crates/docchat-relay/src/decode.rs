//! Incremental UTF-8 decoding of backend body reads.
//!
//! A multi-byte character may be split across two reads; the trailing partial
//! sequence is held back and completed by the next read. Nothing else is
//! buffered, so each read maps to at most one text fragment.

use tracing::warn;

use crate::errors::RelayError;

/// Consecutive invalid bytes tolerated before the body is treated as not
/// being text at all. The run spans read boundaries.
pub const MAX_INVALID_RUN: usize = 32;

#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
    skipped_bytes: usize,
    invalid_run: usize,
}

impl Utf8ChunkDecoder {
    /// Decodes one body read.
    ///
    /// Returns `Ok(None)` when the read produced no text, either because it
    /// only extended a partial character or because all of its bytes were
    /// skipped. Invalid bytes are skipped wherever read boundaries fall; more
    /// than [`MAX_INVALID_RUN`] of them in a row ends the stream.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Option<String>, RelayError> {
        if chunk.is_empty() {
            return Ok(None);
        }
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::new();
        let mut skipped = 0_usize;
        let mut rest: &[u8] = &buf;
        while !rest.is_empty() {
            let (valid, invalid_len) = match std::str::from_utf8(rest) {
                Ok(_) => (rest.len(), None),
                Err(err) => (err.valid_up_to(), err.error_len()),
            };
            if valid > 0 {
                out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                self.invalid_run = 0;
            }
            match invalid_len {
                Some(len) => {
                    skipped += len;
                    self.invalid_run += len;
                    if self.invalid_run > MAX_INVALID_RUN {
                        self.skipped_bytes += skipped;
                        return Err(RelayError::interrupted(format!(
                            "Backend stream could not be decoded as UTF-8 ({} consecutive invalid bytes)",
                            self.invalid_run
                        )));
                    }
                    rest = &rest[valid + len..];
                }
                None => {
                    self.pending = rest[valid..].to_vec();
                    break;
                }
            }
        }

        if skipped > 0 {
            self.skipped_bytes += skipped;
            warn!(skipped, "skipped invalid UTF-8 bytes in backend chunk");
        }

        Ok(if out.is_empty() { None } else { Some(out) })
    }

    /// Ends the stream; returns how many bytes of an unfinished character were
    /// dropped.
    pub fn finish(&mut self) -> usize {
        let dangling = self.pending.len();
        if dangling > 0 {
            warn!(dangling, "backend stream ended inside a UTF-8 sequence");
            self.pending.clear();
        }
        dangling
    }

    /// Total invalid bytes skipped so far.
    pub fn skipped_bytes(&self) -> usize {
        self.skipped_bytes
    }
}
