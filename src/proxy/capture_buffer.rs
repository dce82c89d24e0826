//! Size-capped accumulator for the logged copy of a response body

use crate::proxy::headers::fingerprint;
use crate::proxy::types::MaxCaptureBytes;
use bytes::{Bytes, BytesMut};

/// Collects at most `limit` bytes of a streamed body
///
/// Every byte offered is counted toward [`BoundedCaptureBuffer::total_bytes`],
/// but only the first `limit` are kept. Once something had to be dropped the
/// buffer stays truncated.
#[derive(Debug)]
pub struct BoundedCaptureBuffer {
    data: BytesMut,
    limit: usize,
    enabled: bool,
    truncated: bool,
    total_bytes: u64,
}

impl BoundedCaptureBuffer {
    /// Create a buffer; with `enabled` false it only counts bytes
    pub fn new(limit: MaxCaptureBytes, enabled: bool) -> Self {
        Self {
            data: BytesMut::new(),
            limit: limit.into_inner(),
            enabled,
            truncated: false,
            total_bytes: 0,
        }
    }

    /// Offer the next chunk of the body
    pub fn push(&mut self, chunk: &[u8]) {
        self.total_bytes += chunk.len() as u64;
        if !self.enabled || chunk.is_empty() {
            return;
        }

        let remaining = self.limit.saturating_sub(self.data.len());
        if remaining == 0 {
            self.truncated = true;
        } else if chunk.len() <= remaining {
            self.data.extend_from_slice(chunk);
        } else {
            self.data.extend_from_slice(&chunk[..remaining]);
            self.truncated = true;
        }
    }

    pub fn captured_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Freeze the buffer into the captured body
    pub fn finish(self) -> CapturedBody {
        CapturedBody {
            bytes: self.data.freeze(),
            enabled: self.enabled,
            truncated: self.truncated,
            total_bytes: self.total_bytes,
        }
    }
}

/// Finalized capture of one response body
#[derive(Debug, Clone)]
pub struct CapturedBody {
    pub bytes: Bytes,
    pub enabled: bool,
    pub truncated: bool,
    pub total_bytes: u64,
}

impl CapturedBody {
    /// Captured bytes as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.bytes)
    }
}
