//! NDJSON codec for agent wire streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! unterminated or oversized message from a misbehaving agent cannot grow the
//! read buffer without bound.
//!
//! Use [`NdjsonCodec`] with [`tokio_util::codec::FramedRead`] for the inbound
//! direction; outbound frames go through [`NdjsonCodec::encode_frame`].

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::rpc::frame::Frame;
use crate::{AppError, Result};

/// Maximum accepted inbound line length: 16 MiB.
///
/// Tool results may carry whole file contents, so the limit is generous; it
/// exists to bound memory, not to police message size.
pub const MAX_LINE_BYTES: usize = 16 * 1_048_576;

/// Line codec for the newline-delimited JSON-RPC stream.
///
/// Inbound lines longer than [`MAX_LINE_BYTES`] yield
/// [`AppError::Transport`]`("line too long: …")`; the codec then discards the
/// remainder of the offending line and resynchronizes on the next `\n`.
#[derive(Debug)]
pub struct NdjsonCodec(LinesCodec);

impl NdjsonCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom inbound limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max))
    }

    /// Serialize `frame` as one compact JSON line into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if the frame cannot be serialized.
    pub fn encode_frame(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        let line = serde_json::to_string(frame)?;
        self.encode(line, dst)
    }
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for NdjsonCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Transport("line too long: exceeded max line length".into())
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
