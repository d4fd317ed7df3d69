//! Decoder contract.

use splice_core::{CompressedFrame, DecodedFrame};

/// A video decoder with internal reordering and drain semantics.
///
/// Decoders lag: the picture popped by `decompress` may belong to an
/// earlier input than the one just pushed. Callers must never assume
/// input/output alignment and should reconcile timestamps themselves.
pub trait VideoDecoder: Send + Sync {
    /// Push one compressed frame and pop the decoder's current output.
    ///
    /// An empty payload is a drain request: return buffered output without
    /// consuming new data. Returns `false` when no picture is available
    /// (warm-up, drain exhausted, or a decode failure); non-fatal, the
    /// caller decides whether to keep feeding.
    fn decompress(&mut self, input: &CompressedFrame, out: &mut DecodedFrame) -> bool;

    /// Discard all internal state, e.g. before a seek.
    fn flush(&mut self);

    /// Enter or leave draining mode (no new input, only buffered output).
    fn set_draining(&mut self, draining: bool);
    fn is_draining(&self) -> bool;

    /// Whether draining has exhausted all buffered output.
    fn end_of_stream_reached(&self) -> bool;
    fn set_end_of_stream(&mut self, eos: bool);

    /// Whether the decoder still expects input before producing output,
    /// so a `false` from `decompress` is warm-up rather than an error.
    fn keep_feeding(&self) -> bool;

    /// Zero-copy capability: output references decoder-owned memory and
    /// must be copied out through a scratch image.
    fn zero_copy(&self) -> bool;
}
