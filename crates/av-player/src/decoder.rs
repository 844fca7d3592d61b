//! Codec interface.
//!
//! Decoders follow a submit/receive contract: one submitted unit may yield zero or more
//! frames, and callers keep calling [`Decoder::receive`] until it reports
//! [`Receive::WouldBlock`] (needs more input) or [`Receive::EndOfStream`].

use crate::error::Result;
use crate::media::CompressedUnit;

#[derive(Debug, PartialEq)]
pub enum Receive<F> {
    Frame(F),
    /// No more output for the input submitted so far.
    WouldBlock,
    /// The decoder has been flushed and will not produce anything else.
    EndOfStream,
}

pub trait Decoder<F>: Send {
    /// Hand one unit to the codec. A rejected unit maps to [`crate::error::PlayerError::Decode`].
    fn submit(&mut self, unit: &CompressedUnit) -> Result<()>;

    /// Fetch the next decoded frame, if any.
    fn receive(&mut self) -> Result<Receive<F>>;
}
