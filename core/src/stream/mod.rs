//! Editable byte streams over intercepted traffic.
//!
//! A stream exposes the reassembled payload of one flow direction as a
//! readable, editable sequence of bytes. The consumer walks the stream with
//! [`read`](Stream::read), may save a position with [`mark`](Stream::mark)
//! and return to it with [`rewind`](Stream::rewind), and mutates the
//! outbound bytes with [`insert`](Stream::insert), [`erase`](Stream::erase),
//! and [`replace`](Stream::replace). Edits never change what the consumer
//! has already read; they change what is eventually put back on the wire.

pub mod tcp;

use thiserror::Error;

/// Operations common to all editable streams.
///
/// Transport-specific intake and emission (segment push/pop, acknowledgement
/// translation) live on the concrete stream types.
pub trait Stream {
    /// Copies up to `data.len()` reassembled bytes at the read position,
    /// advancing it. Returns the number of bytes produced; short counts mean
    /// the stream is stalled at a gap or has no more data buffered.
    fn read(&mut self, data: &mut [u8]) -> usize;

    /// Returns the number of bytes that could be read without blocking. Does
    /// not move the read position.
    fn available(&self) -> usize;

    /// Inserts `data` into the outbound stream at the read position and
    /// advances the position past the inserted bytes. Returns the number of
    /// bytes inserted.
    fn insert(&mut self, data: &[u8]) -> Result<usize, StreamError>;

    /// Replaces the next `data.len()` stream bytes with `data`. Returns the
    /// number of bytes inserted; fewer original bytes may have been consumed
    /// if the stream stalled.
    fn replace(&mut self, data: &[u8]) -> Result<usize, StreamError>;

    /// Drops up to `length` bytes from the outbound stream starting at the
    /// read position. Returns the number of bytes actually erased; a short
    /// count means the stream stalled at a gap.
    fn erase(&mut self, length: usize) -> Result<usize, StreamError>;

    /// Saves the read position. Overwrites any prior mark.
    fn mark(&mut self);

    /// Discards the saved position.
    fn unmark(&mut self) -> Result<(), StreamError>;

    /// Moves the read position back to the saved position and discards it.
    fn rewind(&mut self) -> Result<(), StreamError>;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// Data arrived before the initial sequence number was recorded.
    #[error("invalid stream")]
    InvalidStream,

    /// A segment's sequence number lies below the initial sequence number.
    #[error("invalid sequence number: {seq} < {initial}")]
    InvalidSeq { seq: u32, initial: u32 },

    /// A segment overlaps bytes already queued or already read.
    #[error("retransmit packet (unsupported)")]
    Retransmit,

    /// `unmark` or `rewind` called without a saved position.
    #[error("stream was not marked")]
    NotMarked,

    /// Edit attempted on a stream constructed in passthrough mode.
    #[error("stream is read-only")]
    ReadOnly,

    /// The pending chunk list is full.
    #[error("too many pending segments")]
    PendingOverflow,
}
