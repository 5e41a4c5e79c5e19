//! Batched point-to-point transport of accumulated values between ranks
//! (spec.md 4.D), grounded in
//! `original_source/src/summation/strategies/binary_tree.hpp`'s
//! `MessageBuffer`.
//!
//! Entries are batched up to [`MAX_MESSAGE_LENGTH`] before being flushed as
//! a single non-blocking send, trading a little latency for far fewer
//! MPI messages than one-send-per-summand would cost.

use std::collections::HashMap;

use memoffset::offset_of;
use mpi::datatype::{Equivalence, UncommittedUserDatatype, UserDatatype};
use mpi::topology::{Rank, SystemCommunicator};
use mpi::traits::*;
use mpi::Address;

use crate::error::SummationError;

/// MPI tag reserved for message-buffer traffic, distinguishing it from any
/// other point-to-point traffic on the same communicator.
pub const MESSAGE_BUFFER_TAG: i32 = 1;

/// Maximum number of entries batched into a single send.
pub const MAX_MESSAGE_LENGTH: usize = 4;

/// A single `(index, value)` pair in flight between ranks.
///
/// `#[repr(C)]` and [`Equivalence`]-derived so it travels as a native MPI
/// structured datatype rather than an untyped byte buffer, the way
/// `tree::Weight` does in the teacher crate.
#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(C)]
pub struct MessageBufferEntry {
    pub index: u64,
    pub value: f64,
}

unsafe impl Equivalence for MessageBufferEntry {
    type Out = UserDatatype;
    fn equivalent_datatype() -> Self::Out {
        UserDatatype::structured(
            &[1, 1],
            &[
                offset_of!(MessageBufferEntry, index) as Address,
                offset_of!(MessageBufferEntry, value) as Address,
            ],
            &[
                UncommittedUserDatatype::contiguous(1, &u64::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(1, &f64::equivalent_datatype()).as_ref(),
            ],
        )
    }
}

/// Batches outgoing `(index, value)` pairs destined for a single target
/// rank, and tracks values received from that rank (or any rank, via
/// [`MessageBuffer::receive`]) keyed by index.
pub struct MessageBuffer<'c> {
    world: &'c SystemCommunicator,
    outbox: Vec<MessageBufferEntry>,
    inbox: HashMap<u64, f64>,
    target: Option<Rank>,
}

impl<'c> MessageBuffer<'c> {
    pub fn new(world: &'c SystemCommunicator) -> Self {
        MessageBuffer {
            world,
            outbox: Vec::with_capacity(MAX_MESSAGE_LENGTH),
            inbox: HashMap::new(),
            target: None,
        }
    }

    /// Queue `(index, value)` for `target`. Automatically flushes first if
    /// the outbox is full or the target rank changed, since a batch can
    /// only ever go to one destination.
    pub fn put(&mut self, index: u64, value: f64, target: Rank) -> Result<(), SummationError> {
        if self.target.is_some_and(|t| t != target) || self.outbox.len() >= MAX_MESSAGE_LENGTH {
            self.flush()?;
        }
        self.target = Some(target);
        self.outbox.push(MessageBufferEntry { index, value });
        if self.outbox.len() >= MAX_MESSAGE_LENGTH {
            self.flush()?;
        }
        Ok(())
    }

    /// Send whatever is currently batched to its target, if anything.
    pub fn flush(&mut self) -> Result<(), SummationError> {
        if self.outbox.is_empty() {
            return Ok(());
        }

        let target = self.target.take().expect("outbox non-empty implies a target");
        let entries = std::mem::take(&mut self.outbox);
        self.world
            .process_at_rank(target)
            .send_with_tag(&entries[..], MESSAGE_BUFFER_TAG);
        Ok(())
    }

    /// No-op placeholder for symmetry with the reference implementation's
    /// asynchronous buffer: sends here are already synchronous, so there is
    /// never anything outstanding to wait on.
    pub fn wait(&mut self) -> Result<(), SummationError> {
        Ok(())
    }

    /// Blocking receive of one batch tagged for the message buffer,
    /// recording every entry in the inbox.
    pub fn receive(&mut self, source: Rank) -> Result<(), SummationError> {
        let (entries, _status): (Vec<MessageBufferEntry>, _) =
            self.world.process_at_rank(source).receive_vec();
        for entry in entries {
            self.inbox.insert(entry.index, entry.value);
        }
        Ok(())
    }

    /// Fetch the value for `index` out of the inbox, blocking on a receive
    /// from `source` if it isn't there yet.
    pub fn get(&mut self, index: u64, source: Rank) -> Result<f64, SummationError> {
        while !self.inbox.contains_key(&index) {
            self.receive(source)?;
        }
        Ok(self.inbox[&index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_layout_is_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<MessageBufferEntry>(), 16);
    }

    #[test]
    fn entry_equality_is_structural() {
        let a = MessageBufferEntry { index: 3, value: 1.5 };
        let b = MessageBufferEntry { index: 3, value: 1.5 };
        let c = MessageBufferEntry { index: 3, value: 1.6 };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
