// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded transports between modules.
//!
//! Both kinds move bytes and block the calling context for at most the given
//! timeout:
//!
//! - [`QueueChannel`] carries items of one fixed size in a ring of `depth`
//!   slots.
//! - [`StreamChannel`] carries variable-length messages in a byte budget,
//!   each within a configured size window, with optional per-side locking.
//!
//! A buffered module holds them as [`ChannelRef`] and doesn't care which
//! kind it has.

use std::sync::Arc;

use crate::sys::Ticks;

mod queue;
mod stream;

pub use queue::QueueChannel;
pub use stream::{SizeWindow, StreamChannel, StreamOptions};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChannelError {
    /// The payload length is not acceptable to this channel (wrong item
    /// size, or outside the message size window). Nothing was queued.
    BadLength,
    /// The message could never fit in this channel, even empty.
    TooLarge,
    /// The destination is smaller than the next item or message, which is
    /// still queued.
    BufferTooSmall,
    /// A message of this length was dequeued but falls outside the size
    /// window. It has been consumed and its contents are lost.
    Discarded(usize),
    /// No space (push) or no data (pull) before the deadline.
    Timeout,
    /// The side lock could not be taken before the deadline.
    LockTimeout,
}

/// Bounded transport with blocking push and pull.
pub trait Channel: Send + Sync {
    /// Queues `buf`, waiting up to `timeout` for room.
    fn push(&self, buf: &[u8], timeout: Ticks) -> Result<(), ChannelError>;

    /// Takes the oldest item or message into `buf`, waiting up to `timeout`
    /// for one to arrive. Returns the number of bytes written.
    fn pull(&self, buf: &mut [u8], timeout: Ticks)
        -> Result<usize, ChannelError>;

    /// Queues `buf` if that can be done right now, without waiting for room
    /// or for a contended side lock. Suitable for interrupt-like contexts.
    fn try_push(&self, buf: &[u8]) -> Result<(), ChannelError>;
}

/// How modules hold their channels. A single channel may back both sides of
/// a module.
pub type ChannelRef = Arc<dyn Channel>;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    BadLength(usize),
    TooLarge(usize),
    PushTimeout,
    PullTimeout,
    LockTimeout,
    TooSmall { needed: usize, have: usize },
    Discarded(usize),
}

ringbuf::ringbuf!(Trace, 32, Trace::None);
