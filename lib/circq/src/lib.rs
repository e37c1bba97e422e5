// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A circular byte queue over caller-chosen storage.
//!
//! `CircQ` stores bytes in FIFO order in any backing that can be viewed as a
//! byte slice: a `&'static mut [u8]` for statically placed queues, or a
//! `Box<[u8]>` when the owner allocates at construction. Two framings are
//! layered over the raw byte queue:
//!
//! - fixed-size chunks, where the caller always moves the same number of
//!   bytes in and out ([`CircQ::enqueue`], [`CircQ::dequeue_into`]), and
//! - length-framed messages ([`CircQ::enqueue_msg`], [`CircQ::dequeue_msg`]),
//!   where each message is preceded by a little-endian `u32` length header.
//!   A message therefore costs [`HEADER_LEN`] bytes more than its payload.
//!
//! Non-goals:
//!
//! - Concurrent access. The queue is always accessed through `&mut`; callers
//!   that share one put it behind a lock.

#![cfg_attr(not(test), no_std)]

/// Bytes of framing in front of every message.
pub const HEADER_LEN: usize = 4;

#[derive(Debug)]
pub struct CircQ<B> {
    backing: B,
    head: usize,
    tail: usize,
    available: usize,
}

/// Error returned when the queue is too full to accommodate a block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueueFull;

/// Error returned when the queue doesn't have enough data to read out a
/// certain number of bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueueNotFullEnough;

/// Outcome of an attempt to take a framed message out of the queue.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MsgError {
    /// No message is queued.
    Empty,
    /// The next message is `needed` bytes long and does not fit the
    /// destination; it has been left in the queue.
    TooBig { needed: usize },
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> CircQ<B> {
    /// Creates an empty queue using `backing` as its storage.
    pub fn new(backing: B) -> Self {
        Self {
            backing,
            head: 0,
            tail: 0,
            available: 0,
        }
    }

    /// Total number of bytes the queue can hold.
    pub fn capacity(&self) -> usize {
        self.backing.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Returns the number of bytes that have been enqueued but not yet
    /// dequeued.
    pub fn available(&self) -> usize {
        self.available
    }

    /// Returns the number of bytes that can be enqueued without needing to
    /// dequeue more data.
    pub fn free(&self) -> usize {
        self.capacity() - self.available
    }

    /// Enqueues a block of bytes. Either all of `data` goes in or nothing
    /// does.
    pub fn enqueue(&mut self, data: &[u8]) -> Result<(), QueueFull> {
        if data.len() > self.free() {
            return Err(QueueFull);
        }
        self.copy_in(data);
        Ok(())
    }

    /// Dequeues exactly `dest.len()` bytes into `dest`.
    pub fn dequeue_into(
        &mut self,
        dest: &mut [u8],
    ) -> Result<(), QueueNotFullEnough> {
        if dest.len() > self.available {
            return Err(QueueNotFullEnough);
        }
        self.copy_out(dest);
        Ok(())
    }

    /// Number of bytes `payload_len` will occupy once framed.
    pub const fn framed_len(payload_len: usize) -> usize {
        payload_len + HEADER_LEN
    }

    /// Enqueues `msg` behind a length header. Fails without side effects if
    /// the framed message does not fit in the free space.
    pub fn enqueue_msg(&mut self, msg: &[u8]) -> Result<(), QueueFull> {
        let len = u32::try_from(msg.len()).map_err(|_| QueueFull)?;
        if Self::framed_len(msg.len()) > self.free() {
            return Err(QueueFull);
        }
        self.copy_in(&len.to_le_bytes());
        self.copy_in(msg);
        Ok(())
    }

    /// Reads the length header of the next message without consuming it.
    pub fn peek_msg_len(&self) -> Option<usize> {
        if self.available < HEADER_LEN {
            return None;
        }
        let backing = self.backing.as_ref();
        let mut header = [0u8; HEADER_LEN];
        let mut pos = self.tail;
        for b in header.iter_mut() {
            *b = backing[pos];
            pos = circular_add(pos, 1, backing.len());
        }
        Some(u32::from_le_bytes(header) as usize)
    }

    /// Dequeues the next message into `dest`, returning its length.
    ///
    /// If the message is larger than `dest`, it stays queued and
    /// `MsgError::TooBig` reports its size.
    pub fn dequeue_msg(&mut self, dest: &mut [u8]) -> Result<usize, MsgError> {
        let len = self.peek_msg_len().ok_or(MsgError::Empty)?;
        if len > dest.len() {
            return Err(MsgError::TooBig { needed: len });
        }
        self.skip(HEADER_LEN);
        self.copy_out(&mut dest[..len]);
        Ok(len)
    }

    /// Drops the next message without copying it out, returning its length.
    pub fn discard_msg(&mut self) -> Option<usize> {
        let len = self.peek_msg_len()?;
        self.skip(Self::framed_len(len));
        Some(len)
    }

    // Callers have checked `data.len() <= self.free()`.
    fn copy_in(&mut self, data: &[u8]) {
        let n = data.len();
        let (head, tail) = (self.head, self.tail);
        let backing = self.backing.as_mut();
        let backlen = backing.len();
        let (first, second) = region_mut(backing, n, head, tail);
        let (d1, d2) = data.split_at(first.len());
        first.copy_from_slice(d1);
        second.copy_from_slice(d2);
        self.head = circular_add(head, n, backlen);
        self.available += n;
    }

    // Callers have checked `dest.len() <= self.available`.
    fn copy_out(&mut self, dest: &mut [u8]) {
        let n = dest.len();
        let (head, tail) = (self.head, self.tail);
        let backing = self.backing.as_mut();
        let backlen = backing.len();
        let (first, second) = region_mut(backing, n, tail, head);
        let (d1, d2) = dest.split_at_mut(first.len());
        d1.copy_from_slice(first);
        d2.copy_from_slice(second);
        self.tail = circular_add(tail, n, backlen);
        self.available -= n;
    }

    fn skip(&mut self, n: usize) {
        let n = n.min(self.available);
        self.tail = circular_add(self.tail, n, self.capacity());
        self.available -= n;
    }
}

/// Finds a possibly discontiguous section of `n` bytes of `backing` starting
/// at `from` and not crossing `to`.
///
/// `from == to` means either an empty queue (for a writer) or a full one (for
/// a reader); in both cases the region may wrap, unless `n` is zero.
fn region_mut(
    backing: &mut [u8],
    n: usize,
    from: usize,
    to: usize,
) -> (&mut [u8], &mut [u8]) {
    let contiguous = from < to || (from == to && n == 0);
    if contiguous {
        debug_assert!(to - from >= n);
        (&mut backing[from..from + n], &mut [])
    } else {
        let first_len = (backing.len() - from).min(n);
        let second_len = n - first_len;
        debug_assert!(second_len <= to);

        let (second_plus, first_plus) = backing.split_at_mut(from);
        (&mut first_plus[..first_len], &mut second_plus[..second_len])
    }
}

/// Circular addition without a remainder operation.
fn circular_add(a: usize, b: usize, limit: usize) -> usize {
    let n = a + b;
    n.checked_sub(limit).unwrap_or(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_state() {
        let q = CircQ::new([0u8; 16]);

        assert!(q.is_empty());
        assert_eq!(q.available(), 0);
        assert_eq!(q.free(), 16);
    }

    #[test]
    fn fixed_chunks_fill_and_drain() {
        let mut q = CircQ::new([0u8; 12]);

        for i in 0..3u8 {
            q.enqueue(&[i; 4]).unwrap();
        }
        assert_eq!(q.free(), 0);
        assert_eq!(q.enqueue(&[9; 4]), Err(QueueFull));

        let mut out = [0u8; 4];
        for i in 0..3u8 {
            q.dequeue_into(&mut out).unwrap();
            assert_eq!(out, [i; 4]);
        }
        assert_eq!(q.dequeue_into(&mut out), Err(QueueNotFullEnough));
    }

    #[test]
    fn chunks_wrap_around_backing() {
        let mut q = CircQ::new(vec![0u8; 10].into_boxed_slice());
        let mut out = [0u8; 4];

        // Walk head/tail around the ring several times.
        for round in 0..20u8 {
            q.enqueue(&[round, round + 1, round + 2, round + 3]).unwrap();
            q.dequeue_into(&mut out).unwrap();
            assert_eq!(out, [round, round + 1, round + 2, round + 3]);
        }
        assert!(q.is_empty());
    }

    #[test]
    fn messages_keep_boundaries() {
        let mut q = CircQ::new([0u8; 32]);

        q.enqueue_msg(b"abc").unwrap();
        q.enqueue_msg(b"defghij").unwrap();
        assert_eq!(q.available(), 3 + 7 + 2 * HEADER_LEN);

        let mut out = [0u8; 16];
        assert_eq!(q.dequeue_msg(&mut out), Ok(3));
        assert_eq!(&out[..3], b"abc");
        assert_eq!(q.dequeue_msg(&mut out), Ok(7));
        assert_eq!(&out[..7], b"defghij");
        assert_eq!(q.dequeue_msg(&mut out), Err(MsgError::Empty));
    }

    #[test]
    fn message_larger_than_destination_stays_queued() {
        let mut q = CircQ::new([0u8; 32]);
        q.enqueue_msg(b"0123456789").unwrap();

        let mut small = [0u8; 4];
        assert_eq!(
            q.dequeue_msg(&mut small),
            Err(MsgError::TooBig { needed: 10 })
        );

        let mut big = [0u8; 10];
        assert_eq!(q.dequeue_msg(&mut big), Ok(10));
        assert_eq!(&big, b"0123456789");
    }

    #[test]
    fn message_that_does_not_fit_is_rejected_whole() {
        let mut q = CircQ::new([0u8; 16]);
        q.enqueue_msg(b"12345678").unwrap();

        assert_eq!(q.enqueue_msg(b"abcd"), Err(QueueFull));
        assert_eq!(q.available(), 12);
    }

    #[test]
    fn framed_header_wraps() {
        let mut q = CircQ::new([0u8; 13]);
        let mut out = [0u8; 8];

        for i in 0..10u8 {
            let msg = [i; 5];
            q.enqueue_msg(&msg).unwrap();
            assert_eq!(q.peek_msg_len(), Some(5));
            assert_eq!(q.dequeue_msg(&mut out), Ok(5));
            assert_eq!(&out[..5], &msg);
        }
    }

    #[test]
    fn discard_skips_whole_message() {
        let mut q = CircQ::new([0u8; 32]);
        q.enqueue_msg(b"drop me").unwrap();
        q.enqueue_msg(b"keep").unwrap();

        assert_eq!(q.discard_msg(), Some(7));

        let mut out = [0u8; 8];
        assert_eq!(q.dequeue_msg(&mut out), Ok(4));
        assert_eq!(&out[..4], b"keep");
        assert_eq!(q.discard_msg(), None);
    }
}
