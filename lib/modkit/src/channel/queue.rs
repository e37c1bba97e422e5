// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use circq::CircQ;
use parking_lot::{Condvar, Mutex};
use ringbuf::ringbuf_entry;

use super::{Channel, ChannelError, Trace, __RINGBUF};
use crate::sys::{Deadline, Ticks, NO_WAIT};

struct Ring {
    bytes: CircQ<Box<[u8]>>,
    items: usize,
}

/// A ring of `depth` slots, each exactly `item_size` bytes.
pub struct QueueChannel {
    item_size: usize,
    depth: usize,
    ring: Mutex<Ring>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl QueueChannel {
    /// Allocates room for `depth` items of `item_size` bytes. Fails with
    /// [`ChannelError::TooLarge`] if that many bytes can't be addressed.
    pub fn new(item_size: usize, depth: usize) -> Result<Self, ChannelError> {
        let Some(bytes) = item_size.checked_mul(depth) else {
            ringbuf_entry!(Trace::TooLarge(item_size));
            return Err(ChannelError::TooLarge);
        };
        Ok(Self {
            item_size,
            depth,
            ring: Mutex::new(Ring {
                bytes: CircQ::new(vec![0u8; bytes].into_boxed_slice()),
                items: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Items currently waiting to be pulled.
    pub fn queued(&self) -> usize {
        self.ring.lock().items
    }

    fn push_within(
        &self,
        buf: &[u8],
        deadline: Deadline,
    ) -> Result<(), ChannelError> {
        if buf.len() != self.item_size {
            ringbuf_entry!(Trace::BadLength(buf.len()));
            return Err(ChannelError::BadLength);
        }

        let mut ring = self.ring.lock();
        while ring.items >= self.depth {
            if deadline.expired() {
                ringbuf_entry!(Trace::PushTimeout);
                return Err(ChannelError::Timeout);
            }
            deadline.wait(&self.not_full, &mut ring);
        }

        // Room for one more item means room for item_size more bytes.
        if ring.bytes.enqueue(buf).is_err() {
            return Err(ChannelError::Timeout);
        }
        ring.items += 1;
        drop(ring);

        self.not_empty.notify_one();
        Ok(())
    }
}

impl Channel for QueueChannel {
    fn push(&self, buf: &[u8], timeout: Ticks) -> Result<(), ChannelError> {
        self.push_within(buf, Deadline::after(timeout))
    }

    fn pull(
        &self,
        buf: &mut [u8],
        timeout: Ticks,
    ) -> Result<usize, ChannelError> {
        if buf.len() < self.item_size {
            ringbuf_entry!(Trace::TooSmall {
                needed: self.item_size,
                have: buf.len()
            });
            return Err(ChannelError::BufferTooSmall);
        }

        let deadline = Deadline::after(timeout);
        let mut ring = self.ring.lock();
        while ring.items == 0 {
            if deadline.expired() {
                ringbuf_entry!(Trace::PullTimeout);
                return Err(ChannelError::Timeout);
            }
            deadline.wait(&self.not_empty, &mut ring);
        }

        if ring.bytes.dequeue_into(&mut buf[..self.item_size]).is_err() {
            return Err(ChannelError::Timeout);
        }
        ring.items -= 1;
        drop(ring);

        self.not_full.notify_one();
        Ok(self.item_size)
    }

    fn try_push(&self, buf: &[u8]) -> Result<(), ChannelError> {
        self.push_within(buf, Deadline::after(NO_WAIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::{ms_to_ticks, FOREVER};
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn fills_to_depth_then_times_out() {
        let q = QueueChannel::new(4, 3).unwrap();
        for i in 0..3u8 {
            q.push(&[i; 4], NO_WAIT).unwrap();
        }
        assert_eq!(q.queued(), 3);

        let start = Instant::now();
        assert_eq!(
            q.push(&[9; 4], ms_to_ticks(20)),
            Err(ChannelError::Timeout)
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(q.queued(), 3);
    }

    #[test]
    fn unaddressable_shape_is_refused() {
        assert_eq!(
            QueueChannel::new(usize::MAX, 2).err(),
            Some(ChannelError::TooLarge)
        );
        assert_eq!(
            QueueChannel::new(2, usize::MAX / 2 + 1).err(),
            Some(ChannelError::TooLarge)
        );
    }

    #[test]
    fn pulls_in_push_order() {
        let q = QueueChannel::new(2, 4).unwrap();
        for i in 0..4u8 {
            q.push(&[i, i + 10], NO_WAIT).unwrap();
        }

        let mut out = [0u8; 2];
        for i in 0..4u8 {
            assert_eq!(q.pull(&mut out, NO_WAIT), Ok(2));
            assert_eq!(out, [i, i + 10]);
        }
        assert_eq!(q.pull(&mut out, NO_WAIT), Err(ChannelError::Timeout));
    }

    #[test]
    fn wrong_size_is_rejected_without_waiting() {
        let q = QueueChannel::new(4, 1).unwrap();
        q.push(&[0; 4], NO_WAIT).unwrap();

        // Full, but a bad length must fail before any wait.
        let start = Instant::now();
        let bad = Err(ChannelError::BadLength);
        assert_eq!(q.push(&[0; 3], ms_to_ticks(500)), bad);
        assert_eq!(q.push(&[0; 5], ms_to_ticks(500)), bad);
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn small_destination_is_rejected() {
        let q = QueueChannel::new(4, 2).unwrap();
        q.push(&[1; 4], NO_WAIT).unwrap();

        let mut small = [0u8; 3];
        assert_eq!(
            q.pull(&mut small, NO_WAIT),
            Err(ChannelError::BufferTooSmall)
        );
        assert_eq!(q.queued(), 1);

        // A larger destination is fine; only item_size bytes are written.
        let mut big = [0xffu8; 8];
        assert_eq!(q.pull(&mut big, NO_WAIT), Ok(4));
        assert_eq!(big, [1, 1, 1, 1, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn blocked_pull_wakes_on_push() {
        let q = Arc::new(QueueChannel::new(1, 1).unwrap());
        let consumer = {
            let q = q.clone();
            std::thread::spawn(move || {
                let mut out = [0u8; 1];
                q.pull(&mut out, FOREVER).map(|_| out[0])
            })
        };
        std::thread::sleep(Duration::from_millis(10));
        q.push(&[42], NO_WAIT).unwrap();
        assert_eq!(consumer.join().unwrap(), Ok(42));
    }

    #[test]
    fn try_push_does_not_wait_for_room() {
        let q = QueueChannel::new(1, 1).unwrap();
        q.try_push(&[1]).unwrap();
        assert_eq!(q.try_push(&[2]), Err(ChannelError::Timeout));
    }

    proptest! {
        #[test]
        fn fifo_under_interleaving(
            ops in prop::collection::vec(any::<Option<u8>>(), 0..64),
        ) {
            let q = QueueChannel::new(1, 4).unwrap();
            let mut model = std::collections::VecDeque::new();
            let mut out = [0u8; 1];

            for op in ops {
                match op {
                    Some(v) => {
                        let ok = q.push(&[v], NO_WAIT).is_ok();
                        prop_assert_eq!(ok, model.len() < 4);
                        if ok {
                            model.push_back(v);
                        }
                    }
                    None => {
                        let got =
                            q.pull(&mut out, NO_WAIT).ok().map(|_| out[0]);
                        prop_assert_eq!(got, model.pop_front());
                    }
                }
            }
        }
    }
}
