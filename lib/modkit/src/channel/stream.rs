// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use circq::{CircQ, MsgError};
use parking_lot::{Condvar, Mutex, MutexGuard};
use ringbuf::ringbuf_entry;

use super::{Channel, ChannelError, Trace, __RINGBUF};
use crate::sys::{Deadline, Ticks, NO_WAIT};

/// Inclusive bounds on the length of a message.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SizeWindow {
    pub min: usize,
    pub max: usize,
}

impl Default for SizeWindow {
    fn default() -> Self {
        Self {
            min: 1,
            max: usize::MAX,
        }
    }
}

impl SizeWindow {
    pub fn admits(&self, len: usize) -> bool {
        (self.min..=self.max).contains(&len)
    }
}

/// Construction-time settings of a [`StreamChannel`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StreamOptions {
    pub window: SizeWindow,
    /// Serialize writers behind a lock. Leave off when only one context
    /// ever pushes.
    pub exclusive_write: bool,
    /// Serialize readers behind a lock. Leave off when only one context
    /// ever pulls.
    pub exclusive_read: bool,
}

impl StreamOptions {
    pub fn min_len(mut self, min: usize) -> Self {
        self.window.min = min;
        self
    }

    pub fn max_len(mut self, max: usize) -> Self {
        self.window.max = max;
        self
    }

    pub fn exclusive_write(mut self) -> Self {
        self.exclusive_write = true;
        self
    }

    pub fn exclusive_read(mut self) -> Self {
        self.exclusive_read = true;
        self
    }
}

/// Variable-length messages in a fixed byte budget.
///
/// Every message occupies its length plus a [`circq::HEADER_LEN`]-byte
/// header.
///
/// # Timeouts
///
/// With a side lock configured, `push` and `pull` first wait up to `timeout`
/// for the lock and then up to `timeout` again for room or data. The worst
/// case suspension is therefore twice the timeout.
///
/// # Data loss
///
/// A message that is dequeued with a length outside the size window is
/// consumed and reported as [`ChannelError::Discarded`]; its contents are
/// gone. Messages pushed through [`Channel::push`] can't trigger this, but
/// ones written with [`StreamChannel::push_unchecked`] can.
pub struct StreamChannel<S = Box<[u8]>> {
    window: SizeWindow,
    capacity: usize,
    bytes: Mutex<CircQ<S>>,
    not_empty: Condvar,
    not_full: Condvar,
    write_side: Option<Mutex<()>>,
    read_side: Option<Mutex<()>>,
}

impl StreamChannel {
    /// Allocates a `capacity`-byte buffer.
    pub fn new(capacity: usize, options: StreamOptions) -> Self {
        Self::with_storage(vec![0u8; capacity].into_boxed_slice(), options)
    }
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> StreamChannel<S> {
    /// Builds a channel over caller-provided storage, e.g. a
    /// `&'static mut [u8]` placed by the application.
    pub fn with_storage(storage: S, options: StreamOptions) -> Self {
        let capacity = storage.as_ref().len();
        Self {
            window: options.window,
            capacity,
            bytes: Mutex::new(CircQ::new(storage)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            write_side: options.exclusive_write.then(|| Mutex::new(())),
            read_side: options.exclusive_read.then(|| Mutex::new(())),
        }
    }

    pub fn window(&self) -> SizeWindow {
        self.window
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes in use, headers included.
    pub fn used(&self) -> usize {
        self.bytes.lock().available()
    }

    /// Queues `buf` without checking it against the size window and without
    /// taking the write-side lock.
    pub fn push_unchecked(
        &self,
        buf: &[u8],
        timeout: Ticks,
    ) -> Result<(), ChannelError> {
        self.check_fits(buf.len())?;
        self.enqueue(buf, Deadline::after(timeout))
    }

    fn side<'a>(
        lock: &'a Option<Mutex<()>>,
        deadline: Deadline,
    ) -> Result<Option<MutexGuard<'a, ()>>, ChannelError> {
        match lock {
            Some(m) => match deadline.lock(m) {
                Some(guard) => Ok(Some(guard)),
                None => {
                    ringbuf_entry!(Trace::LockTimeout);
                    Err(ChannelError::LockTimeout)
                }
            },
            None => Ok(None),
        }
    }

    /// Callers check the message with `check_fits` first, before taking
    /// any side lock; otherwise this waits out the deadline for room that
    /// never comes.
    fn enqueue(
        &self,
        buf: &[u8],
        deadline: Deadline,
    ) -> Result<(), ChannelError> {
        let mut bytes = self.bytes.lock();
        while bytes.enqueue_msg(buf).is_err() {
            if deadline.expired() {
                ringbuf_entry!(Trace::PushTimeout);
                return Err(ChannelError::Timeout);
            }
            deadline.wait(&self.not_full, &mut bytes);
        }
        drop(bytes);

        self.not_empty.notify_all();
        Ok(())
    }

    fn check_fits(&self, len: usize) -> Result<(), ChannelError> {
        if CircQ::<S>::framed_len(len) > self.capacity {
            ringbuf_entry!(Trace::TooLarge(len));
            return Err(ChannelError::TooLarge);
        }
        Ok(())
    }

    fn check_window(&self, len: usize) -> Result<(), ChannelError> {
        if self.window.admits(len) {
            Ok(())
        } else {
            ringbuf_entry!(Trace::BadLength(len));
            Err(ChannelError::BadLength)
        }
    }
}

impl<S> Channel for StreamChannel<S>
where
    S: AsRef<[u8]> + AsMut<[u8]> + Send,
{
    fn push(&self, buf: &[u8], timeout: Ticks) -> Result<(), ChannelError> {
        self.check_window(buf.len())?;
        self.check_fits(buf.len())?;

        let _side = Self::side(&self.write_side, Deadline::after(timeout))?;
        // A fresh deadline: the lock wait and the space wait each get the
        // full timeout.
        self.enqueue(buf, Deadline::after(timeout))
    }

    fn pull(
        &self,
        buf: &mut [u8],
        timeout: Ticks,
    ) -> Result<usize, ChannelError> {
        let _side = Self::side(&self.read_side, Deadline::after(timeout))?;

        let deadline = Deadline::after(timeout);
        let mut bytes = self.bytes.lock();
        let len = loop {
            if let Some(len) = bytes.peek_msg_len() {
                break len;
            }
            if deadline.expired() {
                ringbuf_entry!(Trace::PullTimeout);
                return Err(ChannelError::Timeout);
            }
            deadline.wait(&self.not_empty, &mut bytes);
        };

        let result = if !self.window.admits(len) {
            bytes.discard_msg();
            ringbuf_entry!(Trace::Discarded(len));
            Err(ChannelError::Discarded(len))
        } else {
            match bytes.dequeue_msg(buf) {
                Ok(n) => Ok(n),
                Err(MsgError::TooBig { needed }) => {
                    ringbuf_entry!(Trace::TooSmall {
                        needed,
                        have: buf.len()
                    });
                    return Err(ChannelError::BufferTooSmall);
                }
                // We saw a header above and still hold the lock.
                Err(MsgError::Empty) => return Err(ChannelError::Timeout),
            }
        };
        drop(bytes);

        self.not_full.notify_all();
        result
    }

    fn try_push(&self, buf: &[u8]) -> Result<(), ChannelError> {
        self.check_window(buf.len())?;
        self.check_fits(buf.len())?;

        let _side = match &self.write_side {
            Some(m) => match m.try_lock() {
                Some(guard) => Some(guard),
                None => return Err(ChannelError::LockTimeout),
            },
            None => None,
        };
        self.enqueue(buf, Deadline::after(NO_WAIT))
    }
}
