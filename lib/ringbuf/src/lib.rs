// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for instrumenting modules, channels and tasks
//!
//! This contains an implementation for a static ring buffer designed to be
//! used to record compact trace events from arbitrary contexts, including
//! several execution contexts writing to the same buffer at once. Each buffer
//! is a `static`, so it can be found by a debugger on target, and read back
//! with [`Ringbuf::snapshot`] in tests or from a diagnostics module.
//!
//! ## Constraints
//!
//! The type in the ring buffer must implement both `Copy` and `PartialEq`.
//!
//! If you use the variants of the `ringbuf!` macro that leave the name of the
//! data structure implicit, you can only have one per module. (You can lift
//! this constraint by providing a name.)
//!
//! ## Creating a ring buffer
//!
//! Ring buffers are instantiated with the [`ringbuf!`] macro, to which one
//! must provide the type of per-entry payload, the number of entries, and a
//! static initializer:
//!
//! ```
//! # use ringbuf::*;
//! #[derive(Copy, Clone, Debug, PartialEq)]
//! enum Trace {
//!     None,
//!     Pushed(usize),
//! }
//!
//! ringbuf!(Trace, 16, Trace::None);
//!
//! ringbuf_entry!(Trace::Pushed(4));
//! ```
//!
//! You can also provide a name, to distinguish between ring buffers if you
//! have more than one:
//!
//! ```
//! # use ringbuf::*;
//! ringbuf!(MY_RINGBUF, u32, 16, 0);
//!
//! ringbuf_entry!(MY_RINGBUF, 0x1de);
//! assert_eq!(MY_RINGBUF.snapshot().iter().count(), 1);
//! ```
//!
//! ## Coalescing
//!
//! When an entry is generated with an identical payload to the most recent
//! entry (in terms of both `line` and `payload`), the count of that entry is
//! incremented rather than consuming a new slot. A loop that times out over
//! and over therefore costs one slot, not the whole buffer.

#![cfg_attr(not(test), no_std)]

/// Re-export the lock we use so that code generated by the macros is
/// guaranteed to be able to find it.
pub use spin;

/// Declares a ringbuffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ringbuffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// The resulting ringbuffer will be static, so `NAME` should be uppercase and
/// should end in `RINGBUF`.
///
/// To support the common case of having one quickly-installed ringbuffer per
/// module, if you omit the name, it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::Ringbuf<$t, $n> = $crate::Ringbuf::new($init);
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
}

/// Inserts data into a named ringbuffer (which should have been declared with
/// the `ringbuf!` macro).
///
/// `ringbuf_entry!(NAME, expr)` will insert `expr` into the ringbuffer called
/// `NAME`.
///
/// If you declared your ringbuffer without a name, you can also use this
/// without a name, and it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate both buf and payload, without letting them access each
        // other's bindings.
        let (p, buf) = ($payload, &$buf);
        $crate::Ringbuf::entry(buf, line!() as u16, p);
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of
/// arbitrary type.
///
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

#[derive(Debug)]
struct Slots<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

///
/// A ring buffer of parametrized type and size.  In practice, instantiating
/// this directly is strange -- see the [`ringbuf!`] macro.
///
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    slots: spin::Mutex<Slots<T, N>>,
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            slots: spin::Mutex::new(Slots {
                last: None,
                buffer: [RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: init,
                }; N],
            }),
        }
    }

    pub fn entry(&self, line: u16, payload: T) {
        let mut slots = self.slots.lock();

        // On first use last is None; treating it as out of range makes the
        // first entry land in slot 0 without touching an existing count.
        let last = slots.last.unwrap_or(usize::MAX);

        if let Some(ent) = slots.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= N {
                0
            } else {
                last_plus_1
            }
        };

        let ent = &mut slots.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        slots.last = Some(ndx);
    }

    /// Copies the current contents out, so they can be examined without
    /// holding up writers.
    pub fn snapshot(&self) -> Snapshot<T, N> {
        let slots = self.slots.lock();
        Snapshot {
            last: slots.last,
            buffer: slots.buffer,
        }
    }
}

/// A point-in-time copy of a [`Ringbuf`].
#[derive(Debug, Copy, Clone)]
pub struct Snapshot<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Snapshot<T, N> {
    /// Iterates over recorded entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) => last + 1,
            None => N,
        };
        self.buffer[start.min(N)..]
            .iter()
            .chain(&self.buffer[..start.min(N)])
            .filter(|ent| ent.count != 0)
    }

    /// Returns true if any recorded entry matches `pred`.
    pub fn contains(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.iter().any(|ent| pred(&ent.payload))
    }
}
