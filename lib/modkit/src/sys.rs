// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host stand-ins for the kernel services modules rely on.
//!
//! On target these are the scheduler's tick counter and its blocking
//! primitives. Here they are the process's monotonic clock and
//! `parking_lot`'s timed waits, expressed in the same units: all timeouts in
//! this crate are tick counts, where [`NO_WAIT`] means "try once" and
//! [`FOREVER`] means "no bound".

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Kernel time and timeouts, in ticks.
pub type Ticks = u64;

/// Tick rate of the host clock.
pub const TICK_HZ: u64 = 1000;

/// Don't block at all.
pub const NO_WAIT: Ticks = 0;

/// Block until the operation can complete.
pub const FOREVER: Ticks = Ticks::MAX;

pub const fn ms_to_ticks(ms: u64) -> Ticks {
    ms.saturating_mul(TICK_HZ) / 1000
}

pub fn ticks_to_duration(ticks: Ticks) -> Duration {
    Duration::from_micros(ticks.saturating_mul(1_000_000 / TICK_HZ))
}

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Ticks elapsed since the first time anything asked.
pub fn now() -> Ticks {
    let elapsed = epoch().elapsed();
    (elapsed.as_micros() / (1_000_000 / TICK_HZ as u128)) as Ticks
}

/// Suspends the calling context for at least `ticks`.
pub fn sleep_for(ticks: Ticks) {
    if ticks == FOREVER {
        loop {
            std::thread::park();
        }
    }
    std::thread::sleep(ticks_to_duration(ticks));
}

/// An absolute bound on a blocking operation, computed once from a tick
/// timeout so that retries after spurious wakeups don't extend it.
#[derive(Copy, Clone, Debug)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn after(timeout: Ticks) -> Self {
        if timeout == FOREVER {
            return Self(None);
        }
        // Past the end of representable time is the same as no bound.
        Self(Instant::now().checked_add(ticks_to_duration(timeout)))
    }

    pub fn is_forever(&self) -> bool {
        self.0.is_none()
    }

    pub fn expired(&self) -> bool {
        match self.0 {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Ticks left before expiry (rounded up), or `None` for no bound.
    pub fn remaining(&self) -> Option<Ticks> {
        let at = self.0?;
        let left = at.saturating_duration_since(Instant::now());
        let per_tick = 1_000_000 / TICK_HZ as u128;
        Some(left.as_micros().div_ceil(per_tick) as Ticks)
    }

    /// Waits on `cv` until notified or the deadline passes. Returns `false`
    /// if the wait ended by timing out. Callers re-check their condition
    /// either way.
    pub fn wait<T>(&self, cv: &Condvar, guard: &mut MutexGuard<'_, T>) -> bool {
        match self.0 {
            Some(at) => !cv.wait_until(guard, at).timed_out(),
            None => {
                cv.wait(guard);
                true
            }
        }
    }

    /// Acquires `m`, giving up at the deadline.
    pub fn lock<'a, T>(&self, m: &'a Mutex<T>) -> Option<MutexGuard<'a, T>> {
        match self.0 {
            Some(at) => m.try_lock_until(at),
            None => Some(m.lock()),
        }
    }
}
