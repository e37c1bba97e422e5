// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Modules that talk through channels.
//!
//! [`Buffers`] is the input/output pair a module owns. External callers reach
//! it through `write` (into the input channel) and `read` (out of the output
//! channel); the module's own logic uses `recv` and `send` on the opposite
//! ends. Either side may be absent, in which case every operation on it
//! fails at once with [`ModuleError::NoChannel`].
//!
//! Channels are reference counted, so one channel can serve as both input
//! and output (a loopback). Replacing one side of a loopback drops only that
//! side's reference and leaves the channel alive for the other.

use std::sync::Arc;

use parking_lot::RwLock;
use ringbuf::{ringbuf, ringbuf_entry};

use crate::channel::ChannelRef;
use crate::id::{Category, ModuleId};
use crate::module::{Module, ModuleError};
use crate::sys::Ticks;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Released(Side),
    StillShared(Side),
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Side {
    Input,
    Output,
}

ringbuf!(Trace, 16, Trace::None);

#[derive(Default)]
pub struct Buffers {
    input: RwLock<Option<ChannelRef>>,
    output: RwLock<Option<ChannelRef>>,
}

impl Buffers {
    pub fn new(input: Option<ChannelRef>, output: Option<ChannelRef>) -> Self {
        Self {
            input: RwLock::new(input),
            output: RwLock::new(output),
        }
    }

    /// Uses `channel` for both directions.
    pub fn looped(channel: ChannelRef) -> Self {
        Self::new(Some(channel.clone()), Some(channel))
    }

    pub fn input(&self) -> Option<ChannelRef> {
        self.input.read().clone()
    }

    pub fn output(&self) -> Option<ChannelRef> {
        self.output.read().clone()
    }

    /// True if input and output are the same channel.
    pub fn is_looped(&self) -> bool {
        match (&*self.input.read(), &*self.output.read()) {
            (Some(i), Some(o)) => Arc::ptr_eq(i, o),
            _ => false,
        }
    }

    /// Replaces the input channel. The old one is released unless it is
    /// also the output channel.
    pub fn set_input(&self, channel: Option<ChannelRef>) {
        let old = std::mem::replace(&mut *self.input.write(), channel);
        self.release(old, &self.output, Side::Input);
    }

    /// Replaces the output channel. The old one is released unless it is
    /// also the input channel.
    pub fn set_output(&self, channel: Option<ChannelRef>) {
        let old = std::mem::replace(&mut *self.output.write(), channel);
        self.release(old, &self.input, Side::Output);
    }

    fn release(
        &self,
        old: Option<ChannelRef>,
        other: &RwLock<Option<ChannelRef>>,
        side: Side,
    ) {
        let Some(old) = old else {
            return;
        };
        let shared = other
            .read()
            .as_ref()
            .is_some_and(|o| Arc::ptr_eq(o, &old));
        if shared {
            ringbuf_entry!(Trace::StillShared(side));
        } else {
            ringbuf_entry!(Trace::Released(side));
        }
        drop(old);
    }

    /// External producer's entry point: pushes into the input channel.
    pub fn write(&self, buf: &[u8], timeout: Ticks) -> Result<(), ModuleError> {
        let input = self.input().ok_or(ModuleError::NoChannel)?;
        input.push(buf, timeout)?;
        Ok(())
    }

    /// External consumer's entry point: pulls from the output channel.
    pub fn read(
        &self,
        buf: &mut [u8],
        timeout: Ticks,
    ) -> Result<usize, ModuleError> {
        let output = self.output().ok_or(ModuleError::NoChannel)?;
        Ok(output.pull(buf, timeout)?)
    }

    /// For the module's own logic: pulls from the input channel.
    pub fn recv(
        &self,
        buf: &mut [u8],
        timeout: Ticks,
    ) -> Result<usize, ModuleError> {
        let input = self.input().ok_or(ModuleError::NoChannel)?;
        Ok(input.pull(buf, timeout)?)
    }

    /// For the module's own logic: pushes into the output channel.
    pub fn send(&self, buf: &[u8], timeout: Ticks) -> Result<(), ModuleError> {
        let output = self.output().ok_or(ModuleError::NoChannel)?;
        output.push(buf, timeout)?;
        Ok(())
    }
}

/// A passive module: its logic runs in whatever context calls `recv` and
/// `send` on its [`Buffers`].
pub struct BufferedModule<C> {
    id: ModuleId<C>,
    buffers: Buffers,
}

impl<C: Category> BufferedModule<C> {
    pub fn new(id: ModuleId<C>, buffers: Buffers) -> Self {
        Self { id, buffers }
    }

    pub fn buffers(&self) -> &Buffers {
        &self.buffers
    }
}

impl<C: Category> Module<C> for BufferedModule<C> {
    fn id(&self) -> ModuleId<C> {
        self.id
    }

    fn write(&self, buf: &[u8], timeout: Ticks) -> Result<(), ModuleError> {
        self.buffers.write(buf, timeout)
    }

    fn read(
        &self,
        buf: &mut [u8],
        timeout: Ticks,
    ) -> Result<usize, ModuleError> {
        self.buffers.read(buf, timeout)
    }
}
