// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::channel::ChannelError;
use crate::id::{Category, ModuleId};
use crate::sys::Ticks;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModuleError {
    /// This module doesn't accept input or produce output.
    Unsupported,
    /// The side of the module being used has no channel attached.
    NoChannel,
    /// The module's execution context has been asked to stop.
    Cancelled,
    Channel(ChannelError),
}

impl From<ChannelError> for ModuleError {
    fn from(e: ChannelError) -> Self {
        Self::Channel(e)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StartError {
    /// An execution context is already associated with the module.
    AlreadyRunning,
    /// The scheduler refused to create an execution context.
    Spawn,
}

/// The contract application code has with any module.
///
/// Only `id` is required. A module that has nothing to start, or that takes
/// no input or produces no output, keeps the defaults, which succeed
/// (`start`) or fail with [`ModuleError::Unsupported`] (`write`, `read`).
pub trait Module<C: Category>: Send + Sync {
    fn id(&self) -> ModuleId<C>;

    fn start(&self) -> Result<(), StartError> {
        Ok(())
    }

    /// Hands `buf` to the module, waiting up to `timeout` for it to be
    /// accepted.
    fn write(&self, buf: &[u8], timeout: Ticks) -> Result<(), ModuleError> {
        let _ = (buf, timeout);
        Err(ModuleError::Unsupported)
    }

    /// Takes the module's next output into `buf`, waiting up to `timeout`.
    fn read(
        &self,
        buf: &mut [u8],
        timeout: Ticks,
    ) -> Result<usize, ModuleError> {
        let _ = (buf, timeout);
        Err(ModuleError::Unsupported)
    }

    fn category(&self) -> C {
        self.id().category
    }

    fn instance(&self) -> u8 {
        self.id().instance
    }

    fn name(&self) -> &'static str {
        self.id().name
    }
}
