// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Modules, channels and a registry for preemptively scheduled firmware.
//!
//! An application is split into modules, each identified by a
//! [`ModuleId`] (an application-defined category plus an instance number).
//! Modules are reached through the [`Module`] trait, either directly or by
//! looking them up in a [`Registry`], and exchange bytes through bounded
//! [`Channel`]s. A [`TaskModule`] additionally owns an execution context
//! that runs its [`TaskBody`] until asked to stop.
//!
//! All blocking operations take a timeout in scheduler ticks (see [`sys`]).

pub mod buffered;
pub mod channel;
pub mod config;
pub mod id;
pub mod module;
pub mod registry;
pub mod sys;
pub mod task;

pub use buffered::{BufferedModule, Buffers};
pub use channel::{
    Channel, ChannelError, ChannelRef, QueueChannel, SizeWindow,
    StreamChannel, StreamOptions,
};
pub use config::{AppConfig, ChannelConfig, TaskDesc};
pub use id::{Category, ModuleId};
pub use module::{Module, ModuleError, StartError};
pub use registry::{Registration, Registry, RegistryError, MAX_MODULES};
pub use sys::{Ticks, FOREVER, NO_WAIT};
pub use task::{
    StopError, TaskBody, TaskConfig, TaskContext, TaskModule, TaskState,
};
