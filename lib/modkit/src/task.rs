// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Modules with their own execution context.
//!
//! A [`TaskModule`] is a buffered module plus a dedicated context that runs
//! its [`TaskBody`]:
//!
//! ```text
//!   start ─► on_start ─true─► run ─► on_end ─► Terminated
//!               └────false─────────────┘
//! ```
//!
//! Nothing is ever killed from outside. [`TaskModule::stop`] raises a cancel
//! flag and waits (bounded) for the context to notice it at one of its
//! checkpoints: [`TaskContext::should_stop`], [`TaskContext::sleep_for`],
//! [`TaskContext::recv`] and [`TaskContext::send`]. Dropping the module does
//! the same with the configured shutdown timeout. A context that ignores the
//! request is left to finish on its own; everything it touches is reference
//! counted, so it never outlives its data. The same goes for a module whose
//! last reference is dropped on its own context: there is nothing to wait
//! for there, so the request is raised and the drop returns at once.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use parking_lot::{Condvar, Mutex, MutexGuard};
use ringbuf::{ringbuf, ringbuf_entry};

use crate::buffered::Buffers;
use crate::channel::ChannelError;
use crate::id::{Category, ModuleId};
use crate::module::{Module, ModuleError, StartError};
use crate::sys::{self, Deadline, Ticks};

/// Smallest stack a host thread is given, whatever the module asks for.
/// Target stack sizes are far too small for the host's own runtime.
pub const HOST_STACK_FLOOR: usize = 64 * 1024;

/// Longest a checkpointed channel operation blocks before looking at the
/// cancel flag again.
pub const CHECKPOINT: Ticks = sys::ms_to_ticks(10);

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum TaskState {
    /// Never started.
    Created = 0,
    Running = 1,
    /// The context has finished; the module may be started again.
    Terminated = 2,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopError {
    /// No execution context is associated with the module.
    NotRunning,
    /// The context did not acknowledge the request in time. It keeps running
    /// detached until it reaches a checkpoint.
    Timeout,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Spawned { instance: u8, priority: u8 },
    SpawnFailed { instance: u8 },
    StopRequested { instance: u8 },
    StopTimeout { instance: u8 },
    Exited { instance: u8 },
    Detached { instance: u8 },
}

ringbuf!(Trace, 64, Trace::None);

/// How a task module's context is set up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskConfig {
    /// Requested stack size in bytes.
    pub stacksize: usize,
    /// Requested priority. Recorded for diagnostics; the host scheduler has
    /// no notion of it.
    pub priority: u8,
    /// Period of the default `run` loop.
    pub idle_period: Ticks,
    /// How long dropping the module waits for its context to stop.
    pub shutdown_timeout: Ticks,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            stacksize: 4096,
            priority: 1,
            idle_period: sys::ms_to_ticks(10),
            shutdown_timeout: sys::ms_to_ticks(100),
        }
    }
}

/// The application logic of a task module. Every hook runs on the module's
/// own context.
pub trait TaskBody<C: Category>: Send + 'static {
    /// Runs first. Returning `false` skips `run` and goes straight to
    /// `on_end`.
    fn on_start(&mut self, ctx: &TaskContext<'_, C>) -> bool {
        let _ = ctx;
        true
    }

    /// The main loop. By default this calls `on_idle_tick` once per idle
    /// period until asked to stop.
    fn run(&mut self, ctx: &TaskContext<'_, C>) {
        while !ctx.should_stop() {
            self.on_idle_tick(ctx);
            if ctx.sleep_for(ctx.idle_period()).is_err() {
                break;
            }
        }
    }

    fn on_idle_tick(&mut self, ctx: &TaskContext<'_, C>) {
        let _ = ctx;
    }

    /// Runs last, whether or not `run` did.
    fn on_end(&mut self, ctx: &TaskContext<'_, C>) {
        let _ = ctx;
    }
}

struct Shared<C> {
    id: ModuleId<C>,
    config: TaskConfig,
    buffers: Buffers,
    state: AtomicU8,
    cancel: Mutex<bool>,
    wake: Condvar,
    context: Mutex<Option<JoinHandle<()>>>,
    exited: Condvar,
}

impl<C> Shared<C> {
    fn request_stop(&self) {
        *self.cancel.lock() = true;
        self.wake.notify_all();
    }

    /// Raises the cancel flag and waits up to `timeout` for the context to
    /// clear its handle. A context can't wait for itself to exit, so when
    /// called from the module's own context this gives up immediately.
    fn stop_and_wait(
        &self,
        context: &mut MutexGuard<'_, Option<JoinHandle<()>>>,
        timeout: Ticks,
    ) -> Result<(), StopError> {
        let own = context.as_ref().is_some_and(|handle| {
            handle.thread().id() == std::thread::current().id()
        });
        self.request_stop();
        if own {
            return Err(StopError::Timeout);
        }

        let deadline = Deadline::after(timeout);
        while context.is_some() {
            if deadline.expired() {
                return Err(StopError::Timeout);
            }
            deadline.wait(&self.exited, context);
        }
        Ok(())
    }
}

/// Runs when the context finishes, including by unwinding.
struct ExitGuard<'a, C>(&'a Shared<C>);

impl<C> Drop for ExitGuard<'_, C> {
    fn drop(&mut self) {
        let shared = self.0;
        let mut context = shared.context.lock();
        shared
            .state
            .store(TaskState::Terminated as u8, Ordering::Release);
        // Dropping our own handle detaches it; nobody joins a finished
        // context.
        context.take();
        ringbuf_entry!(Trace::Exited {
            instance: shared.id.instance
        });
        shared.exited.notify_all();
    }
}

/// What a [`TaskBody`] sees of its module while it runs.
pub struct TaskContext<'a, C> {
    shared: &'a Shared<C>,
}

impl<C: Category> TaskContext<'_, C> {
    pub fn id(&self) -> ModuleId<C> {
        self.shared.id
    }

    pub fn buffers(&self) -> &Buffers {
        &self.shared.buffers
    }

    pub fn idle_period(&self) -> Ticks {
        self.shared.config.idle_period
    }

    /// True once the module has been asked to stop.
    pub fn should_stop(&self) -> bool {
        *self.shared.cancel.lock()
    }

    /// Sleeps for `ticks`, or until asked to stop, in which case this
    /// returns [`ModuleError::Cancelled`].
    pub fn sleep_for(&self, ticks: Ticks) -> Result<(), ModuleError> {
        let deadline = Deadline::after(ticks);
        let mut cancel = self.shared.cancel.lock();
        loop {
            if *cancel {
                return Err(ModuleError::Cancelled);
            }
            if deadline.expired() {
                return Ok(());
            }
            deadline.wait(&self.shared.wake, &mut cancel);
        }
    }

    /// Pulls from the module's input, noticing a stop request within
    /// [`CHECKPOINT`] even while blocked.
    pub fn recv(
        &self,
        buf: &mut [u8],
        timeout: Ticks,
    ) -> Result<usize, ModuleError> {
        self.checkpointed(timeout, |slice| {
            self.shared.buffers.recv(buf, slice)
        })
    }

    /// Pushes into the module's output, noticing a stop request within
    /// [`CHECKPOINT`] even while blocked.
    pub fn send(&self, buf: &[u8], timeout: Ticks) -> Result<(), ModuleError> {
        self.checkpointed(timeout, |slice| self.shared.buffers.send(buf, slice))
    }

    fn checkpointed<T>(
        &self,
        timeout: Ticks,
        mut op: impl FnMut(Ticks) -> Result<T, ModuleError>,
    ) -> Result<T, ModuleError> {
        let deadline = Deadline::after(timeout);
        loop {
            if self.should_stop() {
                return Err(ModuleError::Cancelled);
            }
            let slice = deadline
                .remaining()
                .map_or(CHECKPOINT, |left| left.min(CHECKPOINT));
            match op(slice) {
                Err(ModuleError::Channel(
                    ChannelError::Timeout | ChannelError::LockTimeout,
                )) if !deadline.expired() => continue,
                r => return r,
            }
        }
    }
}

/// A buffered module that runs `B` on a context of its own.
pub struct TaskModule<C, B> {
    shared: Arc<Shared<C>>,
    body: Arc<Mutex<B>>,
}

impl<C: Category, B: TaskBody<C>> TaskModule<C, B> {
    pub fn new(
        id: ModuleId<C>,
        config: TaskConfig,
        buffers: Buffers,
        body: B,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                config,
                buffers,
                state: AtomicU8::new(TaskState::Created as u8),
                cancel: Mutex::new(false),
                wake: Condvar::new(),
                context: Mutex::new(None),
                exited: Condvar::new(),
            }),
            body: Arc::new(Mutex::new(body)),
        }
    }

    pub fn state(&self) -> TaskState {
        let raw = self.shared.state.load(Ordering::Acquire);
        TaskState::from_u8(raw).unwrap_or(TaskState::Terminated)
    }

    /// True while an execution context is associated with the module.
    pub fn has_context(&self) -> bool {
        self.shared.context.lock().is_some()
    }

    pub fn config(&self) -> &TaskConfig {
        &self.shared.config
    }

    pub fn priority(&self) -> u8 {
        self.shared.config.priority
    }

    pub fn buffers(&self) -> &Buffers {
        &self.shared.buffers
    }

    /// Gives access to the body while no context is running it. Returns
    /// `None` if the context currently holds it.
    pub fn with_body<R>(&self, f: impl FnOnce(&mut B) -> R) -> Option<R> {
        let mut body = self.body.try_lock()?;
        Some(f(&mut body))
    }

    /// Spawns the execution context. Fails if one is already associated
    /// with the module; a terminated module may be started again.
    pub fn start(&self) -> Result<(), StartError> {
        let mut context = self.shared.context.lock();
        if context.is_some() {
            return Err(StartError::AlreadyRunning);
        }
        *self.shared.cancel.lock() = false;

        let id = self.shared.id;
        let config = self.shared.config;
        let shared = self.shared.clone();
        let body = self.body.clone();

        let handle = std::thread::Builder::new()
            .name(id.task_name())
            .stack_size(config.stacksize.max(HOST_STACK_FLOOR))
            .spawn(move || {
                let _exit = ExitGuard(&shared);
                let mut body = body.lock();
                let ctx = TaskContext { shared: &shared };
                if body.on_start(&ctx) {
                    body.run(&ctx);
                }
                body.on_end(&ctx);
            })
            .map_err(|_| {
                ringbuf_entry!(Trace::SpawnFailed {
                    instance: id.instance
                });
                StartError::Spawn
            })?;

        *context = Some(handle);
        self.shared
            .state
            .store(TaskState::Running as u8, Ordering::Release);
        ringbuf_entry!(Trace::Spawned {
            instance: id.instance,
            priority: config.priority,
        });
        Ok(())
    }

    /// Asks the context to stop and waits up to `timeout` for it to finish.
    pub fn stop(&self, timeout: Ticks) -> Result<(), StopError> {
        let mut context = self.shared.context.lock();
        if context.is_none() {
            return Err(StopError::NotRunning);
        }

        let instance = self.shared.id.instance;
        ringbuf_entry!(Trace::StopRequested { instance });
        self.shared
            .stop_and_wait(&mut context, timeout)
            .inspect_err(|_| ringbuf_entry!(Trace::StopTimeout { instance }))
    }
}

impl<C: Category, B: TaskBody<C>> Module<C> for TaskModule<C, B> {
    fn id(&self) -> ModuleId<C> {
        self.shared.id
    }

    fn start(&self) -> Result<(), StartError> {
        TaskModule::start(self)
    }

    fn write(&self, buf: &[u8], timeout: Ticks) -> Result<(), ModuleError> {
        self.shared.buffers.write(buf, timeout)
    }

    fn read(
        &self,
        buf: &mut [u8],
        timeout: Ticks,
    ) -> Result<usize, ModuleError> {
        self.shared.buffers.read(buf, timeout)
    }
}

impl<C, B> Drop for TaskModule<C, B> {
    fn drop(&mut self) {
        let shared = &self.shared;
        let mut context = shared.context.lock();
        if context.is_none() {
            return;
        }
        let timeout = shared.config.shutdown_timeout;
        if shared.stop_and_wait(&mut context, timeout).is_err() {
            ringbuf_entry!(Trace::Detached {
                instance: shared.id.instance
            });
        }
    }
}
