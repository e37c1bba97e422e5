// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application description, read from TOML.
//!
//! ```toml
//! [registry]
//! max-modules = 8
//!
//! [tasks.blinker]
//! stacksize = 4096
//! priority = 1
//! idle-period-ms = 500
//!
//! [channels.cmd]
//! kind = "queue"
//! item-size = 4
//! depth = 8
//!
//! [channels.log]
//! kind = "stream"
//! capacity = 256
//! max-len = 64
//! exclusive-write = true
//! ```
//!
//! Everything here is read once, while the application is being put
//! together; nothing is reconfigured at run time. Tasks and channels are
//! kept in file order.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use circq::HEADER_LEN;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::channel::{
    ChannelError, ChannelRef, QueueChannel, StreamChannel, StreamOptions,
};
use crate::sys::ms_to_ticks;
use crate::task::TaskConfig;

/// Largest backing store a configured channel may ask for.
pub const MAX_CHANNEL_BYTES: usize = 1 << 20;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub tasks: IndexMap<String, TaskDesc>,
    #[serde(default)]
    pub channels: IndexMap<String, ChannelConfig>,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RegistryConfig {
    /// How many modules the application expects to register at once.
    pub max_modules: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_modules: crate::registry::MAX_MODULES,
        }
    }
}

/// A task module's context, in file units.
#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TaskDesc {
    pub stacksize: usize,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_idle_period_ms")]
    pub idle_period_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_priority() -> u8 {
    TaskConfig::default().priority
}

fn default_idle_period_ms() -> u64 {
    10
}

fn default_shutdown_timeout_ms() -> u64 {
    100
}

impl From<&TaskDesc> for TaskConfig {
    fn from(desc: &TaskDesc) -> Self {
        TaskConfig {
            stacksize: desc.stacksize,
            priority: desc.priority,
            idle_period: ms_to_ticks(desc.idle_period_ms),
            shutdown_timeout: ms_to_ticks(desc.shutdown_timeout_ms),
        }
    }
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum ChannelConfig {
    #[serde(rename_all = "kebab-case")]
    Queue { item_size: usize, depth: usize },
    #[serde(rename_all = "kebab-case")]
    Stream {
        capacity: usize,
        #[serde(default)]
        min_len: Option<usize>,
        #[serde(default)]
        max_len: Option<usize>,
        #[serde(default)]
        exclusive_write: bool,
        #[serde(default)]
        exclusive_read: bool,
    },
}

impl ChannelConfig {
    fn check(&self) -> Result<()> {
        match *self {
            ChannelConfig::Queue { item_size, depth } => {
                if item_size == 0 || depth == 0 {
                    bail!("item-size and depth must be non-zero");
                }
                match item_size.checked_mul(depth) {
                    Some(bytes) if bytes <= MAX_CHANNEL_BYTES => (),
                    _ => bail!(
                        "{depth} items of {item_size} bytes exceed the \
                         {MAX_CHANNEL_BYTES}-byte limit"
                    ),
                }
            }
            ChannelConfig::Stream {
                capacity,
                min_len,
                max_len,
                ..
            } => {
                if capacity > MAX_CHANNEL_BYTES {
                    bail!(
                        "capacity {capacity} exceeds the \
                         {MAX_CHANNEL_BYTES}-byte limit"
                    );
                }
                let min = min_len.unwrap_or(1);
                if min == 0 {
                    bail!("min-len must be at least 1");
                }
                if let Some(max) = max_len {
                    if max < min {
                        bail!("max-len {max} is less than min-len {min}");
                    }
                    if max.saturating_add(HEADER_LEN) > capacity {
                        bail!(
                            "a {max}-byte message needs {} bytes, but \
                             capacity is only {capacity}",
                            max.saturating_add(HEADER_LEN)
                        );
                    }
                } else if min.saturating_add(HEADER_LEN) > capacity {
                    bail!("capacity {capacity} can't hold any message");
                }
            }
        }
        Ok(())
    }

    /// Allocates the channel this describes.
    pub fn build(&self) -> Result<ChannelRef, ChannelError> {
        let chan: ChannelRef = match *self {
            ChannelConfig::Queue { item_size, depth } => {
                Arc::new(QueueChannel::new(item_size, depth)?)
            }
            ChannelConfig::Stream {
                capacity,
                min_len,
                max_len,
                exclusive_write,
                exclusive_read,
            } => {
                let mut opts = StreamOptions::default();
                if let Some(min) = min_len {
                    opts = opts.min_len(min);
                }
                if let Some(max) = max_len {
                    opts = opts.max_len(max);
                }
                if exclusive_write {
                    opts = opts.exclusive_write();
                }
                if exclusive_read {
                    opts = opts.exclusive_read();
                }
                Arc::new(StreamChannel::new(capacity, opts))
            }
        };
        Ok(chan)
    }
}

impl AppConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let cfg: AppConfig =
            toml::from_str(text).context("parsing application config")?;
        cfg.check()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("loading {}", path.display()))
    }

    fn check(&self) -> Result<()> {
        if self.registry.max_modules == 0 {
            bail!("registry.max-modules must be non-zero");
        }
        for (name, task) in &self.tasks {
            if task.stacksize == 0 {
                bail!("task {name}: stacksize must be non-zero");
            }
            if task.idle_period_ms == 0 {
                bail!("task {name}: idle-period-ms must be non-zero");
            }
        }
        for (name, chan) in &self.channels {
            chan.check().with_context(|| format!("channel {name}"))?;
        }
        Ok(())
    }

    /// Checks that a registry with room for `N` modules can hold what this
    /// application registers.
    pub fn check_registry<const N: usize>(&self) -> Result<()> {
        if self.registry.max_modules > N {
            bail!(
                "application registers up to {} modules, but the registry \
                 only has room for {N}",
                self.registry.max_modules
            );
        }
        Ok(())
    }

    pub fn task(&self, name: &str) -> Result<TaskConfig> {
        let desc = self
            .tasks
            .get(name)
            .with_context(|| format!("no task named {name}"))?;
        Ok(desc.into())
    }

    pub fn channel(&self, name: &str) -> Result<ChannelRef> {
        let chan = self
            .channels
            .get(name)
            .with_context(|| format!("no channel named {name}"))?;
        chan.build()
            .map_err(|e| anyhow!("channel {name}: can't build ({e:?})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelError;
    use crate::sys::NO_WAIT;

    const APP: &str = r#"
        [registry]
        max-modules = 4

        [tasks.blinker]
        stacksize = 2048
        idle-period-ms = 500

        [tasks.logger]
        stacksize = 1024
        priority = 3
        shutdown-timeout-ms = 20

        [channels.cmd]
        kind = "queue"
        item-size = 4
        depth = 8

        [channels.log]
        kind = "stream"
        capacity = 128
        max-len = 16
        exclusive-write = true
    "#;

    #[test]
    fn parses_and_keeps_file_order() {
        let cfg = AppConfig::from_toml(APP).unwrap();
        assert_eq!(cfg.registry.max_modules, 4);

        let names: Vec<_> = cfg.tasks.keys().map(String::as_str).collect();
        assert_eq!(names, ["blinker", "logger"]);

        let blinker = cfg.task("blinker").unwrap();
        assert_eq!(blinker.stacksize, 2048);
        assert_eq!(blinker.priority, 1);
        assert_eq!(blinker.idle_period, ms_to_ticks(500));
        assert_eq!(blinker.shutdown_timeout, ms_to_ticks(100));

        let logger = cfg.task("logger").unwrap();
        assert_eq!(logger.priority, 3);
        assert_eq!(logger.shutdown_timeout, ms_to_ticks(20));
    }

    #[test]
    fn builds_channels() {
        let cfg = AppConfig::from_toml(APP).unwrap();

        let cmd = cfg.channel("cmd").unwrap();
        assert_eq!(cmd.push(&[1, 2, 3], NO_WAIT), Err(ChannelError::BadLength));
        cmd.push(&[1, 2, 3, 4], NO_WAIT).unwrap();

        let log = cfg.channel("log").unwrap();
        assert_eq!(log.push(&[0; 17], NO_WAIT), Err(ChannelError::BadLength));
        log.push(b"hello", NO_WAIT).unwrap();

        assert!(cfg.channel("nope").is_err());
        assert!(cfg.task("nope").is_err());
    }

    #[test]
    fn empty_document_gets_defaults() {
        let cfg = AppConfig::from_toml("").unwrap();
        assert_eq!(cfg.registry.max_modules, crate::registry::MAX_MODULES);
        assert!(cfg.tasks.is_empty());
        assert!(cfg.channels.is_empty());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let rejects = |text: &str| AppConfig::from_toml(text).is_err();
        assert!(rejects("[registry]\nmax-modules = 2\nfoo = 1"));
        assert!(rejects("[tasks.a]\nstacksize = 1\nstack = 2"));
        assert!(AppConfig::from_toml(
            "[channels.c]\nkind = \"queue\"\n\
             item-size = 1\ndepth = 1\nmax-len = 3"
        )
        .is_err());
        assert!(AppConfig::from_toml("[channels.c]\nkind = \"pipe\"").is_err());
    }

    #[test]
    fn bad_shapes_are_rejected() {
        let bad = [
            "[channels.c]\nkind = \"queue\"\nitem-size = 0\ndepth = 1",
            "[channels.c]\nkind = \"queue\"\n\
             item-size = 4611686018427387904\ndepth = 8",
            "[channels.c]\nkind = \"queue\"\n\
             item-size = 4096\ndepth = 4096",
            "[channels.c]\nkind = \"stream\"\n\
             capacity = 64\nmin-len = 8\nmax-len = 4",
            "[channels.c]\nkind = \"stream\"\ncapacity = 16\nmax-len = 16",
            "[channels.c]\nkind = \"stream\"\ncapacity = 4",
            "[channels.c]\nkind = \"stream\"\n\
             capacity = 9223372036854775807",
            "[tasks.t]\nstacksize = 0",
            "[registry]\nmax-modules = 0",
        ];
        for doc in bad {
            assert!(AppConfig::from_toml(doc).is_err(), "accepted {doc:?}");
        }
    }

    #[test]
    fn unaddressable_queue_fails_to_build() {
        let huge = ChannelConfig::Queue {
            item_size: usize::MAX / 2,
            depth: 8,
        };
        assert_eq!(huge.build().err(), Some(ChannelError::TooLarge));
    }

    #[test]
    fn loads_from_file() {
        let path = std::env::temp_dir()
            .join(format!("modkit-app-{}.toml", std::process::id()));
        std::fs::write(&path, APP).unwrap();
        let cfg = AppConfig::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cfg.unwrap().channels.len(), 2);

        let err =
            AppConfig::load(Path::new("/nonexistent/app.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/app.toml"));
    }

    #[test]
    fn registry_capacity_is_checked() {
        let cfg = AppConfig::from_toml(APP).unwrap();
        assert!(cfg.check_registry::<4>().is_ok());
        assert!(cfg.check_registry::<8>().is_ok());
        let err = cfg.check_registry::<2>().unwrap_err();
        assert!(err.to_string().contains("room for 2"));
    }
}
