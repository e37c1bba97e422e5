// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small application: a blinker task reachable through a global registry.
//! Commands go in through `write`, LED states come out through `read`.

use std::sync::Arc;

use modkit::sys::ms_to_ticks;
use modkit::{
    AppConfig, Buffers, Module, ModuleError, ModuleId, Registry, TaskBody,
    TaskContext, TaskModule, TaskState, NO_WAIT,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Kind {
    Blinker,
}

static REGISTRY: Registry<Kind, 4> = Registry::new();

const BLINKER: ModuleId<Kind> = ModuleId::new(Kind::Blinker, 0, "blinker");

const APP: &str = r#"
    [registry]
    max-modules = 4

    [tasks.blinker]
    stacksize = 1024
    idle-period-ms = 5

    [channels.cmd]
    kind = "queue"
    item-size = 1
    depth = 4

    [channels.led]
    kind = "queue"
    item-size = 1
    depth = 64
"#;

const CMD_PAUSE: u8 = b'p';
const CMD_RESUME: u8 = b'r';

#[derive(Default)]
struct Blinker {
    lit: bool,
    paused: bool,
    toggles: usize,
}

impl TaskBody<Kind> for Blinker {
    fn on_idle_tick(&mut self, ctx: &TaskContext<'_, Kind>) {
        let mut cmd = [0u8; 1];
        while ctx.buffers().recv(&mut cmd, NO_WAIT).is_ok() {
            match cmd[0] {
                CMD_PAUSE => self.paused = true,
                CMD_RESUME => self.paused = false,
                _ => (),
            }
        }
        if self.paused {
            return;
        }
        self.lit = !self.lit;
        self.toggles += 1;
        // Nobody listening is not our problem.
        let _ = ctx.buffers().send(&[self.lit as u8], NO_WAIT);
    }
}

fn read_led(m: &dyn Module<Kind>) -> Result<u8, ModuleError> {
    let mut out = [0u8; 1];
    m.read(&mut out, ms_to_ticks(500))?;
    Ok(out[0])
}

#[test]
fn blinker_through_registry() {
    let cfg = AppConfig::from_toml(APP).unwrap();
    cfg.check_registry::<4>().unwrap();

    let blinker = Arc::new(TaskModule::new(
        BLINKER,
        cfg.task("blinker").unwrap(),
        Buffers::new(
            Some(cfg.channel("cmd").unwrap()),
            Some(cfg.channel("led").unwrap()),
        ),
        Blinker::default(),
    ));
    let registration = REGISTRY.register(&blinker).unwrap();
    assert_eq!(registration.id(), BLINKER);

    let m = REGISTRY.find(BLINKER).unwrap();
    m.start().unwrap();
    assert_eq!(blinker.state(), TaskState::Running);

    // The LED alternates.
    let first = read_led(&*m).unwrap();
    let second = read_led(&*m).unwrap();
    assert_ne!(first, second);

    // Paused, it stops producing. Drain what was sent before the pause
    // landed, then expect silence.
    m.write(&[CMD_PAUSE], ms_to_ticks(100)).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(30));
    let mut out = [0u8; 1];
    while m.read(&mut out, NO_WAIT).is_ok() {}
    assert!(m.read(&mut out, ms_to_ticks(30)).is_err());

    m.write(&[CMD_RESUME], ms_to_ticks(100)).unwrap();
    read_led(&*m).unwrap();

    blinker.stop(ms_to_ticks(500)).unwrap();
    assert_eq!(blinker.state(), TaskState::Terminated);
    let toggles = blinker.with_body(|b| b.toggles).unwrap();
    assert!(toggles >= 3);

    // Once the last strong reference is gone, the registry lets go too.
    drop(m);
    drop(blinker);
    assert!(REGISTRY.find(BLINKER).is_none());
    assert_eq!(REGISTRY.count(), 0);
    drop(registration);
}
