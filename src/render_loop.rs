//! The per-frame driver.
//!
//! Everything the engine does asynchronously runs as a cooperative task on a
//! single-threaded [`LocalPool`]. The host calls [`RenderLoop::frame`] from
//! its render callback; each call advances the [`FrameClock`], runs every
//! task that can make progress, and then lets the session monitor check for
//! a stuck transition lock. Tasks only ever yield at await points, so no two
//! of them observe each other's state half-updated.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use futures::executor::{LocalPool, LocalSpawner};

use crate::clock::FrameClock;
use crate::session::SessionMonitor;

/// Shared running flag of a render loop.
///
/// The host pauses the loop when the runtime stops delivering frames, and
/// the session monitor resumes it when rendering should start again.
#[derive(Clone, Debug)]
pub struct LoopControl {
    running: Rc<Cell<bool>>,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self {
            running: Rc::new(Cell::new(true)),
        }
    }
}

impl LoopControl {
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    pub fn pause(&self) {
        self.running.set(false);
    }

    /// Returns true if the loop was paused.
    pub fn resume(&self) -> bool {
        !self.running.replace(true)
    }
}

/// Frame-stepped executor for the engine's tasks.
pub struct RenderLoop {
    pool: LocalPool,
    clock: FrameClock,
    control: LoopControl,
    monitor: Option<SessionMonitor>,
    frame_budget: f32,
    stalls: u64,
    last_frame: Option<Instant>,
}

impl RenderLoop {
    /// Create a loop that reports frames whose task work exceeds
    /// `frame_budget` seconds.
    pub fn new(frame_budget: f32) -> Self {
        Self {
            pool: LocalPool::new(),
            clock: FrameClock::new(),
            control: LoopControl::default(),
            monitor: None,
            frame_budget,
            stalls: 0,
            last_frame: None,
        }
    }

    pub fn spawner(&self) -> LocalSpawner {
        self.pool.spawner()
    }

    pub fn clock(&self) -> FrameClock {
        self.clock.clone()
    }

    pub fn control(&self) -> LoopControl {
        self.control.clone()
    }

    pub fn attach_monitor(&mut self, monitor: SessionMonitor) {
        self.monitor = Some(monitor);
    }

    /// Frames whose task work went over budget.
    pub fn stalls(&self) -> u64 {
        self.stalls
    }

    /// Run one frame `dt` seconds after the previous one.
    ///
    /// Does nothing and returns false while the loop is paused.
    pub fn frame(&mut self, dt: f32) -> bool {
        if !self.control.is_running() {
            log::trace!("[loop] paused, skipping frame");
            return false;
        }

        let started = Instant::now();
        self.clock.advance(dt);
        self.pool.run_until_stalled();
        if let Some(monitor) = &self.monitor {
            monitor.update();
        }

        let spent = started.elapsed().as_secs_f32();
        if spent > self.frame_budget {
            self.stalls += 1;
            log::warn!(
                "[loop] frame {} spent {:.1} ms on tasks (budget {:.1} ms)",
                self.clock.frame(),
                spent * 1000.0,
                self.frame_budget * 1000.0
            );
        }
        true
    }

    /// Run a frame using the wall-clock time since the previous `tick`.
    pub fn tick(&mut self) -> bool {
        let now = Instant::now();
        let dt = self
            .last_frame
            .map(|last| now.duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.last_frame = Some(now);
        self.frame(dt)
    }

    /// Run every ready task without starting a new frame.
    pub fn settle(&mut self) {
        self.pool.run_until_stalled();
    }
}
