//! Frame-driven time for cooperative tasks.
//!
//! Tasks on the render loop never sleep on the OS. They await
//! [`FrameClock::next_frame`] or [`FrameClock::delay`], which resolve when the
//! render loop advances the clock at the top of a frame. A loop that stops
//! ticking therefore also freezes every animation and timeout, which is what
//! the session monitor relies on when the runtime suspends rendering.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

#[derive(Default)]
struct ClockState {
    now: f64,
    frame: u64,
    waiters: Vec<Waker>,
}

/// Shared frame counter and elapsed time in seconds.
///
/// Elapsed time is kept in `f64` so a host running for weeks still sees
/// every frame's `dt` land.
#[derive(Clone, Default)]
pub struct FrameClock {
    state: Rc<RefCell<ClockState>>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds elapsed across all frames so far.
    pub fn now(&self) -> f64 {
        self.state.borrow().now
    }

    /// Number of frames advanced so far.
    pub fn frame(&self) -> u64 {
        self.state.borrow().frame
    }

    /// Start a new frame `dt` seconds after the previous one and wake every
    /// task waiting on time.
    pub(crate) fn advance(&self, dt: f32) {
        let waiters = {
            let mut state = self.state.borrow_mut();
            if dt.is_finite() && dt > 0.0 {
                state.now += f64::from(dt);
            }
            state.frame += 1;
            std::mem::take(&mut state.waiters)
        };
        for waker in waiters {
            waker.wake();
        }
    }

    /// Resolves with the clock time at the start of the next frame.
    pub fn next_frame(&self) -> NextFrame {
        NextFrame {
            clock: self.clone(),
            target: self.frame() + 1,
        }
    }

    /// Resolves on the first frame at least `seconds` after now.
    pub fn delay(&self, seconds: f32) -> Delay {
        Delay {
            clock: self.clone(),
            deadline: self.now() + f64::from(seconds.max(0.0)),
        }
    }

    fn register(&self, waker: &Waker) {
        let mut state = self.state.borrow_mut();
        if !state.waiters.iter().any(|w| w.will_wake(waker)) {
            state.waiters.push(waker.clone());
        }
    }
}

/// Future returned by [`FrameClock::next_frame`].
pub struct NextFrame {
    clock: FrameClock,
    target: u64,
}

impl Future for NextFrame {
    type Output = f64;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<f64> {
        if self.clock.frame() >= self.target {
            Poll::Ready(self.clock.now())
        } else {
            self.clock.register(cx.waker());
            Poll::Pending
        }
    }
}

/// Future returned by [`FrameClock::delay`].
pub struct Delay {
    clock: FrameClock,
    deadline: f64,
}

impl Future for Delay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.clock.now() >= self.deadline {
            Poll::Ready(())
        } else {
            self.clock.register(cx.waker());
            Poll::Pending
        }
    }
}
