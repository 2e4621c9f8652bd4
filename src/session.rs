//! Reacting to immersive session changes.
//!
//! Entering or leaving an immersive session swaps the runtime's render
//! loop, and some runtimes silently destroy GPU resources or stop ticking
//! the old loop on the way. A transition that was in flight can then wait
//! forever on a load or an animation frame that never comes. The
//! [`SessionMonitor`] watches for those moments and puts things back:
//!
//! - every change arms a check: if the same transition still holds the lock
//!   `stuck_lock_grace` seconds later, the lock is force-cleared
//! - becoming active or visible again revalidates the current panorama and
//!   resumes the render loop
//! - leaving the session restores the desktop view of the current node

use std::cell::RefCell;
use std::rc::Rc;

use crate::clock::FrameClock;
use crate::navigation::Navigator;
use crate::render_loop::LoopControl;

/// Lifecycle of the immersive session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    NotActive,
    Entering,
    Active,
    Exiting,
}

/// Visibility of the immersive session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Visible,
    /// Visible behind a system overlay.
    VisibleBlurred,
    Hidden,
}

#[derive(Clone, Copy, Debug)]
struct LockCheck {
    deadline: f64,
    epoch: u64,
}

#[derive(Default)]
struct MonitorState {
    session: SessionState,
    visibility: Visibility,
    pending: Option<LockCheck>,
    corrections: u64,
}

struct MonitorInner {
    navigator: Navigator,
    clock: FrameClock,
    control: LoopControl,
    grace: f32,
    state: RefCell<MonitorState>,
}

/// Watches session state and visibility and repairs the navigator after
/// interruptions.
#[derive(Clone)]
pub struct SessionMonitor {
    inner: Rc<MonitorInner>,
}

impl SessionMonitor {
    pub fn new(navigator: Navigator, clock: FrameClock, control: LoopControl, grace: f32) -> Self {
        Self {
            inner: Rc::new(MonitorInner {
                navigator,
                clock,
                control,
                grace,
                state: RefCell::new(MonitorState::default()),
            }),
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.state.borrow().session
    }

    pub fn visibility(&self) -> Visibility {
        self.inner.state.borrow().visibility
    }

    /// Number of stuck transitions that had to be cleared.
    pub fn corrections(&self) -> u64 {
        self.inner.state.borrow().corrections
    }

    /// True while a stuck-lock check is armed.
    pub fn check_pending(&self) -> bool {
        self.inner.state.borrow().pending.is_some()
    }

    pub fn on_session_state(&self, next: SessionState) {
        let previous = std::mem::replace(&mut self.inner.state.borrow_mut().session, next);
        if previous == next {
            return;
        }
        log::info!("[session] {:?} -> {:?}", previous, next);
        self.arm_lock_check();

        match next {
            SessionState::Active => {
                self.resume_loop();
                self.inner.navigator.revalidate();
            }
            SessionState::NotActive => {
                // Back on the desktop loop, which may not have drawn in a while
                self.resume_loop();
                self.inner.navigator.revalidate();
            }
            SessionState::Entering | SessionState::Exiting => {}
        }
    }

    pub fn on_visibility(&self, next: Visibility) {
        let (previous, session) = {
            let mut state = self.inner.state.borrow_mut();
            (std::mem::replace(&mut state.visibility, next), state.session)
        };
        if previous == next {
            return;
        }
        log::info!("[session] visibility {:?} -> {:?}", previous, next);
        self.arm_lock_check();

        if next == Visibility::Visible && session == SessionState::Active {
            self.resume_loop();
            self.inner.navigator.revalidate();
        }
    }

    /// Run a due stuck-lock check. Called by the render loop once per frame.
    pub fn update(&self) {
        let pending = self.inner.state.borrow().pending;
        let Some(check) = pending else {
            return;
        };

        let navigator = &self.inner.navigator;
        if !navigator.is_transitioning() || navigator.epoch() != check.epoch {
            // The transition ended on its own
            self.inner.state.borrow_mut().pending = None;
            return;
        }
        if self.inner.clock.now() < check.deadline {
            return;
        }

        log::warn!(
            "[session] transition still locked {:.2}s after a session change",
            self.inner.grace
        );
        self.reconcile_interruption();
    }

    /// Force the navigator idle at its current node and make that node
    /// visible. Safe to call any number of times.
    pub fn reconcile_interruption(&self) -> bool {
        let cleared = self.inner.navigator.force_idle();
        self.inner.navigator.show_current();
        let mut state = self.inner.state.borrow_mut();
        state.pending = None;
        if cleared {
            state.corrections += 1;
        }
        cleared
    }

    fn arm_lock_check(&self) {
        let navigator = &self.inner.navigator;
        if !navigator.is_transitioning() {
            return;
        }
        let check = LockCheck {
            deadline: self.inner.clock.now() + f64::from(self.inner.grace),
            epoch: navigator.epoch(),
        };
        let mut state = self.inner.state.borrow_mut();
        // An earlier deadline for the same transition stands
        if !matches!(state.pending, Some(existing) if existing.epoch == check.epoch) {
            log::debug!("[session] checking transition lock at t={:.2}", check.deadline);
            state.pending = Some(check);
        }
    }

    fn resume_loop(&self) {
        if self.inner.control.resume() {
            log::info!("[session] render loop resumed");
        }
    }
}
