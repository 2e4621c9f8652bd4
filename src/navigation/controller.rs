//! The navigation state machine.
//!
//! A [`Navigator`] is either idle at a node or transitioning between two.
//! Requests that arrive while a transition runs are rejected, so at most one
//! transition ever exists. The lock is taken synchronously when the request
//! is accepted and released by a guard when the transition task finishes,
//! fails, or is dropped.
//!
//! Each accepted transition gets a new epoch. [`Navigator::force_idle`] bumps
//! the epoch too, which turns a transition task that is still suspended into
//! a stale one: when it wakes it sees the epoch moved on and exits without
//! touching any visual state.

use std::cell::RefCell;
use std::rc::Rc;

use futures::executor::LocalSpawner;
use futures::future::{self, Either, LocalBoxFuture};
use futures::task::LocalSpawnExt;
use futures::FutureExt;

use crate::assets::Quality;
use crate::cache::ResourceCache;
use crate::camera::ViewOrientation;
use crate::clock::FrameClock;
use crate::config::{TourConfig, TransitionConfig};
use crate::error::LoadError;
use crate::graph::{Link, NodeGraph, NodeId};
use crate::renderer::{SphereHandle, SphereRenderer};

use super::transition::{TransitionFrame, TransitionTimeline};

/// Whether a transition currently holds the lock.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum NavState {
    #[default]
    Idle,
    Transitioning { from: NodeId, to: NodeId },
}

/// Which sphere shows the current node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Display {
    /// The node's own panorama from the cache.
    Resident,
    /// The shared fallback panorama; the node's own failed or is not loaded yet.
    #[default]
    Fallback,
}

/// Why a navigation request was not carried out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    AlreadyAtTarget,
    TransitionInProgress,
    UnknownNode(NodeId),
    /// The link exists but its target is not in the graph.
    DanglingLink { from: NodeId, target: NodeId },
    /// The current node has no link with this index.
    NoSuchLink(usize),
    /// The render loop's executor is gone.
    LoopStopped,
}

/// How a navigation request ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavigationOutcome {
    Arrived { node: NodeId },
    /// Arrived, but the panorama failed to load and the fallback is shown.
    ArrivedWithFallback { node: NodeId, error: LoadError },
    /// The lock was cleared from outside before the transition finished.
    Interrupted { from: NodeId, to: NodeId },
    Rejected(Rejection),
}

impl NavigationOutcome {
    /// True if the current node changed to the target.
    pub fn arrived(&self) -> bool {
        matches!(
            self,
            NavigationOutcome::Arrived { .. } | NavigationOutcome::ArrivedWithFallback { .. }
        )
    }
}

/// Snapshot of everything a host or a test might compare.
#[derive(Clone, Debug, PartialEq)]
pub struct NavigatorStatus {
    pub current: NodeId,
    pub state: NavState,
    pub display: Display,
    pub loading: bool,
    pub orientation: ViewOrientation,
}

/// Collaborators a navigator drives.
pub struct NavigatorParts {
    pub graph: Rc<NodeGraph>,
    pub cache: ResourceCache,
    pub renderer: Rc<dyn SphereRenderer>,
    pub clock: FrameClock,
    pub spawner: LocalSpawner,
}

struct NavCore {
    current: NodeId,
    phase: NavState,
    display: Display,
    orientation: ViewOrientation,
    loading: bool,
    progress: f32,
    epoch: u64,
    completed: u64,
    restoring: bool,
}

struct NavShared {
    graph: Rc<NodeGraph>,
    cache: ResourceCache,
    renderer: Rc<dyn SphereRenderer>,
    clock: FrameClock,
    spawner: LocalSpawner,
    transition: TransitionConfig,
    loading_delay: f32,
    core: RefCell<NavCore>,
}

/// An accepted request: the lock is held from the moment a plan exists.
struct TransitionPlan {
    guard: TransitionGuard,
    from: NodeId,
    to: NodeId,
    from_display: Display,
    from_view: ViewOrientation,
    to_view: ViewOrientation,
}

/// Releases the transition lock when dropped, unless the epoch moved on.
struct TransitionGuard {
    shared: Rc<NavShared>,
    epoch: u64,
    target: NodeId,
}

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        self.shared.release_lock(self.epoch, &self.target);
    }
}

/// Drives the current node and the transitions between nodes.
///
/// Cloning is cheap and yields another handle to the same navigator.
#[derive(Clone)]
pub struct Navigator {
    shared: Rc<NavShared>,
}

impl Navigator {
    /// Create a navigator sitting at `start`, which must be a node of the graph.
    ///
    /// Nothing is displayed until [`Navigator::start`] is called.
    pub fn new(parts: NavigatorParts, config: &TourConfig, start: &str) -> Self {
        let NavigatorParts {
            graph,
            cache,
            renderer,
            clock,
            spawner,
        } = parts;
        Self {
            shared: Rc::new(NavShared {
                graph,
                cache,
                renderer,
                clock,
                spawner,
                transition: config.transition.clone(),
                loading_delay: config.loading_indicator_delay,
                core: RefCell::new(NavCore {
                    current: start.to_string(),
                    phase: NavState::Idle,
                    display: Display::Fallback,
                    orientation: ViewOrientation::default(),
                    loading: false,
                    progress: 0.0,
                    epoch: 0,
                    completed: 0,
                    restoring: false,
                }),
            }),
        }
    }

    /// Show the start node. The fallback covers the sphere until the node's
    /// own panorama is resident, then the two are swapped.
    pub fn start(&self) {
        let current = self.current();
        log::info!("[nav] starting at '{}'", current);
        self.shared.cache.pin(&current);
        self.shared.show_current();
        NavShared::spawn_restore(&self.shared);
        self.shared.spawn_neighborhood_upkeep(&current);
    }

    pub fn current(&self) -> NodeId {
        self.shared.core.borrow().current.clone()
    }

    pub fn state(&self) -> NavState {
        self.shared.core.borrow().phase.clone()
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self.shared.core.borrow().phase, NavState::Transitioning { .. })
    }

    /// True while a transition waits on a load past the indicator delay.
    pub fn is_loading(&self) -> bool {
        self.shared.core.borrow().loading
    }

    pub fn display(&self) -> Display {
        self.shared.core.borrow().display
    }

    pub fn orientation(&self) -> ViewOrientation {
        self.shared.core.borrow().orientation
    }

    /// Point the camera somewhere else. Ignored during a transition, which
    /// owns the camera until it ends.
    pub fn set_orientation(&self, orientation: ViewOrientation) -> bool {
        let mut core = self.shared.core.borrow_mut();
        if core.phase != NavState::Idle {
            return false;
        }
        core.orientation = orientation;
        true
    }

    /// Linear progress of the running crossfade, 0.0 when idle.
    pub fn progress(&self) -> f32 {
        self.shared.core.borrow().progress
    }

    /// Increments every time a transition is accepted or force-cleared.
    pub fn epoch(&self) -> u64 {
        self.shared.core.borrow().epoch
    }

    pub fn transitions_completed(&self) -> u64 {
        self.shared.core.borrow().completed
    }

    pub fn status(&self) -> NavigatorStatus {
        let core = self.shared.core.borrow();
        NavigatorStatus {
            current: core.current.clone(),
            state: core.phase.clone(),
            display: core.display,
            loading: core.loading,
            orientation: core.orientation,
        }
    }

    /// Navigate to `target`.
    ///
    /// The request is checked and the lock taken before this returns; the
    /// returned future performs the transition and must be driven by the
    /// render loop's executor. Dropping it releases the lock and puts the
    /// display back on the current node.
    pub fn navigate_to(&self, target: &str) -> LocalBoxFuture<'static, NavigationOutcome> {
        match NavShared::begin(&self.shared, target, None) {
            Ok(plan) => NavShared::run(Rc::clone(&self.shared), plan).boxed_local(),
            Err(rejection) => future::ready(NavigationOutcome::Rejected(rejection)).boxed_local(),
        }
    }

    /// Navigate along the current node's link `index`, facing the link's marker.
    pub fn follow_link(&self, index: usize) -> LocalBoxFuture<'static, NavigationOutcome> {
        match self.link_target(index) {
            Ok((target, view)) => match NavShared::begin(&self.shared, &target, Some(view)) {
                Ok(plan) => NavShared::run(Rc::clone(&self.shared), plan).boxed_local(),
                Err(rejection) => future::ready(NavigationOutcome::Rejected(rejection)).boxed_local(),
            },
            Err(rejection) => future::ready(NavigationOutcome::Rejected(rejection)).boxed_local(),
        }
    }

    /// Start navigating to `target` on the render loop.
    pub fn request(&self, target: &str) -> Result<(), Rejection> {
        let plan = NavShared::begin(&self.shared, target, None)?;
        self.spawn(plan)
    }

    /// Start following link `index` on the render loop.
    pub fn request_link(&self, index: usize) -> Result<(), Rejection> {
        let (target, view) = self.link_target(index)?;
        let plan = NavShared::begin(&self.shared, &target, Some(view))?;
        self.spawn(plan)
    }

    fn spawn(&self, plan: TransitionPlan) -> Result<(), Rejection> {
        let transition = NavShared::run(Rc::clone(&self.shared), plan);
        // On failure the task is dropped here, which releases the lock
        self.shared
            .spawner
            .spawn_local(transition.map(|_| ()))
            .map_err(|e| {
                log::warn!("[nav] executor unavailable, dropping transition: {}", e);
                Rejection::LoopStopped
            })
    }

    fn link_target(&self, index: usize) -> Result<(NodeId, ViewOrientation), Rejection> {
        let current = self.current();
        let link: &Link = self
            .shared
            .graph
            .neighbors_of(&current)
            .ok()
            .and_then(|links| links.get(index))
            .ok_or(Rejection::NoSuchLink(index))?;
        if link.is_dangling() {
            log::warn!("[nav] link '{}' -> '{}' leads nowhere", current, link.target);
            return Err(Rejection::DanglingLink {
                from: current,
                target: link.target.clone(),
            });
        }
        Ok((link.target.clone(), link.orientation()))
    }

    /// Clear a stuck transition lock and stay at the current node.
    ///
    /// Returns false if no transition was running. Calling it again is a no-op.
    pub fn force_idle(&self) -> bool {
        let (from, to) = {
            let mut core = self.shared.core.borrow_mut();
            let NavState::Transitioning { from, to } = core.phase.clone() else {
                return false;
            };
            core.epoch += 1;
            core.phase = NavState::Idle;
            core.loading = false;
            core.progress = 0.0;
            (from, to)
        };
        self.shared.cache.release_hold(&to);
        log::warn!("[nav] cleared stuck transition '{}' -> '{}', staying at '{}'", from, to, from);
        self.shared.settle_visuals(&to);
        true
    }

    /// Make sure the current node is visible at full opacity.
    pub fn show_current(&self) {
        self.shared.show_current();
    }

    /// Check the current panorama still exists and reload it if it does not.
    ///
    /// Skipped while a transition runs. Returns true if the node's own
    /// panorama is on screen afterwards.
    pub fn revalidate(&self) -> bool {
        if self.is_transitioning() {
            return false;
        }
        self.shared.show_current();
        if self.display() == Display::Resident {
            return true;
        }
        NavShared::spawn_restore(&self.shared);
        self.display() == Display::Resident
    }
}

impl NavShared {
    /// Validate a request and take the lock. No await point separates the
    /// check from the lock.
    fn begin(
        shared: &Rc<NavShared>,
        target: &str,
        link_view: Option<ViewOrientation>,
    ) -> Result<TransitionPlan, Rejection> {
        if !shared.graph.contains(target) {
            log::warn!("[nav] refusing to navigate to unknown node '{}'", target);
            return Err(Rejection::UnknownNode(target.to_string()));
        }

        let mut core = shared.core.borrow_mut();
        if let NavState::Transitioning { to, .. } = &core.phase {
            log::debug!("[nav] ignoring '{}' while moving to '{}'", target, to);
            return Err(Rejection::TransitionInProgress);
        }
        if core.current == target {
            log::trace!("[nav] already at '{}'", target);
            return Err(Rejection::AlreadyAtTarget);
        }

        let from = core.current.clone();
        core.epoch += 1;
        core.phase = NavState::Transitioning {
            from: from.clone(),
            to: target.to_string(),
        };
        core.loading = false;
        core.progress = 0.0;
        let epoch = core.epoch;
        let from_display = core.display;
        let from_view = core.orientation;
        drop(core);

        shared.cache.hold(target);
        let to_view = link_view
            .or_else(|| shared.graph.link_between(&from, target).map(Link::orientation))
            .unwrap_or(from_view);

        Ok(TransitionPlan {
            guard: TransitionGuard {
                shared: Rc::clone(shared),
                epoch,
                target: target.to_string(),
            },
            from,
            to: target.to_string(),
            from_display,
            from_view,
            to_view,
        })
    }

    async fn run(shared: Rc<NavShared>, plan: TransitionPlan) -> NavigationOutcome {
        let TransitionPlan {
            guard,
            from,
            to,
            from_display,
            from_view,
            to_view,
        } = plan;
        let epoch = guard.epoch;
        log::info!("[nav] '{}' -> '{}'", from, to);

        let mut acquire = shared.cache.acquire(&to, Quality::High);
        let delay = shared.clock.delay(shared.loading_delay);
        let result = match future::select(&mut acquire, delay).await {
            Either::Left((result, _)) => result,
            Either::Right(((), pending)) => {
                shared.set_loading(epoch, true);
                log::debug!("[nav] '{}' is slow, showing loading indicator", to);
                let result = pending.await;
                shared.set_loading(epoch, false);
                result
            }
        };
        if !shared.owns(epoch) {
            return NavigationOutcome::Interrupted { from, to };
        }

        let (incoming, display, failure) = match result {
            Ok(handle) => (handle, Display::Resident, None),
            Err(error) => {
                log::warn!("[nav] showing fallback for '{}': {}", to, error);
                (shared.cache.fallback_handle(), Display::Fallback, Some(error))
            }
        };
        let outgoing = shared.handle_for(&from, from_display);
        // Fallback to fallback: the same sphere stays up and only the camera moves
        let crossfade = outgoing != Some(incoming);
        let outgoing = outgoing.filter(|_| crossfade);
        let faded_in = crossfade.then_some(incoming);

        if let Some(incoming) = faded_in {
            shared.renderer.set_opacity(incoming, 0.0);
        }
        shared.renderer.set_enabled(incoming, true);

        let timeline = TransitionTimeline::new(&shared.transition, shared.clock.now(), from_view, to_view);
        loop {
            let now = shared.clock.next_frame().await;
            if !shared.owns(epoch) {
                return NavigationOutcome::Interrupted { from, to };
            }
            let frame = timeline.sample(now);
            shared.apply_frame(&frame, outgoing, faded_in);
            if frame.finished {
                break;
            }
        }

        shared.commit(&from, &to, display);
        if let Some(outgoing) = outgoing {
            shared.renderer.set_enabled(outgoing, false);
        }
        shared.spawn_neighborhood_upkeep(&to);
        drop(guard);

        log::info!("[nav] arrived at '{}'", to);
        match failure {
            None => NavigationOutcome::Arrived { node: to },
            Some(error) => NavigationOutcome::ArrivedWithFallback { node: to, error },
        }
    }

    fn owns(&self, epoch: u64) -> bool {
        let core = self.core.borrow();
        core.epoch == epoch && matches!(core.phase, NavState::Transitioning { .. })
    }

    fn set_loading(&self, epoch: u64, loading: bool) {
        let mut core = self.core.borrow_mut();
        if core.epoch == epoch {
            core.loading = loading;
        }
    }

    fn apply_frame(
        &self,
        frame: &TransitionFrame,
        outgoing: Option<SphereHandle>,
        incoming: Option<SphereHandle>,
    ) {
        if let Some(outgoing) = outgoing {
            self.renderer.set_opacity(outgoing, frame.outgoing_opacity);
        }
        if let Some(incoming) = incoming {
            self.renderer.set_opacity(incoming, frame.incoming_opacity);
        }
        let mut core = self.core.borrow_mut();
        core.orientation = frame.orientation;
        core.progress = frame.progress;
    }

    /// The only place the current node changes.
    fn commit(&self, from: &str, to: &str, display: Display) {
        {
            let mut core = self.core.borrow_mut();
            core.current = to.to_string();
            core.display = display;
            core.completed += 1;
        }
        self.cache.unpin(from);
        self.cache.pin(to);
    }

    fn release_lock(&self, epoch: u64, target: &str) {
        let committed = {
            let mut core = self.core.borrow_mut();
            if core.epoch != epoch || core.phase == NavState::Idle {
                return;
            }
            core.phase = NavState::Idle;
            core.loading = false;
            core.progress = 0.0;
            core.current == target
        };
        self.cache.release_hold(target);
        if !committed {
            log::debug!("[nav] transition to '{}' abandoned", target);
            self.settle_visuals(target);
        }
    }

    fn handle_for(&self, node: &str, display: Display) -> Option<SphereHandle> {
        match display {
            Display::Resident => self.cache.handle(node),
            Display::Fallback => self.cache.existing_fallback(),
        }
    }

    /// Hide whatever a dead transition to `abandoned` left on screen and
    /// restore the current node.
    fn settle_visuals(&self, abandoned: &str) {
        let (current, display) = {
            let core = self.core.borrow();
            (core.current.clone(), core.display)
        };
        if abandoned != current {
            if let Some(handle) = self.cache.handle(abandoned) {
                self.renderer.set_enabled(handle, false);
            }
        }
        if display != Display::Fallback {
            if let Some(fallback) = self.cache.existing_fallback() {
                self.renderer.set_enabled(fallback, false);
            }
        }
        self.show_current();
    }

    fn show_current(&self) {
        let (current, display) = {
            let core = self.core.borrow();
            (core.current.clone(), core.display)
        };

        if display == Display::Resident {
            if self.cache.validate(&current) {
                if let Some(handle) = self.cache.handle(&current) {
                    self.renderer.set_opacity(handle, 1.0);
                    self.renderer.set_enabled(handle, true);
                    return;
                }
            }
            log::warn!("[nav] panorama of '{}' is gone, showing fallback", current);
            self.core.borrow_mut().display = Display::Fallback;
        }

        let fallback = self.cache.fallback_handle();
        self.renderer.set_opacity(fallback, 1.0);
        self.renderer.set_enabled(fallback, true);
    }

    /// Load the current node's panorama and swap it in for the fallback.
    fn spawn_restore(shared: &Rc<NavShared>) {
        let node = {
            let mut core = shared.core.borrow_mut();
            if core.restoring || core.display == Display::Resident {
                return;
            }
            core.restoring = true;
            core.current.clone()
        };

        let acquire = shared.cache.acquire(&node, Quality::High);
        let weak = Rc::downgrade(shared);
        let restore = async move {
            let result = acquire.await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            shared.core.borrow_mut().restoring = false;
            match result {
                Ok(handle) => shared.adopt_restored(&node, handle),
                Err(error) => log::warn!("[nav] '{}' is still unavailable: {}", node, error),
            }
        };
        if let Err(e) = shared.spawner.spawn_local(restore) {
            shared.core.borrow_mut().restoring = false;
            log::warn!("[nav] executor unavailable, cannot restore: {}", e);
        }
    }

    fn adopt_restored(&self, node: &str, handle: SphereHandle) {
        {
            let mut core = self.core.borrow_mut();
            if core.current != node || core.phase != NavState::Idle || core.display == Display::Resident {
                return;
            }
            core.display = Display::Resident;
        }
        self.renderer.set_opacity(handle, 1.0);
        self.renderer.set_enabled(handle, true);
        if let Some(fallback) = self.cache.existing_fallback() {
            self.renderer.set_enabled(fallback, false);
        }
        log::info!("[nav] '{}' restored", node);
    }

    /// Drop cached panoramas outside the new neighborhood, then prefetch
    /// the neighbors. Both run after the current frame's work.
    fn spawn_neighborhood_upkeep(&self, node: &str) {
        let neighbors: Vec<NodeId> = self
            .graph
            .followable_targets(node)
            .into_iter()
            .map(String::from)
            .collect();

        let mut keep = neighbors.clone();
        keep.push(node.to_string());
        let cache = self.cache.clone();
        let evict = async move {
            let evicted = cache.retain_only(&keep);
            if !evicted.is_empty() {
                log::debug!("[nav] evicted {:?} outside the neighborhood", evicted);
            }
        };

        let cache = self.cache.clone();
        let origin = node.to_string();
        let prefetch = async move {
            let loads: Vec<_> = neighbors
                .iter()
                .filter(|id| !cache.is_resident(id))
                .filter_map(|id| {
                    let id = id.clone();
                    let load = cache.prefetch(&id, Quality::Standard)?;
                    Some(load.map(move |result| (id, result)))
                })
                .collect();
            if loads.is_empty() {
                return;
            }
            log::debug!("[nav] prefetching {} neighbors of '{}'", loads.len(), origin);
            for (id, result) in future::join_all(loads).await {
                if let Err(error) = result {
                    log::debug!("[nav] prefetch of '{}' failed: {}", id, error);
                }
            }
        };

        for task in [evict.boxed_local(), prefetch.boxed_local()] {
            if let Err(e) = self.spawner.spawn_local(task) {
                log::warn!("[nav] executor unavailable, skipping cache upkeep: {}", e);
            }
        }
    }
}
