//! One object to embed in a host application.
//!
//! A [`Tour`] owns the render loop and wires the cache, navigator, session
//! monitor and hotspot markers together. The host feeds it frames and
//! session events and reads back what to draw.

use std::rc::Rc;

use crate::assets::{AssetLocator, AssetResolver, GraphLocator, TieredResolver};
use crate::cache::ResourceCache;
use crate::camera::ViewOrientation;
use crate::config::TourConfig;
use crate::error::TourError;
use crate::graph::{Node, NodeGraph, NodeId};
use crate::navigation::{HotspotLayer, Navigator, NavigatorParts, Rejection};
use crate::picking::Ray;
use crate::render_loop::RenderLoop;
use crate::renderer::SphereRenderer;
use crate::session::{SessionMonitor, SessionState, Visibility};

enum Assets {
    Resolver(Box<dyn AssetResolver>),
    Locator(Rc<dyn AssetLocator>),
}

/// Builder for a [`Tour`].
pub struct TourBuilder {
    graph: NodeGraph,
    renderer: Rc<dyn SphereRenderer>,
    assets: Assets,
    config: TourConfig,
}

impl TourBuilder {
    /// Start a tour over `graph`, drawn by `renderer`.
    ///
    /// Panoramas resolve with a [`TieredResolver`] rooted at the working
    /// directory unless another resolver or locator is set.
    pub fn new(graph: NodeGraph, renderer: Rc<dyn SphereRenderer>) -> Self {
        Self {
            graph,
            renderer,
            assets: Assets::Resolver(Box::new(TieredResolver::new(""))),
            config: TourConfig::default(),
        }
    }

    pub fn config(mut self, config: TourConfig) -> Self {
        self.config = config;
        self
    }

    /// Map asset keys to URIs with `resolver`.
    pub fn resolver(mut self, resolver: impl AssetResolver + 'static) -> Self {
        self.assets = Assets::Resolver(Box::new(resolver));
        self
    }

    /// Map node ids to URIs with `locator`, bypassing asset keys.
    pub fn locator(mut self, locator: impl AssetLocator + 'static) -> Self {
        self.assets = Assets::Locator(Rc::new(locator));
        self
    }

    /// Validate the config and start at the configured node.
    pub fn build(self) -> Result<Tour, TourError> {
        let TourBuilder {
            graph,
            renderer,
            assets,
            config,
        } = self;
        config.validate()?;

        let graph = Rc::new(graph);
        let start = match &config.start_node {
            Some(id) if graph.contains(id) => id.clone(),
            Some(id) => return Err(TourError::UnknownStartNode(id.clone())),
            None => graph
                .first_id()
                .map(str::to_string)
                .ok_or(crate::error::GraphError::Empty)?,
        };

        let dangling = graph.dangling_links();
        if !dangling.is_empty() {
            log::warn!("[graph] {} links lead nowhere and will be skipped", dangling.len());
        }

        let locator: Rc<dyn AssetLocator> = match assets {
            Assets::Resolver(resolver) => Rc::new(GraphLocator::boxed(Rc::clone(&graph), resolver)),
            Assets::Locator(locator) => locator,
        };

        let mut render_loop = RenderLoop::new(config.frame_budget);
        let cache = ResourceCache::new(
            config.cache.clone(),
            config.fallback.clone(),
            Rc::clone(&renderer),
            locator,
            render_loop.spawner(),
        );
        let navigator = Navigator::new(
            NavigatorParts {
                graph: Rc::clone(&graph),
                cache: cache.clone(),
                renderer,
                clock: render_loop.clock(),
                spawner: render_loop.spawner(),
            },
            &config,
            &start,
        );
        let monitor = SessionMonitor::new(
            navigator.clone(),
            render_loop.clock(),
            render_loop.control(),
            config.session.stuck_lock_grace,
        );
        render_loop.attach_monitor(monitor.clone());

        log::info!(
            "[nav] tour of {} nodes, cache capacity {}",
            graph.len(),
            config.cache.capacity
        );
        navigator.start();

        Ok(Tour {
            render_loop,
            graph,
            cache,
            navigator,
            monitor,
            hotspots: HotspotLayer::new(),
        })
    }
}

/// A running virtual tour.
pub struct Tour {
    render_loop: RenderLoop,
    graph: Rc<NodeGraph>,
    cache: ResourceCache,
    navigator: Navigator,
    monitor: SessionMonitor,
    hotspots: HotspotLayer,
}

impl Tour {
    /// Advance by `dt` seconds. Returns false while the loop is paused.
    pub fn frame(&mut self, dt: f32) -> bool {
        let ran = self.render_loop.frame(dt);
        self.sync_hotspots();
        ran
    }

    /// Advance by the wall-clock time since the previous tick.
    pub fn tick(&mut self) -> bool {
        let ran = self.render_loop.tick();
        self.sync_hotspots();
        ran
    }

    /// Run ready tasks without advancing time.
    pub fn settle(&mut self) {
        self.render_loop.settle();
        self.sync_hotspots();
    }

    /// Markers show the current node's links while idle and nothing while
    /// moving.
    fn sync_hotspots(&mut self) {
        if self.navigator.is_transitioning() {
            self.hotspots.clear();
            return;
        }
        let current = self.navigator.current();
        if self.hotspots.node() != Some(current.as_str()) {
            self.hotspots.rebuild(&self.graph, &current);
        }
    }

    /// Start moving to `target`.
    pub fn navigate_to(&self, target: &str) -> Result<(), Rejection> {
        self.navigator.request(target)
    }

    /// Start moving along link `index` of the current node.
    pub fn follow_link(&self, index: usize) -> Result<(), Rejection> {
        self.navigator.request_link(index)
    }

    /// Follow the hotspot hit by `ray`, if any.
    pub fn select(&self, ray: &Ray) -> Option<Result<(), Rejection>> {
        let hit = self.hotspots.pick(ray)?;
        Some(self.follow_link(hit.hotspot.link_index))
    }

    pub fn on_session_state(&self, state: SessionState) {
        self.monitor.on_session_state(state);
    }

    pub fn on_visibility(&self, visibility: Visibility) {
        self.monitor.on_visibility(visibility);
    }

    /// Stop running frames until resumed.
    pub fn pause(&self) {
        self.render_loop.control().pause();
    }

    pub fn resume(&self) {
        self.render_loop.control().resume();
    }

    pub fn is_running(&self) -> bool {
        self.render_loop.control().is_running()
    }

    /// Drop cached panoramas down to `count` after a platform memory warning.
    pub fn trim_memory(&self, count: usize) -> usize {
        self.cache.trim_to(count)
    }

    pub fn current_node(&self) -> NodeId {
        self.navigator.current()
    }

    pub fn current(&self) -> Option<&Node> {
        self.graph.get(&self.navigator.current()).ok()
    }

    pub fn camera(&self) -> ViewOrientation {
        self.navigator.orientation()
    }

    /// Look around. Ignored while a transition steers the camera.
    pub fn look(&self, orientation: ViewOrientation) -> bool {
        self.navigator.set_orientation(orientation)
    }

    pub fn is_loading(&self) -> bool {
        self.navigator.is_loading()
    }

    pub fn is_transitioning(&self) -> bool {
        self.navigator.is_transitioning()
    }

    pub fn hotspots(&self) -> &HotspotLayer {
        &self.hotspots
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn monitor(&self) -> &SessionMonitor {
        &self.monitor
    }

    pub fn stalls(&self) -> u64 {
        self.render_loop.stalls()
    }

    /// Release every GPU resource. Pending work is dropped.
    pub fn shutdown(self) {
        log::info!("[nav] shutting down at '{}'", self.navigator.current());
        self.cache.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use futures::FutureExt;
    use futures::task::LocalSpawnExt;

    use super::*;
    use crate::assets::Quality;
    use crate::error::LoadError;
    use crate::navigation::{Display, NavState, NavigationOutcome};
    use crate::testing::{FALLBACK_URI, FakeRenderer, graph, key_as_uri};

    const STEP: f32 = 0.05;

    fn tour_with(renderer: &Rc<FakeRenderer>, graph: NodeGraph, config: TourConfig) -> Tour {
        let mut tour = TourBuilder::new(graph, renderer.clone())
            .resolver(key_as_uri)
            .config(config)
            .build()
            .unwrap();
        tour.settle();
        tour
    }

    /// x links to y and z; y links on to w.
    fn tour(renderer: &Rc<FakeRenderer>) -> Tour {
        let graph = graph(&[("w", &["y"]), ("x", &["y", "z"]), ("y", &["x", "w"]), ("z", &["x"])]);
        tour_with(renderer, graph, TourConfig::default().start_node("x"))
    }

    fn run(tour: &mut Tour, seconds: f32) {
        for _ in 0..(seconds / STEP).ceil() as usize {
            tour.frame(STEP);
        }
    }

    #[test]
    fn start_shows_start_node_and_prefetches_neighbors() {
        let renderer = Rc::new(FakeRenderer::new());
        let tour = tour(&renderer);

        assert_eq!(tour.current_node(), "x");
        assert_eq!(tour.navigator().display(), Display::Resident);
        assert_eq!(renderer.visible_uris(), vec!["x"]);
        assert_eq!(tour.cache().pinned().as_deref(), Some("x"));
        assert_eq!(renderer.last_quality("x"), Some(Quality::High));
        assert_eq!(renderer.last_quality("y"), Some(Quality::Standard));
        assert!(tour.cache().is_resident("z"));
        assert_eq!(tour.hotspots().len(), 2);
    }

    #[test]
    fn navigation_crossfades_and_commits_at_the_end() {
        let renderer = Rc::new(FakeRenderer::new());
        let mut tour = tour(&renderer);
        let x = tour.cache().handle("x").unwrap();
        let y = tour.cache().handle("y").unwrap();

        tour.navigate_to("y").unwrap();
        tour.frame(STEP);
        assert!(tour.is_transitioning());
        assert!(tour.hotspots().is_empty());

        tour.frame(0.45);
        // Halfway: both spheres visible, still at x, x still pinned
        let (out, inc) = (renderer.sphere(x).unwrap(), renderer.sphere(y).unwrap());
        assert!(out.enabled && inc.enabled);
        assert!((out.opacity + inc.opacity - 1.0).abs() < 1e-4);
        assert!(inc.opacity > 0.0 && inc.opacity < 1.0);
        assert_eq!(tour.current_node(), "x");
        assert_eq!(tour.cache().pinned().as_deref(), Some("x"));

        run(&mut tour, 0.6);
        assert_eq!(tour.current_node(), "y");
        assert_eq!(tour.navigator().state(), NavState::Idle);
        assert_eq!(tour.cache().pinned().as_deref(), Some("y"));
        assert_eq!(renderer.visible_uris(), vec!["y"]);
        assert!(!renderer.sphere(x).unwrap().enabled);
        assert_eq!(tour.navigator().transitions_completed(), 1);
        assert_eq!(tour.hotspots().node(), Some("y"));
    }

    #[test]
    fn commit_waits_for_the_final_crossfade_frame() {
        let renderer = Rc::new(FakeRenderer::new());
        let mut tour = tour(&renderer);
        let y = tour.cache().handle("y").unwrap();

        tour.navigate_to("y").unwrap();
        // The crossfade clock starts on this frame
        tour.frame(STEP);

        tour.frame(0.99);
        assert!(tour.is_transitioning());
        assert_eq!(tour.current_node(), "x");
        assert_eq!(tour.cache().pinned().as_deref(), Some("x"));
        assert!(renderer.sphere(y).unwrap().opacity < 1.0);

        tour.frame(0.02);
        assert!(!tour.is_transitioning());
        assert_eq!(tour.current_node(), "y");
        assert_eq!(tour.cache().pinned().as_deref(), Some("y"));
        assert_eq!(renderer.sphere(y).unwrap().opacity, 1.0);
    }

    #[test]
    fn navigation_still_completes_after_days_of_uptime() {
        let renderer = Rc::new(FakeRenderer::new());
        let mut tour = tour(&renderer);
        tour.frame(518_400.0);

        tour.navigate_to("y").unwrap();
        for _ in 0..120 {
            tour.frame(1.0 / 90.0);
        }
        assert_eq!(tour.current_node(), "y");
        assert_eq!(tour.navigator().state(), NavState::Idle);
        assert_eq!(tour.navigator().transitions_completed(), 1);
    }

    #[test]
    fn camera_turns_toward_the_link_marker() {
        let renderer = Rc::new(FakeRenderer::new());
        let mut tour = tour(&renderer);
        // z is x's second link, at 90 degrees
        tour.follow_link(1).unwrap();
        run(&mut tour, 1.2);
        assert_eq!(tour.current_node(), "z");
        assert!((tour.camera().yaw - 90f32.to_radians()).abs() < 1e-4);
    }

    #[test]
    fn unlinked_target_keeps_orientation() {
        let renderer = Rc::new(FakeRenderer::new());
        let mut tour = tour(&renderer);
        tour.look(ViewOrientation::from_degrees(30.0, 10.0));
        tour.navigate_to("w").unwrap();
        run(&mut tour, 1.2);
        assert_eq!(tour.current_node(), "w");
        assert_eq!(tour.camera(), ViewOrientation::from_degrees(30.0, 10.0));
    }

    #[test]
    fn second_request_during_transition_is_rejected() {
        let renderer = Rc::new(FakeRenderer::new());
        let mut tour = tour(&renderer);

        tour.navigate_to("y").unwrap();
        assert_eq!(tour.navigate_to("z"), Err(Rejection::TransitionInProgress));
        tour.frame(STEP);
        assert_eq!(tour.navigate_to("z"), Err(Rejection::TransitionInProgress));

        run(&mut tour, 1.2);
        assert_eq!(tour.current_node(), "y");
        assert_eq!(renderer.visible_uris(), vec!["y"]);
    }

    #[test]
    fn rejects_unknown_and_current_targets() {
        let renderer = Rc::new(FakeRenderer::new());
        let tour = tour(&renderer);
        assert_eq!(
            tour.navigate_to("nowhere"),
            Err(Rejection::UnknownNode("nowhere".into()))
        );
        assert_eq!(tour.navigate_to("x"), Err(Rejection::AlreadyAtTarget));
        assert_eq!(tour.follow_link(7), Err(Rejection::NoSuchLink(7)));
        assert!(!tour.is_transitioning());
    }

    #[test]
    fn dangling_links_are_not_followed() {
        let renderer = Rc::new(FakeRenderer::new());
        let graph = NodeGraph::from_json(
            r#"{ "a": { "assetKey": "a", "links": [{ "to": "gone" }, { "to": "b" }] },
                 "b": { "assetKey": "b" } }"#,
        )
        .unwrap();
        let tour = tour_with(&renderer, graph, TourConfig::default());
        assert!(matches!(tour.follow_link(0), Err(Rejection::DanglingLink { .. })));
        assert_eq!(tour.hotspots().len(), 1);
        assert_eq!(renderer.load_count("gone"), 0);
    }

    #[test]
    fn failed_load_falls_back_and_releases_the_lock() {
        let renderer = Rc::new(FakeRenderer::new());
        let graph = graph(&[("x", &[]), ("broken", &[])]);
        let mut tour = tour_with(&renderer, graph, TourConfig::default().start_node("x"));
        renderer.fail_uri("broken");

        let navigation = tour.navigator().navigate_to("broken");
        let outcome = Rc::new(RefCell::new(None));
        let slot = outcome.clone();
        tour.render_loop
            .spawner()
            .spawn_local(async move {
                *slot.borrow_mut() = Some(navigation.await);
            })
            .unwrap();

        run(&mut tour, 1.2);
        assert_eq!(
            *outcome.borrow(),
            Some(NavigationOutcome::ArrivedWithFallback {
                node: "broken".into(),
                error: LoadError::Fetch {
                    uri: "broken".into(),
                    reason: "simulated failure".into(),
                },
            })
        );
        assert_eq!(tour.current_node(), "broken");
        assert_eq!(tour.navigator().display(), Display::Fallback);
        assert_eq!(renderer.visible_uris(), vec![FALLBACK_URI]);
        assert!(!tour.is_transitioning());

        // The lock is free again
        tour.navigate_to("x").unwrap();
        run(&mut tour, 1.2);
        assert_eq!(tour.current_node(), "x");
        assert_eq!(renderer.visible_uris(), vec!["x"]);
    }

    #[test]
    fn revalidate_retries_a_failed_panorama() {
        let renderer = Rc::new(FakeRenderer::new());
        let graph = graph(&[("x", &[]), ("broken", &[])]);
        let mut tour = tour_with(&renderer, graph, TourConfig::default().start_node("x"));
        renderer.fail_uri("broken");
        tour.navigate_to("broken").unwrap();
        run(&mut tour, 1.2);
        assert_eq!(tour.navigator().display(), Display::Fallback);

        renderer.heal_uri("broken");
        assert!(!tour.navigator().revalidate());
        tour.frame(STEP);
        assert_eq!(tour.navigator().display(), Display::Resident);
        assert_eq!(renderer.visible_uris(), vec!["broken"]);
        assert_eq!(renderer.load_count("broken"), 2);
    }

    #[test]
    fn slow_load_shows_loading_indicator() {
        let renderer = Rc::new(FakeRenderer::new());
        let graph = graph(&[("x", &[]), ("far", &[])]);
        let mut tour = tour_with(&renderer, graph, TourConfig::default().start_node("x"));
        renderer.set_manual(true);

        tour.navigate_to("far").unwrap();
        tour.frame(0.1);
        assert!(!tour.is_loading());
        tour.frame(0.25);
        assert!(tour.is_loading());
        // The old node stays fully visible while waiting
        assert_eq!(renderer.visible_uris(), vec!["x"]);

        renderer.complete("far");
        tour.frame(STEP);
        assert!(!tour.is_loading());
        run(&mut tour, 1.2);
        assert_eq!(tour.current_node(), "far");
    }

    #[test]
    fn dropping_the_navigation_future_releases_the_lock() {
        let renderer = Rc::new(FakeRenderer::new());
        let mut tour = tour(&renderer);

        let navigation = tour.navigator().navigate_to("y");
        assert!(tour.is_transitioning());
        drop(navigation);
        assert!(!tour.is_transitioning());
        assert_eq!(tour.current_node(), "x");

        tour.navigate_to("z").unwrap();
        run(&mut tour, 1.2);
        assert_eq!(tour.current_node(), "z");
    }

    #[test]
    fn rejected_navigation_future_resolves_immediately() {
        let renderer = Rc::new(FakeRenderer::new());
        let tour = tour(&renderer);
        let outcome = tour.navigator().navigate_to("x").now_or_never();
        assert_eq!(outcome, Some(NavigationOutcome::Rejected(Rejection::AlreadyAtTarget)));
    }

    #[test]
    fn arrival_evicts_outside_the_neighborhood() {
        let renderer = Rc::new(FakeRenderer::new());
        let mut tour = tour(&renderer);
        assert!(tour.cache().is_resident("z"));

        tour.navigate_to("y").unwrap();
        run(&mut tour, 1.2);
        // y's neighborhood is x and w; z is no longer needed
        assert_eq!(tour.cache().resident_keys(), vec!["w", "x", "y"]);
        assert_eq!(tour.cache().pinned().as_deref(), Some("y"));
    }

    #[test]
    fn pinned_node_survives_capacity_pressure() {
        let renderer = Rc::new(FakeRenderer::new());
        let graph = graph(&[
            ("hub", &["a", "b", "c", "d"]),
            ("a", &["hub"]),
            ("b", &["hub"]),
            ("c", &["hub"]),
            ("d", &["hub"]),
        ]);
        let config = TourConfig::default()
            .start_node("hub")
            .cache(crate::config::CacheConfig::default().capacity(3));
        let mut tour = tour_with(&renderer, graph, config);

        assert!(tour.cache().resident_count() <= 3);
        assert!(tour.cache().is_resident("hub"));
        // Only two of the four neighbors fit beside the pinned hub
        assert_eq!(renderer.total_loads(), 3);

        tour.navigate_to("d").unwrap();
        run(&mut tour, 1.2);
        assert_eq!(tour.current_node(), "d");
        assert!(tour.cache().resident_count() <= 3);
        assert!(tour.cache().is_resident("d"));
        assert_eq!(renderer.visible_uris(), vec!["d"]);
    }

    #[test]
    fn gaze_selects_a_hotspot() {
        let renderer = Rc::new(FakeRenderer::new());
        let mut tour = tour(&renderer);
        let gaze = Ray::from_view(ViewOrientation::from_degrees(90.0, 0.0));
        assert_eq!(tour.select(&gaze), Some(Ok(())));
        run(&mut tour, 1.2);
        assert_eq!(tour.current_node(), "z");
    }

    #[test]
    fn unknown_start_node_is_an_error() {
        let renderer = Rc::new(FakeRenderer::new());
        let result = TourBuilder::new(graph(&[("a", &[])]), renderer)
            .config(TourConfig::default().start_node("b"))
            .build();
        assert!(matches!(result, Err(TourError::UnknownStartNode(id)) if id == "b"));
    }

    #[test]
    fn shutdown_releases_all_spheres() {
        let renderer = Rc::new(FakeRenderer::new());
        let tour = tour(&renderer);
        assert!(renderer.live_count() > 0);
        tour.shutdown();
        assert_eq!(renderer.live_count(), 0);
    }
}
