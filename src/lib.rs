//! # Panodome
//!
//! **Streaming and navigation for 360° panorama tours.**
//!
//! A tour is a graph of panoramic locations linked by hotspots. Panodome
//! keeps the current location's panorama and its neighbors resident on the
//! GPU within a fixed budget, crossfades between locations while turning the
//! camera toward the link that was followed, and recovers when an immersive
//! session swaps render loops out from under it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::rc::Rc;
//! use panodome::*;
//!
//! let graph = NodeGraph::from_json(&std::fs::read_to_string("tour.json").unwrap()).unwrap();
//! let renderer = Rc::new(GpuSphereRenderer::headless().unwrap());
//!
//! let mut tour = TourBuilder::new(graph, renderer.clone())
//!     .resolver(TieredResolver::new("panoramas"))
//!     .config(TourConfig::default().start_node("lobby"))
//!     .build()
//!     .unwrap();
//!
//! loop {
//!     tour.tick();
//!     if let Some(hotspot) = tour.hotspots().hotspots().first() {
//!         let _ = tour.follow_link(hotspot.0.link_index);
//!     }
//!     renderer.for_each_visible(|_, texture, opacity| {
//!         // draw the panorama sphere with `texture` at `opacity`
//!         let _ = (texture, opacity);
//!     });
//! }
//! ```
//!
//! ## Pieces
//!
//! - [`ResourceCache`]: bounded LRU of panorama spheres with single-flight loads
//! - [`Navigator`]: the transition lock, crossfade and camera sweep
//! - [`SessionMonitor`]: stuck-lock recovery across immersive session changes
//! - [`RenderLoop`]: frame-stepped executor every task runs on
//! - [`Tour`]: all of the above wired together
//!
//! Log output goes through the `log` crate, tagged `[cache]`, `[nav]`,
//! `[session]`, `[loop]`, `[graph]` or `[gpu]`.

mod assets;
mod cache;
mod camera;
mod clock;
mod config;
mod error;
mod gpu;
mod graph;
pub mod navigation;
mod picking;
mod render_loop;
mod renderer;
mod session;
mod texture;
mod tour;

#[cfg(test)]
mod testing;

pub use assets::{AssetLocator, AssetResolver, GraphLocator, Quality, TieredResolver};
pub use cache::{Acquire, CacheEntry, CacheStats, LoadResult, ResourceCache};
pub use camera::{ViewOrientation, shortest_yaw_delta, wrap_angle};
pub use clock::{Delay, FrameClock, NextFrame};
pub use config::{CacheConfig, FallbackConfig, SessionConfig, TourConfig, TransitionConfig};
pub use error::{ConfigError, GraphError, LoadError, TourError};
pub use gpu::{GpuError, GpuSphereRenderer};
pub use graph::{Link, LinkSource, MapPosition, Node, NodeGraph, NodeId, NodeSource};
pub use navigation::{
    Display, Easing, Hotspot, HotspotLayer, NavState, NavigationOutcome, Navigator,
    NavigatorStatus, Rejection,
};
pub use picking::Ray;
pub use render_loop::{LoopControl, RenderLoop};
pub use renderer::{SphereFuture, SphereHandle, SphereRenderer};
pub use session::{SessionMonitor, SessionState, Visibility};
pub use texture::{SphereTexture, fallback_panorama};
pub use tour::{Tour, TourBuilder};

// Re-export glam math types for convenience
pub use glam::Vec3;
