//! Moving between nodes.
//!
//! - [`Navigator`]: the idle/transitioning state machine and its lock
//! - [`TransitionTimeline`]: crossfade and camera sweep sampling
//! - [`HotspotLayer`]: pickable markers for the current node's links

mod controller;
mod hotspots;
mod transition;

pub use controller::{
    Display, NavState, NavigationOutcome, Navigator, NavigatorParts, NavigatorStatus, Rejection,
};
pub use hotspots::{Hotspot, HotspotHit, HotspotLayer, Marker};
pub use transition::{Easing, TransitionFrame, TransitionTimeline};
