//! Clickable link markers around the current node.
//!
//! Each followable link of the current node becomes an entity in a small
//! [`hecs::World`], carrying the link it stands for and a marker position on
//! a shell inside the panorama sphere. The world is rebuilt whenever the
//! viewer arrives somewhere new.

use glam::Vec3;

use crate::camera::ViewOrientation;
use crate::graph::{NodeGraph, NodeId};
use crate::picking::Ray;

/// Distance of markers from the sphere center.
const MARKER_DISTANCE: f32 = 10.0;
/// Marker radius; generous so gaze selection is forgiving.
const MARKER_RADIUS: f32 = 0.8;

/// A followable link shown as a marker.
#[derive(Clone, Debug, PartialEq)]
pub struct Hotspot {
    /// Index of the link on its source node.
    pub link_index: usize,
    pub target: NodeId,
    pub label: Option<String>,
    /// Direction of the marker, also the camera target when followed.
    pub orientation: ViewOrientation,
}

/// Where a hotspot's marker is drawn.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Marker {
    pub position: Vec3,
    pub radius: f32,
}

/// A hit from [`HotspotLayer::pick`].
#[derive(Clone, Debug, PartialEq)]
pub struct HotspotHit {
    pub hotspot: Hotspot,
    pub distance: f32,
}

/// Markers for the links of one node.
pub struct HotspotLayer {
    world: hecs::World,
    node: Option<NodeId>,
}

impl Default for HotspotLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl HotspotLayer {
    pub fn new() -> Self {
        Self {
            world: hecs::World::new(),
            node: None,
        }
    }

    /// Replace the markers with the links of `node`. Dangling links and
    /// links back to the node itself get no marker.
    pub fn rebuild(&mut self, graph: &NodeGraph, node: &str) -> usize {
        self.world.clear();
        self.node = Some(node.to_string());

        let Ok(links) = graph.neighbors_of(node) else {
            log::warn!("[nav] no hotspots for unknown node '{}'", node);
            return 0;
        };

        for (index, link) in links.iter().enumerate() {
            if link.is_dangling() || link.target == node {
                continue;
            }
            let orientation = link.orientation();
            self.world.spawn((
                Hotspot {
                    link_index: index,
                    target: link.target.clone(),
                    label: link.label.clone(),
                    orientation,
                },
                Marker {
                    position: orientation.forward() * MARKER_DISTANCE,
                    radius: MARKER_RADIUS,
                },
            ));
        }

        let count = self.len();
        log::debug!("[nav] {} hotspots at '{}'", count, node);
        count
    }

    /// Remove every marker, e.g. while a transition is running.
    pub fn clear(&mut self) {
        if self.node.take().is_some() {
            self.world.clear();
        }
    }

    /// Node whose links the markers show.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn len(&self) -> usize {
        self.world.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.world.len() == 0
    }

    /// Every hotspot with its marker, in link order.
    pub fn hotspots(&self) -> Vec<(Hotspot, Marker)> {
        let mut all: Vec<_> = self
            .world
            .query::<(&Hotspot, &Marker)>()
            .iter()
            .map(|(_, (hotspot, marker))| (hotspot.clone(), *marker))
            .collect();
        all.sort_by_key(|(hotspot, _)| hotspot.link_index);
        all
    }

    /// Closest marker hit by `ray`.
    pub fn pick(&self, ray: &Ray) -> Option<HotspotHit> {
        self.world
            .query::<(&Hotspot, &Marker)>()
            .iter()
            .filter_map(|(_, (hotspot, marker))| {
                ray.intersect_sphere(marker.position, marker.radius)
                    .map(|distance| HotspotHit {
                        hotspot: hotspot.clone(),
                        distance,
                    })
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::graph;

    #[test]
    fn one_marker_per_followable_link() {
        let graph = NodeGraph::from_json(
            r#"{
                "a": { "assetKey": "a", "links": [
                    { "to": "b", "yaw": 0 },
                    { "to": "nowhere", "yaw": 90 },
                    { "to": "a", "yaw": 180 },
                    { "to": "c", "yaw": -90, "label": "Stairs" }
                ] },
                "b": { "assetKey": "b" },
                "c": { "assetKey": "c" }
            }"#,
        )
        .unwrap();

        let mut layer = HotspotLayer::new();
        assert_eq!(layer.rebuild(&graph, "a"), 2);

        let hotspots = layer.hotspots();
        assert_eq!(hotspots[0].0.target, "b");
        assert_eq!(hotspots[1].0.link_index, 3);
        assert_eq!(hotspots[1].0.label.as_deref(), Some("Stairs"));
    }

    #[test]
    fn gaze_picks_the_marker_in_view() {
        let graph = graph(&[("a", &["b", "c"]), ("b", &[]), ("c", &[])]);
        let mut layer = HotspotLayer::new();
        layer.rebuild(&graph, "a");

        // "c" is the second link, at a bearing of 90 degrees
        let hit = layer
            .pick(&Ray::from_view(ViewOrientation::from_degrees(90.0, 0.0)))
            .unwrap();
        assert_eq!(hit.hotspot.target, "c");
        assert!(layer
            .pick(&Ray::from_view(ViewOrientation::from_degrees(180.0, 0.0)))
            .is_none());
    }

    #[test]
    fn rebuild_replaces_previous_node() {
        let graph = graph(&[("a", &["b"]), ("b", &["a", "c"]), ("c", &[])]);
        let mut layer = HotspotLayer::new();
        layer.rebuild(&graph, "a");
        layer.rebuild(&graph, "b");
        assert_eq!(layer.node(), Some("b"));
        assert_eq!(layer.len(), 2);

        layer.clear();
        assert!(layer.is_empty());
        assert_eq!(layer.node(), None);
    }
}
