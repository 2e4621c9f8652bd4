//! The static graph of panoramic locations and the links between them.
//!
//! The graph is built once from its source mapping and never mutated, so it
//! can be shared freely behind an `Rc`. Links whose target is missing are kept
//! but flagged; navigation refuses to follow them.
//!
//! # Source format
//!
//! ```
//! use panodome::NodeGraph;
//!
//! let graph = NodeGraph::from_json(r#"{
//!     "lobby": {
//!         "label": "Lobby",
//!         "assetKey": "lobby_pano",
//!         "links": [{ "to": "hall", "yaw": 90, "pitch": -5, "label": "Hall" }],
//!         "mapPosition": { "x": 10, "y": 4 },
//!         "floor": "ground"
//!     },
//!     "hall": { "label": "Hall", "assetKey": "hall_pano", "links": [{ "to": "lobby", "yaw": -90 }] }
//! }"#).unwrap();
//!
//! assert_eq!(graph.neighbors_of("lobby").unwrap()[0].target, "hall");
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::camera::ViewOrientation;
use crate::error::GraphError;

/// Unique node identifier.
pub type NodeId = String;

/// Position of a node on the 2D floorplan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MapPosition {
    pub x: f32,
    pub y: f32,
}

/// A directed, oriented connection to a neighboring node.
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    /// Node this link leads to.
    pub target: NodeId,
    /// Bearing of the marker in degrees.
    pub yaw: f32,
    /// Elevation of the marker in degrees.
    pub pitch: f32,
    pub label: Option<String>,
    dangling: bool,
}

impl Link {
    /// True when `target` is not a node in the graph.
    pub fn is_dangling(&self) -> bool {
        self.dangling
    }

    /// View orientation facing this link's marker.
    pub fn orientation(&self) -> ViewOrientation {
        ViewOrientation::from_degrees(self.yaw, self.pitch)
    }
}

/// One navigable panoramic location.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub label: String,
    /// Logical key handed to the asset resolver.
    pub asset_key: String,
    pub links: Vec<Link>,
    pub map_position: MapPosition,
    pub floor: String,
}

/// A link as it appears in the source mapping.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LinkSource {
    pub to: String,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
    #[serde(default)]
    pub label: Option<String>,
}

/// A node as it appears in the source mapping.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSource {
    #[serde(default)]
    pub label: String,
    pub asset_key: String,
    #[serde(default)]
    pub links: Vec<LinkSource>,
    #[serde(default)]
    pub map_position: MapPosition,
    #[serde(default)]
    pub floor: String,
}

/// Validated, immutable node graph.
#[derive(Clone, Debug)]
pub struct NodeGraph {
    nodes: BTreeMap<NodeId, Node>,
}

impl NodeGraph {
    /// Build the graph from its keyed source mapping.
    pub fn from_source(source: BTreeMap<String, NodeSource>) -> Result<Self, GraphError> {
        if source.is_empty() {
            return Err(GraphError::Empty);
        }

        let nodes = source
            .iter()
            .map(|(id, entry)| {
                let links = entry
                    .links
                    .iter()
                    .map(|link| {
                        let dangling = !source.contains_key(&link.to);
                        if dangling {
                            log::warn!("[graph] link '{}' -> '{}' has no target node", id, link.to);
                        }
                        Link {
                            target: link.to.clone(),
                            yaw: link.yaw,
                            pitch: link.pitch,
                            label: link.label.clone(),
                            dangling,
                        }
                    })
                    .collect();

                let node = Node {
                    id: id.clone(),
                    label: entry.label.clone(),
                    asset_key: entry.asset_key.clone(),
                    links,
                    map_position: entry.map_position,
                    floor: entry.floor.clone(),
                };
                (id.clone(), node)
            })
            .collect();

        Ok(Self { nodes })
    }

    /// Parse the source mapping from JSON and build the graph.
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let source: BTreeMap<String, NodeSource> =
            serde_json::from_str(json).map_err(|e| GraphError::Parse(e.to_string()))?;
        Self::from_source(source)
    }

    /// Look up a node.
    pub fn get(&self, id: &str) -> Result<&Node, GraphError> {
        self.nodes
            .get(id)
            .ok_or_else(|| GraphError::NotFound(id.to_string()))
    }

    /// Outbound links of a node, in authoring order. Includes dangling links.
    pub fn neighbors_of(&self, id: &str) -> Result<&[Link], GraphError> {
        self.get(id).map(|node| node.links.as_slice())
    }

    /// Targets of a node's links that can actually be followed.
    pub fn followable_targets(&self, id: &str) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        for link in self.neighbors_of(id).unwrap_or(&[]) {
            if !link.is_dangling() && link.target != id && !targets.contains(&link.target.as_str())
            {
                targets.push(&link.target);
            }
        }
        targets
    }

    /// The first link from `from` that leads to `to`, if any.
    pub fn link_between(&self, from: &str, to: &str) -> Option<&Link> {
        self.nodes
            .get(from)?
            .links
            .iter()
            .find(|link| link.target == to && !link.is_dangling())
    }

    /// Every dangling link as `(source node, link)`.
    pub fn dangling_links(&self) -> Vec<(&str, &Link)> {
        self.nodes
            .values()
            .flat_map(|node| {
                node.links
                    .iter()
                    .filter(|link| link.is_dangling())
                    .map(move |link| (node.id.as_str(), link))
            })
            .collect()
    }

    /// Nodes tagged with the given floor, in id order.
    pub fn nodes_on_floor<'a>(&'a self, floor: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.values().filter(move |node| node.floor == floor)
    }

    /// True if `id` names a node.
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// The first node id in sorted order.
    pub fn first_id(&self) -> Option<&str> {
        self.nodes.keys().next().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
