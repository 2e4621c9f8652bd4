//! Error types for the streaming and navigation engine.
//!
//! None of these are fatal: a failed load degrades to the fallback panorama,
//! a broken link is skipped, and a stuck lock is cleared by the session monitor.

use thiserror::Error;

/// A panorama could not be made resident.
///
/// Cloneable so that a single load result can be handed to every caller that
/// coalesced onto the same in-flight request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    /// The requested key does not name a node in the graph.
    #[error("no node named '{0}'")]
    UnknownNode(String),
    /// The image bytes could not be fetched.
    #[error("failed to fetch '{uri}': {reason}")]
    Fetch { uri: String, reason: String },
    /// The bytes were fetched but are not a decodable image.
    #[error("failed to decode '{uri}': {reason}")]
    Decode { uri: String, reason: String },
    /// The decoded image could not be turned into a GPU resource.
    #[error("failed to upload '{uri}': {reason}")]
    Upload { uri: String, reason: String },
    /// Every other resident entry is protected, so this one could not stay.
    #[error("no room to keep '{0}' resident")]
    NoRoom(String),
}

/// Lookup or construction failure in the node graph.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node '{0}' not found")]
    NotFound(String),
    #[error("invalid graph source: {0}")]
    Parse(String),
    #[error("graph contains no nodes")]
    Empty,
}

/// Invalid or unparsable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failure to assemble a [`Tour`](crate::Tour).
#[derive(Debug, Error)]
pub enum TourError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("start node '{0}' is not in the graph")]
    UnknownStartNode(String),
}
