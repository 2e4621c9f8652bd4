//! Resolving nodes to panorama image URIs.
//!
//! The offline image pipeline produces every asset in three quality tiers.
//! An [`AssetResolver`] turns an asset key plus a tier into a URI; an
//! [`AssetLocator`] does the same starting from a node id, which is what the
//! resource cache works with.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::graph::NodeGraph;

/// Quality tier of a panorama image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Mobile,
    /// Used for speculative prefetch.
    #[default]
    Standard,
    /// Used for the node being navigated to.
    High,
}

impl Quality {
    /// Directory-style name of the tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Mobile => "mobile",
            Quality::Standard => "standard",
            Quality::High => "high",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an asset key and quality tier to a URI.
pub trait AssetResolver {
    fn resolve(&self, asset_key: &str, quality: Quality) -> String;
}

impl<F> AssetResolver for F
where
    F: Fn(&str, Quality) -> String,
{
    fn resolve(&self, asset_key: &str, quality: Quality) -> String {
        self(asset_key, quality)
    }
}

/// Resolver for the `{base}/{tier}/{key}.{ext}` layout written by the image pipeline.
///
/// # Example
///
/// ```
/// use panodome::{AssetResolver, Quality, TieredResolver};
///
/// let resolver = TieredResolver::new("https://cdn.example.com/tour").extension("webp");
/// assert_eq!(
///     resolver.resolve("lobby", Quality::High),
///     "https://cdn.example.com/tour/high/lobby.webp"
/// );
/// ```
#[derive(Clone, Debug)]
pub struct TieredResolver {
    base: String,
    extension: String,
}

impl TieredResolver {
    /// Create a resolver rooted at `base`, producing `.jpg` URIs.
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
            extension: "jpg".to_string(),
        }
    }

    /// Use a different file extension.
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

impl AssetResolver for TieredResolver {
    fn resolve(&self, asset_key: &str, quality: Quality) -> String {
        if self.base.is_empty() {
            format!("{}/{}.{}", quality, asset_key, self.extension)
        } else {
            format!("{}/{}/{}.{}", self.base, quality, asset_key, self.extension)
        }
    }
}

/// Maps a node id and quality tier to the URI of its panorama.
pub trait AssetLocator {
    fn locate(&self, node: &str, quality: Quality) -> Result<String, LoadError>;
}

/// Locates node panoramas through the graph's asset keys.
pub struct GraphLocator {
    graph: Rc<NodeGraph>,
    resolver: Box<dyn AssetResolver>,
}

impl GraphLocator {
    pub fn new(graph: Rc<NodeGraph>, resolver: impl AssetResolver + 'static) -> Self {
        Self::boxed(graph, Box::new(resolver))
    }

    /// Same as [`GraphLocator::new`] for an already boxed resolver.
    pub fn boxed(graph: Rc<NodeGraph>, resolver: Box<dyn AssetResolver>) -> Self {
        Self { graph, resolver }
    }
}

impl AssetLocator for GraphLocator {
    fn locate(&self, node: &str, quality: Quality) -> Result<String, LoadError> {
        let node = self
            .graph
            .get(node)
            .map_err(|_| LoadError::UnknownNode(node.to_string()))?;
        Ok(self.resolver.resolve(&node.asset_key, quality))
    }
}
