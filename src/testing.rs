//! Test doubles shared by the unit tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use futures::FutureExt;
use futures::channel::oneshot;
use image::RgbaImage;

use crate::assets::{AssetLocator, Quality};
use crate::error::LoadError;
use crate::graph::{LinkSource, MapPosition, NodeGraph, NodeSource};
use crate::renderer::{SphereFuture, SphereHandle, SphereRenderer};

pub(crate) const FALLBACK_URI: &str = "<fallback>";

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FakeSphere {
    pub uri: String,
    pub opacity: f32,
    pub enabled: bool,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    manual: bool,
    failing: HashSet<String>,
    spheres: HashMap<SphereHandle, FakeSphere>,
    disposed: Vec<SphereHandle>,
    loads: Vec<(String, Quality)>,
    pending: Vec<(String, oneshot::Sender<()>)>,
}

impl FakeState {
    fn finish(&mut self, uri: &str) -> Result<SphereHandle, LoadError> {
        if self.failing.contains(uri) {
            return Err(LoadError::Fetch {
                uri: uri.to_string(),
                reason: "simulated failure".into(),
            });
        }
        Ok(self.insert(uri))
    }

    fn insert(&mut self, uri: &str) -> SphereHandle {
        self.next_id += 1;
        let handle = SphereHandle::new(self.next_id);
        self.spheres.insert(
            handle,
            FakeSphere {
                uri: uri.to_string(),
                opacity: 1.0,
                enabled: false,
            },
        );
        handle
    }
}

/// In-memory renderer whose loads either resolve on first poll or wait
/// for [`FakeRenderer::complete`].
#[derive(Default)]
pub(crate) struct FakeRenderer {
    state: Rc<RefCell<FakeState>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold new loads until completed explicitly.
    pub fn set_manual(&self, manual: bool) {
        self.state.borrow_mut().manual = manual;
    }

    pub fn fail_uri(&self, uri: &str) {
        self.state.borrow_mut().failing.insert(uri.to_string());
    }

    pub fn heal_uri(&self, uri: &str) {
        self.state.borrow_mut().failing.remove(uri);
    }

    /// Release every held load of `uri`. Returns how many were waiting.
    pub fn complete(&self, uri: &str) -> usize {
        let senders: Vec<_> = {
            let mut state = self.state.borrow_mut();
            let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|(pending, _)| pending == uri);
            state.pending = rest;
            matching
        };
        let count = senders.len();
        for (_, tx) in senders {
            let _ = tx.send(());
        }
        count
    }

    /// Drop every held load without resolving it, as a suspended runtime would.
    pub fn abandon_pending(&self) {
        self.state.borrow_mut().pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn load_count(&self, uri: &str) -> usize {
        self.state.borrow().loads.iter().filter(|(u, _)| u == uri).count()
    }

    pub fn last_quality(&self, uri: &str) -> Option<Quality> {
        self.state
            .borrow()
            .loads
            .iter()
            .rev()
            .find(|(u, _)| u == uri)
            .map(|(_, q)| *q)
    }

    pub fn total_loads(&self) -> usize {
        self.state.borrow().loads.len()
    }

    pub fn is_disposed(&self, handle: SphereHandle) -> bool {
        self.state.borrow().disposed.contains(&handle)
    }

    pub fn disposed_count(&self) -> usize {
        self.state.borrow().disposed.len()
    }

    /// Destroy a sphere behind the engine's back.
    pub fn forget(&self, handle: SphereHandle) {
        self.state.borrow_mut().spheres.remove(&handle);
    }

    /// Destroy every sphere behind the engine's back.
    pub fn forget_all(&self) {
        self.state.borrow_mut().spheres.clear();
    }

    pub fn live_count(&self) -> usize {
        self.state.borrow().spheres.len()
    }

    pub fn sphere(&self, handle: SphereHandle) -> Option<FakeSphere> {
        self.state.borrow().spheres.get(&handle).cloned()
    }

    /// URIs of enabled spheres with non-zero opacity, sorted.
    pub fn visible_uris(&self) -> Vec<String> {
        let mut uris: Vec<_> = self
            .state
            .borrow()
            .spheres
            .values()
            .filter(|sphere| sphere.enabled && sphere.opacity > 0.0)
            .map(|sphere| sphere.uri.clone())
            .collect();
        uris.sort();
        uris
    }
}

impl SphereRenderer for FakeRenderer {
    fn create_sphere(&self, uri: &str, quality: Quality) -> SphereFuture {
        let state = Rc::clone(&self.state);
        let uri = uri.to_string();
        let waiter = {
            let mut s = self.state.borrow_mut();
            s.loads.push((uri.clone(), quality));
            if s.manual {
                let (tx, rx) = oneshot::channel();
                s.pending.push((uri.clone(), tx));
                Some(rx)
            } else {
                None
            }
        };

        async move {
            if let Some(rx) = waiter {
                rx.await.map_err(|_| LoadError::Fetch {
                    uri: uri.clone(),
                    reason: "request abandoned".into(),
                })?;
            }
            state.borrow_mut().finish(&uri)
        }
        .boxed_local()
    }

    fn create_sphere_from_image(&self, _image: &RgbaImage) -> SphereHandle {
        self.state.borrow_mut().insert(FALLBACK_URI)
    }

    fn set_opacity(&self, handle: SphereHandle, opacity: f32) {
        if let Some(sphere) = self.state.borrow_mut().spheres.get_mut(&handle) {
            sphere.opacity = opacity;
        }
    }

    fn set_enabled(&self, handle: SphereHandle, enabled: bool) {
        if let Some(sphere) = self.state.borrow_mut().spheres.get_mut(&handle) {
            sphere.enabled = enabled;
        }
    }

    fn dispose(&self, handle: SphereHandle) {
        let mut state = self.state.borrow_mut();
        if state.spheres.remove(&handle).is_some() {
            state.disposed.push(handle);
        }
    }

    fn is_alive(&self, handle: SphereHandle) -> bool {
        self.state.borrow().spheres.contains_key(&handle)
    }
}

/// Locator that uses the node id as the URI. Empty ids are unknown.
pub(crate) struct IdentityLocator;

impl AssetLocator for IdentityLocator {
    fn locate(&self, node: &str, _quality: Quality) -> Result<String, LoadError> {
        if node.is_empty() {
            Err(LoadError::UnknownNode(node.to_string()))
        } else {
            Ok(node.to_string())
        }
    }
}

/// Resolver that uses the asset key as the URI.
pub(crate) fn key_as_uri(key: &str, _quality: Quality) -> String {
    key.to_string()
}

/// Build a graph from `(id, targets)` pairs. Asset keys equal node ids and
/// the n-th link of a node sits at a bearing of `n * 90` degrees.
pub(crate) fn graph(edges: &[(&str, &[&str])]) -> NodeGraph {
    let source: BTreeMap<String, NodeSource> = edges
        .iter()
        .map(|(id, targets)| {
            let links = targets
                .iter()
                .enumerate()
                .map(|(i, to)| LinkSource {
                    to: to.to_string(),
                    yaw: i as f32 * 90.0,
                    pitch: 0.0,
                    label: None,
                })
                .collect();
            let node = NodeSource {
                label: id.to_uppercase(),
                asset_key: id.to_string(),
                links,
                map_position: MapPosition::default(),
                floor: String::new(),
            };
            (id.to_string(), node)
        })
        .collect();
    NodeGraph::from_source(source).expect("fixture graph is valid")
}
