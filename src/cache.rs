//! Bounded pool of resident panorama spheres.
//!
//! The cache is the only owner of sphere handles. Everyone else names
//! panoramas by node id and asks the cache for the handle when they need it.
//!
//! # Rules
//!
//! - At most `capacity` entries stay resident once an eviction pass is done.
//! - Eviction removes the least recently accessed entry first and never
//!   touches the pinned entry (the node on screen) or a held entry (the node
//!   an active transition is fading in).
//! - Concurrent acquires of the same key share one load.
//! - A failed load is reported to every waiter and is never retried here.
//!
//! All bookkeeping happens between suspension points: checking for an
//! in-flight load and registering a new one is a single synchronous step, so
//! cooperative tasks on the render loop cannot interleave there.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use futures::executor::LocalSpawner;
use futures::future::{self, Either, LocalBoxFuture, Ready, Shared};
use futures::task::LocalSpawnExt;
use futures::FutureExt;

use crate::assets::{AssetLocator, Quality};
use crate::config::{CacheConfig, FallbackConfig};
use crate::error::LoadError;
use crate::graph::NodeId;
use crate::renderer::{SphereHandle, SphereRenderer};
use crate::texture::fallback_panorama;

/// Outcome of an acquire.
pub type LoadResult = Result<SphereHandle, LoadError>;

type SharedLoad = Shared<LocalBoxFuture<'static, LoadResult>>;

/// Future returned by [`ResourceCache::acquire`].
///
/// Ready at once for resident keys; otherwise shared with every other
/// caller waiting on the same key.
pub type Acquire = Either<Ready<LoadResult>, SharedLoad>;

/// A resident panorama.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub handle: SphereHandle,
    pub quality: Quality,
    /// Access sequence number; lower is older.
    pub last_access: u64,
}

/// Counters for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Acquires answered from a resident entry.
    pub hits: u64,
    /// Acquires that joined an in-flight load.
    pub coalesced: u64,
    pub loads_started: u64,
    pub loads_failed: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<NodeId, CacheEntry>,
    in_flight: HashMap<NodeId, SharedLoad>,
    pinned: Option<NodeId>,
    held: HashSet<NodeId>,
    tick: u64,
    fallback: Option<SphereHandle>,
    closed: bool,
    stats: CacheStats,
}

impl CacheState {
    fn is_protected(&self, key: &str) -> bool {
        self.pinned.as_deref() == Some(key) || self.held.contains(key)
    }

    /// Oldest entry that may be evicted, optionally sparing one key.
    fn oldest_candidate(&self, spare: Option<&str>) -> Option<NodeId> {
        self.entries
            .iter()
            .filter(|(key, _)| !self.is_protected(key) && Some(key.as_str()) != spare)
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone())
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

struct CacheInner {
    config: CacheConfig,
    fallback_size: (u32, u32),
    renderer: Rc<dyn SphereRenderer>,
    locator: Rc<dyn AssetLocator>,
    spawner: LocalSpawner,
    state: RefCell<CacheState>,
}

impl CacheInner {
    /// Remove `key` and dispose its sphere. The entry is gone before the
    /// renderer is called.
    fn evict(&self, state: &mut CacheState, key: &str) -> bool {
        match state.entries.remove(key) {
            Some(entry) => {
                state.stats.evictions += 1;
                self.renderer.dispose(entry.handle);
                log::debug!("[cache] evicted '{}' ({} resident)", key, state.entries.len());
                true
            }
            None => false,
        }
    }

    fn evict_oldest(&self, state: &mut CacheState, spare: Option<&str>) -> bool {
        match state.oldest_candidate(spare) {
            Some(key) => self.evict(state, &key),
            None => false,
        }
    }

    /// Free a slot for a new load. In-flight loads count as occupied slots.
    /// Returns false if every slot is taken by something unevictable.
    fn make_room(&self, state: &mut CacheState) -> bool {
        while state.entries.len() + state.in_flight.len() >= self.config.capacity {
            if !self.evict_oldest(state, None) {
                log::debug!(
                    "[cache] nothing evictable, {} resident + {} loading",
                    state.entries.len(),
                    state.in_flight.len()
                );
                return false;
            }
        }
        true
    }

    /// Bring the resident count back under the limits after an admission.
    ///
    /// Older unprotected entries go first. If none are left, the admitted
    /// entry itself goes unless it is protected. Returns false if it went.
    fn enforce_limits(&self, state: &mut CacheState, admitted: &str) -> bool {
        let limit = self
            .config
            .pressure_threshold
            .unwrap_or(self.config.capacity)
            .min(self.config.capacity);
        while state.entries.len() > limit {
            if self.evict_oldest(state, Some(admitted)) {
                continue;
            }
            if state.is_protected(admitted) {
                log::warn!(
                    "[cache] {} protected entries exceed the limit of {}",
                    state.entries.len(),
                    limit
                );
                break;
            }
            log::debug!("[cache] no room for '{}', dropping it again", admitted);
            self.evict(state, admitted);
            return false;
        }
        true
    }

    fn finish_load(&self, key: &str, quality: Quality, result: LoadResult) -> LoadResult {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.in_flight.remove(key);

        match result {
            Ok(handle) if state.closed => {
                log::debug!("[cache] load for '{}' finished after shutdown", key);
                self.renderer.dispose(handle);
                Ok(handle)
            }
            Ok(handle) => {
                let entry = CacheEntry {
                    handle,
                    quality,
                    last_access: state.next_tick(),
                };
                if let Some(previous) = state.entries.insert(key.to_string(), entry) {
                    if previous.handle != handle {
                        self.renderer.dispose(previous.handle);
                    }
                }
                log::debug!(
                    "[cache] '{}' resident at {} ({} resident)",
                    key,
                    quality,
                    state.entries.len()
                );
                if self.enforce_limits(state, key) {
                    Ok(handle)
                } else {
                    Err(LoadError::NoRoom(key.to_string()))
                }
            }
            Err(error) => {
                state.stats.loads_failed += 1;
                log::warn!("[cache] load for '{}' failed: {}", key, error);
                Err(error)
            }
        }
    }

    fn dispose_all(&self, state: &mut CacheState) {
        for (_, entry) in state.entries.drain() {
            self.renderer.dispose(entry.handle);
        }
        if let Some(fallback) = state.fallback.take() {
            self.renderer.dispose(fallback);
        }
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        let mut state = std::mem::take(self.state.get_mut());
        self.dispose_all(&mut state);
    }
}

/// LRU cache of panorama spheres keyed by node id.
///
/// Cloning is cheap and yields another handle to the same cache.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Rc<CacheInner>,
}

impl ResourceCache {
    /// Create a cache whose loads run on `spawner`'s executor.
    pub fn new(
        config: CacheConfig,
        fallback: FallbackConfig,
        renderer: Rc<dyn SphereRenderer>,
        locator: Rc<dyn AssetLocator>,
        spawner: LocalSpawner,
    ) -> Self {
        Self {
            inner: Rc::new(CacheInner {
                config,
                fallback_size: (fallback.width, fallback.height),
                renderer,
                locator,
                spawner,
                state: RefCell::new(CacheState::default()),
            }),
        }
    }

    /// Get the sphere for `key`, loading it if needed.
    ///
    /// Resident keys resolve immediately. A key that is already loading
    /// joins that load. Otherwise room is made and a new load starts; it runs
    /// to completion on the executor even if every caller stops waiting.
    ///
    /// A load that lands when every other entry is protected is only kept if
    /// `key` is protected too; otherwise it resolves to
    /// [`LoadError::NoRoom`].
    pub fn acquire(&self, key: &str, quality: Quality) -> Acquire {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        let tick = state.next_tick();

        if let Some(entry) = state.entries.get_mut(key) {
            entry.last_access = tick;
            state.stats.hits += 1;
            log::trace!("[cache] hit '{}'", key);
            return Either::Left(future::ready(Ok(entry.handle)));
        }

        if let Some(load) = state.in_flight.get(key) {
            state.stats.coalesced += 1;
            log::trace!("[cache] joining in-flight load of '{}'", key);
            return Either::Right(load.clone());
        }

        if state.closed {
            return Either::Left(future::ready(Err(LoadError::Fetch {
                uri: key.to_string(),
                reason: "cache is shut down".into(),
            })));
        }

        self.inner.make_room(state);

        let load = self.start_load(key, quality).shared();
        state.in_flight.insert(key.to_string(), load.clone());
        state.stats.loads_started += 1;
        drop(guard);

        log::debug!("[cache] loading '{}' at {}", key, quality);
        if let Err(e) = self.inner.spawner.spawn_local(load.clone().map(|_| ())) {
            log::warn!("[cache] executor unavailable, '{}' loads only while awaited: {}", key, e);
        }
        Either::Right(load)
    }

    /// Start loading `key` in the background if it can be kept.
    ///
    /// Unlike [`acquire`](Self::acquire), no load starts when every slot is
    /// taken by protected entries or other loads; `None` is returned instead.
    /// Resident and in-flight keys behave as in `acquire`.
    pub fn prefetch(&self, key: &str, quality: Quality) -> Option<Acquire> {
        {
            let mut guard = self.inner.state.borrow_mut();
            let state = &mut *guard;
            let known = state.entries.contains_key(key) || state.in_flight.contains_key(key);
            if !known && !state.closed && !self.inner.make_room(state) {
                log::debug!("[cache] skipping prefetch of '{}', cache is full", key);
                return None;
            }
        }
        Some(self.acquire(key, quality))
    }

    fn start_load(&self, key: &str, quality: Quality) -> LocalBoxFuture<'static, LoadResult> {
        let cache: Weak<CacheInner> = Rc::downgrade(&self.inner);
        let renderer = Rc::clone(&self.inner.renderer);
        let locator = Rc::clone(&self.inner.locator);
        let key = key.to_string();

        async move {
            let result = match locator.locate(&key, quality) {
                Ok(uri) => renderer.create_sphere(&uri, quality).await,
                Err(error) => Err(error),
            };
            match cache.upgrade() {
                Some(cache) => cache.finish_load(&key, quality, result),
                None => {
                    if let Ok(handle) = &result {
                        renderer.dispose(*handle);
                    }
                    result
                }
            }
        }
        .boxed_local()
    }

    /// True if `key` has a resident entry.
    pub fn is_resident(&self, key: &str) -> bool {
        self.inner.state.borrow().entries.contains_key(key)
    }

    /// True if a load for `key` is outstanding.
    pub fn is_loading(&self, key: &str) -> bool {
        self.inner.state.borrow().in_flight.contains_key(key)
    }

    pub fn resident_count(&self) -> usize {
        self.inner.state.borrow().entries.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.state.borrow().in_flight.len()
    }

    /// Resident keys, sorted.
    pub fn resident_keys(&self) -> Vec<NodeId> {
        let mut keys: Vec<_> = self.inner.state.borrow().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Sphere of a resident key, without counting as an access.
    pub fn handle(&self, key: &str) -> Option<SphereHandle> {
        self.entry(key).map(|entry| entry.handle)
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.inner.state.borrow().entries.get(key).copied()
    }

    /// Exempt `key` from eviction, replacing any previous pin.
    ///
    /// The key does not have to be resident yet; the pin applies as soon as
    /// it is admitted.
    pub fn pin(&self, key: &str) {
        let mut state = self.inner.state.borrow_mut();
        if state.pinned.as_deref() != Some(key) {
            log::trace!("[cache] pin '{}' (was {:?})", key, state.pinned);
            state.pinned = Some(key.to_string());
        }
    }

    /// Remove the pin from `key`. Pins on other keys are left alone.
    pub fn unpin(&self, key: &str) {
        let mut state = self.inner.state.borrow_mut();
        if state.pinned.as_deref() == Some(key) {
            state.pinned = None;
        }
    }

    pub fn pinned(&self) -> Option<NodeId> {
        self.inner.state.borrow().pinned.clone()
    }

    /// Protect `key` from eviction while a transition shows it.
    pub fn hold(&self, key: &str) {
        self.inner.state.borrow_mut().held.insert(key.to_string());
    }

    pub fn release_hold(&self, key: &str) {
        self.inner.state.borrow_mut().held.remove(key);
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.inner.state.borrow().held.contains(key)
    }

    /// Evict `key` now. Refuses pinned and held keys.
    pub fn release(&self, key: &str) -> bool {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        if state.is_protected(key) {
            log::debug!("[cache] refusing to release protected '{}'", key);
            return false;
        }
        self.inner.evict(state, key)
    }

    /// Evict up to `count` of the oldest unprotected entries.
    pub fn evict_oldest(&self, count: usize) -> usize {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        (0..count)
            .take_while(|_| self.inner.evict_oldest(state, None))
            .count()
    }

    /// Evict every unprotected entry whose key is not in `keep`.
    pub fn retain_only<S: AsRef<str>>(&self, keep: &[S]) -> Vec<NodeId> {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        let mut doomed: Vec<NodeId> = state
            .entries
            .keys()
            .filter(|key| !state.is_protected(key) && !keep.iter().any(|k| k.as_ref() == key.as_str()))
            .cloned()
            .collect();
        doomed.sort();
        for key in &doomed {
            self.inner.evict(state, key);
        }
        doomed
    }

    /// Evict oldest-first until at most `count` entries remain.
    ///
    /// Hosts call this on platform memory warnings. Protected entries stay,
    /// so the result can be above `count`.
    pub fn trim_to(&self, count: usize) -> usize {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        let mut evicted = 0;
        while state.entries.len() > count && self.inner.evict_oldest(state, None) {
            evicted += 1;
        }
        if evicted > 0 {
            log::info!("[cache] trimmed {} entries under memory pressure", evicted);
        }
        evicted
    }

    /// Check that `key`'s sphere still exists.
    ///
    /// An entry whose resource the platform destroyed on its own is dropped
    /// without a dispose call, so the next acquire reloads it.
    pub fn validate(&self, key: &str) -> bool {
        let mut state = self.inner.state.borrow_mut();
        let Some(entry) = state.entries.get(key).copied() else {
            return false;
        };
        if self.inner.renderer.is_alive(entry.handle) {
            return true;
        }
        log::warn!("[cache] '{}' lost its sphere, dropping entry", key);
        state.entries.remove(key);
        false
    }

    /// The shared fallback sphere, created on first use.
    ///
    /// It is not an entry: it never counts toward capacity and is never
    /// evicted. It is recreated if the platform destroyed it.
    pub fn fallback_handle(&self) -> SphereHandle {
        if let Some(handle) = self.existing_fallback() {
            if self.inner.renderer.is_alive(handle) {
                return handle;
            }
        }
        let (width, height) = self.inner.fallback_size;
        let handle = self
            .inner
            .renderer
            .create_sphere_from_image(&fallback_panorama(width, height));
        log::debug!("[cache] created fallback sphere {:?}", handle);
        self.inner.state.borrow_mut().fallback = Some(handle);
        handle
    }

    /// The fallback sphere if it was ever created.
    pub fn existing_fallback(&self) -> Option<SphereHandle> {
        self.inner.state.borrow().fallback
    }

    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.state.borrow().stats
    }

    /// Dispose every resident sphere and the fallback.
    ///
    /// Loads still in flight finish and dispose their result immediately.
    pub fn shutdown(&self) {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        state.closed = true;
        state.pinned = None;
        state.held.clear();
        let count = state.entries.len();
        self.inner.dispose_all(state);
        log::info!("[cache] shut down, released {} spheres", count);
    }
}
