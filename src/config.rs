//! Tunable inputs for caching, transitions and session recovery.
//!
//! Every value has a sensible default so a host can start from
//! `TourConfig::default()` and override only what its device class needs.
//! Configs can also be read from JSON:
//!
//! ```
//! use panodome::TourConfig;
//!
//! let config = TourConfig::from_json(r#"{
//!     "startNode": "lobby",
//!     "cache": { "capacity": 4, "pressureThreshold": 3 },
//!     "transition": { "duration": 0.6 }
//! }"#).unwrap();
//!
//! assert_eq!(config.cache.capacity, 4);
//! assert_eq!(config.transition.rotation_fraction, 0.7);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::navigation::Easing;

/// Bounds for the resident panorama pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Maximum number of resident panoramas.
    pub capacity: usize,
    /// When set, every admission trims residents down to this count,
    /// oldest first, without waiting for the pool to fill.
    pub pressure_threshold: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            pressure_threshold: None,
        }
    }
}

impl CacheConfig {
    /// Set the resident capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Enable proactive trimming down to `threshold` residents.
    pub fn pressure_threshold(mut self, threshold: usize) -> Self {
        self.pressure_threshold = Some(threshold);
        self
    }
}

/// Timing of the crossfade and camera sweep between two nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransitionConfig {
    /// Crossfade duration in seconds.
    pub duration: f32,
    /// Fraction of `duration` over which the camera rotates.
    pub rotation_fraction: f32,
    /// Curve shared by the crossfade and the rotation.
    pub easing: Easing,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            duration: 1.0,
            rotation_fraction: 0.7,
            easing: Easing::EaseInOut,
        }
    }
}

impl TransitionConfig {
    /// Camera rotation duration in seconds.
    pub fn rotation_duration(&self) -> f32 {
        self.duration * self.rotation_fraction
    }
}

/// Session recovery timing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Seconds a transition may stay locked after a session change before
    /// the lock is forcibly cleared.
    pub stuck_lock_grace: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stuck_lock_grace: 1.0,
        }
    }
}

/// Size of the procedural panorama shown when a load fails.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 256,
        }
    }
}

/// Top-level configuration for a [`Tour`](crate::Tour).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TourConfig {
    /// Node to start at. Defaults to the first node id in sorted order.
    pub start_node: Option<String>,
    pub cache: CacheConfig,
    pub transition: TransitionConfig,
    /// Seconds an acquire may stay pending before the loading indicator shows.
    pub loading_indicator_delay: f32,
    pub session: SessionConfig,
    /// Seconds of task work per frame above which a stall is reported.
    pub frame_budget: f32,
    pub fallback: FallbackConfig,
}

impl Default for TourConfig {
    fn default() -> Self {
        Self {
            start_node: None,
            cache: CacheConfig::default(),
            transition: TransitionConfig::default(),
            loading_indicator_delay: 0.2,
            session: SessionConfig::default(),
            frame_budget: 2.0 / 60.0,
            fallback: FallbackConfig::default(),
        }
    }
}

impl TourConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the start node.
    pub fn start_node(mut self, id: impl Into<String>) -> Self {
        self.start_node = Some(id.into());
        self
    }

    /// Replace the cache settings.
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set the crossfade duration in seconds.
    pub fn transition_duration(mut self, seconds: f32) -> Self {
        self.transition.duration = seconds;
        self
    }

    /// Set the easing used by transitions.
    pub fn easing(mut self, easing: Easing) -> Self {
        self.transition.easing = easing;
        self
    }

    /// Set the loading indicator delay in seconds.
    pub fn loading_indicator_delay(mut self, seconds: f32) -> Self {
        self.loading_indicator_delay = seconds;
        self
    }

    /// Set the stuck-lock grace period in seconds.
    pub fn stuck_lock_grace(mut self, seconds: f32) -> Self {
        self.session.stuck_lock_grace = seconds;
        self
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.capacity < 2 {
            return Err(invalid(
                "cache.capacity",
                "must hold at least the current node and one other",
            ));
        }
        if let Some(threshold) = self.cache.pressure_threshold {
            if threshold == 0 || threshold > self.cache.capacity {
                return Err(invalid(
                    "cache.pressureThreshold",
                    format!("must be within 1..={}", self.cache.capacity),
                ));
            }
        }
        positive("transition.duration", self.transition.duration)?;
        let fraction = self.transition.rotation_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(invalid("transition.rotationFraction", "must be in (0, 1]"));
        }
        non_negative("loadingIndicatorDelay", self.loading_indicator_delay)?;
        non_negative("session.stuckLockGrace", self.session.stuck_lock_grace)?;
        positive("frameBudget", self.frame_budget)?;
        if self.fallback.width == 0 || self.fallback.height == 0 {
            return Err(invalid("fallback", "dimensions must be non-zero"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("expected a positive number, got {value}")))
    }
}

fn non_negative(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("expected a non-negative number, got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TourConfig::default();
        config.validate().unwrap();
        assert_eq!(config.cache.capacity, 8);
        assert_eq!(config.transition.duration, 1.0);
        assert!((config.transition.rotation_duration() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn json_overrides_merge_with_defaults() {
        let config = TourConfig::from_json(
            r#"{ "cache": { "capacity": 3 }, "transition": { "easing": "linear" } }"#,
        )
        .unwrap();
        assert_eq!(config.cache.capacity, 3);
        assert_eq!(config.cache.pressure_threshold, None);
        assert_eq!(config.transition.easing, Easing::Linear);
        assert_eq!(config.loading_indicator_delay, 0.2);
    }

    #[test]
    fn rejects_tiny_capacity() {
        let err = TourConfig::default()
            .cache(CacheConfig::default().capacity(1))
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "cache.capacity", .. }));
    }

    #[test]
    fn rejects_threshold_above_capacity() {
        let config =
            TourConfig::default().cache(CacheConfig::default().capacity(4).pressure_threshold(5));
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_duration() {
        assert!(TourConfig::default().transition_duration(0.0).validate().is_err());
        assert!(TourConfig::default().transition_duration(f32::NAN).validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            TourConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
