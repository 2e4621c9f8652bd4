//! Easing and the crossfade/rotation timeline of a node transition.

use serde::{Deserialize, Serialize};

use crate::camera::ViewOrientation;
use crate::config::TransitionConfig;

/// Curve shared by the crossfade and the camera sweep.
///
/// Configured as `"linear"`, `"easeIn"`, `"easeOut"` or `"easeInOut"`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Easing {
    Linear,
    /// Lingers on the old panorama.
    EaseIn,
    /// Reaches the new panorama early, then settles.
    EaseOut,
    /// Quadratic in, quadratic out.
    #[default]
    EaseInOut,
}

impl Easing {
    /// Map linear progress to eased progress. Input outside 0..=1 is clamped.
    pub fn apply(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::Linear => t,
            Easing::EaseIn => t * t,
            Easing::EaseOut => t * (2.0 - t),
            Easing::EaseInOut if t < 0.5 => 2.0 * t * t,
            Easing::EaseInOut => {
                let rest = 1.0 - t;
                1.0 - 2.0 * rest * rest
            }
        }
    }
}

/// State of a transition at one instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransitionFrame {
    /// Opacity of the sphere being left.
    pub outgoing_opacity: f32,
    /// Opacity of the sphere being entered.
    pub incoming_opacity: f32,
    /// Camera orientation for this frame.
    pub orientation: ViewOrientation,
    /// Linear crossfade progress (0.0 to 1.0).
    pub progress: f32,
    /// True on the crossfade's final frame.
    pub finished: bool,
}

/// Time-based crossfade paired with a shorter camera sweep.
///
/// Both run off the same easing curve. The sweep finishes after
/// `rotation_fraction` of the crossfade and then holds its target.
#[derive(Clone, Debug)]
pub struct TransitionTimeline {
    start_time: f64,
    duration: f32,
    rotation_duration: f32,
    easing: Easing,
    from: ViewOrientation,
    to: ViewOrientation,
}

impl TransitionTimeline {
    pub fn new(
        config: &TransitionConfig,
        start_time: f64,
        from: ViewOrientation,
        to: ViewOrientation,
    ) -> Self {
        Self {
            start_time,
            duration: config.duration,
            rotation_duration: config.rotation_duration(),
            easing: config.easing,
            from,
            to,
        }
    }

    /// Sample the timeline at clock time `now`.
    pub fn sample(&self, now: f64) -> TransitionFrame {
        // Only the small elapsed span is narrowed to f32
        let elapsed = (now - self.start_time).max(0.0) as f32;

        let progress = ratio(elapsed, self.duration);
        let fade = self.easing.apply(progress);
        let turn = self.easing.apply(ratio(elapsed, self.rotation_duration));

        let finished = progress >= 1.0;
        TransitionFrame {
            outgoing_opacity: if finished { 0.0 } else { 1.0 - fade },
            incoming_opacity: if finished { 1.0 } else { fade },
            orientation: if finished {
                self.to
            } else {
                self.from.lerp_toward(&self.to, turn)
            },
            progress,
            finished,
        }
    }

    pub fn target(&self) -> ViewOrientation {
        self.to
    }
}

fn ratio(elapsed: f32, duration: f32) -> f32 {
    if duration <= 0.0 {
        1.0
    } else {
        (elapsed / duration).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn timeline(easing: Easing) -> TransitionTimeline {
        let config = TransitionConfig {
            duration: 1.0,
            rotation_fraction: 0.7,
            easing,
        };
        TransitionTimeline::new(
            &config,
            10.0,
            ViewOrientation::from_degrees(170.0, 0.0),
            ViewOrientation::from_degrees(-170.0, 0.0),
        )
    }

    #[test]
    fn easing_endpoints() {
        for easing in [Easing::Linear, Easing::EaseIn, Easing::EaseOut, Easing::EaseInOut] {
            assert_eq!(easing.apply(0.0), 0.0);
            assert_eq!(easing.apply(1.0), 1.0);
            assert_eq!(easing.apply(2.0), 1.0);
        }
        assert!(approx(Easing::EaseInOut.apply(0.5), 0.5));
    }

    #[test]
    fn opacities_mirror_each_other() {
        let timeline = timeline(Easing::EaseInOut);
        for step in 0..=10_i32 {
            let frame = timeline.sample(10.0 + f64::from(step) * 0.1);
            assert!(approx(frame.outgoing_opacity + frame.incoming_opacity, 1.0));
        }
    }

    #[test]
    fn starts_on_old_view_and_ends_on_new() {
        let timeline = timeline(Easing::Linear);
        let first = timeline.sample(10.0);
        assert_eq!(first.incoming_opacity, 0.0);
        assert_eq!(first.outgoing_opacity, 1.0);
        assert!(!first.finished);

        let last = timeline.sample(11.0);
        assert!(last.finished);
        assert_eq!(last.incoming_opacity, 1.0);
        assert_eq!(last.orientation, timeline.target());
    }

    #[test]
    fn rotation_completes_before_crossfade() {
        let timeline = timeline(Easing::Linear);
        let frame = timeline.sample(10.75);
        assert!(!frame.finished);
        assert!(approx(frame.orientation.yaw, timeline.target().yaw));
        assert!(frame.incoming_opacity < 1.0);
    }

    #[test]
    fn rotation_takes_the_short_way() {
        let timeline = timeline(Easing::Linear);
        // Halfway through the sweep the view faces straight back, not forward
        let frame = timeline.sample(10.35);
        assert!(frame.orientation.yaw.abs() > 170f32.to_radians());
    }

    #[test]
    fn long_running_clock_still_finishes() {
        let config = TransitionConfig {
            duration: 1.0,
            rotation_fraction: 0.7,
            easing: Easing::EaseInOut,
        };
        let start = 518_400.0;
        let timeline = TransitionTimeline::new(
            &config,
            start,
            ViewOrientation::default(),
            ViewOrientation::from_degrees(90.0, 0.0),
        );
        let halfway = timeline.sample(start + 0.5);
        assert!(approx(halfway.progress, 0.5));
        assert!(!halfway.finished);
        assert!(timeline.sample(start + 1.0).finished);
    }

    #[test]
    fn samples_before_start_are_clamped() {
        let frame = timeline(Easing::EaseIn).sample(0.0);
        assert_eq!(frame.progress, 0.0);
    }
}
