//! Keyframe animation of plans.
//!
//! An animation is an ordered list of keyframes, each pairing a dwell
//! interval with a plan. Playback is pull based: the host calls
//! [`crate::session::PlanningSession::tick`] with its monotonic clock on
//! every frame, and the animator answers with the plans whose intervals
//! have elapsed plus the interpolated target to write into the live
//! session. Starting a new animation invalidates the previous one through
//! a monotonically increasing token; a stale playback aborts itself on the
//! next tick.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::session::Plan;

/// One animation step: hold `interval` seconds, then move on, applying
/// the plan on the way out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Dwell time of this frame, seconds.
    pub interval: f64,
    pub plan: Plan,
}

/// An ordered keyframe list with an optional loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Animation {
    pub frames: Vec<Keyframe>,
    pub looped: bool,
}

/// Identifies one playback; compared against the animator's current token
/// so a superseded playback cancels itself silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationToken(u64);

/// What one tick asks the owning session to do.
#[derive(Debug, Clone, Default)]
pub struct TickCommands {
    /// Plans of the frames whose intervals elapsed, oldest first.
    pub plans: Vec<Plan>,

    /// Interpolated target to write into the live session, when playback
    /// stands between two frames.
    pub target: Option<Vector3<f64>>,
}

struct Playback {
    animation: Animation,
    token: AnimationToken,
    start_time: f64,
    elapsed_sum: f64,
    current_frame: usize,
}

/// Drives at most one playback at a time.
#[derive(Default)]
pub struct Animator {
    playback: Option<Playback>,
    counter: u64,
}

impl Animator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any running playback with this animation, starting at the
    /// given clock reading. The returned token stays valid until the next
    /// start or cancel.
    pub fn start(&mut self, animation: Animation, now: f64) -> AnimationToken {
        self.counter += 1;
        let token = AnimationToken(self.counter);
        self.playback = Some(Playback {
            animation,
            token,
            start_time: now,
            elapsed_sum: 0.0,
            current_frame: 0,
        });
        token
    }

    /// Invalidates the current playback, if any.
    pub fn cancel(&mut self) {
        self.counter += 1;
        self.playback = None;
    }

    pub fn is_active(&self) -> bool {
        self.playback.is_some()
    }

    /// Token of the playback currently considered live.
    pub fn current_token(&self) -> AnimationToken {
        AnimationToken(self.counter)
    }

    /// Advances playback to the given clock reading and reports what the
    /// session should apply. A playback whose token no longer matches
    /// aborts itself here.
    pub fn tick(&mut self, now: f64) -> TickCommands {
        let mut commands = TickCommands::default();
        let Some(playback) = self.playback.as_mut() else {
            return commands;
        };
        if playback.token != AnimationToken(self.counter) {
            self.playback = None;
            return commands;
        }
        let frame_count = playback.animation.frames.len();
        if frame_count == 0 {
            self.playback = None;
            return commands;
        }

        let since_start = now - playback.start_time;
        while playback.current_frame < frame_count {
            let interval = playback.animation.frames[playback.current_frame].interval;
            if playback.elapsed_sum + interval < since_start {
                playback.elapsed_sum += interval;
                commands
                    .plans
                    .push(playback.animation.frames[playback.current_frame].plan.clone());
                playback.current_frame += 1;
            } else {
                break;
            }
        }

        if playback.current_frame + 1 < frame_count {
            let frame = &playback.animation.frames[playback.current_frame];
            let next = &playback.animation.frames[playback.current_frame + 1];
            // Completion deliberately scales the elapsed sum by the
            // interval before subtracting.
            let frame_completion = since_start - playback.elapsed_sum / frame.interval;
            commands.target = Some(frame.plan.target.lerp(&next.plan.target, frame_completion));
        } else if playback.animation.looped {
            playback.start_time = now;
            playback.elapsed_sum = 0.0;
            playback.current_frame = 0;
        } else if playback.current_frame >= frame_count {
            self.playback = None;
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_at(target: Vector3<f64>) -> Plan {
        Plan {
            plan: vec![0.0; 5],
            target,
        }
    }

    fn two_frame_loop() -> Animation {
        Animation {
            frames: vec![
                Keyframe {
                    interval: 1.0,
                    plan: plan_at(Vector3::new(0.0, 6.0, 0.0)),
                },
                Keyframe {
                    interval: 1.0,
                    plan: plan_at(Vector3::new(3.0, 2.0, 0.0)),
                },
            ],
            looped: true,
        }
    }

    #[test]
    fn test_midpoint_interpolation() {
        let mut animator = Animator::new();
        animator.start(two_frame_loop(), 0.0);
        let commands = animator.tick(0.5);
        let target = commands.target.unwrap();
        assert!((target - Vector3::new(1.5, 4.0, 0.0)).norm() < 1e-9);
        assert!(commands.plans.is_empty());
    }

    #[test]
    fn test_crossing_a_frame_applies_its_plan() {
        let mut animator = Animator::new();
        animator.start(two_frame_loop(), 0.0);
        let commands = animator.tick(1.25);
        assert_eq!(commands.plans.len(), 1);
        assert_eq!(commands.plans[0].target, Vector3::new(0.0, 6.0, 0.0));
    }

    #[test]
    fn test_loop_restarts_at_frame_zero() {
        let mut animator = Animator::new();
        animator.start(two_frame_loop(), 0.0);
        animator.tick(1.25);
        // The second frame has no successor, so the loop wrapped; the
        // next tick interpolates from frame zero again.
        let commands = animator.tick(1.35);
        let target = commands.target.unwrap();
        let expected = Vector3::new(0.0, 6.0, 0.0)
            .lerp(&Vector3::new(3.0, 2.0, 0.0), 1.35 - 1.25);
        assert!((target - expected).norm() < 1e-9);
        assert!(animator.is_active());
    }

    #[test]
    fn test_unlooped_animation_finishes() {
        let mut animator = Animator::new();
        let mut animation = two_frame_loop();
        animation.looped = false;
        animator.start(animation, 0.0);
        animator.tick(1.5);
        assert!(animator.is_active());
        let commands = animator.tick(2.5);
        assert_eq!(commands.plans.len(), 1);
        assert!(!animator.is_active());
    }

    #[test]
    fn test_restart_invalidates_previous_token() {
        let mut animator = Animator::new();
        let first = animator.start(two_frame_loop(), 0.0);
        let second = animator.start(two_frame_loop(), 5.0);
        assert_ne!(first, second);
        assert_eq!(animator.current_token(), second);
    }

    #[test]
    fn test_cancel_stops_playback() {
        let mut animator = Animator::new();
        animator.start(two_frame_loop(), 0.0);
        animator.cancel();
        assert!(!animator.is_active());
        let commands = animator.tick(0.5);
        assert!(commands.plans.is_empty());
        assert!(commands.target.is_none());
    }

    #[test]
    fn test_empty_animation_is_dropped() {
        let mut animator = Animator::new();
        animator.start(
            Animation {
                frames: vec![],
                looped: true,
            },
            0.0,
        );
        animator.tick(0.1);
        assert!(!animator.is_active());
    }
}
