//! Planned versus committed arm states.
//!
//! A session owns two fully independent arm solutions: `planned` solves
//! live against whatever target the user drags around, while `committed`
//! holds the last plan the user confirmed. Committing copies the planned
//! joint vector across and hands it back to the caller, who may forward it
//! to a physical arm over any transport (the wire format is just the
//! angles in radians, in node insertion order). The session also drives
//! keyframe animation playback into the planned solution.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::animation::{Animation, AnimationToken, Animator};
use crate::arm_solution::ArmSolution;
use crate::solver_error::SolverError;

/// A reproducible posture: the joint vector together with the target it
/// was solved against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Joint angles in radians, in node insertion order.
    pub plan: Vec<f64>,
    pub target: Vector3<f64>,
}

/// The planning session: the live solution, the committed solution and the
/// animation playback between them.
pub struct PlanningSession {
    pub planned: ArmSolution,
    pub committed: ArmSolution,
    initial_thetas: Vec<f64>,
    initial_target: Vector3<f64>,
    animator: Animator,
}

impl PlanningSession {
    /// Builds both solutions with the default arm and snapshots the
    /// initial posture for later resets.
    pub fn new() -> Result<Self, SolverError> {
        let planned = ArmSolution::new(None)?;
        let committed = ArmSolution::new(None)?;
        let initial_thetas = planned.serialize();
        let initial_target = planned
            .targets()
            .first()
            .copied()
            .unwrap_or_else(Vector3::zeros);
        Ok(PlanningSession {
            planned,
            committed,
            initial_thetas,
            initial_target,
            animator: Animator::new(),
        })
    }

    /// One live solving tick of the planned solution.
    pub fn update(&mut self) -> Result<(), SolverError> {
        self.planned.update()
    }

    /// Snapshot of the planned solution as a plan.
    pub fn plan(&self) -> Plan {
        Plan {
            plan: self.planned.serialize(),
            target: self
                .planned
                .targets()
                .first()
                .copied()
                .unwrap_or_else(Vector3::zeros),
        }
    }

    /// Restores the planned solution onto the given plan: joint angles and
    /// the target, no solving involved.
    pub fn load_plan(&mut self, plan: &Plan) -> Result<(), SolverError> {
        self.planned.apply_solution(&plan.plan)?;
        self.planned.set_target(0, plan.target)
    }

    /// Copies the planned joint vector into the committed solution and
    /// returns it for forwarding downstream.
    pub fn commit_plan(&mut self) -> Result<Vec<f64>, SolverError> {
        let thetas = self.planned.serialize();
        self.committed.apply_solution(&thetas)?;
        Ok(thetas)
    }

    /// Restores the joint angles captured at construction, optionally also
    /// the initial target. Does not cancel a running animation.
    pub fn reset_to_initial(&mut self, also_reset_target: bool) -> Result<(), SolverError> {
        let thetas = self.initial_thetas.clone();
        self.planned.apply_solution(&thetas)?;
        if also_reset_target {
            self.planned.set_target(0, self.initial_target)?;
        }
        Ok(())
    }

    /// Replaces any running animation with this one, started at the given
    /// clock reading.
    pub fn start_animation(&mut self, animation: Animation, now: f64) -> AnimationToken {
        self.animator.start(animation, now)
    }

    pub fn cancel_animation(&mut self) {
        self.animator.cancel();
    }

    pub fn animation_active(&self) -> bool {
        self.animator.is_active()
    }

    /// Advances animation playback to the given clock reading, applying
    /// crossed keyframe plans and the interpolated target to the planned
    /// solution. The host calls this once per rendered frame.
    pub fn tick(&mut self, now: f64) -> Result<(), SolverError> {
        let commands = self.animator.tick(now);
        for plan in &commands.plans {
            self.load_plan(plan)?;
        }
        if let Some(target) = commands.target {
            self.planned.set_target(0, target)?;
        }
        Ok(())
    }
}
