//! A single node of the kinematic tree: a revolute joint or an end effector.

use nalgebra::Vector3;

/// Distinguishes moving joints from the terminal points the solver drives
/// towards targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// A revolute joint with one rotational degree of freedom.
    Joint,
    /// A terminal point; carries no degree of freedom and has no children.
    Effector,
}

/// One revolute joint or end effector of the arm.
///
/// The attachment offset and the rotation axis are fixed at construction.
/// The world-space fields (`position`, `world_axis`, `relative_position`)
/// are outputs of the forward kinematics pass and are only meaningful after
/// [`crate::kinematic_tree::KinematicTree::compute`] has run.
#[derive(Debug, Clone)]
pub struct ArmNode {
    pub purpose: Purpose,

    /// Attachment offset relative to the parent node, in the parent frame.
    /// For the root this is its world position.
    pub attach: Vector3<f64>,

    /// Unit rotation axis in the local frame. Unused for effectors.
    pub axis: Vector3<f64>,

    /// Inclusive lower angular limit, radians.
    pub min_theta: f64,

    /// Inclusive upper angular limit, radians.
    pub max_theta: f64,

    theta: f64,
    frozen: bool,

    /// World position after the last forward kinematics pass.
    pub position: Vector3<f64>,

    /// World rotation axis after the last forward kinematics pass.
    pub world_axis: Vector3<f64>,

    /// Vector from the parent position to this node position.
    pub relative_position: Vector3<f64>,

    /// Zero based position among joints, assigned by tree initialization.
    /// Defines the Jacobian column of this joint.
    pub joint_index: Option<usize>,

    /// Zero based position among effectors, assigned by tree initialization.
    /// Defines the Jacobian row block of this effector.
    pub effector_index: Option<usize>,
}

impl ArmNode {
    /// Creates a revolute joint with the given attachment offset, local
    /// rotation axis and inclusive angular limits.
    pub fn joint(attach: Vector3<f64>, axis: Vector3<f64>, min_theta: f64, max_theta: f64) -> Self {
        ArmNode {
            purpose: Purpose::Joint,
            attach,
            axis: crate::utils::normalize_or_zero(&axis),
            min_theta,
            max_theta,
            theta: 0.0,
            frozen: false,
            position: Vector3::zeros(),
            world_axis: Vector3::zeros(),
            relative_position: Vector3::zeros(),
            joint_index: None,
            effector_index: None,
        }
    }

    /// Creates an end effector attached at the given offset. Effectors keep
    /// a zero angle for their whole lifetime.
    pub fn effector(attach: Vector3<f64>) -> Self {
        ArmNode {
            purpose: Purpose::Effector,
            attach,
            axis: Vector3::zeros(),
            min_theta: 0.0,
            max_theta: 0.0,
            theta: 0.0,
            frozen: false,
            position: Vector3::zeros(),
            world_axis: Vector3::zeros(),
            relative_position: Vector3::zeros(),
            joint_index: None,
            effector_index: None,
        }
    }

    /// Current joint angle, radians.
    pub fn theta(&self) -> f64 {
        self.theta
    }

    /// Sets the joint angle, clamping into the inclusive limits.
    pub fn set_theta(&mut self, theta: f64) {
        self.theta = theta.clamp(self.min_theta, self.max_theta);
    }

    /// Pins the current angle; the solver will neither move this joint nor
    /// route any Jacobian contribution through it.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Releases a previously frozen joint.
    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_effector(&self) -> bool {
        self.purpose == Purpose::Effector
    }

    pub fn is_joint(&self) -> bool {
        self.purpose == Purpose::Joint
    }
}
