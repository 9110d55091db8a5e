//! One live arm: the kinematic tree, the Jacobian stepper, the self
//! collision model and the target list composed into a single planning
//! state that can be stepped, validated, serialized and re-applied.

use nalgebra::Vector3;
use std::f64::consts::PI;

use crate::arm_node::ArmNode;
use crate::collisions::CollisionModel;
use crate::jacobian::{JacobianIkSolver, SolverConfig};
use crate::kinematic_tree::{KinematicTree, NodeId};
use crate::solver_error::SolverError;

/// Default joint angles of the built-in arm: a gentle zig-zag that keeps
/// the arm away from the fully stretched singular posture.
pub const DEFAULT_THETAS: [f64; 5] = [0.0, 0.4, -0.4, 0.4, 0.0];

/// Default target the built-in arm starts chasing.
pub const DEFAULT_TARGET: Vector3<f64> = Vector3::new(0.0, 6.0, 0.0);

const DEFAULT_LIMIT: f64 = PI;

/// Builds the default arm: a yaw joint at the base rotating about +Y,
/// three pitch joints about +X with segment offsets (0,1,0), (0,3,0) and
/// (0,4,0), and the end effector a further (0,3,0) out.
fn default_tree() -> KinematicTree {
    let y_axis = Vector3::new(0.0, 1.0, 0.0);
    let pitch_axis = Vector3::new(1.0, 0.0, 0.0);
    let mut tree = KinematicTree::new();
    let base = tree.insert_root(ArmNode::joint(
        Vector3::zeros(),
        y_axis,
        -DEFAULT_LIMIT,
        DEFAULT_LIMIT,
    ));
    let shoulder = tree.insert_left_child(
        base,
        ArmNode::joint(Vector3::new(0.0, 1.0, 0.0), pitch_axis, -DEFAULT_LIMIT, DEFAULT_LIMIT),
    );
    let elbow = tree.insert_left_child(
        shoulder,
        ArmNode::joint(Vector3::new(0.0, 3.0, 0.0), pitch_axis, -DEFAULT_LIMIT, DEFAULT_LIMIT),
    );
    let wrist = tree.insert_left_child(
        elbow,
        ArmNode::joint(Vector3::new(0.0, 4.0, 0.0), pitch_axis, -DEFAULT_LIMIT, DEFAULT_LIMIT),
    );
    tree.insert_left_child(wrist, ArmNode::effector(Vector3::new(0.0, 3.0, 0.0)));
    tree
}

/// A complete solvable arm state. Owns its tree, stepper, collision model
/// and targets for the whole planning session; the node set never changes
/// after construction.
pub struct ArmSolution {
    tree: KinematicTree,
    solver: JacobianIkSolver,
    collision: CollisionModel,
    targets: Vec<Vector3<f64>>,
}

impl ArmSolution {
    /// Builds the default arm, optionally seeding it with the given joint
    /// angles (one per node, in insertion order), and performs one solver
    /// step against the default target.
    pub fn new(initial_thetas: Option<&[f64]>) -> Result<Self, SolverError> {
        let mut solution = Self::from_tree(
            default_tree(),
            vec![DEFAULT_TARGET],
            SolverConfig::default(),
        )?;
        solution.apply_solution(initial_thetas.unwrap_or(&DEFAULT_THETAS))?;
        solution.update()?;
        Ok(solution)
    }

    /// Builds a solution around an arbitrary tree, one target per
    /// effector. The tree is initialized and computed here; targets are
    /// ground clamped on the way in.
    pub fn from_tree(
        mut tree: KinematicTree,
        targets: Vec<Vector3<f64>>,
        config: SolverConfig,
    ) -> Result<Self, SolverError> {
        tree.init();
        tree.compute();
        if targets.len() != tree.effector_count() {
            return Err(SolverError::ShapeMismatch {
                expected: tree.effector_count(),
                found: targets.len(),
            });
        }
        let solver = JacobianIkSolver::new(&tree, config);
        let collision = CollisionModel::new(&tree.positions());
        let mut solution = ArmSolution {
            tree,
            solver,
            collision,
            targets,
        };
        for target in &mut solution.targets {
            if target.y < 0.0 {
                target.y = 0.0;
            }
        }
        solution.refresh_collisions();
        Ok(solution)
    }

    /// One planner tick: a single inverse kinematics step followed by the
    /// collision refresh, in that fixed order. On a recovered numerical
    /// breakdown the arm is unchanged and the error is surfaced for the
    /// caller to inspect.
    pub fn update(&mut self) -> Result<(), SolverError> {
        self.step_ik()?;
        self.refresh_collisions();
        Ok(())
    }

    /// One inverse kinematics iteration without the collision refresh.
    pub fn step_ik(&mut self) -> Result<(), SolverError> {
        self.solver.step(&mut self.tree, &self.targets)
    }

    /// Recomputes all collision volumes from the current node positions.
    pub fn refresh_collisions(&mut self) {
        self.collision.update(&self.tree.positions());
    }

    /// Writes a target, nudging it up onto the ground plane when below.
    pub fn set_target(&mut self, index: usize, target: Vector3<f64>) -> Result<(), SolverError> {
        if index >= self.targets.len() {
            return Err(SolverError::ShapeMismatch {
                expected: self.targets.len(),
                found: index,
            });
        }
        let mut target = target;
        if target.y < 0.0 {
            target.y = 0.0;
        }
        self.targets[index] = target;
        Ok(())
    }

    pub fn targets(&self) -> &[Vector3<f64>] {
        &self.targets
    }

    /// The base may sit on the ground; every other node must stay on or
    /// above the ground plane.
    pub fn validate_point(&self, point: &Vector3<f64>, index: usize) -> bool {
        index == 0 || point.y >= 0.0
    }

    /// True when every node position passes the ground check and no
    /// collision volume is flagged.
    pub fn solution_is_valid(&self) -> bool {
        self.tree
            .nodes()
            .iter()
            .enumerate()
            .all(|(index, node)| self.validate_point(&node.position, index))
            && !self.collision.any_colliding()
    }

    /// Joint angles of all nodes, in insertion order. Effectors contribute
    /// their permanent zero.
    pub fn serialize(&self) -> Vec<f64> {
        self.tree.nodes().iter().map(|node| node.theta()).collect()
    }

    /// Assigns the given joint angles (clamped into limits) and refreshes
    /// forward kinematics and collision volumes. Does not run the solver.
    pub fn apply_solution(&mut self, thetas: &[f64]) -> Result<(), SolverError> {
        if thetas.len() != self.tree.node_count() {
            return Err(SolverError::ShapeMismatch {
                expected: self.tree.node_count(),
                found: thetas.len(),
            });
        }
        for (node, theta) in self.tree.nodes_mut().iter_mut().zip(thetas) {
            node.set_theta(*theta);
        }
        self.tree.compute();
        self.refresh_collisions();
        Ok(())
    }

    /// Pins the joint with the given joint sequence number at its current
    /// angle. Returns false when no such joint exists.
    pub fn freeze_joint(&mut self, joint_index: usize) -> bool {
        match self.tree.joint_id(joint_index) {
            Some(id) => {
                self.tree.node_mut(id).freeze();
                true
            }
            None => false,
        }
    }

    /// Releases a previously frozen joint.
    pub fn unfreeze_joint(&mut self, joint_index: usize) -> bool {
        match self.tree.joint_id(joint_index) {
            Some(id) => {
                self.tree.node_mut(id).unfreeze();
                true
            }
            None => false,
        }
    }

    /// Angle of the joint with the given joint sequence number.
    pub fn joint_theta(&self, joint_index: usize) -> Option<f64> {
        self.tree
            .joint_id(joint_index)
            .map(|id| self.tree.node(id).theta())
    }

    /// Distance from the effector to its assigned target.
    pub fn effector_distance(&self, effector_index: usize) -> Option<f64> {
        let id: NodeId = self.tree.effector_id(effector_index)?;
        let target = self.targets.get(effector_index)?;
        Some((self.tree.node(id).position - target).norm())
    }

    /// Nodes in insertion order, with world positions fresh after the last
    /// update. This is what a renderer reads.
    pub fn nodes(&self) -> &[ArmNode] {
        self.tree.nodes()
    }

    pub fn tree(&self) -> &KinematicTree {
        &self.tree
    }

    /// Collision volumes, fresh after the last update.
    pub fn collision_model(&self) -> &CollisionModel {
        &self.collision
    }

    pub fn solver(&self) -> &JacobianIkSolver {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut JacobianIkSolver {
        &mut self.solver
    }
}
