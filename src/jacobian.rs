//! Jacobian based inverse kinematics stepping.
//!
//! One step builds the (3·effectors) × joints Jacobian of the tree, solves
//! for a joint angle update from the clamped goal displacement and applies
//! the update within joint limits. The default update law is Selectively
//! Damped Least Squares: every singular direction of the Jacobian is damped
//! on its own, proportionally to how aggressively that direction would move
//! the joints, which keeps the arm stable near reach limits while still
//! progressing in well conditioned directions. Damped least squares, SVD
//! pseudo-inverse and plain transpose update laws are also available.

use nalgebra::{DMatrix, DVector, Vector3};

use crate::kinematic_tree::{KinematicTree, NodeId};
use crate::solver_error::SolverError;
use crate::utils::clamp_norm;

/// Relative threshold below which a singular value is treated as zero.
pub const SINGULAR_VALUE_EPSILON: f64 = 1e-12;

/// Which goal each effector chases during the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GoalMode {
    /// Each effector is driven towards its assigned target point.
    #[default]
    Target,
    /// Each effector's goal is its own current position, so the step
    /// relaxes to no motion. Retained for parity with the target mode.
    End,
}

/// Joint update law applied to the goal displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IkMethod {
    /// Selectively damped least squares (the default).
    #[default]
    Sdls,
    /// Damped least squares with a fixed damping factor.
    Dls,
    /// SVD based pseudo-inverse.
    PseudoInverse,
    /// Jacobian transpose with the optimal scalar step.
    Transpose,
}

/// Tunable constants of one solver step.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Per effector clamp on the goal displacement norm, world units.
    pub delta_s_max: f64,

    /// Largest joint rotation a single singular direction may induce,
    /// radians.
    pub gamma_max: f64,

    /// Largest joint rotation of the summed update; the whole update is
    /// rescaled when any component exceeds this, radians.
    pub gamma_total: f64,

    /// Damping factor of the [`IkMethod::Dls`] update law.
    pub dls_lambda: f64,

    pub method: IkMethod,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            delta_s_max: 0.4,
            gamma_max: std::f64::consts::FRAC_PI_4,
            gamma_total: std::f64::consts::FRAC_PI_4,
            dls_lambda: 0.05,
            method: IkMethod::Sdls,
        }
    }
}

/// The Jacobian stepper. Owns the dense matrices and the SVD workspace,
/// allocated once for the tree shape at construction; the tree's node set
/// must not change afterwards.
pub struct JacobianIkSolver {
    pub config: SolverConfig,
    mode: GoalMode,

    num_joints: usize,
    num_effectors: usize,

    /// Joint node ids by joint sequence number (Jacobian column order).
    joint_ids: Vec<NodeId>,
    /// Effector node ids by effector sequence number (row block order).
    effector_ids: Vec<NodeId>,
    /// `ancestors[e][j]` is true when joint `j` moves effector `e`.
    ancestors: Vec<Vec<bool>>,

    /// Jacobian used while chasing targets.
    j_target: DMatrix<f64>,
    /// Jacobian used while the goals are the effectors themselves.
    j_end: DMatrix<f64>,
    /// Clamped goal displacement, one 3-block per effector.
    d_s: DVector<f64>,
    /// Resulting joint update of the last step.
    d_theta: DVector<f64>,
}

impl JacobianIkSolver {
    /// Builds the solver for an initialized tree. All buffers are sized
    /// here and reused across steps.
    pub fn new(tree: &KinematicTree, config: SolverConfig) -> Self {
        let num_joints = tree.joint_count();
        let num_effectors = tree.effector_count();

        let joint_ids: Vec<NodeId> = (0..num_joints)
            .filter_map(|j| tree.joint_id(j))
            .collect();
        let effector_ids: Vec<NodeId> = (0..num_effectors)
            .filter_map(|e| tree.effector_id(e))
            .collect();

        let ancestors = effector_ids
            .iter()
            .map(|&effector| {
                joint_ids
                    .iter()
                    .map(|&joint| tree.is_ancestor(joint, effector))
                    .collect()
            })
            .collect();

        JacobianIkSolver {
            config,
            mode: GoalMode::default(),
            num_joints,
            num_effectors,
            joint_ids,
            effector_ids,
            ancestors,
            j_target: DMatrix::zeros(3 * num_effectors, num_joints),
            j_end: DMatrix::zeros(3 * num_effectors, num_joints),
            d_s: DVector::zeros(3 * num_effectors),
            d_theta: DVector::zeros(num_joints),
        }
    }

    pub fn set_target_mode(&mut self) {
        self.mode = GoalMode::Target;
    }

    pub fn set_end_mode(&mut self) {
        self.mode = GoalMode::End;
    }

    pub fn mode(&self) -> GoalMode {
        self.mode
    }

    /// Joint update computed by the last step, in joint sequence order.
    pub fn delta_thetas(&self) -> &DVector<f64> {
        &self.d_theta
    }

    /// Clamped goal displacement of the last step, one 3-block per
    /// effector.
    pub fn goal_displacement(&self) -> &DVector<f64> {
        &self.d_s
    }

    fn active_jacobian(&self) -> &DMatrix<f64> {
        match self.mode {
            GoalMode::Target => &self.j_target,
            GoalMode::End => &self.j_end,
        }
    }

    fn goal_of(&self, tree: &KinematicTree, targets: &[Vector3<f64>], effector: usize) -> Vector3<f64> {
        match self.mode {
            GoalMode::Target => targets[effector],
            GoalMode::End => tree.node(self.effector_ids[effector]).position,
        }
    }

    /// Rebuilds the clamped per effector goal displacement from the
    /// current tree state.
    fn fill_goal_displacement(&mut self, tree: &KinematicTree, targets: &[Vector3<f64>]) {
        for e in 0..self.num_effectors {
            let position = tree.node(self.effector_ids[e]).position;
            let displacement = clamp_norm(&(self.goal_of(tree, targets, e) - position), self.config.delta_s_max);
            self.d_s.fixed_rows_mut::<3>(3 * e).copy_from(&displacement);
        }
    }

    /// One full Jacobian rebuild: the goal displacement plus both matrix
    /// buffers. The column block of joint `j` for effector `e` is
    /// `world_axis(j) × (position(e) − position(j))` when `j` is an
    /// unfrozen ancestor of `e`, the zero block otherwise.
    pub fn compute_jacobian(
        &mut self,
        tree: &KinematicTree,
        targets: &[Vector3<f64>],
    ) -> Result<(), SolverError> {
        if targets.len() != self.num_effectors {
            return Err(SolverError::ShapeMismatch {
                expected: self.num_effectors,
                found: targets.len(),
            });
        }
        self.fill_goal_displacement(tree, targets);
        for e in 0..self.num_effectors {
            let effector_position = tree.node(self.effector_ids[e]).position;
            for j in 0..self.num_joints {
                let joint = tree.node(self.joint_ids[j]);
                let column = if self.ancestors[e][j] && !joint.is_frozen() {
                    joint.world_axis.cross(&(effector_position - joint.position))
                } else {
                    Vector3::zeros()
                };
                self.j_target.fixed_view_mut::<3, 1>(3 * e, j).copy_from(&column);
                self.j_end.fixed_view_mut::<3, 1>(3 * e, j).copy_from(&column);
            }
        }
        Ok(())
    }

    /// Recomputes the clamped goal displacement for the configuration the
    /// step just produced, ready for the next call.
    pub fn update_ds_clamp(&mut self, tree: &KinematicTree, targets: &[Vector3<f64>]) {
        self.fill_goal_displacement(tree, targets);
    }

    /// Solves the active Jacobian for the joint update using the
    /// configured method. On numerical breakdown the update is zeroed and
    /// the error surfaced; the tree has not been touched at that point.
    pub fn calc_delta_thetas(&mut self) -> Result<(), SolverError> {
        if self.num_joints == 0 || self.num_effectors == 0 {
            self.d_theta.fill(0.0);
            return Ok(());
        }
        let outcome = match self.config.method {
            IkMethod::Sdls => {
                self.calc_delta_thetas_sdls();
                Ok(())
            }
            IkMethod::Dls => {
                self.calc_delta_thetas_dls();
                Ok(())
            }
            IkMethod::PseudoInverse => self.calc_delta_thetas_pseudo_inverse(),
            IkMethod::Transpose => {
                self.calc_delta_thetas_transpose();
                Ok(())
            }
        };
        if let Err(error) = outcome {
            self.d_theta.fill(0.0);
            return Err(error);
        }
        if !self.d_theta.iter().all(|t| t.is_finite()) {
            self.d_theta.fill(0.0);
            log::warn!("discarding joint update: non-finite components in delta theta");
            return Err(SolverError::NumericalBreakdown(
                "non-finite components in delta theta".to_string(),
            ));
        }
        self.clamp_total_rotation();
        Ok(())
    }

    /// Selectively damped least squares. Each singular component of the
    /// Jacobian contributes `((Uᵢ·dS)/wᵢ)·Vᵢ`, with every joint component
    /// of that contribution clamped to `gamma_max · wᵢ / Mᵢ`, where `Mᵢ`
    /// aggregates how far the component moves all effectors through all
    /// joints. Singular values below the numerical zero threshold are
    /// skipped entirely.
    fn calc_delta_thetas_sdls(&mut self) {
        self.d_theta.fill(0.0);
        let jacobian = self.active_jacobian().clone();
        let svd = jacobian.clone().svd(true, true);
        let (Some(u), Some(v_t)) = (svd.u.as_ref(), svd.v_t.as_ref()) else {
            return;
        };
        let singular_values = &svd.singular_values;
        let w_max = singular_values.amax();
        if w_max <= 0.0 || !w_max.is_finite() {
            return;
        }
        let zero_threshold = SINGULAR_VALUE_EPSILON * w_max;

        // How far one radian of joint j moves the effectors depending on it.
        let mut joint_response = vec![0.0; self.num_joints];
        for j in 0..self.num_joints {
            for e in 0..self.num_effectors {
                joint_response[j] += jacobian.fixed_view::<3, 1>(3 * e, j).norm();
            }
        }

        for i in 0..singular_values.len() {
            let w_i = singular_values[i];
            if w_i <= zero_threshold {
                continue;
            }
            let alpha = u.column(i).dot(&self.d_s);
            let scale = alpha / w_i;
            let mut m_i = 0.0;
            for j in 0..self.num_joints {
                m_i += v_t[(i, j)].abs() * joint_response[j];
            }
            let bound = if m_i > 0.0 {
                self.config.gamma_max * w_i / m_i
            } else {
                self.config.gamma_max
            };
            for j in 0..self.num_joints {
                let phi = scale * v_t[(i, j)];
                self.d_theta[j] += phi.clamp(-bound, bound);
            }
        }
    }

    /// Damped least squares: `Δθ = Jᵀ (J·Jᵀ + λ²I)⁻¹ dS`. A singular
    /// damped system yields a zero update.
    fn calc_delta_thetas_dls(&mut self) {
        let jacobian = self.active_jacobian().clone();
        let jjt = &jacobian * jacobian.transpose();
        let rows = jjt.nrows();
        let damped = jjt + DMatrix::identity(rows, rows) * (self.config.dls_lambda * self.config.dls_lambda);
        match damped.try_inverse() {
            Some(inverse) => {
                self.d_theta = jacobian.transpose() * inverse * &self.d_s;
            }
            None => self.d_theta.fill(0.0),
        }
    }

    /// SVD pseudo-inverse update. Fails when the pseudo-inverse cannot be
    /// assembled, which the caller reports as a numerical breakdown.
    fn calc_delta_thetas_pseudo_inverse(&mut self) -> Result<(), SolverError> {
        let svd = self.active_jacobian().clone().svd(true, true);
        let threshold = SINGULAR_VALUE_EPSILON * svd.singular_values.amax();
        match svd.pseudo_inverse(threshold) {
            Ok(pseudo_inverse) => {
                self.d_theta = pseudo_inverse * &self.d_s;
                Ok(())
            }
            Err(message) => Err(SolverError::NumericalBreakdown(message.to_string())),
        }
    }

    /// Jacobian transpose with the scalar step minimizing the residual
    /// along `Jᵀ dS`.
    fn calc_delta_thetas_transpose(&mut self) {
        let jacobian = self.active_jacobian().clone();
        let direction = jacobian.transpose() * &self.d_s;
        let response = &jacobian * &direction;
        let response_norm_squared = response.dot(&response);
        if response_norm_squared <= 0.0 {
            self.d_theta.fill(0.0);
            return;
        }
        let step = self.d_s.dot(&response) / response_norm_squared;
        self.d_theta = direction * step;
    }

    /// Rescales the summed update so that no joint rotates further than
    /// `gamma_total` in one step.
    fn clamp_total_rotation(&mut self) {
        if self.d_theta.is_empty() {
            return;
        }
        let largest = self.d_theta.amax();
        if largest > self.config.gamma_total {
            self.d_theta *= self.config.gamma_total / largest;
        }
    }

    /// Applies the computed update to every unfrozen joint, clamping into
    /// the joint limits, then refreshes the forward kinematics.
    pub fn update_thetas(&self, tree: &mut KinematicTree) {
        for (j, &id) in self.joint_ids.iter().enumerate() {
            let node = tree.node_mut(id);
            if node.is_frozen() {
                continue;
            }
            let theta = node.theta() + self.d_theta[j];
            node.set_theta(theta);
        }
        tree.compute();
    }

    /// One full inverse kinematics step on the tree, as a fixed sequence:
    /// Jacobian rebuild, joint update solve, limited theta update with a
    /// forward kinematics refresh, and the goal displacement refresh for
    /// the next call. On error the tree is left exactly as it was.
    pub fn step(
        &mut self,
        tree: &mut KinematicTree,
        targets: &[Vector3<f64>],
    ) -> Result<(), SolverError> {
        self.compute_jacobian(tree, targets)?;
        self.calc_delta_thetas()?;
        self.update_thetas(tree);
        self.update_ds_clamp(tree, targets);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm_node::ArmNode;
    use std::f64::consts::PI;

    /// Planar arm: yaw about +Y at the origin, two pitch joints about +X,
    /// effector at the tip. Segments of length 1, 1 and 1.
    fn planar_tree() -> (KinematicTree, NodeId) {
        let mut tree = KinematicTree::new();
        let base = tree.insert_root(ArmNode::joint(
            Vector3::zeros(),
            Vector3::new(0.0, 1.0, 0.0),
            -PI,
            PI,
        ));
        let shoulder = tree.insert_left_child(
            base,
            ArmNode::joint(Vector3::new(0.0, 1.0, 0.0), Vector3::new(1.0, 0.0, 0.0), -PI, PI),
        );
        let elbow = tree.insert_left_child(
            shoulder,
            ArmNode::joint(Vector3::new(0.0, 1.0, 0.0), Vector3::new(1.0, 0.0, 0.0), -PI, PI),
        );
        let tip = tree.insert_left_child(elbow, ArmNode::effector(Vector3::new(0.0, 1.0, 0.0)));
        tree.init();
        tree.compute();
        (tree, tip)
    }

    fn tip_distance(tree: &KinematicTree, tip: NodeId, target: &Vector3<f64>) -> f64 {
        (tree.node(tip).position - target).norm()
    }

    #[test]
    fn test_jacobian_columns_are_axis_cross_offset() {
        let (mut tree, _) = planar_tree();
        // Bend the shoulder so the yaw column is not degenerate.
        let shoulder = tree.joint_id(1).unwrap();
        tree.node_mut(shoulder).set_theta(0.5);
        tree.compute();
        let mut solver = JacobianIkSolver::new(&tree, SolverConfig::default());
        let targets = [Vector3::new(0.0, 2.0, 1.0)];
        solver.compute_jacobian(&tree, &targets).unwrap();

        let effector = tree.effector_id(0).unwrap();
        let effector_position = tree.node(effector).position;
        for j in 0..tree.joint_count() {
            let joint = tree.node(tree.joint_id(j).unwrap());
            let expected = joint.world_axis.cross(&(effector_position - joint.position));
            let column = solver.j_target.fixed_view::<3, 1>(0, j).clone_owned();
            assert!(
                (column - expected).norm() < 1e-12,
                "column {} does not match axis cross offset",
                j
            );
        }
    }

    #[test]
    fn test_frozen_joint_column_is_zero() {
        let (mut tree, _) = planar_tree();
        let shoulder = tree.joint_id(1).unwrap();
        tree.node_mut(shoulder).set_theta(0.5);
        tree.node_mut(shoulder).freeze();
        tree.compute();
        let mut solver = JacobianIkSolver::new(&tree, SolverConfig::default());
        solver
            .compute_jacobian(&tree, &[Vector3::new(0.0, 2.0, 1.0)])
            .unwrap();
        let column = solver.j_target.fixed_view::<3, 1>(0, 1).clone_owned();
        assert_eq!(column.norm(), 0.0);
    }

    #[test]
    fn test_target_count_mismatch_is_reported() {
        let (tree, _) = planar_tree();
        let mut solver = JacobianIkSolver::new(&tree, SolverConfig::default());
        let result = solver.compute_jacobian(&tree, &[]);
        match result {
            Err(SolverError::ShapeMismatch { expected, found }) => {
                assert_eq!(expected, 1);
                assert_eq!(found, 0);
            }
            other => panic!("expected shape mismatch, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_sdls_step_reduces_distance() {
        let (mut tree, tip) = planar_tree();
        let shoulder = tree.joint_id(1).unwrap();
        tree.node_mut(shoulder).set_theta(0.3);
        tree.compute();
        let target = Vector3::new(0.0, 1.5, 1.5);
        let mut solver = JacobianIkSolver::new(&tree, SolverConfig::default());
        let before = tip_distance(&tree, tip, &target);
        for _ in 0..50 {
            solver.step(&mut tree, &[target]).unwrap();
        }
        let after = tip_distance(&tree, tip, &target);
        assert!(
            after < before && after < 0.05,
            "distance did not shrink: before {} after {}",
            before,
            after
        );
    }

    #[test]
    fn test_all_methods_make_progress() {
        for method in [
            IkMethod::Sdls,
            IkMethod::Dls,
            IkMethod::PseudoInverse,
            IkMethod::Transpose,
        ] {
            let (mut tree, tip) = planar_tree();
            let shoulder = tree.joint_id(1).unwrap();
            tree.node_mut(shoulder).set_theta(0.3);
            tree.compute();
            let target = Vector3::new(0.0, 1.5, 1.5);
            let config = SolverConfig {
                method,
                ..SolverConfig::default()
            };
            let mut solver = JacobianIkSolver::new(&tree, config);
            let before = tip_distance(&tree, tip, &target);
            for _ in 0..60 {
                solver.step(&mut tree, &[target]).unwrap();
            }
            let after = tip_distance(&tree, tip, &target);
            assert!(
                after < before,
                "{:?} did not reduce the distance: before {} after {}",
                method,
                before,
                after
            );
        }
    }

    #[test]
    fn test_step_respects_total_rotation_clamp() {
        let (mut tree, _) = planar_tree();
        let shoulder = tree.joint_id(1).unwrap();
        tree.node_mut(shoulder).set_theta(0.3);
        tree.compute();
        let mut solver = JacobianIkSolver::new(&tree, SolverConfig::default());
        solver
            .step(&mut tree, &[Vector3::new(0.0, -2.0, -2.0)])
            .unwrap();
        assert!(solver.delta_thetas().amax() <= solver.config.gamma_total + 1e-12);
    }

    #[test]
    fn test_end_mode_produces_no_motion() {
        let (mut tree, tip) = planar_tree();
        let shoulder = tree.joint_id(1).unwrap();
        tree.node_mut(shoulder).set_theta(0.4);
        tree.compute();
        let before = tree.node(tip).position;
        let mut solver = JacobianIkSolver::new(&tree, SolverConfig::default());
        solver.set_end_mode();
        assert_eq!(solver.mode(), GoalMode::End);
        solver
            .step(&mut tree, &[Vector3::new(5.0, 5.0, 5.0)])
            .unwrap();
        assert!((tree.node(tip).position - before).norm() < 1e-12);
    }

    #[test]
    fn test_singular_configuration_yields_zero_update() {
        // Fully straight arm pointing along its own yaw axis: the goal
        // straight above lies outside the column space, so the update
        // must vanish instead of exploding.
        let (mut tree, _) = planar_tree();
        tree.compute();
        let mut solver = JacobianIkSolver::new(&tree, SolverConfig::default());
        solver
            .step(&mut tree, &[Vector3::new(0.0, 9.0, 0.0)])
            .unwrap();
        assert!(solver.delta_thetas().amax() < 1e-9);
    }
}
