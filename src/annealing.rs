//! Simulated annealing over joint vectors.
//!
//! A derivative free alternative to the Jacobian stepper: candidate
//! configurations are produced by resampling one joint at a time within
//! its limits, invalid configurations (ground or self collision) are
//! rejected outright, and worsening moves are accepted with the Metropolis
//! probability under a geometrically cooling temperature. Only forward
//! kinematics and the validity check of the arm are used.

use nalgebra::Vector3;
use rand::Rng;

use crate::arm_solution::ArmSolution;
use crate::solver_error::SolverError;

/// An immutable annealing outcome: the joint vector, the cost it was
/// accepted with and the world positions it produced.
#[derive(Debug, Clone)]
pub struct SolutionAndCost {
    pub thetas: Vec<f64>,
    pub cost: f64,
    pub positions: Vec<Vector3<f64>>,
}

/// The annealing schedule and sampling limits.
#[derive(Debug, Clone)]
pub struct AnnealingSolver {
    /// Starting temperature.
    pub t_start: f64,

    /// The schedule stops once the temperature falls to this value.
    pub t_min: f64,

    /// Geometric cooling factor applied after every batch.
    pub alpha: f64,

    /// Candidates evaluated per temperature step.
    pub batch: usize,

    /// How often a rejected-invalid neighbor is resampled before the
    /// batch iteration gives up and keeps the current configuration.
    pub max_neighbor_tries: usize,

    /// Flag to print cooling diagnostics if required.
    pub debug: bool,
}

impl Default for AnnealingSolver {
    fn default() -> Self {
        Self {
            t_start: 1.0,
            t_min: 1e-5,
            alpha: 0.9,
            batch: 50,
            max_neighbor_tries: 200,
            debug: false,
        }
    }
}

impl AnnealingSolver {
    /// Runs the full schedule on the arm. The best-so-far configuration is
    /// applied to the arm on return, so its forward kinematics and
    /// collision state match the returned solution.
    pub fn solve(
        &self,
        arm: &mut ArmSolution,
        rng: &mut impl Rng,
    ) -> Result<SolutionAndCost, SolverError> {
        let mut current = self.evaluate(arm, None);
        let mut temperature = self.t_start;
        while temperature > self.t_min {
            for _ in 0..self.batch {
                if !self.neighbor(arm, &current, rng)? {
                    continue;
                }
                let candidate = self.evaluate(arm, Some(&current));
                let acceptance = ((current.cost - candidate.cost) / temperature).exp();
                if acceptance > rng.gen::<f64>() {
                    current = candidate;
                } else {
                    arm.apply_solution(&current.thetas)?;
                }
            }
            temperature *= self.alpha;
            if self.debug {
                println!("T {:.6} cost {:.4}", temperature, current.cost);
            }
        }
        arm.apply_solution(&current.thetas)?;
        Ok(current)
    }

    /// Perturbs one uniformly chosen unfrozen joint to a uniform random
    /// angle within its limits, resampling until the arm is valid. Leaves
    /// the arm holding the perturbed configuration and returns true; when
    /// no valid neighbor shows up within the retry budget, restores the
    /// arm and returns false.
    fn neighbor(
        &self,
        arm: &mut ArmSolution,
        current: &SolutionAndCost,
        rng: &mut impl Rng,
    ) -> Result<bool, SolverError> {
        let movable: Vec<(usize, f64, f64)> = arm
            .nodes()
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_joint() && !node.is_frozen())
            .map(|(index, node)| (index, node.min_theta, node.max_theta))
            .collect();
        if movable.is_empty() {
            return Ok(false);
        }
        for _ in 0..self.max_neighbor_tries {
            let mut thetas = current.thetas.clone();
            let (index, min_theta, max_theta) = movable[rng.gen_range(0..movable.len())];
            thetas[index] = rng.gen_range(min_theta..=max_theta);
            arm.apply_solution(&thetas)?;
            if arm.solution_is_valid() {
                return Ok(true);
            }
        }
        arm.apply_solution(&current.thetas)?;
        Ok(false)
    }

    /// Cost of the configuration the arm currently holds: distance from
    /// the effector to its target, plus (against the previous solution)
    /// the signed mean joint drift and half the mean node displacement.
    /// Without a previous solution only the distance counts.
    fn evaluate(&self, arm: &ArmSolution, previous: Option<&SolutionAndCost>) -> SolutionAndCost {
        let thetas = arm.serialize();
        let positions = arm.tree().positions();
        let distance = arm.effector_distance(0).unwrap_or(0.0);
        let cost = match previous {
            None => distance,
            Some(previous) => {
                let mut drift = 0.0;
                let mut joints = 0;
                for (index, node) in arm.nodes().iter().enumerate() {
                    if node.is_joint() {
                        drift += thetas[index] - previous.thetas[index];
                        joints += 1;
                    }
                }
                if joints > 0 {
                    drift /= joints as f64;
                }
                let continuity = positions
                    .iter()
                    .zip(&previous.positions)
                    .map(|(now, before)| (now - before).norm())
                    .sum::<f64>()
                    / positions.len() as f64;
                distance + drift + 0.5 * continuity
            }
        };
        SolutionAndCost {
            thetas,
            cost,
            positions,
        }
    }
}
