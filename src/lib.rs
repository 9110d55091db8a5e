//! Motion planning for articulated arms built from revolute joints.
//!
//! Given a kinematic tree of revolute joints and world-space target points,
//! this library continuously computes joint angles that drive the end
//! effectors towards the targets while respecting per-joint angular limits,
//! the ground plane and self-collision constraints. The default solver is
//! Jacobian based, using Selectively Damped Least Squares so the arm stays
//! stable near reach limits; a simulated annealing solver covers the same
//! problem without derivatives. Planned and committed arm states are kept
//! in parallel, plans round trip through a serializable form, and a
//! keyframe animator replays plans against the host clock.
//!
//! # Features
//!
//! - Iterative forward kinematics over a left-child / right-sibling tree
//!   of joints and effectors, with stable sequence numbering.
//! - One-step-per-tick inverse kinematics with selectable update laws:
//!   SDLS (default), damped least squares, SVD pseudo-inverse and Jacobian
//!   transpose, all sharing the per-step rotation clamps.
//! - Joints can be frozen at their current angle; frozen joints contribute
//!   nothing to the Jacobian and never move.
//! - Self-collision detection through tapered sphere chains approximating
//!   capsules around every arm segment.
//! - Simulated annealing with Metropolis acceptance as a derivative free
//!   fallback, driven by the same validity checks.
//! - Plan commitment for forwarding joint vectors to a physical arm, and
//!   pull-based keyframe animation with token cancellation.
//!
//! The library never panics on solver input: shape mismatches and
//! recovered numerical breakdowns are reported through
//! [`solver_error::SolverError`] and leave the arm untouched.

pub mod arm_node;
pub mod kinematic_tree;

pub mod jacobian;

pub mod collisions;

pub mod arm_solution;

pub mod annealing;

#[path = "planning/session.rs"]
pub mod session;

#[path = "planning/animation.rs"]
pub mod animation;

pub mod solver_error;

pub mod utils;
