//! Error handling for the planner core

/// Unified error to report failures of the Jacobian stepper and of plan
/// application. The planner never panics; every fallible operation returns
/// this error for the caller to inspect.
#[derive(Debug)]
pub enum SolverError {
    /// The number of supplied values does not match the arm: targets versus
    /// effectors, or joint vector length versus node count.
    ShapeMismatch { expected: usize, found: usize },

    /// NaN or infinity appeared during the SVD or the joint update assembly.
    /// The offending step is discarded and the arm keeps its previous
    /// configuration, so the caller may simply continue stepping.
    NumericalBreakdown(String),
}

impl std::fmt::Display for SolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            SolverError::ShapeMismatch { expected, found } =>
                write!(f, "Shape mismatch: expected {}, found {}", expected, found),
            SolverError::NumericalBreakdown(ref msg) =>
                write!(f, "Numerical breakdown: {}", msg),
        }
    }
}

impl std::error::Error for SolverError {}
