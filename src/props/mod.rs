pub mod copula;
pub mod correlation;
pub mod error;
pub mod leg;
pub mod marginal;
pub mod source;

pub use copula::{estimate_joint, JointEstimate, JointMethod, DEFAULT_N_SAMPLES};
pub use error::PropError;
pub use leg::{Leg, Metric};
pub use marginal::{estimate_marginal, MarginalEstimate, Smoothing};
pub use source::{JointSample, SampleSource};
