pub mod registration;
pub mod session;
pub mod verification;

pub use registration::{RegistrationFailure, RegistrationFlow, RegistrationStage};
pub use session::{Attempt, CaptureSession};
pub use verification::{Identified, MatchResult, Rejection, VerificationFlow};
