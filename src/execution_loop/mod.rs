pub mod coordinator;
pub mod corrector;
pub mod error_classifier;

pub use coordinator::*;
pub use corrector::*;
pub use error_classifier::*;
