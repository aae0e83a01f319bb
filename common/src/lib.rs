pub mod error;
pub mod types;

pub use error::{ControlPlaneError, Result};
pub use types::*;
