pub mod error;

pub use error::{BeaconError, Result};
