/*!
 * Core Module
 * Fundamental types, configuration and error handling
 */

pub mod clock;
pub mod config;
pub mod errors;
pub mod limits;
pub mod types;

// Re-export for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MonitorConfig;
pub use errors::*;
pub use types::*;
