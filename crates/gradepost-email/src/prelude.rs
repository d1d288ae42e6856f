pub use gradepost_types::error::{Error, GpResult};
pub use gradepost_types::types::Timestamp;

pub use tracing::{debug, error, info, warn};

// vim: ts=4
