pub use gradepost_core::app::{App, AppState};
pub use gradepost_types::error::{Error, GpResult};
pub use gradepost_types::types::{Patch, Timestamp};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
