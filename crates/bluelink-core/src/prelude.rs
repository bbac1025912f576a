//! Prelude for common imports used throughout all Bluelink crates

pub use crate::critical;
pub use crate::error::{Error, Result, ResultExt};
pub use tracing::{debug, error, info, instrument, trace, warn};
