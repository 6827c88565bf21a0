// Re-export point so call sites can `use utils::log;` and invoke
// `log::debug!`/`log::error!` the way the rest of the crate expects.
#![allow(unused_imports)]
pub use crate::debug;
pub use crate::error;
pub use crate::info;
pub use crate::log_internal;
pub use crate::verbose;
pub use crate::{logging::LogLevel, timing::get_current_millis};
