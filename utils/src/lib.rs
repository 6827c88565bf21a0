// Small set of helpers shared by the composition core.
#[macro_use]
pub mod logging;
pub mod log;
pub mod region;
pub mod timing;

extern crate anyhow;
pub use anyhow::{anyhow, Context, Error, Result};
