pub mod config;
pub mod core;
pub mod error;
pub mod executor;
pub mod log;
pub mod model;
pub mod planning;
pub mod store;
pub mod util;

pub use error::{Error, Result};
