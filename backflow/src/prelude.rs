//! # Basic imports

pub use crate::errors::{Error, Result};
