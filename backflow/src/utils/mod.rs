//! # Utils

pub mod closable;
pub mod mpmc;
pub(crate) mod net;

#[doc(inline)]
pub use closable::{Closable, Closer};

#[cfg(test)]
pub(crate) mod test;
