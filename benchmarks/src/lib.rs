#[cfg(feature = "mpmc")]
pub mod mpmc;
#[cfg(feature = "pool")]
pub mod pool;
