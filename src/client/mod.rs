//! Remote classifier client module.

mod classifier;

pub use classifier::*;

#[cfg(test)]
pub(crate) use classifier::test_server;
