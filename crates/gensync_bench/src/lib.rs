//! Benchmark support for GenSync.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod utils;
