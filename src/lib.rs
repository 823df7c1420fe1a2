//! wheelvend - binary wheels for sandboxed Python runtimes
//!
//! Serves prebuilt wheels from a content-addressed cache and builds
//! missing ones exactly once, in a disposable worker that matches the
//! sandbox ABI.

pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod orchestration;
pub mod request;
pub mod store;
pub mod ui;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{VendError, VendResult};
