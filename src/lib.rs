//! Worker client core: session, transport and cached resources for the gig-worker app.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod session;
pub mod store;
pub mod sync;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::WorkerClient;
pub use config::ClientConfig;
pub use error::{Error, Result};
