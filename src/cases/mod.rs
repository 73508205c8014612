//! Case API model, filters and HTTP transport.

pub mod client;
pub mod filter;
pub mod transport;
pub mod types;

pub use client::RestTransport;
