//! In-memory reference implementation of the customer tool server.
//!
//! Reproduces the remote endpoint's business rules so the client and the
//! pipelines can run end to end without a network.

mod store;

pub use store::{CustomerDirectory, RPC_INVALID_PARAMS, RPC_METHOD_NOT_FOUND};
