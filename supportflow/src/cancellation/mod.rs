//! Session cancellation.
//!
//! A [`CancellationToken`] is shared by everything working on behalf of one
//! session: the executor checks it between stages and in-flight tool calls
//! race against it.

mod token;

pub use token::{CancelCallback, CancellationToken};
