//! Session state.
//!
//! A [`Session`] exclusively owns its [`StateStore`]; the
//! [`SessionRegistry`] rejects a second concurrent run of the same id.

mod session;
mod store;

pub use session::{Session, SessionGuard, SessionRegistry, SessionStatus};
pub use store::StateStore;
