//! Bearer credentials for the tool endpoint.
//!
//! A [`TokenProvider`] caches one [`Credential`] per audience and refreshes
//! it shortly before expiry. Tokens come from a [`TokenSource`]: the
//! instance metadata server in production, a fixed token otherwise.

mod audience;
mod provider;
mod sources;

pub use audience::derive_audience;
pub use provider::{Credential, TokenProvider};
pub use sources::{
    jwt_expiry, FetchedToken, MetadataTokenSource, StaticTokenSource, TokenSource,
    DEFAULT_METADATA_BASE,
};

#[cfg(test)]
pub use sources::MockTokenSource;
