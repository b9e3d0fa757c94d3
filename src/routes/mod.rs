//! Router Module Index
//!
//! Routes are grouped by how the authorization middleware treats them. The
//! grouping mirrors the `AccessPolicy` lists; the middleware itself is applied
//! once, over all three groups, in `create_router`.

/// Bypass list: reachable without a token.
pub mod public;

/// Token-only: any valid access token, no permission check.
pub mod account;

/// RBAC-gated: each route has a permission catalog entry.
pub mod protected;
