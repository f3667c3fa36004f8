//! API route handlers.
//!
//! Every handler except `/health` and `/` runs behind the host resolver
//! middleware and reads its database from the request's
//! [`crate::tenancy::RequestContext`].

pub mod auth;
pub mod health;
pub mod root;
pub mod tenants;
pub mod two_factor;
pub mod users;
