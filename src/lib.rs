//! # Hive (Multi-tenant Workspace & Identity API)
//!
//! `hive` is the routing, identity, and authorization core of a multi-tenant
//! ERP backend. Each tenant is an isolated workspace with its own Postgres
//! database, resolved from the request `Host` header; a central database
//! holds the tenant registry and global accounts.
//!
//! ## Tenant Model (Guards)
//!
//! Roles and permissions are namespaced by a **guard**: `central` for the
//! central database, `tenant` for every tenant database. A role named
//! `Admin` in the tenant guard is a different entity from any central role
//! with the same name, and permission checks never cross guards.
//!
//! - **Context per request:** the resolver middleware attaches a
//!   [`tenancy::RequestContext`] (guard + database pool) to every request;
//!   no connection state outlives the request.
//! - **Distinguished account:** central user id 1 can never be modified,
//!   deactivated, or deleted, regardless of the caller's permissions.
//! - **Provisioning:** creating a tenant is destructive-recreate idempotent;
//!   re-provisioning an id drops and rebuilds its database.
//!
//! ## Authentication
//!
//! Password login issues an opaque bearer token (stored hashed). Accounts
//! with a confirmed TOTP secret receive a second-factor challenge instead of
//! a token; the challenge is completed on a public endpoint carrying only
//! the `user_id` returned by login. Credential failures collapse to a single
//! generic 401 so the API never reveals which half of the pair was wrong.

pub mod api;
pub mod authz;
pub mod cli;
pub mod stats;
pub mod tenancy;
pub mod totp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
