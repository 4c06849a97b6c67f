//! HTTP server exposing the policy engine for inspection.
//!
//! - [`policy_api`]: Request/response types and route handlers

pub mod policy_api;
