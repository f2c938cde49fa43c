// src/core/auth/mod.rs

//! User identity and access policy: registration, password verification,
//! token issuance/verification, and RBAC permission checks.

pub mod manager;
pub mod rbac;
pub mod token;

pub use manager::{AuthManager, UserRecord};
pub use rbac::RoleSet;
pub use token::{Claims, TokenKind, TokenService};
