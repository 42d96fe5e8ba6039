//! Authentication, credential sealing, and RBAC for BackHub.
//!
//! Four concerns live here: bearer tokens for users ([`jwt`]), API keys
//! for nodes ([`apikey`]), the symmetric seal protecting object-store
//! credentials at rest ([`seal`]), and TOTP verification for MFA
//! ([`mfa`]).

pub mod apikey;
pub mod jwt;
pub mod mfa;
pub mod password;
pub mod rbac;
pub mod seal;
