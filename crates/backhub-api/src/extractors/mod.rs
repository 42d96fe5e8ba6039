//! Request extractors.

pub mod auth;
pub mod node;

pub use auth::AuthUser;
pub use node::AuthNode;
