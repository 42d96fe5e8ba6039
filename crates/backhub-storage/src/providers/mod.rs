//! Concrete object-store providers.

pub mod local;
pub mod s3;
