//! Core error, configuration, and shared types for BackHub.
//!
//! This crate has no dependency on any other BackHub crate and defines the
//! vocabulary everything else speaks: [`error::AppError`], the configuration
//! schema, and the typed identifiers.

pub mod config;
pub mod error;
pub mod result;
pub mod types;
