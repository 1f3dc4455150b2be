//! Configuration for audit runs: the [`AuditConfig`] struct and its builder.

pub mod builder;
pub mod types;

pub use builder::AuditConfigBuilder;
pub use types::AuditConfig;
