//! # Seed Pipeline Core
//!
//! Shared, I/O-free logic for Seed Pipeline: text normalization, record
//! validation, the canonical entity model, store abstraction, ingestion
//! metrics, and the read-only seed queries.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Storage backends live behind the
//! [`store::Store`] trait; an in-memory backend ships here for tests.

pub mod metrics;
pub mod models;
pub mod normalize;
pub mod query;
pub mod store;
pub mod validate;
