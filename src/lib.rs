//! # Seed Pipeline
//!
//! Batch ingestion, normalization, and deduplication of name-variation
//! observations.
//!
//! Input files from many producers report "for seed *S*, I propose
//! variation *V*". Seed Pipeline normalizes both sides, stores each
//! distinct seed and each distinct (seed, variation) pair once, and keeps
//! every individual report as an append-only observation. Re-running over
//! the same directory is safe: files are recognised by content checksum and
//! skipped.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────┐
//! │ .json files │──▶│  Adapters   │──▶│   Ingest   │──▶│  SQLite  │
//! │  (per dir)  │   │ → records   │   │ normalize  │   │  store   │
//! └─────────────┘   └─────────────┘   │ + upsert   │   └────┬─────┘
//!                                     └────────────┘        │
//!                      ┌────────────────────────────────────┤
//!                      ▼                                    ▼
//!                 ┌──────────┐                        ┌──────────┐
//!                 │   CLI    │                        │   HTTP   │
//!                 │(seedctl) │                        │ (query)  │
//!                 └──────────┘                        └──────────┘
//! ```
//!
//! Domain types, normalization, validation, metrics, the [`Store`] trait,
//! and the read queries live in [`seed_pipeline_core`]; this crate adds
//! SQLite storage, file handling, adapters, the CLI, and the server.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store traits |
//! | [`file_tracker`] | Checksums, JSON loading, input discovery |
//! | [`adapters`] | Source-format adapters and their registry |
//! | [`ingest`] | Batch ingestion engine |
//! | [`progress`] | Ingest progress reporting |
//! | [`stats`] | Database statistics |
//! | [`server`] | HTTP query server |
//!
//! [`Store`]: seed_pipeline_core::store::Store

pub mod adapters;
pub mod config;
pub mod db;
pub mod file_tracker;
pub mod ingest;
pub mod migrate;
pub mod progress;
pub mod server;
pub mod sqlite_store;
pub mod stats;

pub use seed_pipeline_core;
