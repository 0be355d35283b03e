//! Multi-scope data-consistency layer for the fireledger finance client.
//!
//! Reads go through [`application::Query`] handles backed by one shared,
//! deduplicating [`cache::CacheStore`]. Mutations and scope switches publish
//! explicit invalidation events that keep every cached entry coherent.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
