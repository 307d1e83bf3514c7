//! Provider Directory Service Library
//!
//! This library provides the core functionality for the Provider Directory
//! API: a small marketplace backend that resolves external identities to
//! accounts with monotonically merged roles, serves provider listings
//! filterable by category and location, and maintains per-listing rating
//! aggregates under concurrent reviewers.
//!
//! # Modules
//!
//! - `accounts`: Account registry and role merging.
//! - `auth`: Session token verification and caller-identity middleware.
//! - `config`: Configuration management.
//! - `db`: Database connection, pool, and schema bootstrap.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers and router assembly.
//! - `models`: Core data models and request/response DTOs.
//! - `providers`: Provider registry.
//! - `reviews`: Review aggregation.

pub mod accounts;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod reviews;
