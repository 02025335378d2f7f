//! Shopwright Core - Shared domain types.
//!
//! This crate provides the types shared by every Shopwright component:
//! - `server` - Order, checkout and payment-event HTTP service
//! - `cli` - Migrations and catalog seeding
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. Database encodings are available behind the
//! `postgres` feature.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, prices, order items and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
