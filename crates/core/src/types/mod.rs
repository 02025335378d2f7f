//! Core types for Shopwright.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod item;
pub mod price;
pub mod status;

pub use id::*;
pub use item::{OrderItem, aggregate_quantities};
pub use price::{CurrencyCode, Price, PriceError};
pub use status::*;
