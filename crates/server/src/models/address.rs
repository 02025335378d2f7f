//! Shipping address attached to an order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopwright_core::AddressId;

/// A stored shipping address. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Address {
    /// Unique address ID.
    pub id: AddressId,
    /// First address line.
    pub line_1: String,
    /// Optional second address line.
    pub line_2: Option<String>,
    /// City.
    pub city: String,
    /// Contact phone number.
    pub phone: String,
    /// When the address was stored.
    pub created_at: DateTime<Utc>,
}

/// Shipping details submitted with a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAddress {
    pub line_1: String,
    #[serde(default)]
    pub line_2: Option<String>,
    pub city: String,
    pub phone: String,
}

impl NewAddress {
    /// Check required fields and normalize whitespace.
    ///
    /// Returns the list of problems, empty when the address is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.line_1.trim().is_empty() {
            problems.push("shippingAddress.line_1 is required".to_string());
        }
        if self.city.trim().is_empty() {
            problems.push("shippingAddress.city is required".to_string());
        }
        if self.phone.trim().is_empty() {
            problems.push("shippingAddress.phone is required".to_string());
        }
        problems
    }

    /// Copy with surrounding whitespace trimmed and a blank `line_2` dropped.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            line_1: self.line_1.trim().to_string(),
            line_2: self
                .line_2
                .as_deref()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from),
            city: self.city.trim().to_string(),
            phone: self.phone.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(line_1: &str, city: &str, phone: &str) -> NewAddress {
        NewAddress {
            line_1: line_1.to_string(),
            line_2: Some("  ".to_string()),
            city: city.to_string(),
            phone: phone.to_string(),
        }
    }

    #[test]
    fn test_validate_accepts_complete_address() {
        assert!(address("1 Main St", "Colombo", "+94 11 000").validate().is_empty());
    }

    #[test]
    fn test_validate_reports_each_missing_field() {
        let problems = address(" ", "", "").validate();
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn test_normalized_drops_blank_line_2() {
        let normalized = address(" 1 Main St ", "Kandy", "123").normalized();
        assert_eq!(normalized.line_1, "1 Main St");
        assert_eq!(normalized.line_2, None);
    }
}
