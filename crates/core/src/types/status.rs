//! Status enums for orders and payments.

use serde::{Deserialize, Serialize};

/// Order fulfillment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "order_status", rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, awaiting payment or confirmation.
    #[default]
    Pending,
    /// Payment received, ready for fulfillment.
    Confirmed,
    Shipped,
    Fulfilled,
    Cancelled,
}

impl OrderStatus {
    /// Position along the fulfillment path; `None` for `Cancelled`.
    #[must_use]
    pub const fn progress(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Confirmed => Some(1),
            Self::Shipped => Some(2),
            Self::Fulfilled => Some(3),
            Self::Cancelled => None,
        }
    }
}

/// Order payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "payment_status", rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Refunded,
}

/// How the customer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "payment_method", rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Cash on delivery.
    Cod,
    #[default]
    CreditCard,
}

/// Role claimed by an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular shopper.
    #[default]
    Customer,
    /// Store administrator; may read and update every order.
    Admin,
}

macro_rules! impl_status_strings {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Wire representation of the status.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(format!("invalid {}: {s}", stringify!($name))),
                }
            }
        }
    };
}

impl_status_strings!(OrderStatus {
    Pending => "PENDING",
    Confirmed => "CONFIRMED",
    Shipped => "SHIPPED",
    Fulfilled => "FULFILLED",
    Cancelled => "CANCELLED",
});

impl_status_strings!(PaymentStatus {
    Pending => "PENDING",
    Paid => "PAID",
    Refunded => "REFUNDED",
});

impl_status_strings!(PaymentMethod {
    Cod => "COD",
    CreditCard => "CREDIT_CARD",
});
