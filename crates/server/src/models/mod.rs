//! Domain models for the order, checkout and payment services.

pub mod address;
pub mod order;
pub mod payment_event;
pub mod product;

pub use address::{Address, NewAddress};
pub use order::{
    DailySales, NewOrder, Order, OrderFilter, OrderItemView, OrderView, ProductSnapshot,
    holds_stock,
};
pub use payment_event::{EventOutcome, NewPaymentEvent, PaymentEventRecord};
pub use product::Product;
