//! Read-side join of orders with their products and addresses.
//!
//! Stored orders only reference products. Views are composed here with two
//! batched lookups per listing, and never written back.

use std::collections::{BTreeSet, HashMap};

use shopwright_core::{AddressId, ProductId};

use crate::db::{RepositoryError, Store};
use crate::models::{Address, Order, OrderItemView, OrderView, Product, ProductSnapshot};

/// Compose views for a batch of orders, keeping their order.
///
/// # Errors
///
/// Returns a repository error if a lookup fails.
pub async fn compose<S: Store>(
    store: &S,
    orders: Vec<Order>,
) -> Result<Vec<OrderView>, RepositoryError> {
    if orders.is_empty() {
        return Ok(Vec::new());
    }

    let product_ids: Vec<ProductId> = orders
        .iter()
        .flat_map(|order| order.items.iter().map(|item| item.product_id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let address_ids: Vec<AddressId> = orders
        .iter()
        .map(|order| order.address_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let products: HashMap<ProductId, Product> = store
        .find_products(&product_ids)
        .await?
        .into_iter()
        .map(|product| (product.id, product))
        .collect();
    let addresses: HashMap<AddressId, Address> = store
        .find_addresses(&address_ids)
        .await?
        .into_iter()
        .map(|address| (address.id, address))
        .collect();

    Ok(orders
        .into_iter()
        .map(|order| view_of(order, &products, &addresses))
        .collect())
}

/// Compose the view of a single order.
///
/// # Errors
///
/// Returns a repository error if a lookup fails.
pub async fn compose_one<S: Store>(store: &S, order: Order) -> Result<OrderView, RepositoryError> {
    compose(store, vec![order])
        .await?
        .pop()
        .ok_or_else(|| RepositoryError::DataCorruption("order view went missing".to_string()))
}

fn view_of(
    order: Order,
    products: &HashMap<ProductId, Product>,
    addresses: &HashMap<AddressId, Address>,
) -> OrderView {
    let items = order
        .items
        .iter()
        .map(|item| OrderItemView {
            product_id: item.product_id,
            quantity: item.quantity,
            product: products.get(&item.product_id).map(|product| ProductSnapshot {
                id: product.id,
                name: product.name.clone(),
                price: product.price,
                image: product.image.clone(),
            }),
        })
        .collect();

    OrderView {
        id: order.id,
        shipping_address: addresses.get(&order.address_id).cloned(),
        user_id: order.user_id,
        items,
        order_status: order.order_status,
        payment_status: order.payment_status,
        payment_method: order.payment_method,
        created_at: order.created_at,
        updated_at: order.updated_at,
    }
}
