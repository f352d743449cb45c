use rusqlite::Connection;

use crate::db::{carts, catalog};
use crate::errors::AppError;
use crate::models::CartSummary;

#[derive(Debug, thiserror::Error)]
pub enum CartError {
    #[error("Product not found")]
    ProductNotFound,

    #[error("Variant not found for this product")]
    VariantNotFound,

    #[error("Cart item not found")]
    ItemNotFound,

    #[error("Only {available} items available")]
    InsufficientStock { available: i64 },

    #[error("Only {available} items available for this variant")]
    InsufficientVariantStock { available: i64 },

    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl From<CartError> for AppError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::ProductNotFound | CartError::ItemNotFound => AppError::NotFound(err.to_string()),
            CartError::VariantNotFound => AppError::invalid("variant_id", err.to_string()),
            CartError::InsufficientStock { .. }
            | CartError::InsufficientVariantStock { .. }
            | CartError::InvalidQuantity => AppError::invalid("quantity", err.to_string()),
            CartError::Database(e) => AppError::Internal(e),
        }
    }
}

/// The caller's cart, priced from current product and variant rows.
pub fn view(conn: &Connection, user_id: &str) -> Result<CartSummary, CartError> {
    let cart_id = carts::get_or_create_cart(conn, user_id)?;
    Ok(CartSummary::from_lines(cart_id, carts::cart_lines(conn, cart_id)?))
}

pub fn add(
    conn: &Connection,
    user_id: &str,
    product_id: i64,
    variant_id: Option<i64>,
    quantity: i64,
) -> Result<CartSummary, CartError> {
    if quantity < 1 {
        return Err(CartError::InvalidQuantity);
    }

    let product = catalog::get_product(conn, product_id)?
        .filter(|p| p.is_active)
        .ok_or(CartError::ProductNotFound)?;

    match variant_id {
        Some(id) => {
            let variant = catalog::get_variant(conn, id)?
                .filter(|v| v.product_id == product.id)
                .ok_or(CartError::VariantNotFound)?;
            if quantity > variant.stock_quantity {
                return Err(CartError::InsufficientVariantStock {
                    available: variant.stock_quantity,
                });
            }
        }
        None if quantity > product.stock_quantity => {
            return Err(CartError::InsufficientStock {
                available: product.stock_quantity,
            });
        }
        None => {}
    }

    let cart_id = carts::get_or_create_cart(conn, user_id)?;
    let item_id = carts::add_item(conn, cart_id, product.id, variant_id, quantity)?;
    tracing::debug!(cart_id = %cart_id, item_id = %item_id, quantity, "cart item added");

    view(conn, user_id)
}

/// Sets a line's quantity. Zero removes the line.
pub fn update(
    conn: &Connection,
    user_id: &str,
    item_id: i64,
    quantity: i64,
) -> Result<CartSummary, CartError> {
    let cart_id = carts::get_or_create_cart(conn, user_id)?;
    let item = carts::get_item(conn, cart_id, item_id)?.ok_or(CartError::ItemNotFound)?;

    if quantity < 0 {
        return Err(CartError::InvalidQuantity);
    }
    if quantity == 0 {
        carts::remove_item(conn, cart_id, item.id)?;
        return view(conn, user_id);
    }

    match item.variant_id {
        Some(id) => {
            let available = catalog::get_variant(conn, id)?.map_or(0, |v| v.stock_quantity);
            if quantity > available {
                return Err(CartError::InsufficientVariantStock { available });
            }
        }
        None => {
            let available = catalog::get_product(conn, item.product_id)?.map_or(0, |p| p.stock_quantity);
            if quantity > available {
                return Err(CartError::InsufficientStock { available });
            }
        }
    }

    carts::set_item_quantity(conn, cart_id, item.id, quantity)?;
    view(conn, user_id)
}

pub fn remove(conn: &Connection, user_id: &str, item_id: i64) -> Result<CartSummary, CartError> {
    let cart_id = carts::get_or_create_cart(conn, user_id)?;
    if !carts::remove_item(conn, cart_id, item_id)? {
        return Err(CartError::ItemNotFound);
    }
    view(conn, user_id)
}

pub fn clear(conn: &Connection, user_id: &str) -> Result<CartSummary, CartError> {
    let cart_id = carts::get_or_create_cart(conn, user_id)?;
    let removed = carts::clear_cart(conn, cart_id)?;
    tracing::debug!(cart_id = %cart_id, removed, "cart cleared");
    view(conn, user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rust_decimal_macros::dec;

    #[test]
    fn test_add_rejects_more_than_stock() {
        let conn = db::init_db(":memory:").unwrap();
        let product = catalog::tests::seed_product(&conn, "oil", dec!(800), 3);

        let err = add(&conn, "user-1", product.id, None, 4).unwrap_err();
        assert_eq!(err.to_string(), "Only 3 items available");

        let cart = add(&conn, "user-1", product.id, None, 2).unwrap();
        assert_eq!(cart.total_items, 2);
        assert_eq!(cart.total_price, dec!(1600));
    }

    #[test]
    fn test_repeated_add_merges_and_clamps() {
        let conn = db::init_db(":memory:").unwrap();
        let product = catalog::tests::seed_product(&conn, "oil", dec!(800), 3);

        add(&conn, "user-1", product.id, None, 2).unwrap();
        let cart = add(&conn, "user-1", product.id, None, 2).unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.total_items, 3);
    }

    #[test]
    fn test_variant_must_belong_to_product() {
        let conn = db::init_db(":memory:").unwrap();
        let robe = catalog::tests::seed_product(&conn, "robe", dec!(3000), 10);
        let oil = catalog::tests::seed_product(&conn, "oil", dec!(800), 10);
        let large = catalog::insert_variant(&conn, robe.id, "Size", "L", dec!(250), 1).unwrap();

        let err = add(&conn, "user-1", oil.id, Some(large.id), 1).unwrap_err();
        assert!(matches!(err, CartError::VariantNotFound));

        let err = add(&conn, "user-1", robe.id, Some(large.id), 2).unwrap_err();
        assert_eq!(err.to_string(), "Only 1 items available for this variant");

        let cart = add(&conn, "user-1", robe.id, Some(large.id), 1).unwrap();
        assert_eq!(cart.total_price, dec!(3250));
    }

    #[test]
    fn test_zero_quantity_and_unknown_product() {
        let conn = db::init_db(":memory:").unwrap();
        let product = catalog::tests::seed_product(&conn, "oil", dec!(800), 3);
        assert!(matches!(
            add(&conn, "user-1", product.id, None, 0),
            Err(CartError::InvalidQuantity)
        ));
        assert!(matches!(
            add(&conn, "user-1", 999, None, 1),
            Err(CartError::ProductNotFound)
        ));
    }

    #[test]
    fn test_update_to_zero_deletes_line() {
        let conn = db::init_db(":memory:").unwrap();
        let product = catalog::tests::seed_product(&conn, "oil", dec!(800), 3);
        let cart = add(&conn, "user-1", product.id, None, 1).unwrap();
        let item_id = cart.items[0].line.id;

        let err = update(&conn, "user-1", item_id, 5).unwrap_err();
        assert!(matches!(err, CartError::InsufficientStock { available: 3 }));

        let cart = update(&conn, "user-1", item_id, 3).unwrap();
        assert_eq!(cart.total_items, 3);

        let cart = update(&conn, "user-1", item_id, 0).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn test_items_are_scoped_to_their_cart() {
        let conn = db::init_db(":memory:").unwrap();
        let product = catalog::tests::seed_product(&conn, "oil", dec!(800), 3);
        let cart = add(&conn, "user-1", product.id, None, 1).unwrap();
        let item_id = cart.items[0].line.id;

        assert!(matches!(
            remove(&conn, "user-2", item_id),
            Err(CartError::ItemNotFound)
        ));
        assert!(matches!(
            update(&conn, "user-2", item_id, 1),
            Err(CartError::ItemNotFound)
        ));
        assert!(clear(&conn, "user-1").unwrap().is_empty());
    }
}
