use rusqlite::{params, Connection, OptionalExtension};

use super::parse_decimal;
use crate::models::{CartItem, CartLine};

/// Returns the caller's cart id, creating the cart on first use.
pub fn get_or_create_cart(conn: &Connection, user_id: &str) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO carts (user_id) VALUES (?1) ON CONFLICT(user_id) DO NOTHING",
        params![user_id],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM carts WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?)
}

/// Stock backing a line: the variant's when one is chosen, else the product's.
const LINE_STOCK_FOR_PARAMS: &str = "(CASE WHEN ?3 = 0 \
       THEN (SELECT stock_quantity FROM products WHERE id = ?2) \
       ELSE COALESCE((SELECT stock_quantity FROM product_variants WHERE id = ?3), 0) END)";

/// Adds `quantity` to the (product, variant) line, merging with an existing
/// line. The stored quantity is clamped to available stock inside the write.
pub fn add_item(
    conn: &Connection,
    cart_id: i64,
    product_id: i64,
    variant_id: Option<i64>,
    quantity: i64,
) -> anyhow::Result<i64> {
    let variant_key = variant_id.unwrap_or(0);
    let sql = format!(
        "INSERT INTO cart_items (cart_id, product_id, variant_id, quantity) \
         VALUES (?1, ?2, ?3, MIN(?4, {LINE_STOCK_FOR_PARAMS})) \
         ON CONFLICT(cart_id, product_id, variant_id) DO UPDATE SET \
           quantity = MIN(cart_items.quantity + ?4, {LINE_STOCK_FOR_PARAMS}), \
           updated_at = datetime('now')"
    );
    conn.execute(&sql, params![cart_id, product_id, variant_key, quantity])?;
    conn.execute(
        "UPDATE carts SET updated_at = datetime('now') WHERE id = ?1",
        params![cart_id],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM cart_items WHERE cart_id = ?1 AND product_id = ?2 AND variant_id = ?3",
        params![cart_id, product_id, variant_key],
        |row| row.get(0),
    )?)
}

pub fn get_item(conn: &Connection, cart_id: i64, item_id: i64) -> anyhow::Result<Option<CartItem>> {
    Ok(conn
        .query_row(
            "SELECT id, cart_id, product_id, variant_id, quantity FROM cart_items \
             WHERE id = ?1 AND cart_id = ?2",
            params![item_id, cart_id],
            |row| {
                let variant_id: i64 = row.get(3)?;
                Ok(CartItem {
                    id: row.get(0)?,
                    cart_id: row.get(1)?,
                    product_id: row.get(2)?,
                    variant_id: (variant_id != 0).then_some(variant_id),
                    quantity: row.get(4)?,
                })
            },
        )
        .optional()?)
}

/// Sets a line's quantity, clamped to stock. Returns false if the line is not in this cart.
pub fn set_item_quantity(
    conn: &Connection,
    cart_id: i64,
    item_id: i64,
    quantity: i64,
) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE cart_items SET \
           quantity = MIN(?1, CASE WHEN cart_items.variant_id = 0 \
             THEN (SELECT stock_quantity FROM products p WHERE p.id = cart_items.product_id) \
             ELSE COALESCE((SELECT stock_quantity FROM product_variants v WHERE v.id = cart_items.variant_id), 0) END), \
           updated_at = datetime('now') \
         WHERE id = ?2 AND cart_id = ?3",
        params![quantity, item_id, cart_id],
    )?;
    Ok(changed > 0)
}

pub fn remove_item(conn: &Connection, cart_id: i64, item_id: i64) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "DELETE FROM cart_items WHERE id = ?1 AND cart_id = ?2",
        params![item_id, cart_id],
    )?;
    Ok(changed > 0)
}

pub fn clear_cart(conn: &Connection, cart_id: i64) -> anyhow::Result<usize> {
    Ok(conn.execute("DELETE FROM cart_items WHERE cart_id = ?1", params![cart_id])?)
}

/// Cart lines priced live from the current product and variant rows.
pub fn cart_lines(conn: &Connection, cart_id: i64) -> anyhow::Result<Vec<CartLine>> {
    let mut stmt = conn.prepare(
        "SELECT ci.id, ci.product_id, p.name, ci.variant_id, v.name, v.value, ci.quantity, \
                p.price, v.price_adjustment, \
                CASE WHEN ci.variant_id = 0 THEN p.stock_quantity ELSE COALESCE(v.stock_quantity, 0) END \
         FROM cart_items ci \
         JOIN products p ON p.id = ci.product_id \
         LEFT JOIN product_variants v ON v.id = ci.variant_id \
         WHERE ci.cart_id = ?1 AND ci.quantity > 0 \
         ORDER BY ci.id",
    )?;
    let rows = stmt.query_map(params![cart_id], |row| Ok(parse_cart_line_row(row)))?;

    let mut lines = Vec::new();
    for row in rows {
        lines.push(row??);
    }
    Ok(lines)
}

fn parse_cart_line_row(row: &rusqlite::Row) -> anyhow::Result<CartLine> {
    let variant_id: i64 = row.get(3)?;
    let variant_name: Option<String> = row.get(4)?;
    let variant_value: Option<String> = row.get(5)?;
    let base_price: String = row.get(7)?;
    let adjustment: Option<String> = row.get(8)?;

    let mut unit_price = parse_decimal(&base_price)?;
    if let Some(adjustment) = adjustment {
        unit_price += parse_decimal(&adjustment)?;
    }

    Ok(CartLine {
        id: row.get(0)?,
        product_id: row.get(1)?,
        product_name: row.get(2)?,
        variant_id: (variant_id != 0).then_some(variant_id),
        variant_label: variant_name
            .zip(variant_value)
            .map(|(name, value)| format!("{name}: {value}")),
        quantity: row.get(6)?,
        unit_price,
        stock_quantity: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, catalog};
    use rust_decimal_macros::dec;

    #[test]
    fn test_add_merges_and_clamps_to_stock() {
        let conn = db::init_db(":memory:").unwrap();
        let product = catalog::tests::seed_product(&conn, "oil", dec!(800), 5);
        let cart = get_or_create_cart(&conn, "user-1").unwrap();
        assert_eq!(get_or_create_cart(&conn, "user-1").unwrap(), cart);

        let first = add_item(&conn, cart, product.id, None, 3).unwrap();
        let second = add_item(&conn, cart, product.id, None, 4).unwrap();
        assert_eq!(first, second);

        let lines = cart_lines(&conn, cart).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 5);
    }

    #[test]
    fn test_variant_lines_are_separate_and_priced_with_adjustment() {
        let conn = db::init_db(":memory:").unwrap();
        let product = catalog::tests::seed_product(&conn, "robe", dec!(3000), 10);
        let large = catalog::insert_variant(&conn, product.id, "Size", "L", dec!(250), 4).unwrap();
        let cart = get_or_create_cart(&conn, "user-1").unwrap();

        add_item(&conn, cart, product.id, None, 1).unwrap();
        add_item(&conn, cart, product.id, Some(large.id), 2).unwrap();

        let lines = cart_lines(&conn, cart).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].unit_price, dec!(3000));
        assert_eq!(lines[1].unit_price, dec!(3250));
        assert_eq!(lines[1].variant_label.as_deref(), Some("Size: L"));
    }

    #[test]
    fn test_variant_line_clamps_to_variant_stock() {
        let conn = db::init_db(":memory:").unwrap();
        let product = catalog::tests::seed_product(&conn, "robe", dec!(3000), 10);
        let small = catalog::insert_variant(&conn, product.id, "Size", "S", dec!(0), 2).unwrap();
        let cart = get_or_create_cart(&conn, "user-1").unwrap();

        let item = add_item(&conn, cart, product.id, Some(small.id), 5).unwrap();
        let lines = cart_lines(&conn, cart).unwrap();
        assert_eq!(lines[0].quantity, 2);
        assert_eq!(lines[0].stock_quantity, 2);

        assert!(set_item_quantity(&conn, cart, item, 9).unwrap());
        assert_eq!(get_item(&conn, cart, item).unwrap().unwrap().quantity, 2);
    }

    #[test]
    fn test_set_quantity_clamps_and_scopes_to_cart() {
        let conn = db::init_db(":memory:").unwrap();
        let product = catalog::tests::seed_product(&conn, "candle", dec!(500), 3);
        let cart = get_or_create_cart(&conn, "user-1").unwrap();
        let other = get_or_create_cart(&conn, "user-2").unwrap();
        let item = add_item(&conn, cart, product.id, None, 1).unwrap();

        assert!(set_item_quantity(&conn, cart, item, 10).unwrap());
        assert_eq!(get_item(&conn, cart, item).unwrap().unwrap().quantity, 3);
        assert!(!set_item_quantity(&conn, other, item, 1).unwrap());
        assert!(!remove_item(&conn, other, item).unwrap());
        assert!(remove_item(&conn, cart, item).unwrap());
    }
}
