use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use super::{parse_decimal, parse_timestamp};
use crate::models::{Category, Product, ProductVariant};

// ── Categories ──

pub fn insert_category(
    conn: &Connection,
    name: &str,
    slug: &str,
    description: &str,
) -> anyhow::Result<Category> {
    conn.execute(
        "INSERT INTO categories (name, slug, description) VALUES (?1, ?2, ?3)",
        params![name, slug, description],
    )?;
    Ok(Category {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        slug: slug.to_string(),
        description: description.to_string(),
        is_active: true,
    })
}

pub fn list_categories(conn: &Connection) -> anyhow::Result<Vec<Category>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, slug, description, is_active FROM categories \
         WHERE is_active = 1 ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Category {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            description: row.get(3)?,
            is_active: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ── Products ──

pub struct NewProduct<'a> {
    pub name: &'a str,
    pub slug: &'a str,
    pub description: &'a str,
    pub category_id: Option<i64>,
    pub price: Decimal,
    pub stock_quantity: i64,
    pub sku: &'a str,
    pub is_featured: bool,
}

#[derive(Debug, Default)]
pub struct ProductFilter {
    pub category_slug: Option<String>,
    pub featured: Option<bool>,
    pub query: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

const PRODUCT_COLUMNS: &str = "p.id, p.name, p.slug, p.description, p.category_id, p.price, \
     p.stock_quantity, p.sku, p.is_active, p.is_featured, p.created_at";

pub fn insert_product(conn: &Connection, new: &NewProduct) -> anyhow::Result<Product> {
    conn.execute(
        "INSERT INTO products (name, slug, description, category_id, price, stock_quantity, sku, is_featured) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            new.name,
            new.slug,
            new.description,
            new.category_id,
            new.price.to_string(),
            new.stock_quantity,
            new.sku,
            new.is_featured,
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_product(conn, id)?.ok_or_else(|| anyhow::anyhow!("product {id} vanished after insert"))
}

pub fn get_product(conn: &Connection, id: i64) -> anyhow::Result<Option<Product>> {
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id = ?1");
    let result = conn
        .query_row(&sql, params![id], |row| Ok(parse_product_row(row)))
        .optional()?;
    result.transpose()
}

pub fn get_product_by_slug(conn: &Connection, slug: &str) -> anyhow::Result<Option<Product>> {
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.slug = ?1 AND p.is_active = 1");
    let result = conn
        .query_row(&sql, params![slug], |row| Ok(parse_product_row(row)))
        .optional()?;
    result.transpose()
}

/// Active products matching `filter`, newest first.
pub fn list_products(conn: &Connection, filter: &ProductFilter) -> anyhow::Result<Vec<Product>> {
    let mut sql = format!(
        "SELECT {PRODUCT_COLUMNS} FROM products p \
         LEFT JOIN categories c ON c.id = p.category_id \
         WHERE p.is_active = 1"
    );
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(slug) = &filter.category_slug {
        args.push(Box::new(slug.clone()));
        sql.push_str(&format!(" AND c.slug = ?{}", args.len()));
    }
    if let Some(featured) = filter.featured {
        args.push(Box::new(featured));
        sql.push_str(&format!(" AND p.is_featured = ?{}", args.len()));
    }
    if let Some(q) = filter.query.as_deref().filter(|q| !q.trim().is_empty()) {
        args.push(Box::new(format!("%{}%", q.trim())));
        sql.push_str(&format!(" AND p.name LIKE ?{}", args.len()));
    }
    sql.push_str(" ORDER BY p.created_at DESC, p.id DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
        |row| Ok(parse_product_row(row)),
    )?;

    let mut products = Vec::new();
    for row in rows {
        let product = row??;
        // prices are TEXT, so range filtering happens on the parsed value
        if filter.min_price.is_some_and(|min| product.price < min) {
            continue;
        }
        if filter.max_price.is_some_and(|max| product.price > max) {
            continue;
        }
        products.push(product);
    }
    Ok(products)
}

pub fn update_product_price(conn: &Connection, id: i64, price: Decimal) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE products SET price = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![price.to_string(), id],
    )?;
    Ok(changed > 0)
}

fn parse_product_row(row: &rusqlite::Row) -> anyhow::Result<Product> {
    let price: String = row.get(5)?;
    let created_at: String = row.get(10)?;
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        category_id: row.get(4)?,
        price: parse_decimal(&price)?,
        stock_quantity: row.get(6)?,
        sku: row.get(7)?,
        is_active: row.get(8)?,
        is_featured: row.get(9)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

// ── Variants ──

pub fn insert_variant(
    conn: &Connection,
    product_id: i64,
    name: &str,
    value: &str,
    price_adjustment: Decimal,
    stock_quantity: i64,
) -> anyhow::Result<ProductVariant> {
    conn.execute(
        "INSERT INTO product_variants (product_id, name, value, price_adjustment, stock_quantity) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![product_id, name, value, price_adjustment.to_string(), stock_quantity],
    )?;
    Ok(ProductVariant {
        id: conn.last_insert_rowid(),
        product_id,
        name: name.to_string(),
        value: value.to_string(),
        price_adjustment,
        stock_quantity,
    })
}

pub fn get_variant(conn: &Connection, id: i64) -> anyhow::Result<Option<ProductVariant>> {
    let result = conn
        .query_row(
            "SELECT id, product_id, name, value, price_adjustment, stock_quantity \
             FROM product_variants WHERE id = ?1",
            params![id],
            |row| Ok(parse_variant_row(row)),
        )
        .optional()?;
    result.transpose()
}

pub fn list_variants(conn: &Connection, product_id: i64) -> anyhow::Result<Vec<ProductVariant>> {
    let mut stmt = conn.prepare(
        "SELECT id, product_id, name, value, price_adjustment, stock_quantity \
         FROM product_variants WHERE product_id = ?1 ORDER BY name, value",
    )?;
    let rows = stmt.query_map(params![product_id], |row| Ok(parse_variant_row(row)))?;

    let mut variants = Vec::new();
    for row in rows {
        variants.push(row??);
    }
    Ok(variants)
}

fn parse_variant_row(row: &rusqlite::Row) -> anyhow::Result<ProductVariant> {
    let adjustment: String = row.get(4)?;
    Ok(ProductVariant {
        id: row.get(0)?,
        product_id: row.get(1)?,
        name: row.get(2)?,
        value: row.get(3)?,
        price_adjustment: parse_decimal(&adjustment)?,
        stock_quantity: row.get(5)?,
    })
}
