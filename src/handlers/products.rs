use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::catalog::{self, ProductFilter};
use crate::errors::AppError;
use crate::models::{Category, Product, ProductVariant};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ProductsQuery {
    pub category: Option<String>,
    pub featured: Option<bool>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

#[derive(Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    product: Product,
    in_stock: bool,
    variants: Vec<ProductVariant>,
}

// GET /api/products/
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProductsQuery>,
) -> Result<Json<Vec<Product>>, AppError> {
    let filter = ProductFilter {
        category_slug: query.category.filter(|c| !c.is_empty()),
        featured: query.featured,
        ..Default::default()
    };
    let conn = state.conn()?;
    Ok(Json(catalog::list_products(&conn, &filter)?))
}

// GET /api/products/search/
pub async fn search_products(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Product>>, AppError> {
    if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
        if min > max {
            return Err(AppError::invalid("min_price", "min_price cannot exceed max_price"));
        }
    }
    let filter = ProductFilter {
        category_slug: query.category.filter(|c| !c.is_empty()),
        featured: None,
        query: query.q,
        min_price: query.min_price,
        max_price: query.max_price,
    };
    let conn = state.conn()?;
    Ok(Json(catalog::list_products(&conn, &filter)?))
}

// GET /api/products/categories/
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Category>>, AppError> {
    let conn = state.conn()?;
    Ok(Json(catalog::list_categories(&conn)?))
}

// GET /api/products/:slug/
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<ProductDetail>, AppError> {
    let conn = state.conn()?;
    let product = catalog::get_product_by_slug(&conn, &slug)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
    let variants = catalog::list_variants(&conn, product.id)?;
    Ok(Json(ProductDetail {
        in_stock: product.is_in_stock(),
        product,
        variants,
    }))
}
