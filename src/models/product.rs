use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub category_id: Option<i64>,
    pub price: Decimal,
    pub stock_quantity: i64,
    pub sku: String,
    pub is_active: bool,
    pub is_featured: bool,
    pub created_at: NaiveDateTime,
}

impl Product {
    pub fn is_in_stock(&self) -> bool {
        self.stock_quantity > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: i64,
    pub product_id: i64,
    pub name: String,
    pub value: String,
    pub price_adjustment: Decimal,
    pub stock_quantity: i64,
}

impl ProductVariant {
    /// Selling price of this variant given the parent product's price.
    pub fn price(&self, base_price: Decimal) -> Decimal {
        base_price + self.price_adjustment
    }

    pub fn label(&self) -> String {
        format!("{}: {}", self.name, self.value)
    }
}
