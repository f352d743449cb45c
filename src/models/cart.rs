use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub id: i64,
    pub cart_id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub quantity: i64,
}

/// A cart item joined with its live product/variant pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub variant_id: Option<i64>,
    pub variant_label: Option<String>,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub stock_quantity: i64,
}

impl CartLine {
    pub fn total_price(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CartSummary {
    pub id: i64,
    pub items: Vec<CartLineView>,
    pub total_items: i64,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartLineView {
    #[serde(flatten)]
    pub line: CartLine,
    pub total_price: Decimal,
}

impl CartSummary {
    pub fn from_lines(cart_id: i64, lines: Vec<CartLine>) -> Self {
        let total_items = lines.iter().map(|l| l.quantity).sum();
        let total_price = lines.iter().map(CartLine::total_price).sum();
        let items = lines
            .into_iter()
            .map(|line| CartLineView {
                total_price: line.total_price(),
                line,
            })
            .collect();
        Self {
            id: cart_id,
            items,
            total_items,
            total_price,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
