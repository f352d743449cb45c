use chrono::NaiveDateTime;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::coupons;
use crate::errors::AppError;
use crate::models::Coupon;

#[derive(Debug, thiserror::Error)]
pub enum CouponError {
    #[error("Invalid coupon code")]
    UnknownCode,

    #[error("Order amount must be positive")]
    InvalidAmount,

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl From<CouponError> for AppError {
    fn from(err: CouponError) -> Self {
        match err {
            CouponError::UnknownCode => AppError::invalid("coupon_code", err.to_string()),
            CouponError::InvalidAmount => AppError::invalid("order_amount", err.to_string()),
            CouponError::Database(e) => AppError::Internal(e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CouponQuote {
    pub coupon_code: String,
    pub discount_amount: Decimal,
    pub new_total: Decimal,
}

/// Looks up `code`. Only an unknown code is an error; an expired or
/// used-up coupon simply quotes a zero discount.
pub fn find(conn: &Connection, code: &str) -> Result<Coupon, CouponError> {
    coupons::find_by_code(conn, code)?.ok_or(CouponError::UnknownCode)
}

pub fn quote(
    conn: &Connection,
    code: &str,
    order_amount: Decimal,
    now: NaiveDateTime,
) -> Result<CouponQuote, CouponError> {
    if order_amount < Decimal::ZERO {
        return Err(CouponError::InvalidAmount);
    }
    let coupon = find(conn, code)?;
    let discount_amount = coupon.calculate_discount(order_amount, now);
    Ok(CouponQuote {
        coupon_code: coupon.code,
        discount_amount,
        new_total: order_amount - discount_amount,
    })
}

/// Applies `code` to `amount` and consumes one use when it yields a discount.
/// Meant to run inside the caller's checkout transaction.
pub fn redeem(
    conn: &Connection,
    code: &str,
    amount: Decimal,
    now: NaiveDateTime,
) -> Result<(Coupon, Decimal), CouponError> {
    let coupon = find(conn, code)?;
    let mut discount = coupon.calculate_discount(amount, now);
    // lost the race for the last use
    if discount > Decimal::ZERO && !coupons::increment_usage(conn, coupon.id)? {
        discount = Decimal::ZERO;
    }
    Ok((coupon, discount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rust_decimal_macros::dec;

    fn now() -> NaiveDateTime {
        db::parse_timestamp("2025-06-01 12:00:00").unwrap()
    }

    #[test]
    fn test_save10_quote() {
        let conn = db::init_db(":memory:").unwrap();
        coupons::tests::seed_save10(&conn, Some(100));

        let quote = quote(&conn, "save10", dec!(8000), now()).unwrap();
        assert_eq!(quote.coupon_code, "SAVE10");
        assert_eq!(quote.discount_amount, dec!(500));
        assert_eq!(quote.new_total, dec!(7500));

        // quoting does not consume a use
        assert_eq!(find(&conn, "SAVE10").unwrap().used_count, 0);
    }

    #[test]
    fn test_ineligible_amount_quotes_zero_and_unknown_code_errors() {
        let conn = db::init_db(":memory:").unwrap();
        coupons::tests::seed_save10(&conn, None);

        let quote = quote(&conn, "SAVE10", dec!(500), now()).unwrap();
        assert_eq!(quote.discount_amount, Decimal::ZERO);
        assert_eq!(quote.new_total, dec!(500));

        assert!(matches!(
            super::quote(&conn, "BOGUS", dec!(8000), now()),
            Err(CouponError::UnknownCode)
        ));
    }

    #[test]
    fn test_redeem_consumes_until_limit() {
        let conn = db::init_db(":memory:").unwrap();
        coupons::tests::seed_save10(&conn, Some(1));

        let (_, first) = redeem(&conn, "SAVE10", dec!(2000), now()).unwrap();
        assert_eq!(first, dec!(200));
        let (_, second) = redeem(&conn, "SAVE10", dec!(2000), now()).unwrap();
        assert_eq!(second, Decimal::ZERO);
        assert_eq!(find(&conn, "SAVE10").unwrap().used_count, 1);
    }
}
