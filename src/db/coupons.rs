use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use super::{fmt_timestamp, parse_decimal, parse_timestamp};
use crate::models::{Coupon, DiscountType};

pub struct NewCoupon<'a> {
    pub code: &'a str,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub minimum_order_amount: Decimal,
    pub maximum_discount_amount: Option<Decimal>,
    pub usage_limit: Option<i64>,
    pub valid_from: NaiveDateTime,
    pub valid_until: NaiveDateTime,
}

pub fn insert_coupon(conn: &Connection, new: &NewCoupon) -> anyhow::Result<Coupon> {
    conn.execute(
        "INSERT INTO coupons (code, discount_type, discount_value, minimum_order_amount, \
           maximum_discount_amount, usage_limit, valid_from, valid_until) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            new.code,
            new.discount_type.as_str(),
            new.discount_value.to_string(),
            new.minimum_order_amount.to_string(),
            new.maximum_discount_amount.map(|d| d.to_string()),
            new.usage_limit,
            fmt_timestamp(new.valid_from),
            fmt_timestamp(new.valid_until),
        ],
    )?;
    Ok(Coupon {
        id: conn.last_insert_rowid(),
        code: new.code.to_string(),
        discount_type: new.discount_type,
        discount_value: new.discount_value,
        minimum_order_amount: new.minimum_order_amount,
        maximum_discount_amount: new.maximum_discount_amount,
        usage_limit: new.usage_limit,
        used_count: 0,
        is_active: true,
        valid_from: new.valid_from,
        valid_until: new.valid_until,
    })
}

/// Case-insensitive lookup by code.
pub fn find_by_code(conn: &Connection, code: &str) -> anyhow::Result<Option<Coupon>> {
    let result = conn
        .query_row(
            "SELECT id, code, discount_type, discount_value, minimum_order_amount, \
               maximum_discount_amount, usage_limit, used_count, is_active, valid_from, valid_until \
             FROM coupons WHERE code = ?1 COLLATE NOCASE",
            params![code.trim()],
            |row| Ok(parse_coupon_row(row)),
        )
        .optional()?;
    result.transpose()
}

/// Consumes one use, guarded by the usage limit inside the write.
pub fn increment_usage(conn: &Connection, coupon_id: i64) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE coupons SET used_count = used_count + 1 \
         WHERE id = ?1 AND (usage_limit IS NULL OR used_count < usage_limit)",
        params![coupon_id],
    )?;
    Ok(changed > 0)
}

fn parse_coupon_row(row: &rusqlite::Row) -> anyhow::Result<Coupon> {
    let discount_type: String = row.get(2)?;
    let discount_value: String = row.get(3)?;
    let minimum: String = row.get(4)?;
    let maximum: Option<String> = row.get(5)?;
    let valid_from: String = row.get(9)?;
    let valid_until: String = row.get(10)?;

    Ok(Coupon {
        id: row.get(0)?,
        code: row.get(1)?,
        discount_type: DiscountType::parse(&discount_type),
        discount_value: parse_decimal(&discount_value)?,
        minimum_order_amount: parse_decimal(&minimum)?,
        maximum_discount_amount: maximum.as_deref().map(parse_decimal).transpose()?,
        usage_limit: row.get(6)?,
        used_count: row.get(7)?,
        is_active: row.get(8)?,
        valid_from: parse_timestamp(&valid_from)?,
        valid_until: parse_timestamp(&valid_until)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;
    use rust_decimal_macros::dec;

    pub(crate) fn seed_save10(conn: &Connection, usage_limit: Option<i64>) -> Coupon {
        insert_coupon(
            conn,
            &NewCoupon {
                code: "SAVE10",
                discount_type: DiscountType::Percentage,
                discount_value: dec!(10),
                minimum_order_amount: dec!(1000),
                maximum_discount_amount: Some(dec!(500)),
                usage_limit,
                valid_from: db::parse_timestamp("2020-01-01 00:00:00").unwrap(),
                valid_until: db::parse_timestamp("2099-12-31 23:59:59").unwrap(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_find_by_code_ignores_case() {
        let conn = db::init_db(":memory:").unwrap();
        seed_save10(&conn, None);
        let found = find_by_code(&conn, " save10 ").unwrap().unwrap();
        assert_eq!(found.maximum_discount_amount, Some(dec!(500)));
        assert!(find_by_code(&conn, "NOPE").unwrap().is_none());
    }

    #[test]
    fn test_code_is_unique_regardless_of_case() {
        let conn = db::init_db(":memory:").unwrap();
        let original = seed_save10(&conn, None);

        let err = insert_coupon(
            &conn,
            &NewCoupon {
                code: "save10",
                discount_type: DiscountType::Fixed,
                discount_value: dec!(200),
                minimum_order_amount: dec!(0),
                maximum_discount_amount: None,
                usage_limit: None,
                valid_from: original.valid_from,
                valid_until: original.valid_until,
            },
        )
        .unwrap_err();
        let sql_err = err.downcast_ref::<rusqlite::Error>().unwrap();
        assert!(db::is_constraint_violation(sql_err));
        assert_eq!(find_by_code(&conn, "save10").unwrap().unwrap().id, original.id);
    }

    #[test]
    fn test_increment_respects_limit() {
        let conn = db::init_db(":memory:").unwrap();
        let coupon = seed_save10(&conn, Some(1));
        assert!(increment_usage(&conn, coupon.id).unwrap());
        assert!(!increment_usage(&conn, coupon.id).unwrap());
        assert_eq!(find_by_code(&conn, "SAVE10").unwrap().unwrap().used_count, 1);
    }
}
