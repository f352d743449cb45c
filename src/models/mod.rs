pub mod availability;
pub mod booking;
pub mod cart;
pub mod coupon;
pub mod order;
pub mod payment;
pub mod product;
pub mod service;

pub use availability::{parse_date, parse_time, Slot, WeeklySchedule};
pub use booking::{
    Booking, BookingAddon, BookingCancellation, BookingReschedule, BookingStatus,
    CancellationReason, TimeSlot,
};
pub use cart::{CartItem, CartLine, CartLineView, CartSummary};
pub use coupon::{Coupon, DiscountType};
pub use order::{Address, Order, OrderItem, OrderStatus, OrderTracking, ServiceOrder};
pub use payment::{
    CardDetails, MpesaDetails, Payment, PaymentMethod, PaymentRefund, PaymentStatus,
    PaymentTarget, PaymentWebhook,
};
pub use product::{Category, Product, ProductVariant};
pub use service::{Service, ServiceAddon, Therapist, TherapistAvailability};

/// `NaiveTime` as `"HH:MM"` on the wire.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::availability::parse_time(&raw).map_err(serde::de::Error::custom)
    }
}

/// `Option<NaiveTime>` as `"HH:MM"` or null.
pub mod hhmm_opt {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => s.serialize_str(&t.format("%H:%M").to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|r| super::availability::parse_time(&r).map_err(serde::de::Error::custom))
            .transpose()
    }
}
