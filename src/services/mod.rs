pub mod availability;
pub mod booking;
pub mod cart;
pub mod coupons;
pub mod gateway;
pub mod messaging;
pub mod orders;
pub mod payments;
