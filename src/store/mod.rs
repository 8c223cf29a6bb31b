pub mod checkin;
pub mod checkout;
pub mod lease;
pub mod lock;
