pub mod charge;
pub mod get_payment;
