pub mod carts;
pub mod checkout;
pub mod notifications;
pub mod settlement;
