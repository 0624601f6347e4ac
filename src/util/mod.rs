pub mod b64;
pub mod money_amount;
pub mod retry;
pub mod timestamp;
