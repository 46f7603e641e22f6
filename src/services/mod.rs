pub mod billing;
pub mod stripe;
