//! # Gatewayエンドポイント

pub mod health;
pub mod sign;
pub mod wallet;

pub use health::handle_health;
pub use sign::handle_sign;
pub use wallet::{handle_create_wallet, handle_list_wallets};
