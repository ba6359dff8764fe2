//! Wallet ledger and ownership transfer engine for a second-hand coupon
//! marketplace.
//!
//! [`service::MarketService`] is the entry point. It keeps accounts, coupons,
//! the append-only transaction ledger and notifications in one sled database.

pub mod account;
pub mod catalog;
pub mod config;
pub mod coupon;
pub mod error;
pub mod external;
pub mod extract;
pub mod ledger;
pub mod lifecycle;
pub mod notify;
pub mod response;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

pub use error::{MarketError, Result};
pub use service::MarketService;
