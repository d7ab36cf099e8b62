//! Market price collection from exchanges.
//!
//! ## Architecture
//!
//! - `client` - `PriceClient` trait implemented per exchange, plus a mock
//! - `rest` - Bitget and Bybit REST clients
//! - `gateway` - ordered fallback across exchanges and markets

pub mod client;
pub mod error;
pub mod gateway;
pub mod rest;

pub use client::*;
pub use error::*;
pub use gateway::*;
pub use rest::{BitgetRestFetcher, BybitRestFetcher};
