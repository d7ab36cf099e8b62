//! Core data types for the price-watch bot.

pub mod alert;
pub mod call;
pub mod exchange;
pub mod format;
pub mod price;

pub use alert::*;
pub use call::*;
pub use exchange::*;
pub use format::*;
pub use price::*;
