pub mod config;
pub mod controller;
pub mod error;
pub mod fetcher;
pub mod lookup;
pub mod market;
pub mod normalize;
pub mod overrides;
pub mod pipeline;
pub mod reconcile;
pub mod source;
pub mod stats;
pub mod types;

pub use error::{CycleError, FetchError, OverrideError};
pub use market::Market;
pub use types::{Category, CategoryView, MarketEvent, MarketSnapshot, OverrideRecord, TokenRecord};
