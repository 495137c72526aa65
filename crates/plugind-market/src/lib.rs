//! Market catalog client.
//!
//! The catalog is fetched at most once per request through a
//! [`MarketProxy`]; [`MarketDb`] then answers count/list/get queries over
//! the snapshot, annotating every entry with its installed state against
//! the local registry.

pub mod catalog;
pub mod entry;
pub mod proxy;

pub use catalog::{MarketDb, MarketListParams, SortDirection};
pub use entry::{MarketEntry, MarketVersion};
pub use proxy::MarketProxy;
