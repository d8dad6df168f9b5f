//! Street Meat - community feed client
//!
//! Builds the per-location feed (order announcements plus community posts),
//! keeps it current from the push channel, and exposes both through the
//! `streetmeat` CLI.

pub mod api;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod feed;
pub mod model;
pub mod protocol;
pub mod reconciler;
pub mod sync;
pub mod timestamp;

#[cfg(test)]
pub mod test_utils;

pub use error::FeedError;
pub use feed::{FeedAggregator, FeedItem, FeedLocation, Viewer};
pub use sync::{FeedSync, PatchSync, RebuildSync};
