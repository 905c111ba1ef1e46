//! Emote resolver and resize cache
//!
//! Resolves emote names against a local emote directory, a namespace catalog
//! or an upstream provider, then serves resized renditions that are produced
//! once and cached on disk.

pub mod app;
pub mod catalog;
pub mod db;
pub mod error;
pub mod image;
pub mod models;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod store;

pub use error::{Error, Result};
