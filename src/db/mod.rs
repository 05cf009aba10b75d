// SPDX-License-Identifier: MIT

//! SQLite persistence layer.

pub mod schema;
pub mod store;

pub use store::{SqliteStore, StateLookup};
