mod client;
mod models;
mod store;

pub use client::Database;
pub use models::*;
pub use store::{ImportStore, ImportTransaction, StoreError};
