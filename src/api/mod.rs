//! HTTP control service
//!
//! REST endpoints over the bid store, message templates, bidding policy and
//! the bidder process.

pub mod routes;
pub mod server;

pub use server::{create_app, AppState};
