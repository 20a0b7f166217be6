pub mod approval;
pub mod clock;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod filter;
pub mod hashing;
pub mod models;
pub mod monitor;
pub mod pipeline;
pub mod routes;
pub mod scanning;
pub mod schedule;
pub mod schema;
pub mod state;
pub mod store;
pub mod workers;

pub use workers::{default_handlers, Worker};
