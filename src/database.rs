//! Async client, sessions, parameters and rows.

mod client;
mod driver;
mod params;
mod row;
mod session;

pub use client::{
    AsyncDatabase, ClientOptions, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_MAX_CONNECTIONS, PoolStats,
    QueryOutput,
};
pub use params::Params;
pub use row::Row;
pub use session::Session;
