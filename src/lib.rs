pub mod command;
pub mod compactor;
pub mod config;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod scheduler;
pub mod seed;
pub mod server;
pub mod session;
pub mod store;
pub mod wal;
