//! Durable record store for taskmesh

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{RecordRepository, SqliteRecordRepository};
