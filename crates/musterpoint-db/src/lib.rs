//! PostgreSQL persistence for musterpoint: configuration, pooling,
//! migrations, row models and query functions.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
