// Library for tests to access modules

pub mod aggregation;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod models;
pub mod retention;
pub mod routes;
pub mod scheduler;
pub mod store;
