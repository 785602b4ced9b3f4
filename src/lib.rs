pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod ports;
pub mod sql;
pub mod storage;
pub mod tenant;
pub mod wire;
