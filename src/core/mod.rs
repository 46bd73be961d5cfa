pub mod config;
pub mod error;
pub mod model;
pub mod paths;
pub mod schema;
