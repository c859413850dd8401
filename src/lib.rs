pub mod api;
pub mod availability;
pub mod booking;
pub mod config;
pub mod domain;
pub mod error;
pub mod limits;
pub mod middleware;
pub mod model;
pub mod observability;
pub mod refresh;
pub mod schema;
pub mod store;
pub mod tenant;
