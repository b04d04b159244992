pub mod auth;
pub mod bootstrap;
pub mod colleges;
pub mod config;
pub mod entries;
pub mod error;
pub mod extract;
pub mod files;
pub mod middleware;
pub mod notifications;
pub mod notify;
pub mod policy;
pub mod routes;
pub mod state;
pub mod storage;
pub mod templates;
pub mod token;
pub mod users;

pub use routes::router;
