pub mod auth;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod ratelimit;
pub mod routes;
pub mod state;
pub mod status;
pub mod storage;
