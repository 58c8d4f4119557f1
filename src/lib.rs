pub mod api;
pub mod config;
pub mod logging;
pub mod models;
pub mod redirect;
pub mod seed;
pub mod serving;
pub mod storage;
