pub mod app;
pub mod blocking;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod service;
pub mod session;
pub mod storage;
