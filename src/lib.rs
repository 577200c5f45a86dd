#![forbid(unsafe_code)]

pub mod app;
pub mod cli;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod fsutil;
pub mod logging;
pub mod materialize;
pub mod model;
pub mod provider;
pub mod repair;
pub mod sanitize;
pub mod settings;
pub mod store;
pub mod sync;
