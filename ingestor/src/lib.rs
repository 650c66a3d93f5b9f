pub mod broadcast;
pub mod classify;
pub mod config;
pub mod db;
pub mod emitter;
pub mod errors;
pub mod liveness;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod outbox;
pub mod parse;
pub mod pipeline;
pub mod rest;
pub mod store;
pub mod ws;
