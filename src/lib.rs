pub mod app;
pub mod clients;
pub mod codegen;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod models;
pub mod pipeline;
pub mod scanner;
pub mod server;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;
