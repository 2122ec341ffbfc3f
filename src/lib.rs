pub mod audit;
pub mod authority;
pub mod clock;
pub mod config;
pub mod crl;
pub mod delta_cache;
pub mod encoding;
pub mod issuing_point;
pub mod numbers;
pub mod publisher;
pub mod repository;
pub mod scheduler;
pub mod setup;
pub mod signing;
pub mod store;
pub mod telemetry;
