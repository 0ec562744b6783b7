pub mod booking;
pub mod calendar;
pub mod config;
pub mod dedup;
pub mod error;
pub mod filter;
pub mod mail;
pub mod matcher;
pub mod model;
pub mod notifier;
pub mod observability;
pub mod reconcile;
pub mod scheduler;
