pub mod channel;
pub mod config;
pub mod defaults;
pub mod harness;
pub mod humanize;
pub mod observability;
pub mod worker;
