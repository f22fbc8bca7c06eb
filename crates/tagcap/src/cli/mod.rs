//! Command handlers for the tagcap CLI.

pub mod caption;
pub mod check;
pub mod config;
