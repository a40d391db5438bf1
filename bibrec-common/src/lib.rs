//! # bibrec common library
//!
//! Shared code for the bibrec crates:
//! - Error and result types
//! - Bootstrap configuration (TOML) and its resolution rules

pub mod config;
pub mod error;

pub use error::{Error, Result};
