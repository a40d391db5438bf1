//! bibrec-rr - Reference resolver library
//!
//! Reconciles citation entries against a curated canonical index, resolving
//! unmatched entries through live lookup services under bounded concurrency.

pub mod arxiv;
pub mod bibtex;
pub mod config;
pub mod decision;
pub mod error;
pub mod index;
pub mod lookup;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod reconcile;

pub use error::{ReconcileError, Result};
