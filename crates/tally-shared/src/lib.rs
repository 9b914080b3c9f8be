//! # tally-shared
//!
//! Domain types shared by every Tally crate: the billing entities, the
//! derived-status rules, and the field-level audit diff.

pub mod audit;
pub mod constants;
pub mod error;
pub mod models;
pub mod record;
pub mod status;
pub mod types;

pub use error::DomainError;
pub use models::*;
pub use record::{Collection, Record};
pub use types::*;
