//! Domain Module
//!
//! Core domain types, predicates and port traits.

pub mod instance;
pub mod ports;
pub mod predicate;

pub use instance::*;
pub use ports::*;
pub use predicate::*;
