//! Libris application library
//!
//! Catalog and search modules plus the composition roots that wire them into
//! the two runnable services.

pub mod modules;
pub mod services;

/// Re-export commonly used types
pub use modules::*;
