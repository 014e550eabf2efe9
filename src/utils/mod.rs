//! # Utilities Module
//!
//! Cross-cutting helpers that don't belong in domain-specific modules.

pub mod threading;
