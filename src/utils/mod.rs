//! The `utils` module provides a collection of utility functions and common
//! definitions used across the broker.
//!
//! It centralizes the error taxonomy, logging initialisation and identifier
//! generation so every layer reports failures and names things the same way.

pub mod error;
pub mod id;
pub mod logging;
