//! The two filters are independent; neither references the other.

pub mod bots;
pub mod prefetch;
