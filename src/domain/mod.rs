//! Domain models for the property graph and its community hierarchy.

pub mod community;
pub mod graph;
