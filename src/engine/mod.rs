//! Core engine: coin registry, transactional ratio matrix, scoring and the
//! scout/jump-chain walk.

pub mod registry;
pub mod ratios;
pub mod scoring;
pub mod single_flight;
pub mod scout;
