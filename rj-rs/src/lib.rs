//! Red Juice: a scripting language for randomized math exercises.
//!
//! [`script`] holds the language itself; [`backend`] and [`random`] are the
//! two services it computes with.

pub mod backend;
pub mod cli;
pub mod config;
pub mod random;
pub mod script;
