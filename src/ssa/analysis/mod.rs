//! SSA analyses.

pub mod cfg;
pub mod liveness;

pub use cfg::Cfg;
