pub mod collision;
pub mod dynamics;
pub mod planner;
pub mod metrics;
