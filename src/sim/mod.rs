pub mod action;
pub mod constants;
pub mod dream;
pub mod entity;
pub mod log;
pub mod map;
pub mod observation;
pub mod render;
pub mod scheduler;
pub mod spatial;
pub mod systems;
pub mod throughput;
pub mod world;

pub use action::{ActionBatch, ActionMode, Control};
pub use world::{SimError, Simulation};
