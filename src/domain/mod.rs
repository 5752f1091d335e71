//! Domain layer: aggregates, value objects, the status-flow engine and events.
pub mod aggregates;
pub mod events;
pub mod flow;
pub mod value_objects;
