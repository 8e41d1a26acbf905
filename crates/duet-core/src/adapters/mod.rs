pub mod bus;
pub mod events;
pub mod media;
pub mod registry;
pub mod relay;
