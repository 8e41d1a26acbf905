pub mod call;
pub mod identity;
pub mod media;
pub mod relay;
pub mod signal;
