pub mod ports;

pub mod call_controller;
pub mod call_signaling;
pub mod session_lifecycle;
