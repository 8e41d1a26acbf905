pub mod loopback;
pub mod track;
