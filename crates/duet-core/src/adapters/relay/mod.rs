//! QUIC relay: one control stream per connection carrying both the signaling
//! bus and the media room protocol.

pub mod bus;
pub mod client;
pub mod codec;
pub mod engine;
pub mod server;
