//! duet-core: shared library for two-party call signaling and media sessions.
//!
//! # Architecture (Clean Architecture)
//!
//! - **domain**: peer ids, signaling messages, call state, relay wire types (no I/O).
//! - **application**: use cases (signaling state machine, session lifecycle,
//!   call controller) + port traits.
//! - **adapters**: signaling buses (in-memory, QUIC relay), media engines
//!   (loopback, QUIC relay), participant registry, app events.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
