//! JSON-based [`SignalCodec`] implementation.
//!
//! Payloads are the flat camelCase objects browser clients store, e.g.
//! `{"senderId":"111111","targetId":"222222","timestamp":1700000000000}`.

use crate::application::ports::SignalCodec;
use crate::domain::signal::{SignalKey, SignalMsg};

/// Encodes / decodes [`SignalMsg`] payloads using JSON (via `serde_json`).
pub struct JsonSignalCodec;

impl SignalCodec for JsonSignalCodec {
    fn encode(&self, msg: &SignalMsg) -> anyhow::Result<String> {
        let json = match msg {
            SignalMsg::CallRequest(req) => serde_json::to_string(req)?,
            SignalMsg::CallStart(start) => serde_json::to_string(start)?,
        };
        Ok(json)
    }

    fn decode(&self, key: SignalKey, raw: &str) -> anyhow::Result<SignalMsg> {
        let msg = match key {
            SignalKey::CallRequest => SignalMsg::CallRequest(serde_json::from_str(raw)?),
            SignalKey::StartCall => SignalMsg::CallStart(serde_json::from_str(raw)?),
        };
        Ok(msg)
    }
}
