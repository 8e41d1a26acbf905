//! TerminalAppEvents: implements the [`AppEvents`] port by printing to stdout.

use async_trait::async_trait;

use duet_core::application::ports::{AppEvents, Participant};
use duet_core::domain::call::CallState;
use duet_core::domain::identity::PeerId;
use duet_core::domain::media::video_container;

#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalAppEvents;

#[async_trait]
impl AppEvents for TerminalAppEvents {
    async fn emit_call_state(&self, state: &CallState) {
        match state {
            CallState::IncomingRinging(caller) => {
                println!("* incoming call from {caller}; type `accept` or `reject`")
            }
            other => println!("* {other}"),
        }
    }

    async fn emit_participant_joined(&self, participant: &Participant) {
        let media = match (&participant.audio_track, &participant.video_track) {
            (Some(_), Some(_)) => "audio+video",
            (Some(_), None) => "audio",
            (None, Some(_)) => "video",
            (None, None) => "no media",
        };
        println!(
            "* {} joined ({media}, rendering into {})",
            participant.id,
            video_container(&participant.id)
        );
    }

    async fn emit_participant_left(&self, peer_id: &PeerId) {
        println!("* {peer_id} left");
    }

    async fn emit_mute_changed(&self, muted: bool) {
        println!("* microphone {}", if muted { "muted" } else { "live" });
    }

    async fn emit_error(&self, message: &str) {
        println!("! {message}");
    }
}
