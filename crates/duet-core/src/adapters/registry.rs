//! In-memory [`ParticipantRegistry`] adapter.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::application::ports::{Participant, ParticipantRegistry, SharedTrack};
use crate::domain::identity::PeerId;
use crate::domain::media::MediaKind;

/// Insertion-ordered participant list; ids are unique.
pub struct InMemoryParticipantRegistry {
    participants: Mutex<Vec<Participant>>,
}

impl InMemoryParticipantRegistry {
    pub fn new() -> Self {
        Self {
            participants: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Participant>> {
        self.participants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryParticipantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticipantRegistry for InMemoryParticipantRegistry {
    fn participants(&self) -> Vec<Participant> {
        self.lock().clone()
    }

    fn get(&self, id: &PeerId) -> Option<Participant> {
        self.lock().iter().find(|p| &p.id == id).cloned()
    }

    fn upsert(&self, participant: Participant) {
        let mut participants = self.lock();
        match participants.iter_mut().find(|p| p.id == participant.id) {
            Some(existing) => *existing = participant,
            None => participants.push(participant),
        }
    }

    fn attach_track(&self, id: &PeerId, track: SharedTrack) -> bool {
        let mut participants = self.lock();
        let (entry, added) = match participants.iter().position(|p| &p.id == id) {
            Some(idx) => (&mut participants[idx], false),
            None => {
                participants.push(Participant::new(id.clone()));
                let last = participants.len() - 1;
                (&mut participants[last], true)
            }
        };
        match track.kind() {
            MediaKind::Audio => entry.audio_track = Some(track),
            MediaKind::Video => entry.video_track = Some(track),
        }
        added
    }

    fn remove(&self, id: &PeerId) -> Option<Participant> {
        let mut participants = self.lock();
        let idx = participants.iter().position(|p| &p.id == id)?;
        Some(participants.remove(idx))
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapters::media::track::VirtualTrack;

    fn ids(registry: &InMemoryParticipantRegistry) -> Vec<String> {
        registry
            .participants()
            .into_iter()
            .map(|p| p.id.to_string())
            .collect()
    }

    #[test]
    fn upsert_keeps_rendering_order() {
        let registry = InMemoryParticipantRegistry::new();
        registry.upsert(Participant::new("111111".into()));
        registry.upsert(Participant::new("222222".into()));
        registry.upsert(Participant::new("111111".into()));

        assert_eq!(ids(&registry), vec!["111111", "222222"]);
    }

    #[test]
    fn audio_and_video_attach_independently() {
        let registry = InMemoryParticipantRegistry::new();
        let peer = PeerId::from("222222");

        let added = registry.attach_track(&peer, Arc::new(VirtualTrack::new(MediaKind::Audio, "222222-audio")));
        assert!(added);
        let p = registry.get(&peer).unwrap();
        assert!(p.audio_track.is_some());
        assert!(p.video_track.is_none());

        let added = registry.attach_track(&peer, Arc::new(VirtualTrack::new(MediaKind::Video, "222222-video")));
        assert!(!added);
        let p = registry.get(&peer).unwrap();
        assert_eq!(p.audio_track.unwrap().id(), "222222-audio");
        assert_eq!(p.video_track.unwrap().id(), "222222-video");
        assert_eq!(registry.participants().len(), 1);
    }

    #[test]
    fn remove_and_clear() {
        let registry = InMemoryParticipantRegistry::new();
        registry.upsert(Participant::new("111111".into()));
        registry.upsert(Participant::new("222222".into()));

        assert!(registry.remove(&"111111".into()).is_some());
        assert!(registry.remove(&"111111".into()).is_none());
        assert!(!registry.contains(&"111111".into()));
        assert_eq!(ids(&registry), vec!["222222"]);

        registry.clear();
        assert!(registry.participants().is_empty());
    }
}
