use std::collections::HashMap;

use kana_core::SessionAggregator;
use kana_core::model::{
    Character, CharacterId, ProgressRecord, SessionId, SessionStatsSnapshot, SessionSummary,
    UserId,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::progress_service::PendingWrites;

/// State of one practice run, owned by the caller between loop calls.
///
/// Holds the candidate pool, the session's view of progress (updated after
/// every attempt, so selection sees fresh weights even while the store is
/// down), deferred writes and the running aggregate.
#[derive(Debug)]
pub struct PracticeSession {
    user_id: UserId,
    pub(super) candidates: Vec<CharacterId>,
    pub(super) characters: HashMap<CharacterId, Character>,
    pub(super) progress: HashMap<CharacterId, ProgressRecord>,
    pub(super) pending: PendingWrites,
    pub(super) aggregator: SessionAggregator,
    pub(super) rng: StdRng,
    pub(super) current: Option<CharacterId>,
    pub(super) last_shown: Option<CharacterId>,
    pub(super) summary: Option<SessionSummary>,
    pub(super) summary_persisted: bool,
}

impl PracticeSession {
    pub(super) fn new(
        user_id: UserId,
        aggregator: SessionAggregator,
        characters: Vec<Character>,
        progress: HashMap<CharacterId, ProgressRecord>,
    ) -> Self {
        let candidates = characters.iter().map(|c| c.id().clone()).collect();
        let characters = characters
            .into_iter()
            .map(|c| (c.id().clone(), c))
            .collect();
        Self {
            user_id,
            candidates,
            characters,
            progress,
            pending: PendingWrites::default(),
            aggregator,
            rng: StdRng::from_os_rng(),
            current: None,
            last_shown: None,
            summary: None,
            summary_persisted: false,
        }
    }

    /// Reseed the picker for reproducible runs.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.aggregator.session_id()
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Character ids in catalog order.
    #[must_use]
    pub fn candidates(&self) -> &[CharacterId] {
        &self.candidates
    }

    #[must_use]
    pub fn character(&self, id: &CharacterId) -> Option<&Character> {
        self.characters.get(id)
    }

    /// The character shown and not yet answered.
    #[must_use]
    pub fn current_character(&self) -> Option<&Character> {
        self.current.as_ref().and_then(|id| self.characters.get(id))
    }

    #[must_use]
    pub fn progress(&self, id: &CharacterId) -> Option<&ProgressRecord> {
        self.progress.get(id)
    }

    #[must_use]
    pub fn stats(&self) -> SessionStatsSnapshot {
        self.aggregator.snapshot()
    }

    /// Number of characters whose latest record has not reached the store.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.aggregator.is_finished()
    }

    #[must_use]
    pub fn summary(&self) -> Option<&SessionSummary> {
        self.summary.as_ref()
    }

    #[must_use]
    pub fn summary_persisted(&self) -> bool {
        self.summary_persisted
    }

    /// Take in records the store now holds after deferred writes landed.
    pub(super) fn absorb_flushed(&mut self) {
        for record in self.pending.take_flushed() {
            self.progress.insert(record.character_id.clone(), record);
        }
    }

    /// Pool for the next draw; drops the previous pick when asked and
    /// something else remains.
    pub(super) fn pool(&self, avoid_immediate_repeat: bool) -> Vec<CharacterId> {
        match (&self.last_shown, avoid_immediate_repeat) {
            (Some(last), true) if self.candidates.len() > 1 => self
                .candidates
                .iter()
                .filter(|id| *id != last)
                .cloned()
                .collect(),
            _ => self.candidates.clone(),
        }
    }
}
