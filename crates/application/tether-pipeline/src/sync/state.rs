use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error};

use crate::sync::SyncError;

/// Phases of one synchronization round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundState {
    Idle,
    Scanning,
    ConflictCheck,
    Blocked,
    Planning,
    Transferring,
    DeletionCheck,
    Committing,
    Done,
    Aborted,
}

impl RoundState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RoundState::Done | RoundState::Aborted)
    }

    pub fn can_transition_to(self, next: RoundState) -> bool {
        use RoundState::*;
        match (self, next) {
            (Idle, Scanning)
            | (Scanning, ConflictCheck)
            | (ConflictCheck, Blocked)
            | (ConflictCheck, Planning)
            | (Planning, Transferring)
            | (Transferring, DeletionCheck)
            | (DeletionCheck, Committing)
            | (Committing, Done) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoundState::Idle => "idle",
            RoundState::Scanning => "scanning",
            RoundState::ConflictCheck => "conflict-check",
            RoundState::Blocked => "blocked",
            RoundState::Planning => "planning",
            RoundState::Transferring => "transferring",
            RoundState::DeletionCheck => "deletion-check",
            RoundState::Committing => "committing",
            RoundState::Done => "done",
            RoundState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current phase and every phase visited.
#[derive(Debug, Clone)]
pub struct RoundMachine {
    state: RoundState,
    history: Vec<RoundState>,
}

impl Default for RoundMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundMachine {
    pub fn new() -> Self {
        Self {
            state: RoundState::Idle,
            history: vec![RoundState::Idle],
        }
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn history(&self) -> &[RoundState] {
        &self.history
    }

    pub fn advance(&mut self, next: RoundState) -> Result<(), SyncError> {
        if !self.state.can_transition_to(next) {
            error!("Illegal round transition {} -> {}", self.state, next);
            return Err(SyncError::Internal(format!(
                "illegal round transition {} -> {}",
                self.state, next
            )));
        }
        debug!("Round {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Move to `Aborted` from any live phase. Returns the phase the round failed in.
    pub fn abort(&mut self) -> RoundState {
        let phase = self.state;
        if !phase.is_terminal() {
            self.state = RoundState::Aborted;
            self.history.push(RoundState::Aborted);
        }
        phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RoundState::*;

    #[test]
    fn happy_path_is_legal() {
        let mut m = RoundMachine::new();
        for s in [
            Scanning,
            ConflictCheck,
            Planning,
            Transferring,
            DeletionCheck,
            Committing,
            Done,
        ] {
            m.advance(s).unwrap();
        }
        assert_eq!(m.history().len(), 8);
        assert!(m.state().is_terminal());
    }

    #[test]
    fn skipping_a_phase_is_rejected() {
        let mut m = RoundMachine::new();
        m.advance(Scanning).unwrap();
        assert!(matches!(m.advance(Transferring), Err(SyncError::Internal(_))));
        assert_eq!(m.state(), Scanning);
    }

    #[test]
    fn blocked_ends_in_aborted() {
        let mut m = RoundMachine::new();
        m.advance(Scanning).unwrap();
        m.advance(ConflictCheck).unwrap();
        m.advance(Blocked).unwrap();
        assert!(m.advance(Planning).is_err());
        assert_eq!(m.abort(), Blocked);
        assert_eq!(m.state(), Aborted);
        assert_eq!(m.abort(), Aborted);
        assert_eq!(m.history().last(), Some(&Aborted));
    }

    #[test]
    fn finished_rounds_stay_finished() {
        let mut m = RoundMachine::new();
        m.advance(Scanning).unwrap();
        m.abort();
        assert!(m.advance(Scanning).is_err());
        assert!(!Done.can_transition_to(Aborted));
    }
}
