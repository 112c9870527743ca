use crate::fsm::{StateMachine, TransitionError};

/// Frame boundaries reported by the game loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramePhase {
    /// Apply everything received since the last frame.
    ReadyForChanges,
    /// Send what this frame changed.
    FinishedFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameState {
    Open,
    Committed,
}

pub type FrameError = TransitionError<FrameState, FramePhase>;

/// Enforces commit-then-flush ordering for each frame.
#[derive(Debug)]
pub struct FrameCycle {
    machine: StateMachine<FrameState, FramePhase, ()>,
}

impl FrameCycle {
    pub fn new() -> Self {
        Self {
            machine: StateMachine::new("frame", FrameState::Open)
                .on(FrameState::Open, FramePhase::ReadyForChanges, FrameState::Committed)
                .on(FrameState::Committed, FramePhase::FinishedFrame, FrameState::Open),
        }
    }

    pub fn state(&self) -> FrameState {
        self.machine.state()
    }

    pub fn advance(&mut self, phase: FramePhase) -> Result<FrameState, FrameError> {
        self.machine.fire(&mut (), phase, None)
    }
}

impl Default for FrameCycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternates_commit_and_flush() {
        let mut cycle = FrameCycle::new();
        assert_eq!(cycle.advance(FramePhase::ReadyForChanges).unwrap(), FrameState::Committed);
        assert_eq!(cycle.advance(FramePhase::FinishedFrame).unwrap(), FrameState::Open);
        assert_eq!(cycle.advance(FramePhase::ReadyForChanges).unwrap(), FrameState::Committed);
    }

    #[test]
    fn out_of_order_phase_is_refused() {
        let mut cycle = FrameCycle::new();
        let err = cycle.advance(FramePhase::FinishedFrame).unwrap_err();
        assert_eq!(err.state, FrameState::Open);
        assert_eq!(cycle.state(), FrameState::Open);

        cycle.advance(FramePhase::ReadyForChanges).unwrap();
        assert!(cycle.advance(FramePhase::ReadyForChanges).is_err());
        assert_eq!(cycle.state(), FrameState::Committed);
    }
}
