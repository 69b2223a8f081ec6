// ============================================================================
// Processor State
// ============================================================================
//
// ```text
// Uninitialized ──init──> Ready ──upgrade──> Running{1/n} ── ... ──> Committed
//                                                  │                     │
//                                                  └──error──> Failed    │
//                                                                        │
//   Ready | Committed | Failed ──upgrade──> Running ...                  │
//   any ──end──> Ended  <────────────────────────────────────────────────┘
// ```
//
// ============================================================================

/// Lifecycle of an upgrade processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// No script has been loaded
    Uninitialized,

    /// Script and control state are loaded
    Ready,

    /// Segment `segment` of `of` is executing, counted from 1
    Running { segment: usize, of: usize },

    /// The last run reached its target
    Committed,

    /// The last run stopped at a failing segment; its work was rolled back
    Failed,

    /// Listeners are terminated and connections are closed
    Ended,
}

impl ProcessorState {
    /// Check if an upgrade can be started
    pub fn can_upgrade(&self) -> bool {
        matches!(
            self,
            ProcessorState::Ready | ProcessorState::Committed | ProcessorState::Failed
        )
    }

    /// Check if the processor can't be used any more
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessorState::Ended)
    }
}

impl std::fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorState::Uninitialized => write!(f, "UNINITIALIZED"),
            ProcessorState::Ready => write!(f, "READY"),
            ProcessorState::Running { segment, of } => write!(f, "RUNNING {segment}/{of}"),
            ProcessorState::Committed => write!(f, "COMMITTED"),
            ProcessorState::Failed => write!(f, "FAILED"),
            ProcessorState::Ended => write!(f, "ENDED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_allowed_states() {
        assert!(!ProcessorState::Uninitialized.can_upgrade());
        assert!(ProcessorState::Ready.can_upgrade());
        assert!(ProcessorState::Failed.can_upgrade());
        assert!(!ProcessorState::Running { segment: 1, of: 2 }.can_upgrade());
        assert!(!ProcessorState::Ended.can_upgrade());
        assert!(ProcessorState::Ended.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(ProcessorState::Running { segment: 2, of: 5 }.to_string(), "RUNNING 2/5");
        assert_eq!(ProcessorState::Committed.to_string(), "COMMITTED");
    }
}
