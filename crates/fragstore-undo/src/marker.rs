//! Per-fragment LCP marker state machine driving how far UNDO replay
//! rewinds each fragment.

use fragstore_common::UndoRecordType;

/// "No LCP to restore to" sentinel for `target_lcp_id`.
pub const RNIL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    NoState,
    Lcp,
    Drop,
    Create,
    SetLcp,
    NoLcp,
}

/// Tracks one fragment's progress toward its restore target LCP.
/// `disk_restart_lcp_id` seeds this once per fragment before replay
/// starts; `observe_lcp_marker` and `observe_drop` are the dispatch-time
/// transitions.
#[derive(Debug, Clone)]
pub struct FragmentMarker {
    pub state: MarkerState,
    target_lcp_id: u32,
    target_local_lcp_id: u32,
    undo_complete: bool,
}

impl FragmentMarker {
    pub fn new(target_lcp_id: u32, target_local_lcp_id: u32) -> Self {
        if target_lcp_id == RNIL {
            Self {
                state: MarkerState::NoLcp,
                target_lcp_id,
                target_local_lcp_id,
                undo_complete: true,
            }
        } else {
            Self {
                state: MarkerState::NoState,
                target_lcp_id,
                target_local_lcp_id,
                undo_complete: false,
            }
        }
    }

    /// `disk_restart_undo_lcp`: an LCP marker record arrived for this
    /// fragment. `_first` variants name the LCP the following records
    /// belong to; reaching the target LCP boundary stops replay for it.
    pub fn observe_lcp_marker(&mut self, record_type: UndoRecordType, lcp_id: u32, local_lcp_id: u32) {
        if self.undo_complete {
            return;
        }
        match record_type {
            UndoRecordType::LcpFirst | UndoRecordType::LocalLcpFirst => {
                if lcp_id == self.target_lcp_id && local_lcp_id <= self.target_local_lcp_id {
                    self.state = MarkerState::Lcp;
                    self.undo_complete = true;
                } else {
                    self.state = MarkerState::SetLcp;
                }
            }
            UndoRecordType::Lcp | UndoRecordType::LocalLcp => {
                self.state = MarkerState::SetLcp;
            }
            other => {
                debug_assert!(false, "not an LCP marker: {other:?}");
            }
        }
    }

    /// A `TUP_DROP` record for this fragment's table: the dispatch stage
    /// marks every live fragment of the table `UC_CREATE`.
    pub fn observe_drop(&mut self) {
        self.state = MarkerState::Create;
        self.undo_complete = true;
    }

    /// Whether a page-targeted edit for this fragment should still be
    /// applied, or skipped because replay has reached its target LCP
    /// (or the fragment's table was dropped for a later incarnation).
    pub fn should_apply(&self) -> bool {
        !self.undo_complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_lcp_target_marks_complete_immediately() {
        let marker = FragmentMarker::new(RNIL, RNIL);
        assert_eq!(marker.state, MarkerState::NoLcp);
        assert!(!marker.should_apply());
    }

    #[test]
    fn reaching_target_lcp_first_stops_replay() {
        let mut marker = FragmentMarker::new(5, 2);
        assert!(marker.should_apply());
        marker.observe_lcp_marker(UndoRecordType::LcpFirst, 5, 1);
        assert_eq!(marker.state, MarkerState::Lcp);
        assert!(!marker.should_apply());
    }

    #[test]
    fn drop_record_marks_create_and_stops_replay() {
        let mut marker = FragmentMarker::new(5, 2);
        marker.observe_drop();
        assert_eq!(marker.state, MarkerState::Create);
        assert!(!marker.should_apply());
    }
}
