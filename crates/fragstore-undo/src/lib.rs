pub mod marker;
pub mod queue;
pub mod replay;

pub use marker::{FragmentMarker, MarkerState, RNIL};
pub use queue::{PendingUndoQueue, MAX_PENDING_UNDO_RECORDS};
pub use replay::UndoReplay;
