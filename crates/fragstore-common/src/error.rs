use thiserror::Error;

/// Context carried by every fatal invariant-violation log line and
/// error: `(instance, file_no, page_no, table_id, fragment_id, lsn)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorContext {
    pub instance: u32,
    pub file_no: u32,
    pub page_no: u32,
    pub table_id: u32,
    pub fragment_id: u32,
    pub lsn: u64,
}

impl ErrorContext {
    pub const fn new() -> Self {
        Self {
            instance: 0,
            file_no: 0,
            page_no: 0,
            table_id: 0,
            fragment_id: 0,
            lsn: 0,
        }
    }

    pub fn with_page(mut self, file_no: u32, page_no: u32) -> Self {
        self.file_no = file_no;
        self.page_no = page_no;
        self
    }

    pub fn with_table(mut self, table_id: u32, fragment_id: u32) -> Self {
        self.table_id = table_id;
        self.fragment_id = fragment_id;
        self
    }

    pub fn with_lsn(mut self, lsn: u64) -> Self {
        self.lsn = lsn;
        self
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "instance={} file_no={} page_no={} table_id={} fragment_id={} lsn={}",
            self.instance, self.file_no, self.page_no, self.table_id, self.fragment_id, self.lsn
        )
    }
}

/// The error taxonomy. Resource-exhaustion and aggregation
/// program errors are recoverable and returned to the caller; invariant
/// violations are fatal and are expected to be passed to [`fatal`] or the
/// [`crate::fatal`] macro rather than propagated.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("invariant violated: {reason} ({ctx})")]
    InvariantViolation {
        reason: &'static str,
        ctx: ErrorContext,
    },

    #[error("aggregation program error: {0}")]
    AggProgram(#[from] AggProgramError),

    #[error("arithmetic overflow evaluating row")]
    ArithmeticOverflow,
}

/// Builder-time and row-evaluation-time errors for the aggregation
/// subsystem.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AggProgramError {
    #[error("unsupported column type")]
    UnsupportedColumnType,
    #[error("register index out of range")]
    RegisterOutOfRange,
    #[error("aggregate id out of range")]
    AggregateIdOutOfRange,
    #[error("program exceeds MAX_AGG_PROGRAM_WORD_SIZE")]
    TooBigProgram,
    #[error("result batch exceeds MAX_AGG_RESULT_BATCH_BYTES")]
    TooBigResultBatch,
    #[error("too many GROUP BY columns")]
    TooManyGroupByCols,
    #[error("too many aggregates")]
    TooManyAggregates,
    #[error("program is empty")]
    EmptyProgram,
    #[error("program already finalised")]
    AlreadyFinalised,
    #[error("no aggregate operations declared")]
    EmptyAggregatorSet,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Logs a structured fatal line and aborts the process: invariant
/// violations in the data plane are not recoverable.
#[macro_export]
macro_rules! fatal {
    ($reason:expr, $ctx:expr) => {{
        log::error!(target: "fragstore::fatal", "{} ({})", $reason, $ctx);
        std::process::abort();
    }};
}
