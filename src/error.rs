/// Error taxonomy for the reader and handler, per the design's error table:
/// `UpstreamFault`, `UpstreamInconsistent`, `HistoryExhausted`,
/// `SeekBeforeStart`, `ReaderInvariant` on the reader side; `NoHandlerVersions`,
/// `DuplicateVersion`, `ChainMismatch`, `PersistenceError` on the handler side.
use crate::types::BlockNumber;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the reader. `UpstreamFault` and `UpstreamInconsistent`
/// propagate from `ChainSource`; the caller may retry on `UpstreamFault`,
/// but `UpstreamInconsistent` and `HistoryExhausted` are fatal to the
/// current cursor.
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("chain source call failed: {0}")]
    UpstreamFault(#[source] BoxError),

    #[error("chain source returned an inconsistent block: expected block {expected}, got {actual}")]
    UpstreamInconsistent {
        expected: BlockNumber,
        actual: BlockNumber,
    },

    #[error("fork walk-back exhausted cached history at block {at}")]
    HistoryExhausted { at: BlockNumber },

    #[error("seek_to({target}) is before start_at_block ({start_at_block})")]
    SeekBeforeStart {
        target: BlockNumber,
        start_at_block: i64,
    },

    #[error("reader invariant violated: {0}")]
    ReaderInvariant(&'static str),
}

/// Errors raised during handler construction or block handling.
/// `ChainMismatch` indicates the reader did not roll back before sending a
/// block; `PersistenceError` wraps a binder failure from inside the
/// transactional closure.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("no handler versions registered")]
    NoHandlerVersions,

    #[error("duplicate handler version name: {0}")]
    DuplicateVersion(String),

    #[error(
        "chain mismatch at block {block_number}: expected previous_block_hash to match last \
         processed hash, reader did not roll back before sending this block"
    )]
    ChainMismatch { block_number: BlockNumber },

    #[error("persistence binder failed: {0}")]
    PersistenceError(#[source] BoxError),
}
