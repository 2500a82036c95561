/// Ties a `Reader` and a `Handler` together into the ingestion loop (§6).
use crate::error::{HandlerError, ReaderError};
use crate::handler::{Handler, PersistenceBinder};
use crate::metrics;
use crate::reader::{ChainSource, Reader};

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Caps how long `run_driver` runs before returning control to the caller.
pub struct DriveOptions {
    /// `None` runs until the chain source errors or the caller cancels the
    /// enclosing future; `Some(n)` stops after `n` calls to `next_block`.
    pub max_iterations: Option<u64>,
    /// Skips non-deterministic effects for every block processed — used to
    /// replay from genesis to rebuild state without re-firing side effects.
    pub is_replay: bool,
}

impl Default for DriveOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            is_replay: false,
        }
    }
}

/// Runs the core ingestion pseudocontract: pull a block from the reader,
/// hand it to the handler, and seek the reader back if the handler asks for
/// a different block than the one just delivered.
pub async fn run_driver<C, B>(
    reader: &mut Reader<C>,
    handler: &mut Handler<B>,
    options: DriveOptions,
) -> Result<(), DriveError>
where
    C: ChainSource,
    B: PersistenceBinder<Payload = C::Payload>,
{
    let mut iterations: u64 = 0;

    loop {
        if let Some(max) = options.max_iterations {
            if iterations >= max {
                return Ok(());
            }
        }

        let (block, is_rollback, is_new) = reader.next_block().await?;
        if !is_new {
            iterations += 1;
            continue;
        }
        let is_first_block = reader.is_first_block();

        let (needs_seek, seek_target) = handler
            .handle_block(&block, is_rollback, is_first_block, options.is_replay)
            .await?;

        if needs_seek {
            tracing::info!(target = %seek_target, "handler requested seek");
            metrics::increment_seek_requests();
            reader.seek_to(seek_target).await?;
        }

        iterations += 1;
    }
}
