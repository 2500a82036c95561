/// Block-at-a-time processor: applies versioned updaters and effects,
/// persists the durable index cursor, and coordinates rollback with the
/// reader (§4.2).
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::metrics;
use crate::types::{Block, BlockHash, BlockNumber, IndexState};
use crate::versions::{HandlerVersion, VersionRegistry};

pub type StateFuture<'a, R> = Pin<Box<dyn Future<Output = Result<R, HandlerError>> + Send + 'a>>;

/// The application-defined store the handler drives. Implemented by the
/// concrete persistence layer; this core only depends on the interface.
///
/// `handle_with_state` is the transactional seam: it must acquire a state
/// object, invoke `f` with it exactly once, and guarantee release — commit
/// on `f`'s success, abort (reverting any writes `f` made) on error. This
/// mirrors the boxed-future transaction callback used by async ORMs
/// (e.g. `TransactionTrait::transaction`) rather than the teacher's
/// explicit put/delete batch, because the spec requires an opaque `state`
/// the core never inspects.
#[async_trait]
pub trait PersistenceBinder: Send + Sync {
    type State: Send;
    type Context: Send + Sync;
    type Payload: Clone + Send + Sync;

    async fn load_index_state(&self) -> Result<IndexState, HandlerError>;

    async fn update_index_state(
        &self,
        state: &mut Self::State,
        block: &Block<Self::Payload>,
        is_replay: bool,
        handler_version_name: &str,
        context: &Self::Context,
    ) -> Result<(), HandlerError>;

    /// Must reverse all application effects down to and including the block
    /// *after* `block_number`, so that after return the store reflects the
    /// state as of `block_number` having been applied.
    async fn rollback_to(&self, block_number: BlockNumber) -> Result<(), HandlerError>;

    async fn handle_with_state<F, R>(&self, f: F) -> Result<R, HandlerError>
    where
        F: for<'a> FnOnce(&'a mut Self::State, &'a Self::Context) -> StateFuture<'a, R> + Send,
        R: Send;
}

/// Block-at-a-time processor. Generic over the binder so this core never
/// touches a concrete store.
pub struct Handler<B: PersistenceBinder> {
    binder: B,
    registry: VersionRegistry<B::State, B::Context, B::Payload>,
    handler_version_name: String,
    last_processed_block_number: BlockNumber,
    last_processed_block_hash: BlockHash,
}

impl<B: PersistenceBinder> Handler<B> {
    pub fn new(
        binder: B,
        versions: Vec<HandlerVersion<B::State, B::Context, B::Payload>>,
    ) -> Result<Self, HandlerError> {
        let registry = VersionRegistry::new(versions)?;
        let handler_version_name = registry.starting_version().to_string();
        Ok(Self {
            binder,
            registry,
            handler_version_name,
            last_processed_block_number: BlockNumber::NONE,
            last_processed_block_hash: BlockHash::default(),
        })
    }

    pub fn handler_version_name(&self) -> &str {
        &self.handler_version_name
    }

    pub fn last_processed(&self) -> (BlockNumber, &BlockHash) {
        (self.last_processed_block_number, &self.last_processed_block_hash)
    }

    async fn refresh_index_state(&mut self) -> Result<(), HandlerError> {
        let index_state = self.binder.load_index_state().await?;
        self.last_processed_block_number = index_state.block_number;
        self.last_processed_block_hash = index_state.block_hash;
        self.handler_version_name = index_state.handler_version_name;
        Ok(())
    }

    /// Applies one block. Returns `(needs_seek, seek_target)`: when
    /// `needs_seek`, the driver must call `reader.seek_to(seek_target)`
    /// before asking the reader for another block.
    pub async fn handle_block(
        &mut self,
        block: &Block<B::Payload>,
        is_rollback: bool,
        is_first_block: bool,
        is_replay: bool,
    ) -> Result<(bool, BlockNumber), HandlerError> {
        // 1. Rollback / cold start.
        if is_rollback || (is_replay && is_first_block) {
            let rollback_to_n = block.block_number().prev().unwrap_or(BlockNumber::NONE);
            self.binder.rollback_to(rollback_to_n).await?;
            self.refresh_index_state().await?;
            metrics::increment_rollbacks(if is_rollback { "fork" } else { "cold_start_replay" });
        } else if self.last_processed_block_number.is_none() && self.last_processed_block_hash == BlockHash::default() {
            self.refresh_index_state().await?;
        }

        // 2. Idempotence.
        if block.block_number() == self.last_processed_block_number
            && *block.block_hash() == self.last_processed_block_hash
        {
            return Ok((false, BlockNumber::NONE));
        }

        // 3. Seek on first-block mismatch.
        if is_first_block && !self.last_processed_block_hash.0.is_empty() {
            return Ok((true, self.last_processed_block_number.next()));
        }

        // 4. Sequence check.
        if !is_first_block {
            if block.block_number() != self.last_processed_block_number.next() {
                return Ok((true, self.last_processed_block_number.next()));
            }
            if *block.previous_block_hash() != self.last_processed_block_hash {
                return Err(HandlerError::ChainMismatch {
                    block_number: block.block_number(),
                });
            }
        }

        // 5. Apply, inside the binder's transactional scope.
        let binder = &self.binder;
        let registry_snapshot = self.registry.clone();
        let starting_version = self.handler_version_name.clone();
        let block_owned = block.clone();

        let final_version = binder
            .handle_with_state(move |state, context| {
                Box::pin(async move {
                    let (versioned, final_version) = apply_updaters(
                        binder,
                        &registry_snapshot,
                        starting_version,
                        state,
                        &block_owned,
                        context,
                        is_replay,
                    )
                    .await?;

                    if !is_replay {
                        run_effects(&registry_snapshot, &versioned, &block_owned, context).await;
                    }

                    binder
                        .update_index_state(state, &block_owned, is_replay, &final_version, context)
                        .await?;

                    Ok(final_version)
                })
            })
            .await?;

        self.handler_version_name = final_version;
        self.last_processed_block_number = block.block_number();
        self.last_processed_block_hash = block.block_hash().clone();

        Ok((false, BlockNumber::NONE))
    }
}

/// Walks updaters of the currently active handler version, in order, for
/// each action in the block. Returns the `(action, version_name)` pairing
/// used by `run_effects`, plus the version active at the end of the block.
///
/// Each action is paired with the version active *before* its own updaters
/// ran: a switching action's remaining updaters for that action are skipped
/// under the new version, but the action itself — and its effects — still
/// belong to the version that was active when it arrived.
async fn apply_updaters<B: PersistenceBinder>(
    binder: &B,
    registry: &VersionRegistry<B::State, B::Context, B::Payload>,
    mut current_version: String,
    state: &mut B::State,
    block: &Block<B::Payload>,
    context: &B::Context,
    is_replay: bool,
) -> Result<(Vec<String>, String), HandlerError> {
    let mut versioned = Vec::with_capacity(block.actions.len());

    for action in &block.actions {
        let action_version = current_version.clone();
        let version = registry
            .get(&current_version)
            .expect("handler_version_name is always a key of the registry");

        for (idx, updater) in version.updaters.iter().enumerate() {
            if updater.action_type() != action.action_type {
                continue;
            }

            let maybe_new_version = updater
                .apply(state, &action.payload, &block.block_info, context)
                .await?;

            if let Some(new_version_name) = maybe_new_version {
                if registry.contains(&new_version_name) {
                    let remaining = version.updaters.len() - idx - 1;
                    tracing::info!(
                        action_type = %action.action_type,
                        block_number = %block.block_number(),
                        from_version = %current_version,
                        to_version = %new_version_name,
                        "handler switching version mid-block"
                    );
                    if remaining > 0 {
                        tracing::warn!(
                            action_type = %action.action_type,
                            remaining,
                            "skipping remaining updaters for this action after version switch"
                        );
                    }
                    binder
                        .update_index_state(state, block, is_replay, &new_version_name, context)
                        .await?;
                    current_version = new_version_name;
                    metrics::increment_version_switches();
                    break;
                } else {
                    tracing::warn!(
                        target_version = %new_version_name,
                        action_type = %action.action_type,
                        "updater requested unknown handler version; ignoring"
                    );
                }
            }
        }

        versioned.push(action_version);
    }

    Ok((versioned, current_version))
}

/// Runs effects of the version active after each action's updaters ran.
/// Skipped entirely by the caller during replay.
async fn run_effects<B: PersistenceBinder>(
    registry: &VersionRegistry<B::State, B::Context, B::Payload>,
    versioned: &[String],
    block: &Block<B::Payload>,
    context: &B::Context,
) {
    for (action, version_name) in block.actions.iter().zip(versioned.iter()) {
        let Some(version) = registry.get(version_name) else {
            continue;
        };
        for effect in &version.effects {
            if effect.action_type() == action.action_type {
                effect.run(&action.payload, block, context).await;
            }
        }
    }
}
