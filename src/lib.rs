//! # Spindle: Suspendable Flow Execution Runtime
//!
//! Spindle is the bottom layer of a distributed transaction-processing
//! node's flow engine: long-lived, suspendable workflows ("flows")
//! coordinate multi-party transactions, survive restarts via durable
//! checkpoints, and exchange messages with peers through a reliable,
//! deduplicated messaging substrate.
//!
//! ## Core Concepts
//!
//! - **Flows & Fibers**: A flow is one suspendable workflow; its fiber is
//!   the execution unit carrying it, with a FIFO mailbox of events
//! - **Actions**: The closed union of side effects a state-machine
//!   transition may request; executed strictly in emission order
//! - **Checkpoints**: Durable snapshots of suspended flows, persisted
//!   inside the same database transaction as the business effects they
//!   represent
//! - **Deduplication**: Every peer-visible send carries an id derivable
//!   from checkpointed state, so crash replays are dropped by the
//!   receiver's broker
//!
//! ## Executing Actions
//!
//! ```rust,no_run
//! use spindle::actions::Action;
//! use spindle::checkpoint::Checkpoint;
//! use spindle::database::TransactionContext;
//! use spindle::executor::ActionExecutor;
//! use spindle::fiber::fiber_channel;
//! use spindle::types::FlowId;
//!
//! # async fn example(executor: ActionExecutor) -> Result<(), Box<dyn std::error::Error>> {
//! let flow_id = FlowId::random();
//! let (fiber, _events) = fiber_channel(flow_id);
//! let mut ctx = TransactionContext::new();
//!
//! // One suspension: checkpoint and dedup facts commit atomically,
//! // acknowledgements follow the commit.
//! let checkpoint = Checkpoint::initial(flow_id, serde_json::json!({"pc": 0}));
//! executor.execute(&fiber, &mut ctx, Action::CreateTransaction).await?;
//! executor.execute(&fiber, &mut ctx, Action::PersistCheckpoint {
//!     flow_id,
//!     checkpoint,
//!     is_update: false,
//! }).await?;
//! executor.execute(&fiber, &mut ctx, Action::CommitTransaction).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! The executor recovers locally only where an action's contract says so:
//! post-commit acknowledgement failures are logged and swallowed, errors
//! are never propagated to non-live sessions, async operation failures are
//! delivered as events. Everything else escapes to the state machine,
//! which classifies the failure (retryable, fatal, hospitalize).
//!
//! ## Module Guide
//!
//! - [`actions`] - The closed `Action` union
//! - [`executor`] - Action dispatch and execution, checkpoint metrics
//! - [`fiber`] - Fiber handles, event mailboxes, cancellable sleep
//! - [`checkpoint`] - Checkpoint data and serialization
//! - [`storage`] - Transactional checkpoint storage (memory, SQLite)
//! - [`database`] - The per-fiber transaction context
//! - [`messaging`] - Peer messaging and deduplication handlers
//! - [`manager`] - State machine manager seam
//! - [`ledger`] - Transaction tracking and soft lock seams

pub mod actions;
pub mod async_ops;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod database;
pub mod errors;
pub mod events;
pub mod executor;
pub mod fiber;
pub mod ledger;
pub mod manager;
pub mod messaging;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod types;
