//! Core engine for sequencing a forked, hash-linked block stream (`Reader`)
//! and applying versioned state updates against an application-defined
//! store (`Handler`). The application supplies a `ChainSource` (how to
//! fetch blocks) and a `PersistenceBinder` (how to store state and the
//! durable index cursor); this crate owns fork detection, rollback,
//! handler-version switching, and the driver loop tying the two together.

pub mod config;
pub mod driver;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod reader;
pub mod telemetry;
pub mod types;
pub mod versions;

pub use driver::{run_driver, DriveError, DriveOptions};
pub use error::{HandlerError, ReaderError};
pub use handler::{Handler, PersistenceBinder, StateFuture};
pub use reader::{ChainSource, Reader};
pub use types::{Action, Block, BlockHash, BlockInfo, BlockNumber, IndexState};
pub use versions::{Effect, HandlerVersion, Updater, VersionRegistry};
