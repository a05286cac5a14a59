//! Long-running pieces of the bidder and the control service

pub mod backoff;
pub mod bid_sync;
pub mod drafter;
pub mod poll_loop;
pub mod seen_set;
pub mod supervisor;

pub use backoff::{BackoffConfig, RateLimitController};
pub use bid_sync::BidSync;
pub use drafter::{Draft, MessageDrafter};
pub use poll_loop::{spawn_shutdown_watcher, BidPipeline, CycleReport, PollLoop, PollLoopConfig};
pub use seen_set::{SeenSet, SeenSetConfig};
pub use supervisor::{ProcessStatus, ProcessSupervisor, SupervisorError};
