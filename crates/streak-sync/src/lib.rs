//! # streak-sync
//!
//! Social score synchronization engine.
//!
//! Takes locally recorded game results, publishes them idempotently so a
//! group of friends can read them, queues what cannot be delivered in a
//! durable outbox, manages group membership and invite links, and builds
//! ranked leaderboards from what the group has published.
//!
//! Every component is constructed once per signed-in user by
//! [`SyncSession`] and receives its collaborators explicitly.

pub mod backend;
pub mod config;
pub mod events;
pub mod friends;
pub mod groups;
pub mod invite_links;
pub mod leaderboard;
pub mod local;
pub mod orchestrator;
pub mod outbox;
pub mod publisher;
pub mod session;

use tracing_subscriber::{fmt, EnvFilter};

pub use backend::{Backend, HttpBackend, MemoryBackend};
pub use config::SyncConfig;
pub use events::SyncEvent;
pub use friends::FriendDirectory;
pub use groups::{GroupManager, GroupPolicy};
pub use invite_links::{InviteLinkManager, ShareTiming};
pub use leaderboard::{GameStandings, Leaderboard, RankedEntry};
pub use local::LocalStore;
pub use orchestrator::{SyncOrchestrator, SyncTrigger};
pub use outbox::{DrainReport, Outbox, ParkedEntry, RetryPolicy};
pub use publisher::{PublishOutcome, ScorePublisher};
pub use session::SyncSession;

/// Install the global tracing subscriber for an app embedding the engine.
///
/// `RUST_LOG` wins; otherwise the engine logs at debug and the store at info.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("streak_sync=debug,streak_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
