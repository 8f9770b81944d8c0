//! Per-user composition root: builds every engine component once and wires
//! their collaborators explicitly.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

use streak_shared::{GameResult, SyncResult, UserId, UserProfile};
use streak_store::Database;

use crate::backend::{bounded, Backend, HttpBackend};
use crate::config::SyncConfig;
use crate::events::SyncEvent;
use crate::friends::FriendDirectory;
use crate::groups::{GroupManager, GroupPolicy};
use crate::invite_links::{InviteLinkManager, ShareTiming};
use crate::leaderboard::Leaderboard;
use crate::local::LocalStore;
use crate::orchestrator::{SyncOrchestrator, SyncTrigger};
use crate::outbox::{Outbox, RetryPolicy};
use crate::publisher::{PublishOutcome, ScorePublisher};

const EVENT_CAPACITY: usize = 64;
const TRIGGER_CAPACITY: usize = 16;

pub struct SyncSession {
    user: UserId,
    config: SyncConfig,
    backend: Arc<dyn Backend>,
    outbox: Outbox,
    publisher: ScorePublisher,
    groups: GroupManager,
    links: InviteLinkManager,
    leaderboard: Leaderboard,
    friends: FriendDirectory,
    orchestrator: SyncOrchestrator,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncSession {
    /// Open the user's local store (configured path or platform default)
    /// and build the engine on top of `backend`.
    pub fn open(config: SyncConfig, user: UserId, backend: Arc<dyn Backend>) -> SyncResult<Self> {
        let store = match &config.db_path {
            Some(path) => LocalStore::open_at(path)?,
            None => LocalStore::new(Database::new()?),
        };
        Self::with_store(config, user, backend, store)
    }

    /// Talk to the server at `config.server_url`.
    pub fn connect_http(config: SyncConfig, user: UserId) -> SyncResult<Self> {
        let backend = HttpBackend::new(config.server_url.clone(), config.network_timeout)?;
        Self::open(config, user, Arc::new(backend))
    }

    pub fn with_store(
        config: SyncConfig,
        user: UserId,
        backend: Arc<dyn Backend>,
        store: LocalStore,
    ) -> SyncResult<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let timeout = config.network_timeout;

        let outbox = Outbox::new(store.clone(), RetryPolicy::from_config(&config));
        outbox.recover()?;

        let publisher = ScorePublisher::new(
            user.clone(),
            backend.clone(),
            store.clone(),
            outbox.clone(),
            timeout,
        );
        let groups = GroupManager::new(
            user.clone(),
            backend.clone(),
            store.clone(),
            GroupPolicy::from_config(&config),
            timeout,
        );
        let links = InviteLinkManager::new(
            user.clone(),
            backend.clone(),
            groups.clone(),
            config.capability_version.clone(),
            ShareTiming::from_config(&config),
            events.clone(),
        );
        let leaderboard = Leaderboard::new(
            user.clone(),
            backend.clone(),
            config.leaderboard_cap,
            timeout,
        );
        let friends = FriendDirectory::new(user.clone(), backend.clone(), groups.clone(), timeout);
        let orchestrator = SyncOrchestrator::new(
            groups.clone(),
            publisher.clone(),
            outbox.clone(),
            leaderboard.clone(),
            links.clone(),
            store,
            events.clone(),
        );

        info!(user = %user, single_group_mode = config.single_group_mode, "Sync session opened");
        Ok(Self {
            user,
            config,
            backend,
            outbox,
            publisher,
            groups,
            links,
            leaderboard,
            friends,
            orchestrator,
            events,
        })
    }

    /// Publish a freshly recorded result into the active group, or keep it
    /// private when there is none.
    pub async fn record_result(&self, result: &GameResult) -> SyncResult<PublishOutcome> {
        let group = self.groups.active_group()?;
        self.publisher.publish(result, group.as_ref()).await
    }

    /// Make the user's display name visible to other members.
    pub async fn register_profile(&self, display_name: &str) -> SyncResult<()> {
        let profile = UserProfile {
            id: self.user.clone(),
            display_name: display_name.to_string(),
        };
        bounded(
            self.config.network_timeout,
            "register_profile",
            self.backend.register_profile(&profile),
        )
        .await
    }

    /// Run the orchestrator in the background. Dropping the returned sender
    /// stops it.
    pub fn spawn_orchestrator(&self) -> (mpsc::Sender<SyncTrigger>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(TRIGGER_CAPACITY);
        let handle = tokio::spawn(self.orchestrator.clone().run(rx));
        (tx, handle)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn publisher(&self) -> &ScorePublisher {
        &self.publisher
    }

    pub fn groups(&self) -> &GroupManager {
        &self.groups
    }

    pub fn invite_links(&self) -> &InviteLinkManager {
        &self.links
    }

    pub fn leaderboard(&self) -> &Leaderboard {
        &self.leaderboard
    }

    pub fn friends(&self) -> &FriendDirectory {
        &self.friends
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }
}
