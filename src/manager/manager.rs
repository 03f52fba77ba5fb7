//! Prefix manager lifecycle and event loop.
//!
//! One spawned task owns the origin table, the publication engine, the
//! snapshot keeper, and every timer. Direct calls and the external
//! request queue converge on that task through channels, so all mutations
//! are serialized and a caller's reply resolves after its mutation is
//! applied and before any later one.
//!
//! The loop services, in one `select!`:
//! - the direct-call command channel
//! - the external request queue
//! - store change notifications for this node's keys
//! - the hold timer (publications gated until it expires)
//! - the coalescing throttle timer
//! - the TTL refresh tick (half the key TTL)
//! - the reconciliation sweep tick (`sync_interval`)
//!
//! Snapshot writes happen inline in the mutation path; a single blob
//! write is the only I/O the loop performs synchronously.

use crate::core::config::Config;
use crate::core::error::{TrellisError, TrellisResult};
use crate::core::types::{PrefixEntry, PrefixType};
use crate::manager::intake::{PrefixUpdateCommand, PrefixUpdateRequest};
use crate::manager::origin::OriginTable;
use crate::manager::publish::{Publisher, PublisherStats};
use crate::manager::snapshot::SnapshotKeeper;
use crate::store::kv::KvStore;
use crate::store::persistent::ConfigStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Lifecycle states of the manager loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManagerState {
    /// Constructed, loop not yet running.
    Init,
    /// Accepting mutations; publications deferred until hold expires.
    Holding,
    /// Steady state: throttled publications enabled.
    Active,
    /// Announcing withdrawal of owned keys before exit.
    Draining,
    /// Loop exited.
    #[default]
    Stopped,
}

/// Point-in-time counters sampled from the loop.
#[derive(Debug, Clone, Default)]
pub struct ManagerStats {
    /// Loop state at sample time.
    pub state: ManagerState,
    /// Prefixes with at least one contribution.
    pub prefix_count: usize,
    /// Total `(prefix, client)` contributions.
    pub contribution_count: usize,
    /// Keys currently owned in the replicated store.
    pub owned_key_count: usize,
    /// Publication engine counters.
    pub publisher: PublisherStats,
}

enum Command {
    Advertise {
        entries: Vec<PrefixEntry>,
        reply: oneshot::Sender<bool>,
    },
    Withdraw {
        entries: Vec<PrefixEntry>,
        reply: oneshot::Sender<bool>,
    },
    WithdrawByType {
        prefix_type: PrefixType,
        reply: oneshot::Sender<bool>,
    },
    SyncByType {
        prefix_type: PrefixType,
        entries: Vec<PrefixEntry>,
        reply: oneshot::Sender<bool>,
    },
    GetPrefixes {
        reply: oneshot::Sender<Vec<PrefixEntry>>,
    },
    GetPrefixesByType {
        prefix_type: PrefixType,
        reply: oneshot::Sender<Vec<PrefixEntry>>,
    },
    Stats {
        reply: oneshot::Sender<ManagerStats>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Direct-call interface to a running prefix manager.
///
/// Every method resolves after the mutation is applied, not after
/// publication; callers that need to observe the replicated store must
/// wait at least one throttle window. Calls issued after the manager
/// stopped resolve to "no change" without mutating anything.
#[derive(Clone)]
pub struct PrefixManagerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl PrefixManagerHandle {
    async fn request<T: Default>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> T {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(make(reply)).is_err() {
            tracing::debug!(reason = %TrellisError::ShuttingDown, "request not delivered");
            return T::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Insert or replace entries. True iff state changed.
    pub async fn advertise_prefixes(&self, entries: Vec<PrefixEntry>) -> bool {
        self.request(|reply| Command::Advertise { entries, reply })
            .await
    }

    /// Withdraw exact `(prefix, client)` entries. True iff state changed;
    /// the batch is atomic on any mismatch.
    pub async fn withdraw_prefixes(&self, entries: Vec<PrefixEntry>) -> bool {
        self.request(|reply| Command::Withdraw { entries, reply })
            .await
    }

    /// Withdraw every entry of the given client.
    pub async fn withdraw_prefixes_by_type(&self, prefix_type: PrefixType) -> bool {
        self.request(|reply| Command::WithdrawByType { prefix_type, reply })
            .await
    }

    /// Replace the given client's entry set.
    pub async fn sync_prefixes_by_type(
        &self,
        prefix_type: PrefixType,
        entries: Vec<PrefixEntry>,
    ) -> bool {
        self.request(|reply| Command::SyncByType {
            prefix_type,
            entries,
            reply,
        })
        .await
    }

    /// One winning entry per advertised prefix.
    pub async fn get_prefixes(&self) -> Vec<PrefixEntry> {
        self.request(|reply| Command::GetPrefixes { reply }).await
    }

    /// Every entry contributed by the given client.
    pub async fn get_prefixes_by_type(&self, prefix_type: PrefixType) -> Vec<PrefixEntry> {
        self.request(|reply| Command::GetPrefixesByType { prefix_type, reply })
            .await
    }

    /// Sample loop counters.
    pub async fn stats(&self) -> ManagerStats {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Stop the manager: reject new work, announce withdrawal of every
    /// owned key, and wait for the loop to exit.
    pub async fn stop(&self) {
        self.request(|reply| Command::Stop { reply }).await
    }
}

/// The per-node prefix origination authority.
pub struct PrefixManager {
    node_name: String,
    hold_time: Duration,
    throttle_timeout: Duration,
    key_ttl: Duration,
    sync_interval: Duration,

    table: OriginTable,
    keeper: SnapshotKeeper,
    publisher: Publisher,
    kv: Arc<dyn KvStore>,

    cmd_rx: mpsc::UnboundedReceiver<Command>,
    intake_rx: mpsc::UnboundedReceiver<PrefixUpdateRequest>,
    event_rx: mpsc::UnboundedReceiver<crate::store::kv::KeyUpdate>,

    state: ManagerState,
    dirty: bool,
}

impl PrefixManager {
    /// Start a manager: seed the origin table from the durable snapshot,
    /// subscribe to this node's store keys, and spawn the event loop.
    pub fn spawn(
        config: Config,
        config_store: Arc<dyn ConfigStore>,
        kv_store: Arc<dyn KvStore>,
        intake_rx: mpsc::UnboundedReceiver<PrefixUpdateRequest>,
    ) -> TrellisResult<(PrefixManagerHandle, JoinHandle<()>)> {
        config
            .validate()
            .map_err(|error| TrellisError::invalid_request(error.to_string()))?;

        let keeper = SnapshotKeeper::open(config_store)?;
        let mut table = OriginTable::new();
        let seeded = keeper.entries();
        if !seeded.is_empty() {
            table.advertise(&seeded);
            tracing::info!(entries = seeded.len(), "origin table seeded from snapshot");
        }

        let publisher = Publisher::new(&config)?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        kv_store.subscribe_prefix(&publisher.subscription_scope(), event_tx);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        tracing::info!(
            node = %config.node.name,
            area = %config.node.area,
            per_prefix_keys = config.advertise.per_prefix_keys,
            hold_ms = config.advertise.hold_time_ms,
            "prefix manager starting"
        );

        let manager = Self {
            node_name: config.node.name.clone(),
            hold_time: config.hold_time(),
            throttle_timeout: config.throttle(),
            key_ttl: config.key_ttl(),
            sync_interval: config.sync_interval(),
            table,
            keeper,
            publisher,
            kv: kv_store,
            cmd_rx,
            intake_rx,
            event_rx,
            state: ManagerState::Init,
            dirty: true,
        };

        let join = tokio::spawn(manager.run());
        Ok((PrefixManagerHandle { tx: cmd_tx }, join))
    }

    async fn run(mut self) {
        self.state = if self.hold_time.is_zero() {
            ManagerState::Active
        } else {
            ManagerState::Holding
        };

        let hold = sleep(self.hold_time);
        tokio::pin!(hold);

        // Startup is dirty: the first window after hold publishes whatever
        // the snapshot seeded (legacy mode publishes even an empty database)
        let throttle = sleep(self.throttle_timeout);
        tokio::pin!(throttle);
        let mut throttle_armed = true;

        let refresh_period = self.key_ttl / 2;
        let mut refresh = interval_at(Instant::now() + refresh_period, refresh_period);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut sweep = interval_at(Instant::now() + self.sync_interval, self.sync_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut intake_open = true;

        let stop_reply = loop {
            let mut schedule = false;
            let holding = self.state == ManagerState::Holding;

            tokio::select! {
                _ = &mut hold, if holding => {
                    self.state = ManagerState::Active;
                    tracing::info!(node = %self.node_name, "hold expired, publications enabled");
                    schedule = self.dirty;
                }

                command = self.cmd_rx.recv() => {
                    match command {
                        Some(Command::Stop { reply }) => break Some(reply),
                        Some(command) => schedule = self.handle_command(command),
                        // Every handle dropped; nothing can reach us anymore
                        None => break None,
                    }
                }

                request = self.intake_rx.recv(), if intake_open => {
                    match request {
                        Some(request) => schedule = self.handle_request(request),
                        None => intake_open = false,
                    }
                }

                Some(update) = self.event_rx.recv() => {
                    schedule = self.publisher.handle_store_event(&self.table, &update);
                }

                _ = &mut throttle, if throttle_armed => {
                    throttle_armed = false;
                    // While holding the dirty flag survives; the hold-expiry
                    // arm re-arms the throttle
                    if self.state == ManagerState::Active
                        && (self.dirty || self.publisher.has_pending())
                    {
                        let writes = self.publisher.publish(self.kv.as_ref(), &self.table);
                        self.dirty = false;
                        tracing::debug!(writes, "throttled publication ran");
                    }
                }

                _ = refresh.tick() => {
                    self.publisher.refresh(self.kv.as_ref());
                }

                _ = sweep.tick() => {
                    if self.state == ManagerState::Active {
                        schedule = self.publisher.sweep(self.kv.as_ref(), &self.table);
                    }
                }
            }

            if schedule && !throttle_armed {
                throttle
                    .as_mut()
                    .reset(Instant::now() + self.throttle_timeout);
                throttle_armed = true;
            }
        };

        self.state = ManagerState::Draining;
        tracing::info!(
            node = %self.node_name,
            owned_keys = self.publisher.owned_key_count(),
            "draining publications"
        );
        self.publisher.drain(self.kv.as_ref());
        self.state = ManagerState::Stopped;
        tracing::info!(node = %self.node_name, "prefix manager stopped");

        if let Some(reply) = stop_reply {
            let _ = reply.send(());
        }
    }

    /// Apply a mutation; on change, persist the snapshot and mark the
    /// publication state dirty.
    fn apply(&mut self, mutate: impl FnOnce(&mut OriginTable) -> bool) -> bool {
        let changed = mutate(&mut self.table);
        if changed {
            if let Err(error) = self.keeper.save_if_dirty(&self.table) {
                tracing::warn!(%error, "snapshot not persisted, will retry on next change");
            }
            self.dirty = true;
        }
        changed
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Advertise { entries, reply } => {
                let changed = self.apply(|table| table.advertise(&entries));
                let _ = reply.send(changed);
                changed
            }
            Command::Withdraw { entries, reply } => {
                let changed = self.apply(|table| table.withdraw(&entries));
                let _ = reply.send(changed);
                changed
            }
            Command::WithdrawByType { prefix_type, reply } => {
                let changed = self.apply(|table| table.withdraw_by_type(prefix_type));
                let _ = reply.send(changed);
                changed
            }
            Command::SyncByType {
                prefix_type,
                entries,
                reply,
            } => {
                let changed = self.apply(|table| table.sync_by_type(prefix_type, &entries));
                let _ = reply.send(changed);
                changed
            }
            Command::GetPrefixes { reply } => {
                let _ = reply.send(self.table.winners());
                false
            }
            Command::GetPrefixesByType { prefix_type, reply } => {
                let _ = reply.send(self.table.by_type(prefix_type));
                false
            }
            Command::Stats { reply } => {
                let _ = reply.send(ManagerStats {
                    state: self.state,
                    prefix_count: self.table.prefix_count(),
                    contribution_count: self.table.contribution_count(),
                    owned_key_count: self.publisher.owned_key_count(),
                    publisher: self.publisher.stats().clone(),
                });
                false
            }
            // Handled by the loop before dispatch
            Command::Stop { .. } => false,
        }
    }

    fn handle_request(&mut self, request: PrefixUpdateRequest) -> bool {
        if let Err(error) = request.validate() {
            tracing::warn!(%error, cmd = ?request.cmd, "dropping malformed update request");
            return false;
        }
        match request.cmd {
            PrefixUpdateCommand::AddPrefixes => {
                self.apply(|table| table.advertise(&request.prefixes))
            }
            PrefixUpdateCommand::WithdrawPrefixes => {
                self.apply(|table| table.withdraw(&request.prefixes))
            }
            PrefixUpdateCommand::WithdrawPrefixesByType => {
                let Some(prefix_type) = request.prefix_type else {
                    return false;
                };
                self.apply(|table| table.withdraw_by_type(prefix_type))
            }
            PrefixUpdateCommand::SyncPrefixesByType => {
                let Some(prefix_type) = request.prefix_type else {
                    return false;
                };
                self.apply(|table| table.sync_by_type(prefix_type, &request.prefixes))
            }
        }
    }
}
