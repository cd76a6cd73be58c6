use std::sync::Arc;

use thiserror::Error;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot, watch},
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    core::store::{GameState, GameStore, StoreSnapshotV1},
    game::{HistoryEntry, Player},
    op::StoredOp,
    persist::{OpSink, PersistError},
    types::{OpSeq, Points},
};

use super::events::GameEvent;

/// Failures surfaced by [`ScorekeeperHandle`] calls.
///
/// Actions themselves never fail; only the runtime going away, or an explicit
/// flush or checkpoint hitting storage, produce an error.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Explicit flush, checkpoint or shutdown failed at the storage boundary.
    #[error("persistence: {0}")]
    Persist(#[from] PersistError),
    /// The runtime task has stopped.
    #[error("runtime channel closed")]
    ChannelClosed,
}

/// Write-behind persistence tuning.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Flush immediately after ops that move a game in or out of history.
    pub flush_on_lifecycle: bool,
    /// Flush once this many ops are buffered.
    pub batch_max_ops: usize,
    /// Flush a non-empty buffer after this long.
    pub batch_max_latency_ms: u64,
    /// Capacity of the queue between the store loop and the persistence worker.
    pub persist_queue_bound: usize,
    /// Write a checkpoint every N committed ops; 0 disables.
    pub snapshot_every_ops: usize,
    /// Drop journaled ops covered by a fresh checkpoint.
    pub compact_after_snapshot: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_lifecycle: true,
            batch_max_ops: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            snapshot_every_ops: 500,
            compact_after_snapshot: false,
        }
    }
}

/// Cloneable front end to the single-writer runtime.
pub struct ScorekeeperHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<GameEvent>,
    state_rx: watch::Receiver<Arc<GameState>>,
    ready_rx: watch::Receiver<bool>,
}

impl Clone for ScorekeeperHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
            state_rx: self.state_rx.clone(),
            ready_rx: self.ready_rx.clone(),
        }
    }
}

enum Action {
    CreateGame(Vec<Player>),
    AddPlayer(String),
    AddScore { player_id: String, points: Points },
    UpdateScore { player_id: String, round_index: usize, points: Points },
    DeleteRound(usize),
    CompleteRound(usize),
    RestartWithSamePlayers,
    FinishAndSave,
    LoadFromHistory(Box<HistoryEntry>),
    ClearCurrentGame,
    ClearHistory,
    ToggleReverseScoring,
}

impl Action {
    fn apply(self, store: &mut GameStore) -> Option<StoredOp> {
        match self {
            Action::CreateGame(players) => store.create_game(&players),
            Action::AddPlayer(name) => store.add_player(name),
            Action::AddScore { player_id, points } => store.add_score(&player_id, points),
            Action::UpdateScore {
                player_id,
                round_index,
                points,
            } => store.update_score(&player_id, round_index, points),
            Action::DeleteRound(idx) => store.delete_round(idx),
            Action::CompleteRound(idx) => store.complete_round(idx),
            Action::RestartWithSamePlayers => store.restart_with_same_players(),
            Action::FinishAndSave => store.finish_and_save_current_game(),
            Action::LoadFromHistory(entry) => store.load_from_history(&entry),
            Action::ClearCurrentGame => store.clear_current_game(),
            Action::ClearHistory => store.clear_history(),
            Action::ToggleReverseScoring => store.toggle_reverse_scoring(),
        }
    }
}

enum Command {
    Apply {
        action: Action,
        resp: oneshot::Sender<()>,
    },
    Flush {
        resp: oneshot::Sender<Result<OpSeq, RuntimeError>>,
    },
    Checkpoint {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

enum PersistMsg {
    Op(StoredOp),
    Flush {
        resp: oneshot::Sender<Result<OpSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: StoreSnapshotV1,
        last_seq: OpSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
}

struct Publisher {
    events_tx: broadcast::Sender<GameEvent>,
    state_tx: watch::Sender<Arc<GameState>>,
}

impl Publisher {
    fn event(&self, event: GameEvent) {
        let _ = self.events_tx.send(event);
    }

    fn state(&self, store: &GameStore) {
        self.state_tx.send_replace(Arc::new(store.state().clone()));
    }

    fn persist_failed(&self, err: &PersistError) {
        warn!(%err, "persistence failed");
        self.event(GameEvent::PersistFailed {
            message: err.to_string(),
        });
    }
}

/// Starts the runtime: rehydrates from `sink`, then applies actions in order.
///
/// Actions sent before rehydration completes wait in the command queue. A
/// failed read leaves the runtime ready with an empty state and no sink, so
/// stored data is never overwritten by a store that did not load it.
pub fn spawn_scorekeeper(sink: Option<Box<dyn OpSink>>, config: RuntimeConfig) -> ScorekeeperHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<GameEvent>(1024);
    let (state_tx, state_rx) = watch::channel(Arc::new(GameState::default()));
    let (ready_tx, ready_rx) = watch::channel(false);

    let publisher = Publisher {
        events_tx: events_tx.clone(),
        state_tx,
    };

    tokio::spawn(async move {
        let (mut store, sink) = rehydrate(sink, &publisher).await;
        publisher.state(&store);
        ready_tx.send_replace(true);
        publisher.event(GameEvent::Rehydrated);

        let (persist_tx_opt, mut durable_rx) = if let Some(sink) = sink {
            let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound.max(1));
            let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<OpSeq, PersistError>>();
            spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
            (Some(persist_tx), Some(durable_rx))
        } else {
            (None, None)
        };

        let mut ops_since_snapshot = 0usize;
        let mut worker_gone = false;

        loop {
            if let Some(rx) = durable_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        let done = handle_command(
                            cmd,
                            &mut store,
                            &publisher,
                            persist_tx_opt.as_ref(),
                            &config,
                            &mut ops_since_snapshot,
                        ).await;

                        if done {
                            break;
                        }
                    }
                    durable = rx.recv() => {
                        match durable {
                            Some(Ok(op_seq)) => publisher.event(GameEvent::DurableUpTo { op_seq }),
                            Some(Err(err)) => publisher.persist_failed(&err),
                            None => worker_gone = true,
                        }
                    }
                }
                if worker_gone {
                    durable_rx = None;
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                let done = handle_command(
                    cmd,
                    &mut store,
                    &publisher,
                    persist_tx_opt.as_ref(),
                    &config,
                    &mut ops_since_snapshot,
                ).await;
                if done {
                    break;
                }
            }
        }
        debug!("scorekeeper loop stopped");
    });

    ScorekeeperHandle {
        cmd_tx,
        events_tx,
        state_rx,
        ready_rx,
    }
}

async fn rehydrate(
    sink: Option<Box<dyn OpSink>>,
    publisher: &Publisher,
) -> (GameStore, Option<Box<dyn OpSink>>) {
    let Some(mut sink) = sink else {
        let mut store = GameStore::new();
        store.mark_ready();
        return (store, None);
    };

    let joined = tokio::task::spawn_blocking(move || {
        let loaded = sink.load_store();
        (sink, loaded)
    })
    .await;

    match joined {
        Ok((sink, Ok(store))) => {
            info!(
                history = store.state().history.len(),
                live = store.state().current_game.is_some(),
                "rehydrated"
            );
            (store, Some(sink))
        }
        Ok((_, Err(err))) => {
            error!(%err, "rehydration failed, continuing without persistence");
            publisher.persist_failed(&err);
            let mut store = GameStore::new();
            store.mark_ready();
            (store, None)
        }
        Err(join) => {
            let err = PersistError::Message(format!("join error: {join}"));
            error!(%err, "rehydration failed, continuing without persistence");
            publisher.persist_failed(&err);
            let mut store = GameStore::new();
            store.mark_ready();
            (store, None)
        }
    }
}

impl ScorekeeperHandle {
    /// Subscribes to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events_tx.subscribe()
    }

    /// Receiver of the state, replaced as a whole after every applied action.
    pub fn watch_state(&self) -> watch::Receiver<Arc<GameState>> {
        self.state_rx.clone()
    }

    /// Latest published state.
    pub fn state(&self) -> Arc<GameState> {
        Arc::clone(&self.state_rx.borrow())
    }

    /// True once rehydration has completed.
    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Resolves once rehydration has completed.
    pub async fn wait_ready(&self) -> Result<(), RuntimeError> {
        let mut rx = self.ready_rx.clone();
        rx.wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| RuntimeError::ChannelClosed)
    }

    /// See [`GameStore::create_game`].
    pub async fn create_game(&self, players: Vec<Player>) -> Result<(), RuntimeError> {
        self.apply(Action::CreateGame(players)).await
    }

    /// See [`GameStore::add_player`].
    pub async fn add_player(&self, name: impl Into<String>) -> Result<(), RuntimeError> {
        self.apply(Action::AddPlayer(name.into())).await
    }

    /// See [`GameStore::add_score`].
    pub async fn add_score(&self, player_id: impl Into<String>, points: Points) -> Result<(), RuntimeError> {
        self.apply(Action::AddScore {
            player_id: player_id.into(),
            points,
        })
        .await
    }

    /// See [`GameStore::update_score`].
    pub async fn update_score(
        &self,
        player_id: impl Into<String>,
        round_index: usize,
        points: Points,
    ) -> Result<(), RuntimeError> {
        self.apply(Action::UpdateScore {
            player_id: player_id.into(),
            round_index,
            points,
        })
        .await
    }

    /// See [`GameStore::delete_round`].
    pub async fn delete_round(&self, round_index: usize) -> Result<(), RuntimeError> {
        self.apply(Action::DeleteRound(round_index)).await
    }

    /// See [`GameStore::complete_round`].
    pub async fn complete_round(&self, round_index: usize) -> Result<(), RuntimeError> {
        self.apply(Action::CompleteRound(round_index)).await
    }

    /// See [`GameStore::restart_with_same_players`].
    pub async fn restart_with_same_players(&self) -> Result<(), RuntimeError> {
        self.apply(Action::RestartWithSamePlayers).await
    }

    /// See [`GameStore::finish_and_save_current_game`].
    pub async fn finish_and_save_current_game(&self) -> Result<(), RuntimeError> {
        self.apply(Action::FinishAndSave).await
    }

    /// See [`GameStore::load_from_history`].
    pub async fn load_from_history(&self, entry: HistoryEntry) -> Result<(), RuntimeError> {
        self.apply(Action::LoadFromHistory(Box::new(entry))).await
    }

    /// See [`GameStore::clear_current_game`].
    pub async fn clear_current_game(&self) -> Result<(), RuntimeError> {
        self.apply(Action::ClearCurrentGame).await
    }

    /// See [`GameStore::clear_history`].
    pub async fn clear_history(&self) -> Result<(), RuntimeError> {
        self.apply(Action::ClearHistory).await
    }

    /// See [`GameStore::toggle_reverse_scoring`].
    pub async fn toggle_reverse_scoring(&self) -> Result<(), RuntimeError> {
        self.apply(Action::ToggleReverseScoring).await
    }

    /// Forces buffered ops to storage and returns the durable sequence.
    pub async fn flush(&self) -> Result<OpSeq, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Flush { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Writes a checkpoint of the current state.
    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Checkpoint { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Flushes pending ops and stops the runtime.
    ///
    /// Errors when buffered ops could not be written before stopping.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Shutdown { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    async fn apply(&self, action: Action) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Apply { action, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

async fn handle_command(
    cmd: Command,
    store: &mut GameStore,
    publisher: &Publisher,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    config: &RuntimeConfig,
    ops_since_snapshot: &mut usize,
) -> bool {
    match cmd {
        Command::Apply { action, resp } => {
            if let Some(stored) = action.apply(store) {
                publisher.state(store);
                publisher.event(GameEvent::from(&stored.op));

                if let Some(tx) = persist_tx {
                    // The transition stands even if it never reaches storage.
                    if tx.send(PersistMsg::Op(stored)).await.is_err() {
                        publisher.persist_failed(&PersistError::Message(
                            "persistence worker stopped".to_string(),
                        ));
                    }
                } else {
                    publisher.event(GameEvent::DurableUpTo {
                        op_seq: store.latest_op_seq(),
                    });
                }

                *ops_since_snapshot += 1;
                maybe_auto_checkpoint(store, persist_tx, config, ops_since_snapshot).await;
            }
            let _ = resp.send(());
        }
        Command::Flush { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (flush_tx, flush_rx) = oneshot::channel();
                if tx
                    .send(PersistMsg::Flush { resp: flush_tx })
                    .await
                    .is_err()
                {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    flush_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(store.latest_op_seq())
            };
            let _ = resp.send(out);
        }
        Command::Checkpoint { resp } => {
            let out = if let Some(tx) = persist_tx {
                let snapshot = store.export_snapshot();
                let last_seq = store.latest_op_seq();
                let (cp_tx, cp_rx) = oneshot::channel();
                if tx
                    .send(PersistMsg::Checkpoint {
                        snapshot,
                        last_seq,
                        compact: config.compact_after_snapshot,
                        resp: cp_tx,
                    })
                    .await
                    .is_err()
                {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    cp_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(())
            };
            if out.is_ok() {
                *ops_since_snapshot = 0;
            }
            let _ = resp.send(out);
        }
        Command::Shutdown { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (done_tx, done_rx) = oneshot::channel();
                let send_res = tx.send(PersistMsg::Shutdown { resp: done_tx }).await;
                if send_res.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    done_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(())
            };
            let _ = resp.send(out);
            return true;
        }
    }

    false
}

fn spawn_persistence_worker(
    sink: Box<dyn OpSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredOp>::new();
        let mut deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
        let mut last_durable: OpSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Op(stored) => {
                            let is_lifecycle = stored.op.is_lifecycle();
                            buf.push(stored);

                            if buf.len() >= config.batch_max_ops || (config.flush_on_lifecycle && is_lifecycle) {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                                deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let mut result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            if result.is_ok() {
                                result = with_sink(&sink, move |sink| {
                                    sink.write_snapshot(&snapshot, last_seq)?;
                                    if compact {
                                        sink.compact_through(last_seq)?;
                                    }
                                    Ok(())
                                })
                                .await;
                            }
                            let _ = resp.send(result);
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Shutdown { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result);
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                }
            }
        }
    });
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn OpSink>>>,
    buf: &mut Vec<StoredOp>,
    last_durable: &mut OpSeq,
    durable_tx: &mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            with_sink(sink, |sink| sink.flush()).await?;
        }
        return Ok(());
    }

    // The batch stays buffered until the sink accepts it, so a failed append
    // is retried ahead of every later op.
    let ops = buf.clone();
    let count = ops.len();
    let seq = match with_sink(sink, move |sink| sink.append_ops(&ops)).await {
        Ok(seq) => seq,
        Err(err) => {
            let _ = durable_tx.send(Err(PersistError::Message(format!(
                "append failed, {count} ops kept for retry: {err}"
            ))));
            return Err(err);
        }
    };
    buf.clear();
    *last_durable = (*last_durable).max(seq);
    debug!(count, durable = *last_durable, "batch persisted");
    let _ = durable_tx.send(Ok(*last_durable));

    if call_flush {
        if let Err(err) = with_sink(sink, |sink| sink.flush()).await {
            let _ = durable_tx.send(Err(PersistError::Message(format!("flush failed: {err}"))));
            return Err(err);
        }
    }
    Ok(())
}

/// Runs blocking sink I/O off the async workers.
async fn with_sink<T, F>(sink: &Arc<Mutex<Box<dyn OpSink>>>, f: F) -> Result<T, PersistError>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn OpSink) -> Result<T, PersistError> + Send + 'static,
{
    let sink = Arc::clone(sink);
    tokio::task::spawn_blocking(move || {
        let mut guard = sink.blocking_lock();
        f(guard.as_mut())
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?
}

async fn maybe_auto_checkpoint(
    store: &GameStore,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    config: &RuntimeConfig,
    ops_since_snapshot: &mut usize,
) {
    if config.snapshot_every_ops == 0 || *ops_since_snapshot < config.snapshot_every_ops {
        return;
    }

    let Some(tx) = persist_tx else {
        return;
    };

    let snapshot = store.export_snapshot();
    let last_seq = store.latest_op_seq();
    let (cp_tx, cp_rx) = oneshot::channel();
    if tx
        .send(PersistMsg::Checkpoint {
            snapshot,
            last_seq,
            compact: config.compact_after_snapshot,
            resp: cp_tx,
        })
        .await
        .is_ok()
    {
        if let Ok(Err(err)) = cp_rx.await {
            warn!(%err, "automatic checkpoint failed");
        }
        *ops_since_snapshot = 0;
    }
}
