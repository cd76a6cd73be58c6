use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tempfile::TempDir;
use tokio::sync::broadcast;

use scorekeep::{
    core::store::GameStore,
    game::new_player,
    op::StoredOp,
    persist::{json_file::JsonFileSink, sqlite::SqliteOpSink, OpSink, PersistError, PersistResult},
    runtime::{
        events::GameEvent,
        handle::{spawn_scorekeeper, RuntimeConfig},
    },
    types::OpSeq,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn next_events(sub: &mut broadcast::Receiver<GameEvent>, want: usize) -> Vec<GameEvent> {
    let mut seen = Vec::new();
    for _ in 0..(want * 4) {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event")
            .expect("recv");
        if !matches!(evt, GameEvent::DurableUpTo { .. }) {
            seen.push(evt);
        }
        if seen.len() == want {
            break;
        }
    }
    seen
}

struct FailingSink {
    attempts: Arc<Mutex<usize>>,
}

impl OpSink for FailingSink {
    fn append_ops(&mut self, _ops: &[StoredOp]) -> PersistResult<OpSeq> {
        *self.attempts.lock().expect("lock") += 1;
        Err(PersistError::Message("disk full".to_string()))
    }
}

/// Rejects its first `failures` appends, then writes through to SQLite.
struct FlakySqliteSink {
    inner: SqliteOpSink,
    failures: usize,
}

impl OpSink for FlakySqliteSink {
    fn load_store(&mut self) -> PersistResult<GameStore> {
        self.inner.load_store()
    }

    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(PersistError::Message("database is locked".to_string()));
        }
        OpSink::append_ops(&mut self.inner, ops)
    }

    fn flush(&mut self) -> PersistResult<()> {
        OpSink::flush(&mut self.inner)
    }
}

struct UnreadableSink {
    appended: Arc<Mutex<Vec<OpSeq>>>,
}

impl OpSink for UnreadableSink {
    fn load_store(&mut self) -> PersistResult<GameStore> {
        Err(PersistError::Message("corrupt".to_string()))
    }

    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        let mut appended = self.appended.lock().expect("lock");
        appended.extend(ops.iter().map(|o| o.seq));
        Ok(ops.last().map(|o| o.seq).unwrap_or(0))
    }
}

struct SlowLoadSink {
    delay: Duration,
}

impl OpSink for SlowLoadSink {
    fn load_store(&mut self) -> PersistResult<GameStore> {
        std::thread::sleep(self.delay);
        let mut store = GameStore::new();
        store.create_game(&[new_player("Stored")]);
        store.finish_and_save_current_game();
        store.mark_ready();
        Ok(store)
    }

    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        Ok(ops.last().map(|o| o.seq).unwrap_or(0))
    }
}

#[tokio::test]
async fn actions_publish_state_and_ordered_events() {
    init_tracing();
    let handle = spawn_scorekeeper(None, RuntimeConfig::default());
    let mut sub = handle.subscribe();
    handle.wait_ready().await.expect("ready");
    assert!(handle.is_ready());

    handle
        .create_game(vec![new_player("Alice"), new_player("Bob")])
        .await
        .expect("create");
    let state = handle.state();
    let game = state.current_game.clone().expect("live");
    handle.add_score(game.players[0].id.clone(), 10).await.expect("score");
    handle.add_score(game.players[1].id.clone(), 5).await.expect("score");
    handle.toggle_reverse_scoring().await.expect("toggle");

    let state = handle.state();
    assert_eq!(state.totals()[0].1, 10);
    assert_eq!(state.rankings()[&game.players[1].id], 1);

    let seen = next_events(&mut sub, 5).await;
    assert_eq!(seen[0], GameEvent::Rehydrated);
    assert_eq!(
        seen[1],
        GameEvent::GameStarted {
            game_id: game.id.clone(),
            archived: None
        }
    );
    assert_eq!(seen[2], GameEvent::ScoresChanged);
    assert_eq!(seen[3], GameEvent::ScoresChanged);
    assert_eq!(seen[4], GameEvent::ReverseScoringChanged { enabled: true });

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn noop_actions_emit_nothing() {
    let handle = spawn_scorekeeper(None, RuntimeConfig::default());
    handle.wait_ready().await.expect("ready");
    let mut sub = handle.subscribe();
    let mut watch = handle.watch_state();
    let _ = watch.borrow_and_update();

    handle.add_score("ghost", 3).await.expect("noop");
    handle.delete_round(4).await.expect("noop");
    handle.finish_and_save_current_game().await.expect("noop");
    handle.clear_current_game().await.expect("noop");
    handle.complete_round(usize::MAX).await.expect("noop");

    assert!(!watch.has_changed().expect("watch open"));
    assert!(matches!(sub.try_recv(), Err(broadcast::error::TryRecvError::Empty)));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn action_event_precedes_durable_notice_without_storage() {
    let handle = spawn_scorekeeper(None, RuntimeConfig::default());
    handle.wait_ready().await.expect("ready");
    let mut sub = handle.subscribe();

    handle.create_game(vec![new_player("Alice")]).await.expect("create");
    let game_id = handle.state().current_game.as_ref().expect("live").id.clone();

    assert_eq!(
        sub.recv().await.expect("recv"),
        GameEvent::GameStarted {
            game_id,
            archived: None
        }
    );
    assert_eq!(sub.recv().await.expect("recv"), GameEvent::DurableUpTo { op_seq: 1 });

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn commands_sent_before_rehydration_wait_for_it() {
    let sink = SlowLoadSink {
        delay: Duration::from_millis(100),
    };
    let handle = spawn_scorekeeper(Some(Box::new(sink)), RuntimeConfig::default());
    assert!(!handle.is_ready());

    handle.clear_history().await.expect("clear");
    assert!(handle.is_ready());
    assert!(handle.state().history.is_empty());

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn write_failures_surface_without_rolling_back() {
    init_tracing();
    let attempts = Arc::new(Mutex::new(0));
    let sink = FailingSink {
        attempts: Arc::clone(&attempts),
    };
    let cfg = RuntimeConfig {
        flush_on_lifecycle: true,
        ..RuntimeConfig::default()
    };
    let handle = spawn_scorekeeper(Some(Box::new(sink)), cfg);
    let mut sub = handle.subscribe();

    handle.create_game(vec![new_player("Alice")]).await.expect("create");

    let mut failed = false;
    for _ in 0..6 {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event")
            .expect("recv");
        if matches!(evt, GameEvent::PersistFailed { .. }) {
            failed = true;
            break;
        }
    }
    assert!(failed, "expected PersistFailed event");
    assert!(handle.state().current_game.is_some());
    assert!(*attempts.lock().expect("lock") >= 1);

    let before = *attempts.lock().expect("lock");
    assert!(handle.flush().await.is_err());
    assert!(*attempts.lock().expect("lock") > before);
    assert!(handle.shutdown().await.is_err());
}

#[tokio::test]
async fn failed_batches_are_retried_without_sequence_gaps() {
    init_tracing();
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("flaky.db");

    let sink = FlakySqliteSink {
        inner: SqliteOpSink::open(&db_path).expect("open"),
        failures: 1,
    };
    let cfg = RuntimeConfig {
        flush_on_lifecycle: true,
        ..RuntimeConfig::default()
    };
    let handle = spawn_scorekeeper(Some(Box::new(sink)), cfg);
    handle.wait_ready().await.expect("ready");

    handle.create_game(vec![new_player("Alice")]).await.expect("create");
    assert_eq!(handle.flush().await.expect("retried flush"), 1);

    let ids = handle.state().current_game.as_ref().expect("live").player_ids();
    handle.add_score(ids[0].clone(), 7).await.expect("score");
    assert_eq!(handle.flush().await.expect("flush"), 2);
    let expected = handle.state();
    handle.shutdown().await.expect("shutdown");

    let reopened = SqliteOpSink::open(&db_path).expect("reopen");
    assert_eq!(reopened.latest_seq().expect("latest"), 2);
    let replayed = reopened.load_store().expect("replay");
    assert_eq!(replayed.state(), &*expected);
}

#[tokio::test]
async fn unreadable_storage_is_never_overwritten() {
    let appended = Arc::new(Mutex::new(Vec::new()));
    let sink = UnreadableSink {
        appended: Arc::clone(&appended),
    };
    let handle = spawn_scorekeeper(Some(Box::new(sink)), RuntimeConfig::default());
    let mut sub = handle.subscribe();

    handle.wait_ready().await.expect("ready");
    let first = sub.recv().await.expect("recv");
    assert!(matches!(first, GameEvent::PersistFailed { .. }));
    assert_eq!(sub.recv().await.expect("recv"), GameEvent::Rehydrated);

    handle.create_game(vec![new_player("Alice")]).await.expect("create");
    handle.flush().await.expect("flush");
    handle.shutdown().await.expect("shutdown");

    assert!(handle.state().current_game.is_some());
    assert!(appended.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn sqlite_backed_runtime_rehydrates_after_restart() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("runtime.db");

    let sink = SqliteOpSink::open(&db_path).expect("open");
    let handle = spawn_scorekeeper(Some(Box::new(sink)), RuntimeConfig::default());
    handle.wait_ready().await.expect("ready");

    handle
        .create_game(vec![new_player("Alice"), new_player("Bob")])
        .await
        .expect("create");
    let ids = handle.state().current_game.as_ref().expect("live").player_ids();
    handle.add_score(ids[0].clone(), 10).await.expect("score");
    handle.add_score(ids[1].clone(), 5).await.expect("score");
    handle.complete_round(1).await.expect("complete");
    handle.checkpoint().await.expect("checkpoint");
    handle.restart_with_same_players().await.expect("restart");
    handle.add_score(ids[0].clone(), 3).await.expect("score");
    let durable = handle.flush().await.expect("flush");
    let expected = handle.state();
    handle.shutdown().await.expect("shutdown");

    let reopened = SqliteOpSink::open(&db_path).expect("reopen");
    assert_eq!(reopened.latest_seq().expect("latest"), durable);

    let restarted = spawn_scorekeeper(Some(Box::new(reopened)), RuntimeConfig::default());
    restarted.wait_ready().await.expect("ready");
    assert_eq!(*restarted.state(), *expected);
    assert_eq!(restarted.state().history.len(), 1);
    restarted.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn json_backed_runtime_rehydrates_after_restart() {
    let tmp = TempDir::new().expect("tmp");
    let path = tmp.path().join("scorekeep.json");

    let handle = spawn_scorekeeper(Some(Box::new(JsonFileSink::new(&path))), RuntimeConfig::default());
    handle.create_game(vec![new_player("Alice")]).await.expect("create");
    handle.add_player("Bob").await.expect("add");
    handle.finish_and_save_current_game().await.expect("finish");
    let entry = handle.state().history[0].clone();
    handle.load_from_history(entry).await.expect("load");
    handle.flush().await.expect("flush");
    let expected = handle.state();
    handle.shutdown().await.expect("shutdown");

    let restarted = spawn_scorekeeper(Some(Box::new(JsonFileSink::new(&path))), RuntimeConfig::default());
    restarted.wait_ready().await.expect("ready");
    assert_eq!(*restarted.state(), *expected);

    restarted.clear_current_game().await.expect("clear");
    restarted.clear_history().await.expect("clear");
    restarted.shutdown().await.expect("shutdown");

    let (_, state) = JsonFileSink::new(&path).read_state().expect("read").expect("document");
    assert!(state.current_game.is_none());
    assert!(state.history.is_empty());
}
