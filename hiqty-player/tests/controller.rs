// Reconciliation controller scenarios against an in-process store
//
// Every test runs on a paused clock; the store, voice transport and backend
// are in-process fakes (see common/mod.rs).

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{envelope, wait_until, Harness, RecordingVoice, Script};
use hiqty_core::voice::GuildEvent;
use hiqty_core::{MemoryStore, Store};
use hiqty_player::ReconcileOutcome;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_reconcile_is_idempotent() {
    let h = Harness::new();
    let voice = RecordingVoice::new();
    h.backend.script("A", Script::Endless);
    h.play("100", "200", &["A"]).await;

    let controller = h.controller("node-a", voice.clone());
    let admission = CancellationToken::new();

    assert_eq!(
        controller.reconcile("100", &admission).await.unwrap(),
        ReconcileOutcome::Spawned
    );
    assert_eq!(
        controller.reconcile("100", &admission).await.unwrap(),
        ReconcileOutcome::AlreadyPlaying
    );
    assert_eq!(controller.session_count(), 1);

    wait_until(|| voice.frames().len() >= 5).await;
    assert_eq!(voice.joins().len(), 1);
    assert_eq!(h.backend.opened(), vec!["A"]);

    h.store.set(&h.keys.state("100"), "stopped").await.unwrap();
    assert_eq!(
        controller.reconcile("100", &admission).await.unwrap(),
        ReconcileOutcome::Stopped
    );
    assert_eq!(
        controller.reconcile("100", &admission).await.unwrap(),
        ReconcileOutcome::Idle
    );
    wait_until(|| voice.disconnects() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_unset_state_only_reads() {
    let h = Harness::new();
    let controller = h.controller("node-a", RecordingVoice::new());
    let writes = h.store.writes();

    let outcome = controller
        .reconcile("100", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Idle);
    assert_eq!(controller.session_count(), 0);
    assert_eq!(h.store.writes(), writes);
}

#[tokio::test(start_paused = true)]
async fn test_requeue_while_session_exits_is_picked_up() {
    let h = Harness::new();
    let voice = RecordingVoice::new();
    voice.slow_disconnect(Duration::from_secs(2));
    h.backend.script("A", Script::Frames(1));
    h.backend.script("B", Script::Frames(1));
    h.play("100", "200", &["A"]).await;

    // no watcher: only the session's own exit can re-trigger
    let controller = h.controller("node-a", voice.clone());
    controller.add_guild("100").await.unwrap();
    let admission = CancellationToken::new();
    assert_eq!(
        controller.reconcile("100", &admission).await.unwrap(),
        ReconcileOutcome::Spawned
    );

    // queue drained, session still registered while it disconnects
    h.wait_gone(&h.keys.state("100")).await;
    h.play("100", "200", &["B"]).await;
    assert_eq!(
        controller.reconcile("100", &admission).await.unwrap(),
        ReconcileOutcome::AlreadyPlaying
    );

    let started = Instant::now();
    wait_until(|| voice.frames() == vec!["A:0", "B:0"]).await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(voice.joins(), vec!["200", "200"]);
}

#[tokio::test(start_paused = true)]
async fn test_no_session_starts_after_drain() {
    let h = Harness::new();
    let voice = RecordingVoice::new();
    h.play("100", "200", &["A"]).await;

    let controller = h.controller("node-a", voice.clone());
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let (_events, events_rx) = mpsc::channel(1);
    controller.clone().run(shutdown, events_rx).await.unwrap();

    // a worker that won the lease just as draining began
    assert_eq!(
        controller
            .reconcile("100", &CancellationToken::new())
            .await
            .unwrap(),
        ReconcileOutcome::Abandoned
    );
    assert_eq!(controller.session_count(), 0);
    h.wait_gone(&h.keys.player_lock("100")).await;
    assert!(voice.joins().is_empty());
    assert_eq!(h.queue_ids("100").await, vec!["A"]);
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_skips_the_cycle() {
    let h = Harness::new();
    h.play("100", "200", &["A"]).await;
    let controller = h.controller("node-a", RecordingVoice::new());
    let admission = CancellationToken::new();

    h.store.fail_reads(true);
    assert!(controller.reconcile("100", &admission).await.is_err());
    assert_eq!(controller.session_count(), 0);

    h.store.fail_reads(false);
    h.backend.script("A", Script::Endless);
    assert_eq!(
        controller.reconcile("100", &admission).await.unwrap(),
        ReconcileOutcome::Spawned
    );
    h.store.set(&h.keys.state("100"), "stopped").await.unwrap();
    controller.reconcile("100", &admission).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_playing_then_stopped() {
    let h = Harness::new();
    let voice = RecordingVoice::new();
    h.backend.script("1", Script::Endless);

    let controller = h.controller("node-a", voice.clone());
    let shutdown = CancellationToken::new();
    let (events, events_rx) = mpsc::channel(8);
    let run = tokio::spawn(controller.clone().run(shutdown.clone(), events_rx));
    events.send(GuildEvent::Create("100".to_string())).await.unwrap();

    h.store
        .list_push_tail(
            &h.keys.playlist("100"),
            &[r#"{"service":"soundcloud","track":{"id":"1"}}"#.to_string()],
        )
        .await
        .unwrap();
    h.store.set(&h.keys.channel("100"), "200").await.unwrap();
    h.store.set(&h.keys.state("100"), "playing").await.unwrap();

    wait_until(|| !voice.frames().is_empty()).await;
    let lock = h.keys.player_lock("100");
    assert_eq!(lock, "hiqty:server:100:player_lock");
    let holder = h.get(&lock).await.unwrap();
    assert!(holder.starts_with("node-a:"), "holder {holder}");
    assert!(h.store.ttl(&lock).unwrap() <= Duration::from_secs(15));
    assert_eq!(voice.joins(), vec!["200"]);

    h.store.set(&h.keys.state("100"), "stopped").await.unwrap();
    wait_until(|| voice.disconnects() == 1).await;
    wait_until(|| !controller.has_session("100")).await;
    wait_until(|| h.store.ttl(&lock).is_none()).await;

    // in-flight track stays at the head
    assert_eq!(h.queue_ids("100").await, vec!["1"]);

    shutdown.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_current_track() {
    let h = Harness::new();
    let voice = RecordingVoice::new();
    h.backend.script("A", Script::Frames(50));
    h.play("100", "200", &["A", "B"]).await;

    let controller = h.controller("node-a", voice.clone());
    let shutdown = CancellationToken::new();
    let (events, events_rx) = mpsc::channel(8);
    let run = tokio::spawn(controller.clone().run(shutdown.clone(), events_rx));
    events.send(GuildEvent::Create("100".to_string())).await.unwrap();

    wait_until(|| !voice.frames().is_empty()).await;
    shutdown.cancel();
    run.await.unwrap().unwrap();

    assert_eq!(voice.frames().len(), 50);
    assert_eq!(h.backend.opened(), vec!["A"]);
    assert_eq!(h.queue_ids("100").await, vec!["B"]);
    assert_eq!(h.get(&h.keys.state("100")).await.as_deref(), Some("playing"));
    assert_eq!(h.get(&h.keys.player_lock("100")).await, None);
    assert_eq!(controller.session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_honoured_while_draining() {
    let h = Harness::new();
    let voice = RecordingVoice::new();
    h.backend.script("A", Script::Endless);
    h.play("100", "200", &["A"]).await;

    let controller = h.controller("node-a", voice.clone());
    let shutdown = CancellationToken::new();
    let (events, events_rx) = mpsc::channel(8);
    let run = tokio::spawn(controller.clone().run(shutdown.clone(), events_rx));
    events.send(GuildEvent::Create("100".to_string())).await.unwrap();

    wait_until(|| !voice.frames().is_empty()).await;
    shutdown.cancel();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!run.is_finished());

    h.store.set(&h.keys.state("100"), "stopped").await.unwrap();
    run.await.unwrap().unwrap();
    assert_eq!(h.queue_ids("100").await, vec!["A"]);
}

#[tokio::test(start_paused = true)]
async fn test_watcher_reconnects_and_resubscribes() {
    let h = Harness::new();
    let voice = RecordingVoice::new();
    let controller = h.controller("node-a", voice.clone());
    let shutdown = CancellationToken::new();
    let (events, events_rx) = mpsc::channel(8);
    let run = tokio::spawn(controller.clone().run(shutdown.clone(), events_rx));
    events.send(GuildEvent::Create("100".to_string())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    h.store.disconnect_subscriptions();
    h.backend.script("A", Script::Frames(3));
    h.play("100", "200", &["A"]).await;

    wait_until(|| voice.frames().len() == 3).await;
    wait_until(|| !controller.has_session("100")).await;
    assert_eq!(h.get(&h.keys.state("100")).await, None);

    shutdown.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_guild_delete_purges_keys() {
    let h = Harness::new();
    let voice = RecordingVoice::new();
    h.backend.script("A", Script::Endless);
    h.play("100", "200", &["A", "B"]).await;
    h.store.set(&h.keys.channel("101"), "201").await.unwrap();

    let controller = h.controller("node-a", voice.clone());
    let shutdown = CancellationToken::new();
    let (events, events_rx) = mpsc::channel(8);
    let run = tokio::spawn(controller.clone().run(shutdown.clone(), events_rx));
    events.send(GuildEvent::Create("100".to_string())).await.unwrap();
    wait_until(|| controller.has_session("100")).await;

    events.send(GuildEvent::Delete("100".to_string())).await.unwrap();
    wait_until(|| !controller.has_session("100")).await;
    wait_until(|| voice.disconnects() == 1).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(controller.known_guilds().is_empty());
    for key in [
        h.keys.playlist("100"),
        h.keys.state("100"),
        h.keys.channel("100"),
        h.keys.player_lock("100"),
    ] {
        assert_eq!(h.get(&key).await, None, "{key} survived");
    }
    // other guilds untouched
    assert_eq!(h.get(&h.keys.channel("101")).await.as_deref(), Some("201"));

    shutdown.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_guild_delete_purges_across_scan_steps() {
    let h = Harness::new();
    let voice = RecordingVoice::new();
    h.backend.script("A", Script::Endless);
    h.play("100", "200", &["A", "B", "C"]).await;
    // neighbours on both sides of the purged range
    h.store.set(&h.keys.channel("1000"), "300").await.unwrap();
    h.store.set(&h.keys.channel("101"), "201").await.unwrap();

    let controller = h.controller_with_scan_batch("node-a", voice.clone(), 1);
    let shutdown = CancellationToken::new();
    let (events, events_rx) = mpsc::channel(8);
    let run = tokio::spawn(controller.clone().run(shutdown.clone(), events_rx));
    events.send(GuildEvent::Create("100".to_string())).await.unwrap();
    wait_until(|| controller.has_session("100")).await;

    events.send(GuildEvent::Delete("100".to_string())).await.unwrap();
    wait_until(|| !controller.has_session("100")).await;
    wait_until(|| voice.disconnects() == 1).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    for key in [
        h.keys.playlist("100"),
        h.keys.state("100"),
        h.keys.channel("100"),
        h.keys.player_lock("100"),
    ] {
        assert_eq!(h.get(&key).await, None, "{key} survived");
    }
    assert_eq!(h.get(&h.keys.channel("1000")).await.as_deref(), Some("300"));
    assert_eq!(h.get(&h.keys.channel("101")).await.as_deref(), Some("201"));

    shutdown.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_node_plays_a_guild() {
    let store = MemoryStore::new();
    let a = Harness::with_store(store.clone());
    let b = Harness::with_store(store.clone());
    a.backend.script("T", Script::Endless);
    b.backend.script("T", Script::Endless);

    let node_a = a.controller("node-a", RecordingVoice::new());
    let node_b = b.controller("node-b", RecordingVoice::new());
    let shutdown = CancellationToken::new();

    let mut runs = Vec::new();
    for node in [&node_a, &node_b] {
        let (events, events_rx) = mpsc::channel(8);
        runs.push(tokio::spawn(node.clone().run(shutdown.clone(), events_rx)));
        events.send(GuildEvent::Create("42".to_string())).await.unwrap();
    }
    a.push("42", &["T"]).await;
    store.set(&a.keys.channel("42"), "200").await.unwrap();
    store.set(&a.keys.state("42"), "playing").await.unwrap();

    let overlap = Arc::new(AtomicBool::new(false));
    let sampling = CancellationToken::new();
    let sampler = tokio::spawn({
        let (node_a, node_b) = (node_a.clone(), node_b.clone());
        let overlap = overlap.clone();
        let sampling = sampling.clone();
        async move {
            while !sampling.is_cancelled() {
                if node_a.has_session("42") && node_b.has_session("42") {
                    overlap.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    });

    wait_until(|| node_a.has_session("42") || node_b.has_session("42")).await;
    let holder = if node_a.has_session("42") { &node_a } else { &node_b };

    // extensions fail: the holder must stop within one renewal period
    store.fail_lease_extends(true);
    let failed_at = Instant::now();
    wait_until(|| !holder.has_session("42")).await;
    assert!(failed_at.elapsed() <= Duration::from_millis(10_100));
    store.fail_lease_extends(false);

    // someone takes over once the stale lease expires
    wait_until(|| node_a.has_session("42") || node_b.has_session("42")).await;
    assert!(failed_at.elapsed() >= Duration::from_secs(5));

    sampling.cancel();
    sampler.await.unwrap();
    assert!(!overlap.load(Ordering::SeqCst));

    store.set(&a.keys.state("42"), "stopped").await.unwrap();
    shutdown.cancel();
    for run in runs {
        run.await.unwrap().unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_resync_recovers_skipped_cycle() {
    let h = Harness::new();
    let voice = RecordingVoice::new();
    let controller = h.controller("node-a", voice.clone());
    let shutdown = CancellationToken::new();
    let (events, events_rx) = mpsc::channel(8);
    let run = tokio::spawn(controller.clone().run(shutdown.clone(), events_rx));
    events.send(GuildEvent::Create("100".to_string())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the notification arrives while reads fail, so that cycle is skipped
    h.backend.script("A", Script::Frames(2));
    h.store
        .list_push_tail(&h.keys.playlist("100"), &[envelope("A")])
        .await
        .unwrap();
    h.store.set(&h.keys.channel("100"), "200").await.unwrap();
    h.store.fail_reads(true);
    let started = Instant::now();
    h.store.set(&h.keys.state("100"), "playing").await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!controller.has_session("100"));
    h.store.fail_reads(false);

    wait_until(|| voice.frames().len() == 2).await;
    assert!(started.elapsed() <= Duration::from_secs(61));

    shutdown.cancel();
    run.await.unwrap().unwrap();
}
