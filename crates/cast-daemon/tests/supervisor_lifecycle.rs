mod common;

use std::time::Duration;

use cast_daemon::presence::{PRESENCE_NOTIFICATION_ID, PREPARING_TEXT};
use cast_proto::snapshot::{PlaybackSnapshot, SupervisorRunState};
use common::{advance_to, conservative, harness, ms, target, Call, ScriptedEngine};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn advances_once_near_end_then_holds_for_cooldown() {
    let h = harness(ScriptedEngine::new(199, 200, "Kizuna Music"), conservative());
    let origin = Instant::now();

    h.controller.start(target("101")).await;

    // First tick happens after the initial delay and fires immediately.
    advance_to(origin, ms(2500)).await;
    assert_eq!(h.engine.times_of(&Call::Next), vec![ms(2000)]);
    assert_eq!(h.controller.run_state(), SupervisorRunState::CommandCooldown);

    // Nothing more during the 5000 ms dead time, even though the engine keeps
    // reporting the same end-of-track reading.
    advance_to(origin, ms(7500)).await;
    assert_eq!(h.engine.count(&Call::Next), 1);
    assert_eq!(h.engine.count(&Call::QueryProgress), 1);

    // Cooldown, then one tick interval, then the stuck condition fires again.
    advance_to(origin, ms(8500)).await;
    assert_eq!(h.engine.times_of(&Call::Next), vec![ms(2000), ms(8000)]);
}

#[tokio::test(start_paused = true)]
async fn near_end_notification_shows_progress() {
    let h = harness(ScriptedEngine::new(199, 200, "Kizuna Music"), conservative());
    let origin = Instant::now();

    h.controller.start(target("101")).await;
    assert_eq!(
        h.sink.get(PRESENCE_NOTIFICATION_ID).as_deref(),
        Some(PREPARING_TEXT)
    );

    advance_to(origin, ms(2100)).await;
    assert_eq!(
        h.sink.get(PRESENCE_NOTIFICATION_ID).as_deref(),
        Some("Kizuna Music (03:19/03:20)")
    );
    assert_eq!(h.sink.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn new_track_guard_blocks_short_tracks() {
    let h = harness(ScriptedEngine::new(3, 4, "jingle"), conservative());
    let origin = Instant::now();

    h.controller.start(target("101")).await;
    advance_to(origin, ms(20_500)).await;

    assert_eq!(h.engine.count(&Call::Next), 0);
    assert_eq!(h.controller.run_state(), SupervisorRunState::Polling);
}

#[tokio::test(start_paused = true)]
async fn unknown_readings_never_advance() {
    for (current, total) in [(0, 0), (-1, 0), (-1, 200), (199, -1)] {
        let h = harness(ScriptedEngine::new(current, total, "unknown"), conservative());
        let origin = Instant::now();

        h.controller.start(target("101")).await;
        advance_to(origin, ms(10_500)).await;

        assert_eq!(
            h.engine.count(&Call::Next),
            0,
            "advanced on ({}, {})",
            current,
            total
        );
        h.controller.stop().await;
    }
}

#[tokio::test(start_paused = true)]
async fn empty_session_renders_placeholder() {
    let h = harness(ScriptedEngine::new(0, 0, "unknown"), conservative());
    let origin = Instant::now();

    h.controller.start(target("101")).await;
    advance_to(origin, ms(5500)).await;

    assert_eq!(h.engine.count(&Call::Next), 0);
    assert_eq!(h.controller.publisher().current(), PlaybackSnapshot::new(0, 0, "unknown"));
    assert_eq!(
        h.sink.get(PRESENCE_NOTIFICATION_ID).as_deref(),
        Some(PREPARING_TEXT)
    );
}

#[tokio::test(start_paused = true)]
async fn unknown_position_keeps_preparing_text() {
    let h = harness(ScriptedEngine::new(-1, 200, "Kizuna Music"), conservative());
    let origin = Instant::now();

    h.controller.start(target("101")).await;
    advance_to(origin, ms(4500)).await;

    assert_eq!(
        h.sink.get(PRESENCE_NOTIFICATION_ID).as_deref(),
        Some(PREPARING_TEXT)
    );

    h.engine.set_reading(12, 200);
    advance_to(origin, ms(5500)).await;
    assert_eq!(
        h.sink.get(PRESENCE_NOTIFICATION_ID).as_deref(),
        Some("Kizuna Music (00:12/03:20)")
    );
}

#[tokio::test(start_paused = true)]
async fn track_that_lost_its_duration_shows_title_only() {
    let h = harness(ScriptedEngine::new(30, 200, "Hikaru Nara"), conservative());
    let origin = Instant::now();

    h.controller.start(target("101")).await;
    advance_to(origin, ms(2500)).await;
    h.engine.set_reading(31, 0);
    advance_to(origin, ms(3500)).await;

    assert_eq!(
        h.sink.get(PRESENCE_NOTIFICATION_ID).as_deref(),
        Some("currently playing: Hikaru Nara")
    );
}

#[tokio::test(start_paused = true)]
async fn every_tick_publishes_exactly_once() {
    let h = harness(ScriptedEngine::new(-1, 0, "unknown"), conservative());
    let origin = Instant::now();

    h.controller.start(target("101")).await;
    let after_start = h.controller.publisher().revision();

    advance_to(origin, ms(2500)).await;
    h.engine.set_reading(50, 200);
    advance_to(origin, ms(6500)).await;
    h.engine.set_reading(199, 200);
    advance_to(origin, ms(15_500)).await;

    let ticks = h.engine.count(&Call::QueryProgress) as u64;
    // 2000..=6000 every second, 7000 fires, cooldown + one interval, 13000 fires again
    assert_eq!(ticks, 7);
    assert_eq!(h.engine.times_of(&Call::Next), vec![ms(7000), ms(13_000)]);
    assert_eq!(h.controller.publisher().revision() - after_start, ticks);
    assert_eq!(h.engine.count(&Call::QueryTotal) as u64, ticks);
    assert_eq!(h.engine.count(&Call::QueryTitle) as u64, ticks);
}

#[tokio::test(start_paused = true)]
async fn responsive_interval_polls_twice_as_often() {
    let timing = cast_daemon::supervisor::SupervisorTiming {
        tick_interval: ms(500),
        initial_delay: ms(2000),
    };
    let h = harness(ScriptedEngine::new(10, 200, "t"), timing);
    let origin = Instant::now();

    h.controller.start(target("101")).await;
    advance_to(origin, ms(4250)).await;

    // 2000, 2500, 3000, 3500, 4000
    assert_eq!(h.engine.count(&Call::QueryProgress), 5);
}

#[tokio::test(start_paused = true)]
async fn next_track_after_advance_does_not_retrigger() {
    let engine = ScriptedEngine::new(238, 240, "Yes! BanG_Dream!");
    engine.queue_next_track(0, 180, "Tokimeki Experience!");
    let h = harness(engine, conservative());
    let origin = Instant::now();

    h.controller.start(target("101")).await;
    advance_to(origin, ms(20_500)).await;

    assert_eq!(h.engine.count(&Call::Next), 1);
    assert_eq!(h.controller.publisher().current().title, "Tokimeki Experience!");
    assert_eq!(h.controller.run_state(), SupervisorRunState::Polling);
}

#[tokio::test(start_paused = true)]
async fn stop_mid_cooldown_resets_everything() {
    let h = harness(ScriptedEngine::new(199, 200, "Kizuna Music"), conservative());
    let origin = Instant::now();

    h.controller.start(target("101")).await;
    advance_to(origin, ms(3000)).await;
    assert_eq!(h.controller.run_state(), SupervisorRunState::CommandCooldown);

    h.controller.stop().await;

    assert_eq!(h.controller.run_state(), SupervisorRunState::Stopped);
    assert_eq!(
        h.controller.publisher().current(),
        PlaybackSnapshot::new(0, 0, "stopped")
    );
    assert!(h.sink.is_empty());
    assert!(!h.controller.is_active().await);

    // The loop is gone: no further engine traffic.
    let calls_at_stop = h.engine.calls().len();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.engine.calls().len(), calls_at_stop);
    assert!(h.sink.is_empty());
}

#[tokio::test(start_paused = true)]
async fn restart_drains_previous_run_first() {
    let h = harness(ScriptedEngine::new(30, 200, "t"), conservative());
    let origin = Instant::now();

    h.controller.start(target("101")).await;
    advance_to(origin, ms(2500)).await;
    assert_eq!(h.engine.count(&Call::QueryProgress), 1);

    h.controller.start(target("202")).await;
    let after_restart = h.controller.publisher().revision();
    assert_eq!(h.controller.publisher().current(), PlaybackSnapshot::stopped());

    // The new run is still in its initial delay; the old one would have
    // ticked at 3000 and 4000 had it survived.
    advance_to(origin, ms(4400)).await;
    assert_eq!(h.controller.publisher().revision(), after_restart);
    assert_eq!(h.engine.count(&Call::QueryProgress), 1);

    advance_to(origin, ms(4600)).await;
    assert_eq!(h.engine.count(&Call::QueryProgress), 2);

    let starts: Vec<_> = h
        .engine
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::StartSession(t) => Some(t.room_id),
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec!["101", "202"]);
    assert_eq!(h.controller.target().await.unwrap().room_id, "202");
}

#[tokio::test(start_paused = true)]
async fn stop_and_reset_are_idempotent() {
    let h = harness(ScriptedEngine::new(30, 200, "t"), conservative());

    // Nothing running yet
    h.controller.stop().await;
    h.controller.reset().await;
    assert_eq!(h.controller.run_state(), SupervisorRunState::Idle);

    h.controller.start(target("101")).await;
    tokio::time::sleep(ms(2500)).await;
    h.controller.reset().await;
    h.controller.reset().await;
    h.controller.stop().await;

    assert_eq!(h.engine.count(&Call::ResetSession), 3);
    assert_eq!(h.controller.run_state(), SupervisorRunState::Stopped);
    assert_eq!(h.controller.publisher().current(), PlaybackSnapshot::stopped());
    assert!(h.sink.is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_engine_session() {
    let h = harness(ScriptedEngine::new(30, 200, "t"), conservative());

    h.controller.start(target("101")).await;
    tokio::time::sleep(ms(2500)).await;
    h.controller.shutdown().await;

    assert_eq!(h.engine.count(&Call::StopSession), 1);
    assert_eq!(h.engine.count(&Call::ResetSession), 0);
    assert!(h.sink.is_empty());
}
