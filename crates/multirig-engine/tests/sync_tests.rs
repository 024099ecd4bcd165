//! End-to-end tests for the registry, sync engine and broadcaster against
//! emulated rigctld peers.

use std::time::Duration;

use multirig_core::band::BandPreset;
use multirig_core::types::{AppConfig, RigConfig, RigControlRequest};
use multirig_engine::{RigRegistry, StatusBroadcaster, SyncEngine};
use multirig_test_harness::MockRigctld;

fn rig_config(name: &str, addr: &str) -> RigConfig {
    let (host, port) = addr.rsplit_once(':').unwrap();
    let mut cfg = RigConfig::rigctld(name, host, port.parse().unwrap());
    cfg.poll_interval_ms = 100;
    cfg.band_presets = vec![
        BandPreset::new("40m", 7_150_000, 7_000_000, 7_300_000),
        BandPreset::new("20m", 14_175_000, 14_000_000, 14_350_000),
    ];
    cfg
}

fn two_rig_config(main: &MockRigctld, follower: &MockRigctld) -> AppConfig {
    AppConfig {
        rigs: vec![
            rig_config("main", main.addr()),
            rig_config("follower", follower.addr()),
        ],
        sync_source_index: 0,
        ..AppConfig::default()
    }
}

/// Poll until `pred` holds, or panic after ~3 s.
async fn wait_until<F>(mut pred: F, what: &str)
where
    F: FnMut() -> bool,
{
    for _ in 0..150 {
        if pred() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached: {what}");
}

/// Poll an async predicate until it holds, or panic after ~3 s.
async fn wait_until_async<F, Fut>(mut pred: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..150 {
        if pred().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached: {what}");
}

#[tokio::test]
async fn follower_mirrors_main_frequency() {
    let main = MockRigctld::start().await.unwrap();
    let follower = MockRigctld::start().await.unwrap();

    let registry = RigRegistry::new();
    registry
        .apply_config(two_rig_config(&main, &follower))
        .await
        .unwrap();
    let engine = SyncEngine::spawn(registry.clone());

    // Change the main rig's dial; the follower must track it.
    main.set_frequency(14_200_000);
    wait_until(
        || follower.frequency() == 14_200_000,
        "follower frequency mirrors main",
    )
    .await;

    engine.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn repeated_source_value_writes_once() {
    let main = MockRigctld::start().await.unwrap();
    let follower = MockRigctld::start().await.unwrap();

    let registry = RigRegistry::new();
    registry
        .apply_config(two_rig_config(&main, &follower))
        .await
        .unwrap();
    let engine = SyncEngine::spawn(registry.clone());

    main.set_frequency(14_200_000);
    wait_until(|| follower.frequency() == 14_200_000, "initial sync").await;

    // Several more poll cycles with an unchanged source must not produce
    // further set_freq traffic on the follower.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(follower.command_count("set_freq 14200000"), 1);

    engine.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn band_rejected_follower_does_not_stop_sync() {
    let main = MockRigctld::start().await.unwrap();
    let follower = MockRigctld::start().await.unwrap();

    let mut cfg = two_rig_config(&main, &follower);
    // Follower only covers 20 m; 40 m frequencies must be rejected locally.
    cfg.rigs[1].band_presets = vec![BandPreset::new("20m", 14_175_000, 14_000_000, 14_350_000)];

    let registry = RigRegistry::new();
    registry.apply_config(cfg).await.unwrap();
    let engine = SyncEngine::spawn(registry.clone());

    main.set_frequency(7_074_000);

    // The follower's snapshot records the band rejection...
    let reg = registry.clone();
    wait_until_async(
        move || {
            let reg = reg.clone();
            async move {
                let snaps = reg.snapshots().await;
                snaps.get(1).map_or(false, |s| {
                    s.last_op_error
                        .as_deref()
                        .is_some_and(|e| e.contains("Frequency out of configured band ranges"))
                })
            }
        },
        "follower band rejection recorded",
    )
    .await;

    // ...and no out-of-band set_freq reached its wire.
    assert_eq!(follower.command_count("set_freq 7074000"), 0);

    engine.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn sync_disabled_suspends_mirroring() {
    let main = MockRigctld::start().await.unwrap();
    let follower = MockRigctld::start().await.unwrap();

    let registry = RigRegistry::new();
    registry
        .apply_config(two_rig_config(&main, &follower))
        .await
        .unwrap();
    let engine = SyncEngine::spawn(registry.clone());

    registry.set_sync_enabled(false).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    main.set_frequency(14_250_000);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(follower.command_count("set_freq 14250000"), 0);

    // Re-enable; the next source change resumes mirroring.
    registry.set_sync_enabled(true).await;
    main.set_frequency(14_260_000);
    wait_until(|| follower.frequency() == 14_260_000, "sync resumed").await;

    engine.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn follower_without_follow_main_is_left_alone() {
    let main = MockRigctld::start().await.unwrap();
    let follower = MockRigctld::start().await.unwrap();

    let mut cfg = two_rig_config(&main, &follower);
    cfg.rigs[1].follow_main = false;

    let registry = RigRegistry::new();
    registry.apply_config(cfg).await.unwrap();
    let engine = SyncEngine::spawn(registry.clone());

    main.set_frequency(14_210_000);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(follower.command_count("set_freq 14210000"), 0);

    engine.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn reconfigure_swaps_generation_and_closes_old_clients() {
    let main = MockRigctld::start().await.unwrap();
    let follower = MockRigctld::start().await.unwrap();

    let registry = RigRegistry::new();
    let mut generation = registry.generation_watch();
    let first_gen = *generation.borrow_and_update();

    registry
        .apply_config(two_rig_config(&main, &follower))
        .await
        .unwrap();
    assert!(*generation.borrow_and_update() > first_gen);
    assert_eq!(registry.clients().await.len(), 2);

    // Drop down to a single rig.
    let cfg = AppConfig {
        rigs: vec![rig_config("solo", main.addr())],
        sync_source_index: 0,
        ..AppConfig::default()
    };
    registry.apply_config(cfg).await.unwrap();
    assert_eq!(registry.clients().await.len(), 1);
    assert_eq!(registry.clients().await[0].name(), "solo");

    registry.shutdown().await;
}

#[tokio::test]
async fn set_rig_applies_partial_request() {
    let main = MockRigctld::start().await.unwrap();

    let registry = RigRegistry::new();
    let cfg = AppConfig {
        rigs: vec![rig_config("only", main.addr())],
        sync_source_index: 0,
        ..AppConfig::default()
    };
    registry.apply_config(cfg).await.unwrap();

    let reg = registry.clone();
    wait_until_async(
        move || {
            let reg = reg.clone();
            async move {
                reg.snapshots()
                    .await
                    .first()
                    .is_some_and(|s| s.connected && s.caps.is_some())
            }
        },
        "rig connected",
    )
    .await;

    registry
        .set_rig(
            0,
            RigControlRequest {
                frequency_hz: Some(14_074_000),
                mode: Some("USB".into()),
                passband: Some(2400),
                ..RigControlRequest::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(main.frequency(), 14_074_000);
    assert!(main.commands().iter().any(|c| c.contains("set_mode USB 2400")));

    registry.shutdown().await;
}

#[tokio::test]
async fn broadcaster_publishes_aggregate_updates() {
    let main = MockRigctld::start().await.unwrap();

    let registry = RigRegistry::new();
    let cfg = AppConfig {
        rigs: vec![rig_config("only", main.addr())],
        sync_source_index: 0,
        ..AppConfig::default()
    };
    registry.apply_config(cfg).await.unwrap();

    let broadcaster = StatusBroadcaster::spawn(registry.clone());
    let mut updates = broadcaster.subscribe();

    wait_until(
        || {
            let update = updates.borrow().clone();
            update.rigs.len() == 1 && update.rigs[0].connected
        },
        "broadcaster carries connected rig",
    )
    .await;

    let update = broadcaster.latest();
    assert!(update.sync_enabled);
    assert_eq!(update.sync_source_index, 0);
    assert!(update.all_rigs_enabled);

    broadcaster.shutdown().await;
    registry.shutdown().await;
}
