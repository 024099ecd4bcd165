//! Wire-level tests of the rigctl listener, driven as a real TCP client.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use multirig_core::band::BandPreset;
use multirig_core::types::{AppConfig, RigConfig};
use multirig_engine::RigRegistry;
use multirig_listener::RigctlListener;
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

async fn setup(rigs: Vec<RigConfig>) -> (Arc<RigRegistry>, RigctlListener) {
    let registry = RigRegistry::new();
    let cfg = AppConfig {
        rigs,
        sync_source_index: 0,
        ..AppConfig::default()
    };
    registry.apply_config(cfg).await.unwrap();
    let listener = RigctlListener::bind("127.0.0.1", 0, registry.clone())
        .await
        .unwrap();
    (registry, listener)
}

async fn wait_for_main_connected(registry: &RigRegistry) {
    for _ in 0..150 {
        if registry
            .main_snapshot()
            .await
            .is_some_and(|s| s.connected && s.frequency_hz.is_some())
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("main rig never connected");
}

/// Send one line and collect the reply until the peer goes quiet.
async fn exchange(stream: &mut TcpStream, line: &str) -> String {
    stream.write_all(line.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();
    let mut buf = vec![0u8; 4096];
    let mut out = String::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(250), stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => {
                out.push_str(&String::from_utf8_lossy(&buf[..n]));
                if out.ends_with('\n') && out.contains("RPRT") {
                    break;
                }
            }
        }
    }
    out
}

#[tokio::test]
async fn erp_get_freq_exact_framing() {
    let rig = MockRigctld::start().await.unwrap();
    rig.set_state(14_074_000, "USB", 2400);

    let (registry, listener) = setup(vec![rig_config("main", rig.addr())]).await;
    wait_for_main_connected(&registry).await;

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    let reply = exchange(&mut stream, "+f").await;
    assert_eq!(reply, "get_freq:\nFrequency: 14074000\nRPRT 0\n");

    listener.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn unknown_command_yields_rprt_minus_11() {
    let rig = MockRigctld::start().await.unwrap();
    let (registry, listener) = setup(vec![rig_config("main", rig.addr())]).await;
    wait_for_main_connected(&registry).await;
    rig.clear_commands();

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    let reply = exchange(&mut stream, "+wut").await;
    assert_eq!(reply.lines().last(), Some("RPRT -11"));

    // No rig traffic may result from an unknown command.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        !rig.commands().iter().any(|c| c.contains("wut")),
        "unknown command must not reach any rig"
    );

    listener.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn set_freq_fans_out_to_all_enabled_rigs() {
    let rig0 = MockRigctld::start().await.unwrap();
    let rig1 = MockRigctld::start().await.unwrap();

    let (registry, listener) = setup(vec![
        rig_config("main", rig0.addr()),
        rig_config("second", rig1.addr()),
    ])
    .await;
    wait_for_main_connected(&registry).await;

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    let reply = exchange(&mut stream, "F 14200000").await;
    assert_eq!(reply, "RPRT 0\n");

    for rig in [&rig0, &rig1] {
        assert!(
            rig.commands().iter().any(|c| c.contains("set_freq 14200000")),
            "set command must reach every enabled rig"
        );
    }
    assert_eq!(rig0.frequency(), 14_200_000);
    assert_eq!(rig1.frequency(), 14_200_000);

    listener.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn fan_out_skips_disabled_rigs() {
    let rig0 = MockRigctld::start().await.unwrap();
    let rig1 = MockRigctld::start().await.unwrap();

    let mut second = rig_config("second", rig1.addr());
    second.enabled = false;

    let (registry, listener) = setup(vec![rig_config("main", rig0.addr()), second]).await;
    wait_for_main_connected(&registry).await;

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    let reply = exchange(&mut stream, "+F 14250000").await;
    assert!(reply.ends_with("RPRT 0\n"));

    assert!(rig0.commands().iter().any(|c| c.contains("set_freq 14250000")));
    assert!(
        !rig1.commands().iter().any(|c| c.contains("set_freq")),
        "disabled rig must never be targeted"
    );

    listener.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn band_rejected_follower_still_aggregates_ok() {
    let rig0 = MockRigctld::start().await.unwrap();
    let rig1 = MockRigctld::start().await.unwrap();

    // The second rig only covers 20 m.
    let mut second = rig_config("second", rig1.addr());
    second.band_presets = vec![BandPreset::new("20m", 14_175_000, 14_000_000, 14_350_000)];

    let (registry, listener) = setup(vec![rig_config("main", rig0.addr()), second]).await;
    wait_for_main_connected(&registry).await;

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    let reply = exchange(&mut stream, "F 7074000").await;
    assert_eq!(reply, "RPRT 0\n");

    assert!(rig0.commands().iter().any(|c| c.contains("set_freq 7074000")));
    assert!(
        !rig1.commands().iter().any(|c| c.contains("set_freq 7074000")),
        "band-rejected rig must see no traffic"
    );

    // The rejection lands on the second rig's snapshot.
    let snaps = registry.snapshots().await;
    assert!(snaps[1]
        .last_op_error
        .as_deref()
        .is_some_and(|e| e.contains("Frequency out of configured band ranges")));

    listener.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn get_commands_read_main_snapshot_only() {
    let rig0 = MockRigctld::start().await.unwrap();
    let rig1 = MockRigctld::start().await.unwrap();
    rig0.set_state(14_074_000, "USB", 2400);
    rig1.set_state(7_040_000, "CW", 500);

    let (registry, listener) = setup(vec![
        rig_config("main", rig0.addr()),
        rig_config("second", rig1.addr()),
    ])
    .await;
    wait_for_main_connected(&registry).await;

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();

    let reply = exchange(&mut stream, "+m").await;
    assert_eq!(reply, "get_mode:\nMode: USB\nPassband: 2400\nRPRT 0\n");

    // Default protocol form: bare values.
    let reply = exchange(&mut stream, "f").await;
    assert_eq!(reply, "14074000\n");

    listener.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn get_with_main_disconnected_replies_io_error() {
    let mut rig = MockRigctld::start().await.unwrap();
    let (registry, listener) = setup(vec![rig_config("main", rig.addr())]).await;
    wait_for_main_connected(&registry).await;

    rig.kill().await;
    for _ in 0..150 {
        if registry.main_snapshot().await.is_some_and(|s| !s.connected) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    let reply = exchange(&mut stream, "+f").await;
    assert_eq!(reply.lines().last(), Some("RPRT -6"));

    listener.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn chk_vfo_reports_main_vfo_capability() {
    let rig = MockRigctld::start().await.unwrap();
    let (registry, listener) = setup(vec![rig_config("main", rig.addr())]).await;
    wait_for_main_connected(&registry).await;

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    let reply = exchange(&mut stream, "+\\chk_vfo").await;
    assert_eq!(reply, "chk_vfo:\nChkVFO: 1\nRPRT 0\n");

    listener.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn quit_closes_the_peer_connection() {
    let rig = MockRigctld::start().await.unwrap();
    let (registry, listener) = setup(vec![rig_config("main", rig.addr())]).await;

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    stream.write_all(b"q\n").await.unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut buf))
        .await
        .expect("peer should close promptly")
        .unwrap();
    assert_eq!(n, 0, "connection should be closed after quit");

    listener.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn forwarding_gate_acknowledges_without_traffic() {
    let rig = MockRigctld::start().await.unwrap();
    let (registry, listener) = setup(vec![rig_config("main", rig.addr())]).await;
    wait_for_main_connected(&registry).await;
    registry.set_rigctl_to_main_enabled(false).await;
    rig.clear_commands();

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    let reply = exchange(&mut stream, "F 14200000").await;
    assert_eq!(reply, "RPRT 0\n");

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(
        !rig.commands().iter().any(|c| c.contains("set_freq 14200000")),
        "gated-off forwarding must not touch the rigs"
    );

    listener.shutdown().await;
    registry.shutdown().await;
}

#[tokio::test]
async fn listener_debug_ring_records_both_directions() {
    let rig = MockRigctld::start().await.unwrap();
    let (registry, listener) = setup(vec![rig_config("main", rig.addr())]).await;
    wait_for_main_connected(&registry).await;

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    let _ = exchange(&mut stream, "+f").await;

    use multirig_core::debug::DebugEventKind;
    let events = listener.debug_events();
    assert!(events.iter().any(|e| e.kind == DebugEventKind::ServerRx));
    assert!(events.iter().any(|e| e.kind == DebugEventKind::ServerTx));

    listener.shutdown().await;
    registry.shutdown().await;
}
