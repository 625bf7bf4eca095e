//! Engine facade integration tests
//!
//! Scheduler timing runs on a paused Tokio clock so rotations can be
//! observed without waiting in real time.

use std::net::IpAddr;
use std::time::Duration;

use portshift::firewall::{
    AttackCategory, Decision, EngineConfig, EngineError, Event, FirewallEngine, SchedulerState,
    Severity, SimulatedAttack,
};

fn engine_with(ports: Vec<u16>, seed: u64) -> FirewallEngine {
    FirewallEngine::new(EngineConfig {
        ports,
        seed: Some(seed),
        ..Default::default()
    })
    .unwrap()
}

fn default_engine(seed: u64) -> FirewallEngine {
    FirewallEngine::new(EngineConfig {
        seed: Some(seed),
        ..Default::default()
    })
    .unwrap()
}

/// Receive events until one matches, skipping heartbeats.
async fn next_rotation(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Event {
    loop {
        match rx.recv().await.unwrap() {
            event @ Event::Rotated { .. } => return event,
            _ => continue,
        }
    }
}

#[test]
fn test_closed_port_classification() {
    let engine = engine_with(vec![80, 443, 8080], 1);

    engine.check_access("10.1.1.1", 3306).unwrap();
    engine.check_access("10.1.1.2", 1).unwrap();
    engine.check_access("10.1.1.3", 27017).unwrap();

    let attacks = engine.status().recent_attacks;
    assert_eq!(attacks[0].category, AttackCategory::SqlInjection);
    assert_eq!(attacks[0].severity, Severity::Critical);
    assert_eq!(attacks[1].category, AttackCategory::PortScanning);
    assert_eq!(attacks[1].severity, Severity::Medium);
    assert_eq!(attacks[2].category, AttackCategory::MongoDbExploit);
    assert_eq!(attacks[2].severity, Severity::Critical);
}

#[test]
fn test_escalation_is_per_source() {
    let engine = engine_with(vec![80, 443, 8080], 1);

    for _ in 0..2 {
        assert_eq!(engine.check_access("10.0.0.1", 22).unwrap(), Decision::Blocked);
    }
    // A different source starts from scratch
    assert_eq!(engine.check_access("10.0.0.2", 22).unwrap(), Decision::Blocked);
    assert_eq!(
        engine.check_access("10.0.0.1", 22).unwrap(),
        Decision::BlockedEscalate
    );
    assert_eq!(
        engine.check_access("10.0.0.1", 23).unwrap(),
        Decision::BlockedEscalate
    );
}

#[test]
fn test_port_scan_pattern_surfaces_in_status() {
    let engine = engine_with(vec![80, 443, 8080], 1);
    for port in 1000..1006 {
        engine.check_access("192.168.1.50", port).unwrap();
    }

    let threat = engine.status().threat;
    assert_eq!(
        threat.patterns,
        vec!["Port scanning pattern detected from 192.168.1.50 (6 attempts)".to_string()]
    );
    assert!(threat.level > 0 && threat.level <= 100);
}

#[test]
fn test_burst_pattern() {
    let engine = engine_with(vec![80, 443, 8080], 1);
    for i in 0..11 {
        engine.check_access(&format!("10.9.0.{}", i + 1), 22).unwrap();
    }

    let threat = engine.threat();
    assert_eq!(threat.patterns[0], "High frequency attack pattern detected");
    assert_eq!(threat.counters.burst_attacks, 11);
}

#[test]
fn test_threat_level_saturates() {
    let engine = engine_with(vec![80, 443, 8080], 1);
    for i in 0..300u32 {
        let source = format!("10.{}.{}.1", i / 200, i % 200);
        engine.check_access(&source, 22).unwrap();
    }

    assert_eq!(engine.threat().level, 100);
}

#[test]
fn test_simulate_goes_through_rejection_path() {
    let engine = default_engine(21);
    let source: IpAddr = "203.0.113.7".parse().unwrap();

    for _ in 0..3 {
        engine
            .simulate(SimulatedAttack {
                source: Some(source),
                port: Some(3389),
                category: None,
            })
            .unwrap();
    }

    let status = engine.status();
    assert_eq!(status.attack_count, 3);
    assert_eq!(engine.source(&source).unwrap().count, 3);
    assert_eq!(status.statistics.escalated_requests, 1);
    assert_eq!(status.recent_attacks[0].category, AttackCategory::RdpBruteForce);
}

#[test]
fn test_invalid_arguments_leave_state_untouched() {
    let engine = default_engine(2);
    let before = engine.status();

    assert!(matches!(
        engine.check_access("999.1.1.1", 22),
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.check_access("1.1.1.1", 65_536),
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.simulate_attack(Some("nope"), None, None),
        Err(EngineError::InvalidArgument(_))
    ));

    let after = engine.status();
    assert_eq!(after.attack_count, before.attack_count);
    assert_eq!(after.open_ports, before.open_ports);
}

#[test]
fn test_status_top_sources_capped_at_five() {
    let engine = engine_with(vec![80, 443, 8080], 1);
    for (i, hits) in [1, 6, 2, 5, 3, 4, 1].iter().enumerate() {
        for _ in 0..*hits {
            engine.check_access(&format!("10.0.0.{}", i + 1), 9).unwrap();
        }
    }

    let top = engine.status().statistics.top_attacking_sources;
    let counts: Vec<u64> = top.iter().map(|s| s.count).collect();
    assert_eq!(counts, vec![6, 5, 4, 3, 2]);
    assert_eq!(top[0].source.to_string(), "10.0.0.2");
}

#[test]
fn test_concurrent_checks_are_serialized() {
    let engine = default_engine(8);
    let open = engine.open_ports();
    let closed_port = (1..=u16::MAX).find(|p| !open.contains(p)).unwrap();

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let engine = engine.clone();
            std::thread::spawn(move || {
                for _ in 0..250 {
                    engine
                        .check_access(&format!("172.16.0.{}", t + 1), closed_port as i64)
                        .unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let status = engine.status();
    assert_eq!(status.attack_count, 2000);
    assert_eq!(status.suspicious_sources.len(), 8);
    assert!(status.suspicious_sources.iter().all(|s| s.count == 250));
    assert_eq!(status.statistics.escalated_requests, 8 * 248);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_rotates_on_interval() {
    let engine = default_engine(4);
    let mut events = engine.subscribe();

    engine.start().unwrap();
    assert!(matches!(events.recv().await.unwrap(), Event::Started { .. }));

    let Event::Rotated { rotation, ip_shift, .. } = next_rotation(&mut events).await else {
        unreachable!()
    };
    assert_eq!(rotation.sequence, 1);
    assert!(rotation.open_ports.len() >= 2);
    assert_eq!(ip_shift.total_attacks, 0);

    let Event::Rotated { rotation, .. } = next_rotation(&mut events).await else {
        unreachable!()
    };
    assert_eq!(rotation.sequence, 2);

    let status = engine.status();
    assert_eq!(status.rotation_count, 2);
    assert_eq!(status.port_history.len(), 2);
    assert_eq!(status.scheduler, SchedulerState::Running);
    assert!(status.open_ports.iter().all(|p| status.universe.contains(p)));

    engine.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_monitoring_heartbeat() {
    let engine = default_engine(4);
    let mut events = engine.subscribe();
    engine.start().unwrap();

    let _started = events.recv().await.unwrap();
    assert!(matches!(events.recv().await.unwrap(), Event::Monitoring(_)));

    engine.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_no_rotation_after_stop() {
    let engine = default_engine(6);
    engine.start().unwrap();

    tokio::time::sleep(Duration::from_secs(65)).await;
    engine.stop().unwrap();
    let rotations = engine.status().rotation_count;
    assert_eq!(rotations, 2);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(engine.status().rotation_count, rotations);
    assert_eq!(engine.scheduler_state(), SchedulerState::Idle);

    // Restart resumes rotating
    engine.start().unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(engine.status().rotation_count, rotations + 1);
    engine.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_history_is_bounded() {
    let engine = FirewallEngine::new(EngineConfig {
        seed: Some(12),
        rotation_interval: Duration::from_secs(1),
        monitor_interval: Duration::from_secs(60),
        ..Default::default()
    })
    .unwrap();
    engine.start().unwrap();

    tokio::time::sleep(Duration::from_millis(25_500)).await;
    engine.stop().unwrap();

    let status = engine.status();
    assert_eq!(status.rotation_count, 25);
    assert_eq!(status.port_history.len(), 10);
    assert_eq!(status.port_history.last().unwrap().sequence, 25);
    assert_eq!(status.ip_shift_history.len(), 10);
    assert_eq!(status.threat_timeline.len(), 25);
}

#[tokio::test]
async fn test_events_follow_state_changes() {
    let engine = engine_with(vec![80, 443, 8080], 1);
    let mut events = engine.subscribe();

    engine.check_access("10.0.0.1", 443).unwrap();
    engine.check_access("10.0.0.1", 22).unwrap();
    engine.check_access("10.0.0.1", 22).unwrap();
    engine.check_access("10.0.0.1", 22).unwrap();

    assert!(matches!(events.recv().await.unwrap(), Event::AttackBlocked(_)));
    assert!(matches!(events.recv().await.unwrap(), Event::AttackBlocked(_)));
    match events.recv().await.unwrap() {
        Event::SourceEscalated { attack, attempts } => {
            assert_eq!(attempts, 3);
            assert_eq!(attack.port, 22);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
