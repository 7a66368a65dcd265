//! ---
//! pp_section: "07-resilience-fault-tolerance"
//! pp_subsection: "module"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Process-pair failover coordinators."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use procpair_redundancy::{
    Checkpoint, DisabledSupervisor, NoopWork, PairError, PairSettings, PrimaryDead,
    ProcessPair, ProcessSupervisor, PromotionReason, Role, SpawnedBackup, SupervisorError,
};
use procpair_transport::{BroadcastTransport, InMemorySegment, Topic};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CountingSupervisor {
    spawned: AtomicUsize,
    fail: bool,
}

impl ProcessSupervisor for CountingSupervisor {
    fn spawn_backup(&self) -> Result<SpawnedBackup, SupervisorError> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SupervisorError::Spawn {
                program: "backup".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            });
        }
        Ok(SpawnedBackup { pid: Some(4242) })
    }
}

fn settings() -> PairSettings {
    PairSettings {
        heartbeat_interval: Duration::from_millis(10),
        failure_timeout: Duration::from_millis(150),
        replication_buffer: 1,
    }
}

fn dead_at(value: u64) -> PrimaryDead {
    PrimaryDead {
        resume_from: Checkpoint(value),
        silent_for: Duration::from_millis(150),
    }
}

#[tokio::test(start_paused = true)]
async fn repeated_primary_dead_events_promote_once() {
    let segment = InMemorySegment::new();
    let observer = segment.endpoint();
    let transport = Arc::new(segment.endpoint());
    let supervisor = Arc::new(CountingSupervisor::default());
    let pair = ProcessPair::new(settings(), transport.clone(), supervisor.clone());
    assert_eq!(pair.role(), Role::Backup);

    let first = pair.promote(dead_at(7)).expect("first event promotes");
    assert_eq!(first.promotion().resume_from, Checkpoint(7));
    assert_eq!(first.promotion().reason, PromotionReason::HeartbeatTimeout);
    assert!(first.promotion().standby_spawned);
    assert_eq!(first.promotion().standby_pid, Some(4242));
    assert_eq!(pair.role(), Role::Primary);

    for value in [0u64, 7, 99] {
        assert!(pair.promote(dead_at(value)).is_none());
    }
    assert_eq!(supervisor.spawned.load(Ordering::SeqCst), 1);

    // Exactly one emitter: heartbeats arrive once per interval, not twice.
    tokio::time::sleep(Duration::from_millis(95)).await;
    let mut heartbeats = 0;
    while let Ok(Ok(_)) =
        tokio::time::timeout(Duration::from_millis(1), observer.recv(Topic::Heartbeat)).await
    {
        heartbeats += 1;
    }
    assert!((9..=11).contains(&heartbeats), "saw {heartbeats} heartbeats");
    assert_eq!(pair.role(), Role::Primary);
}

#[tokio::test(start_paused = true)]
async fn failed_spawn_still_promotes() {
    let segment = InMemorySegment::new();
    let supervisor = Arc::new(CountingSupervisor {
        fail: true,
        ..CountingSupervisor::default()
    });
    let pair = ProcessPair::new(settings(), Arc::new(segment.endpoint()), supervisor.clone());

    let runtime = pair.promote(dead_at(3)).expect("promotion proceeds");
    assert!(!runtime.promotion().standby_spawned);
    assert_eq!(runtime.promotion().standby_pid, None);
    assert_eq!(supervisor.spawned.load(Ordering::SeqCst), 1);
    assert_eq!(pair.role(), Role::Primary);
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_backup_never_promotes() {
    let segment = InMemorySegment::new();
    let shutdown = CancellationToken::new();
    let pair = ProcessPair::new(settings(), Arc::new(segment.endpoint()), DisabledSupervisor)
        .with_shutdown(shutdown.clone());

    shutdown.cancel();
    let outcome = pair.run(&mut NoopWork).await.unwrap();
    assert_eq!(outcome.role, Role::Backup);
    assert!(outcome.promotion.is_none());
    assert_eq!(pair.role(), Role::Backup);
}

#[tokio::test(start_paused = true)]
async fn bootstrap_primary_cannot_be_promoted_again() {
    let segment = InMemorySegment::new();
    let observer = segment.endpoint();
    let shutdown = CancellationToken::new();
    let pair = Arc::new(
        ProcessPair::new(settings(), Arc::new(segment.endpoint()), DisabledSupervisor)
            .with_shutdown(shutdown.clone()),
    );

    let task = {
        let pair = pair.clone();
        tokio::spawn(async move {
            let mut work = procpair_redundancy::PacedWork::new(Duration::from_millis(5));
            pair.run_as_primary(Checkpoint(10), &mut work).await
        })
    };

    let first = observer.recv(Topic::Checkpoint).await.unwrap();
    assert_eq!(
        procpair_transport::CheckpointMessage::decode(&first)
            .unwrap()
            .checkpoint,
        Checkpoint(10)
    );
    assert!(pair.promote(dead_at(0)).is_none());

    shutdown.cancel();
    let outcome = task.await.unwrap().unwrap();
    let promotion = outcome.promotion.expect("bootstrap promotion recorded");
    assert_eq!(promotion.reason, PromotionReason::Bootstrap);
    assert!(!promotion.standby_spawned);
    assert!(outcome.next_checkpoint.unwrap() > Checkpoint(10));

    let again = pair.run_as_primary(Checkpoint(0), &mut NoopWork).await;
    assert!(matches!(again, Err(PairError::AlreadyPrimary)));
}
