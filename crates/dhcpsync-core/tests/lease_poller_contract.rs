//! Contract Test: Lease Polling
//!
//! Constraints verified:
//! - A cycle turns the remote lease database into a snapshot
//! - Snapshots are replaced wholesale, never merged
//! - Blocks without an address or hostname are excluded
//! - Unreachable and hung devices skip the cycle and keep the old snapshot
//! - A device's cycle never overlaps itself
//! - Scheduled timers run cycles and can be advanced
//!
//! If this test fails, lease polling is broken.

mod common;

use common::*;
use dhcpsync_core::poller::{CycleOutcome, JobState, PollerEvent, SkipReason};
use dhcpsync_core::service::{PutCredentialRequest, ScheduleRequest};
use dhcpsync_core::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

#[tokio::test]
async fn ten_sonic_blocks_become_ten_records() {
    let harness = harness_with_credential().await;
    harness
        .transport
        .set_file(DEVICE, LEASES_PATH, lease_file("sonic", 10));

    let outcome = harness.service.poll_now(DEVICE).await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Completed {
            records: 10,
            dropped: 0
        }
    );

    let leases = harness.service.list_leases(DEVICE).await.unwrap();
    assert_eq!(leases.len(), 10);
    assert!(leases.iter().all(|l| l.hostname.starts_with("sonic")));
    assert!(leases.iter().all(|l| l.device_ip == DEVICE));
}

#[tokio::test]
async fn list_is_empty_before_first_cycle() {
    let harness = harness_with_credential().await;
    assert!(harness.service.list_leases(DEVICE).await.unwrap().is_empty());
}

#[tokio::test]
async fn snapshot_is_replaced_not_merged() {
    let harness = harness_with_credential().await;

    harness
        .transport
        .set_file(DEVICE, LEASES_PATH, lease_file("old", 5));
    harness.service.poll_now(DEVICE).await.unwrap();

    harness
        .transport
        .set_file(DEVICE, LEASES_PATH, lease_file("new", 3));
    harness.service.poll_now(DEVICE).await.unwrap();

    let leases = harness.service.list_leases(DEVICE).await.unwrap();
    assert_eq!(leases.len(), 3);
    assert!(leases.iter().all(|l| l.hostname.starts_with("new")));
}

#[tokio::test]
async fn readers_never_observe_a_mix_of_cycles() {
    let harness = Arc::new(harness_with_credential().await);

    let reader = {
        let harness = harness.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                let leases = harness.service.list_leases(DEVICE).await.unwrap();
                if let Some(first) = leases.first() {
                    let generation = first.hostname.split('-').next().unwrap().to_string();
                    assert!(
                        leases.iter().all(|l| l.hostname.starts_with(&generation)),
                        "mixed snapshot observed"
                    );
                }
                tokio::task::yield_now().await;
            }
        })
    };

    for generation in 0..20 {
        harness.transport.set_file(
            DEVICE,
            LEASES_PATH,
            lease_file(&format!("gen{}-", generation), 5 + generation % 3),
        );
        harness.service.poll_now(DEVICE).await.unwrap();
        tokio::task::yield_now().await;
    }

    reader.await.unwrap();
}

#[tokio::test]
async fn incomplete_blocks_are_excluded() {
    let harness = harness_with_credential().await;
    let content = format!(
        "{}lease 192.168.1.99 {{\n  binding state active;\n}}\nlease bogus {{\n  client-hostname \"x\";\n}}\n{}",
        lease_block("192.168.1.10", "sonic-a"),
        lease_block("192.168.1.11", "sonic-b"),
    );
    harness.transport.set_file(DEVICE, LEASES_PATH, content);

    let outcome = harness.service.poll_now(DEVICE).await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Completed {
            records: 2,
            dropped: 2
        }
    );

    let hosts: Vec<String> = harness
        .service
        .list_leases(DEVICE)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.hostname)
        .collect();
    assert_eq!(hosts, vec!["sonic-a", "sonic-b"]);
}

#[tokio::test]
async fn unreachable_device_skips_and_keeps_snapshot() {
    let harness = harness_with_credential().await;
    harness
        .transport
        .set_file(DEVICE, LEASES_PATH, lease_file("sonic", 4));
    harness.service.poll_now(DEVICE).await.unwrap();

    harness.transport.set_reachable(DEVICE, false);
    let outcome = harness.service.poll_now(DEVICE).await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Skipped {
            reason: SkipReason::Connection(_)
        }
    ));

    assert_eq!(harness.service.list_leases(DEVICE).await.unwrap().len(), 4);
}

#[tokio::test]
async fn credential_stored_as_unreachable_is_skipped() {
    let harness = harness();
    harness.transport.set_reachable(DEVICE, false);
    harness
        .service
        .put_credential(PutCredentialRequest::new(DEVICE, USERNAME, PASSWORD))
        .await
        .unwrap();

    // Device comes back, but the stored flag still says unreachable
    harness.transport.set_reachable(DEVICE, true);
    harness
        .transport
        .set_file(DEVICE, LEASES_PATH, lease_file("sonic", 2));

    let outcome = harness.service.poll_now(DEVICE).await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Skipped {
            reason: SkipReason::Unreachable
        }
    );
    assert!(harness.service.list_leases(DEVICE).await.unwrap().is_empty());
}

#[tokio::test]
async fn hung_cycle_times_out_as_skip() {
    let mut config = test_config();
    config.remote.connect_timeout_secs = 10;
    config.poller.cycle_timeout_secs = 1;
    let harness = harness_with(config);
    harness
        .service
        .put_credential(PutCredentialRequest::new(DEVICE, USERNAME, PASSWORD))
        .await
        .unwrap();

    harness
        .transport
        .set_connect_delay(DEVICE, Some(Duration::from_secs(5)));

    let started = std::time::Instant::now();
    let outcome = harness.service.poll_now(DEVICE).await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Skipped {
            reason: SkipReason::TimedOut
        }
    );
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn overlapping_cycle_is_a_noop() {
    let harness = Arc::new(harness_with_credential().await);
    harness
        .transport
        .set_file(DEVICE, LEASES_PATH, lease_file("sonic", 3));
    harness
        .transport
        .set_connect_delay(DEVICE, Some(Duration::from_millis(300)));

    let first = {
        let harness = harness.clone();
        tokio::spawn(async move { harness.service.poll_now(DEVICE).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = harness.service.poll_now(DEVICE).await.unwrap();
    assert_eq!(second, CycleOutcome::AlreadyRunning);

    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, CycleOutcome::Completed { records: 3, .. }));

    // Idle again afterwards
    let third = harness.service.poll_now(DEVICE).await.unwrap();
    assert!(matches!(third, CycleOutcome::Completed { .. }));
}

#[tokio::test]
async fn scheduled_job_runs_when_advanced() {
    let harness = harness_with_credential().await;
    harness
        .transport
        .set_file(DEVICE, LEASES_PATH, lease_file("sonic", 10));

    let job = harness
        .service
        .schedule_polling(ScheduleRequest {
            device_ip: Some(DEVICE.to_string()),
            interval_secs: Some(3600),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(job.interval, Duration::from_secs(3600));
    assert_eq!(job.state, JobState::Idle);

    harness.service.trigger_poll(DEVICE).await.unwrap();

    let mut events = ReceiverStream::new(harness.events);
    let completed = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = events.next().await {
            if let PollerEvent::CycleCompleted { records, .. } = event {
                return records;
            }
        }
        0
    })
    .await
    .unwrap();

    assert_eq!(completed, 10);
    assert_eq!(harness.service.list_leases(DEVICE).await.unwrap().len(), 10);
}

#[tokio::test]
async fn autostart_schedules_on_credential_put() {
    let mut config = test_config();
    config.poller.autostart = true;
    config.poller.interval_secs = 120;
    let harness = harness_with(config);

    harness
        .service
        .put_credential(PutCredentialRequest::new(DEVICE, USERNAME, PASSWORD))
        .await
        .unwrap();

    let job = harness.service.poller().job(DEVICE).unwrap();
    assert_eq!(job.interval, Duration::from_secs(120));
}

#[tokio::test]
async fn deleting_credential_stops_polling_and_clears_leases() {
    let harness = harness_with_credential().await;
    harness
        .transport
        .set_file(DEVICE, LEASES_PATH, lease_file("sonic", 2));
    harness.service.poll_now(DEVICE).await.unwrap();
    harness
        .service
        .schedule_polling(ScheduleRequest {
            device_ip: Some(DEVICE.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    harness.service.delete_credential(DEVICE).await.unwrap();

    assert!(harness.service.poller().job(DEVICE).is_none());
    assert!(harness.service.list_leases(DEVICE).await.unwrap().is_empty());

    let err = harness.service.trigger_poll(DEVICE).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn cycle_in_flight_during_delete_does_not_restore_leases() {
    let harness = Arc::new(harness_with_credential().await);
    harness
        .transport
        .set_file(DEVICE, LEASES_PATH, lease_file("sonic", 3));
    harness
        .transport
        .set_connect_delay(DEVICE, Some(Duration::from_millis(300)));

    let poll = {
        let harness = harness.clone();
        tokio::spawn(async move { harness.service.poll_now(DEVICE).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness.service.delete_credential(DEVICE).await.unwrap();

    let outcome = poll.await.unwrap().unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Skipped {
            reason: SkipReason::Cleared
        }
    );
    assert!(harness.service.list_leases(DEVICE).await.unwrap().is_empty());
    assert!(harness.service.get_credential(DEVICE).await.is_err());
}

#[tokio::test]
async fn schedule_all_covers_stored_credentials() {
    let harness = harness_with_credential().await;
    let other = "10.10.229.125";
    harness.transport.add_host(other, USERNAME, PASSWORD);
    harness
        .service
        .put_credential(PutCredentialRequest::new(other, USERNAME, PASSWORD))
        .await
        .unwrap();

    assert_eq!(harness.service.schedule_all().await.unwrap(), 2);
    assert_eq!(harness.service.schedule_all().await.unwrap(), 0);

    let devices: Vec<String> = harness
        .service
        .poller()
        .jobs()
        .into_iter()
        .map(|j| j.device_ip)
        .collect();
    assert_eq!(devices, vec![DEVICE.to_string(), other.to_string()]);
}
