
use std::collections::HashSet;
use std::thread;

use rusqlite::{params, Connection};

use jitstreamer_runner::queue::{init_schema, JobQueue, JobStatus, Launch, Mount, QueueStatus};
use test_harness::temp_queue;

#[test]
fn claims_in_ordinal_order() {
    let (_dir, _path, queue) = temp_queue::<Launch>();
    let first = queue.enqueue("AAA", "10.0.0.5", &"com.example.a".to_string()).unwrap();
    let second = queue.enqueue("BBB", "10.0.0.6", &"com.example.b".to_string()).unwrap();
    assert!(first < second);

    let job = queue.claim_next().unwrap().unwrap();
    assert_eq!(job.ordinal, first);
    assert_eq!(job.udid, "AAA");
    assert_eq!(job.ip, "10.0.0.5");
    assert_eq!(job.bundle_id(), "com.example.a");
    assert_eq!(job.status, JobStatus::Claimed);

    let job = queue.claim_next().unwrap().unwrap();
    assert_eq!(job.ordinal, second);

    assert!(queue.claim_next().unwrap().is_none());
}

#[test]
fn empty_queue_claims_nothing() {
    let (_dir, _path, queue) = temp_queue::<Mount>();
    assert!(queue.claim_next().unwrap().is_none());
    // The empty transaction was committed; writes still go through
    queue.enqueue("AAA", "10.0.0.5", &()).unwrap();
    assert!(queue.claim_next().unwrap().is_some());
}

#[test]
fn claimed_rows_are_skipped() {
    let (_dir, path, _queue) = temp_queue::<Launch>();
    let conn = Connection::open(&path).unwrap();
    init_schema(&conn).unwrap();
    conn.execute(
        "INSERT INTO launch_queue (ordinal, udid, ip, bundle_id, status) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![1, "AAA", "10.0.0.5", "com.example.app", 0],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO launch_queue (ordinal, udid, ip, bundle_id, status) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![2, "BBB", "10.0.0.6", "com.example.app", 1],
    )
    .unwrap();

    let queue: JobQueue<Launch> = JobQueue::open(&path).unwrap();
    let job = queue.claim_next().unwrap().unwrap();
    assert_eq!(job.ordinal, 1);
    assert!(queue.claim_next().unwrap().is_none());
}

#[test]
fn complete_deletes_row() {
    let (_dir, _path, queue) = temp_queue::<Launch>();
    let ordinal = queue.enqueue("AAA", "10.0.0.5", &"com.example.app".to_string()).unwrap();
    queue.claim_next().unwrap();

    queue.complete(ordinal).unwrap();
    assert!(queue.get(ordinal).unwrap().is_none());
    // Completing twice is harmless
    queue.complete(ordinal).unwrap();
}

#[test]
fn fail_records_error() {
    let (_dir, _path, queue) = temp_queue::<Mount>();
    let ordinal = queue.enqueue("AAA", "10.0.0.5", &()).unwrap();
    queue.claim_next().unwrap();

    queue.fail(ordinal, "Device AAA not found").unwrap();
    let job = queue.get(ordinal).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("Device AAA not found"));

    // Failed jobs are never claimed again
    assert!(queue.claim_next().unwrap().is_none());
}

#[test]
fn fail_without_message_stores_placeholder() {
    let (_dir, _path, queue) = temp_queue::<Launch>();
    let ordinal = queue.enqueue("AAA", "10.0.0.5", &"com.example.app".to_string()).unwrap();
    queue.claim_next().unwrap();
    queue.fail(ordinal, "  ").unwrap();
    assert_eq!(
        queue.get(ordinal).unwrap().unwrap().error.as_deref(),
        Some("Unknown error")
    );
}

#[test]
fn status_reports_position_progress_and_failure() {
    let (_dir, _path, queue) = temp_queue::<Launch>();
    let bundle = "com.example.app".to_string();
    let a = queue.enqueue("AAA", "10.0.0.5", &bundle).unwrap();
    queue.enqueue("BBB", "10.0.0.6", &bundle).unwrap();
    queue.enqueue("CCC", "10.0.0.7", &bundle).unwrap();

    assert_eq!(queue.status("AAA").unwrap(), QueueStatus::Position(0));
    assert_eq!(queue.status("CCC").unwrap(), QueueStatus::Position(2));
    assert_eq!(queue.status("ZZZ").unwrap(), QueueStatus::NotQueued);

    queue.claim_next().unwrap();
    assert_eq!(queue.status("AAA").unwrap(), QueueStatus::InProgress);
    assert_eq!(queue.status("CCC").unwrap(), QueueStatus::Position(1));

    queue.fail(a, "Timeout").unwrap();
    assert_eq!(
        queue.status("AAA").unwrap(),
        QueueStatus::Failed("Timeout".to_string())
    );
    // Plain status does not consume the failure
    assert_eq!(
        queue.status("AAA").unwrap(),
        QueueStatus::Failed("Timeout".to_string())
    );
}

#[test]
fn take_status_consumes_failed_row() {
    let (_dir, _path, queue) = temp_queue::<Launch>();
    let ordinal = queue.enqueue("AAA", "10.0.0.5", &"com.example.app".to_string()).unwrap();
    queue.claim_next().unwrap();
    queue.fail(ordinal, "Timeout").unwrap();

    assert_eq!(
        queue.take_status("AAA").unwrap(),
        QueueStatus::Failed("Timeout".to_string())
    );
    assert_eq!(queue.take_status("AAA").unwrap(), QueueStatus::NotQueued);
    assert!(queue.get(ordinal).unwrap().is_none());
}

#[test]
fn list_clear_and_counts() {
    let (_dir, _path, queue) = temp_queue::<Mount>();
    let a = queue.enqueue("AAA", "10.0.0.5", &()).unwrap();
    queue.enqueue("BBB", "10.0.0.6", &()).unwrap();
    queue.enqueue("CCC", "10.0.0.7", &()).unwrap();
    queue.claim_next().unwrap();
    queue.claim_next().unwrap();
    queue.fail(a, "Error mounting device AAA: no image").unwrap();

    let udids: Vec<String> = queue.list().unwrap().into_iter().map(|j| j.udid).collect();
    assert_eq!(udids, vec!["AAA", "BBB", "CCC"]);
    assert_eq!(queue.counts().unwrap(), (1, 1, 1));

    assert_eq!(queue.clear().unwrap(), 3);
    assert!(queue.list().unwrap().is_empty());
    assert_eq!(queue.counts().unwrap(), (0, 0, 0));
}

#[test]
fn kinds_use_separate_tables() {
    let (_dir, path, launch) = temp_queue::<Launch>();
    let mount: JobQueue<Mount> = JobQueue::open(&path).unwrap();

    launch.enqueue("AAA", "10.0.0.5", &"com.example.app".to_string()).unwrap();
    assert!(mount.claim_next().unwrap().is_none());
    mount.enqueue("AAA", "10.0.0.5", &()).unwrap();
    assert_eq!(launch.list().unwrap().len(), 1);
    assert_eq!(mount.list().unwrap().len(), 1);
}

#[test]
fn concurrent_claimants_never_share_a_job() {
    let (_dir, path, queue) = temp_queue::<Launch>();
    let total = 40;
    for i in 0..total {
        queue
            .enqueue(&format!("DEV{i}"), "10.0.0.5", &"com.example.app".to_string())
            .unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                let queue: JobQueue<Launch> = JobQueue::open(&path).unwrap();
                let mut claimed = Vec::new();
                while let Some(job) = queue.claim_next().unwrap() {
                    claimed.push(job.ordinal);
                }
                claimed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut count = 0;
    for handle in handles {
        for ordinal in handle.join().unwrap() {
            assert!(seen.insert(ordinal), "ordinal {ordinal} claimed twice");
            count += 1;
        }
    }
    assert_eq!(count, total);
    assert_eq!(queue.counts().unwrap(), (0, total as usize, 0));
}
