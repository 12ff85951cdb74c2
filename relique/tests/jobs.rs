//! End-to-end job runs through the orchestrator, with stub transfer tools
//! (and real rsync where available).

mod common;

use common::{harness, module, rsync_available, Transport};
use relique::catalog::{ImageFilter, JobFilter, Page};
use relique::module::BackupMode;
use relique::{ErrorKind, JobKind, JobStatus, Storage};
use std::os::unix::fs::MetadataExt;
use tokio_util::sync::CancellationToken;

fn reachable() -> Transport {
    Transport::Stub { reachable: true }
}

#[tokio::test]
async fn test_fresh_full_backup() {
    let h = harness(reachable(), vec![module("data", BackupMode::Full, &["/srv/data"])]);
    let o = &h.orchestrator;

    let mut job = o.new_backup_job("c1", "data", None).unwrap();
    o.run(&mut job, &CancellationToken::new()).await.unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert!(job.done);
    assert!(job.start_time.is_some() && job.end_time.is_some());
    assert!(h.storage().join(job.uuid.to_string()).join("_data/srv/data").is_dir());
    assert_eq!(job.stats.number_of_files, 2);

    for name in ["module.toml", "client.toml", "repo.toml", "stats.toml"] {
        assert!(h.catalog_file(&job.uuid, name).is_file(), "missing {name}");
    }

    let stored = o.job(job.uuid).await.unwrap();
    assert_eq!(stored.status, JobStatus::Success);
    assert_eq!(stored.stats, job.stats);

    let image = o.image(job.uuid).await.unwrap();
    assert_eq!(image.uuid, job.uuid);
    assert_eq!(image.number_of_elements, 2);
    assert_eq!(image.number_of_files, 1);
    assert_eq!(image.number_of_folders, 1);
    // "payload\n"
    assert_eq!(image.size_on_disk, 8);
}

#[tokio::test]
async fn test_colliding_paths_are_counted_once() {
    let h = harness(
        reachable(),
        vec![module("data", BackupMode::Full, &["/srv/data", "/srv/Data"])],
    );
    let o = &h.orchestrator;

    let mut job = o.new_backup_job("c1", "data", None).unwrap();
    o.run(&mut job, &CancellationToken::new()).await.unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.stats.number_of_files, 4);
    assert_ne!(job.tasks[0].log_file, job.tasks[1].log_file);
    for task in &job.tasks {
        assert!(task.log_file.is_file(), "missing {}", task.log_file.display());
    }
}

#[tokio::test]
async fn test_incremental_links_against_previous_job() {
    let h = harness(
        reachable(),
        vec![
            module("full", BackupMode::Full, &["/srv/data"]),
            module("inc", BackupMode::Incremental, &["/srv/data"]),
        ],
    );
    let o = &h.orchestrator;
    let cancel = CancellationToken::new();

    let mut first = o.new_backup_job("c1", "full", None).unwrap();
    o.run(&mut first, &cancel).await.unwrap();

    let mut second = o.new_backup_job("c1", "inc", None).unwrap();
    o.run(&mut second, &cancel).await.unwrap();

    assert_eq!(second.mode, Some(BackupMode::Incremental));
    assert_eq!(second.previous_job_uuid, Some(first.uuid));

    let link_dest = format!(
        "--link-dest={}/_data/",
        first.storage_path().unwrap().display()
    );
    let calls = h.rsync_calls();
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].contains("--link-dest"));
    assert!(calls[1].contains(&link_dest), "{}", calls[1]);

    let stored = o.job(second.uuid).await.unwrap();
    assert_eq!(stored.previous_job_uuid, Some(first.uuid));
}

#[tokio::test]
async fn test_incremental_without_previous_becomes_full() {
    let h = harness(reachable(), vec![module("inc", BackupMode::Incremental, &["/srv/data"])]);
    let o = &h.orchestrator;

    let mut job = o.new_backup_job("c1", "inc", None).unwrap();
    o.run(&mut job, &CancellationToken::new()).await.unwrap();

    assert_eq!(job.mode, Some(BackupMode::Full));
    assert_eq!(job.previous_job_uuid, None);
    assert!(!h.rsync_calls()[0].contains("--link-dest"));

    let (images, total) = o.images(ImageFilter::default(), Page::default()).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(images[0].uuid, job.uuid);
}

#[tokio::test]
async fn test_partial_transfer_ends_incomplete() {
    let h = harness(
        reachable(),
        vec![module("data", BackupMode::Full, &["/srv/data", "/srv/flaky"])],
    );
    let o = &h.orchestrator;

    let mut job = o.new_backup_job("c1", "data", None).unwrap();
    let err = o.run(&mut job, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Partial);

    assert_eq!(job.status, JobStatus::Incomplete);
    assert!(job.done);
    // both tasks counted
    assert_eq!(job.stats.number_of_files, 4);

    let flaky = job
        .tasks
        .iter()
        .find(|t| t.backup_path == "/srv/flaky")
        .unwrap();
    let error_log = std::fs::read_to_string(&flaky.error_log_file).unwrap();
    assert!(error_log.contains("file has vanished"));

    let image = o.image(job.uuid).await.unwrap();
    assert_eq!(image.number_of_elements, 4);
}

#[tokio::test]
async fn test_unreachable_client_fails_backup() {
    let h = harness(
        Transport::Stub { reachable: false },
        vec![module("data", BackupMode::Full, &["/srv/data"])],
    );
    let o = &h.orchestrator;

    let mut job = o.new_backup_job("c1", "data", None).unwrap();
    let err = o.run(&mut job, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains("unreachable"), "{err}");

    assert_eq!(job.status, JobStatus::Error);
    assert!(job.done);
    assert!(h.rsync_calls().is_empty());

    let stored = o.job(job.uuid).await.unwrap();
    assert_eq!(stored.status, JobStatus::Error);
    assert!(stored.done);
    assert!(o.image(job.uuid).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_restore_to_other_client_with_custom_path() {
    let h = harness(reachable(), vec![module("data", BackupMode::Full, &["/srv/data"])]);
    let o = &h.orchestrator;
    let cancel = CancellationToken::new();

    let mut backup = o.new_backup_job("c1", "data", None).unwrap();
    o.run(&mut backup, &cancel).await.unwrap();

    let mut restore = o
        .new_restore_job(backup.uuid, Some("c2"), &["/srv/data:/tmp/recovery".to_string()])
        .await
        .unwrap();
    assert_eq!(restore.kind, JobKind::Restore);
    assert_eq!(restore.module.name, "on-demand");
    o.run(&mut restore, &cancel).await.unwrap();

    assert_eq!(restore.status, JobStatus::Success);
    assert_eq!(restore.restore_image_uuid, Some(backup.uuid));
    assert_eq!(restore.tasks.len(), 1);

    let task = &restore.tasks[0];
    let expected_source = backup.storage_path().unwrap().join("_data/srv/data");
    assert_eq!(
        task.source.trim_end_matches('/'),
        expected_source.to_string_lossy()
    );
    assert_eq!(task.destination, "relique@5.6.7.8:/tmp/recovery");
    assert!(task.args().contains(&"--delete".to_string()));

    // a restore never produces an image
    let (_, total) = o.images(ImageFilter::default(), Page::default()).await.unwrap();
    assert_eq!(total, 1);

    let filter = JobFilter {
        kind: Some(JobKind::Restore),
        ..JobFilter::default()
    };
    let (jobs, total) = o.jobs(filter, Page::default()).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(jobs[0].client.name, "c2");
    assert_eq!(
        jobs[0].custom_restore_paths.get("/srv/data").map(String::as_str),
        Some("/tmp/recovery")
    );
}

#[tokio::test]
async fn test_restore_rejects_path_outside_image() {
    let h = harness(reachable(), vec![module("data", BackupMode::Full, &["/srv/data"])]);
    let o = &h.orchestrator;

    let mut backup = o.new_backup_job("c1", "data", None).unwrap();
    o.run(&mut backup, &CancellationToken::new()).await.unwrap();

    let err = o
        .new_restore_job(backup.uuid, None, &["/etc/passwd:/tmp/x".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[tokio::test]
async fn test_module_without_paths_succeeds_empty() {
    let h = harness(reachable(), vec![module("empty", BackupMode::Full, &[])]);
    let o = &h.orchestrator;

    let mut job = o.new_backup_job("c1", "empty", None).unwrap();
    o.run(&mut job, &CancellationToken::new()).await.unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert!(job.tasks.is_empty());
    assert!(h.rsync_calls().is_empty());

    let image = o.image(job.uuid).await.unwrap();
    assert_eq!(image.number_of_elements, 0);
    assert_eq!(image.number_of_files, 0);
    assert_eq!(image.number_of_folders, 0);
    assert_eq!(image.size_on_disk, 0);
}

#[tokio::test]
async fn test_setup_twice_is_rejected() {
    let h = harness(reachable(), vec![module("data", BackupMode::Full, &["/srv/data"])]);
    let o = &h.orchestrator;
    let engine = o.engine();

    let mut job = o.new_backup_job("c1", "data", None).unwrap();
    engine.setup_backup(&mut job).await.unwrap();

    let mut again = job.clone();
    let err = engine.setup_backup(&mut again).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);

    let stored = o.job(job.uuid).await.unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert!(!stored.done);
}

#[tokio::test]
async fn test_every_image_has_a_finished_backup() {
    let h = harness(
        reachable(),
        vec![
            module("data", BackupMode::Full, &["/srv/data"]),
            module("mixed", BackupMode::Full, &["/srv/data", "/srv/flaky"]),
        ],
    );
    let o = &h.orchestrator;
    let cancel = CancellationToken::new();

    for name in ["data", "mixed", "data"] {
        let mut job = o.new_backup_job("c1", name, None).unwrap();
        let _ = o.run(&mut job, &cancel).await;
    }

    let (images, total) = o.images(ImageFilter::default(), Page::default()).await.unwrap();
    assert_eq!(total, 3);
    for image in images {
        let job = o.job(image.uuid).await.unwrap();
        assert_eq!(job.kind, JobKind::Backup);
        assert!(job.done);
        assert!(matches!(job.status, JobStatus::Success | JobStatus::Incomplete));
        assert_eq!(image.repository.name(), job.repository.name());
    }
}

#[tokio::test]
async fn test_incremental_hard_links_unchanged_files() {
    if !rsync_available() {
        eprintln!("rsync not installed, skipping");
        return;
    }

    let remote = tempfile::TempDir::new().unwrap();
    let source = remote.path().join("data");
    std::fs::create_dir_all(source.join("nested")).unwrap();
    std::fs::write(source.join("a.txt"), "alpha").unwrap();
    std::fs::write(source.join("nested/b.txt"), "bravo").unwrap();
    let source = source.to_string_lossy().to_string();

    let h = harness(
        Transport::Local,
        vec![
            module("full", BackupMode::Full, &[&source]),
            module("inc", BackupMode::Incremental, &[&source]),
        ],
    );
    let o = &h.orchestrator;
    let cancel = CancellationToken::new();

    let mut first = o.new_backup_job("c1", "full", None).unwrap();
    o.run(&mut first, &cancel).await.unwrap();
    let mut second = o.new_backup_job("c1", "inc", None).unwrap();
    o.run(&mut second, &cancel).await.unwrap();
    assert_eq!(second.previous_job_uuid, Some(first.uuid));

    let relative = format!("{}/a.txt", source.trim_start_matches('/'));
    let a = first.storage_path().unwrap().join("_data").join(&relative);
    let b = second.storage_path().unwrap().join("_data").join(&relative);
    let (a, b) = (std::fs::metadata(a).unwrap(), std::fs::metadata(b).unwrap());
    assert_eq!(a.ino(), b.ino());
    assert!(b.nlink() >= 2);
}
