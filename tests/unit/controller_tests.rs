//! Job controller: creation protocol, id allocation, cache ceiling and close.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use jobterm::models::job::{JobId, JobStatus};
use jobterm::shell::controller::{JobController, MAX_CACHED_REDIRECTS};
use jobterm::AppError;

use super::support::{create, drain_text, registry, session, wait_terminated};

fn controller() -> (JobController, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    (JobController::new(dir.path(), false), dir)
}

#[test]
fn ids_increase_from_one() {
    let (controller, _dir) = controller();
    let registry = registry();
    let (session, _io) = session();
    let ids: Vec<JobId> = (0..3)
        .map(|_| create(&controller, &registry, &session, "echo hi").expect("job").id())
        .collect();
    assert_eq!(ids, vec![JobId(1), JobId(2), JobId(3)]);
}

#[test]
fn concurrent_creation_yields_unique_ids() {
    let (controller, _dir) = controller();
    let controller = Arc::new(controller);
    let registry = registry();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let controller = Arc::clone(&controller);
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let (session, _io) = session();
                (0..25)
                    .map(|_| {
                        create(&controller, &registry, &session, "echo x")
                            .expect("job")
                            .id()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        let ids = handle.join().expect("thread");
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "per-thread ids ascend");
        for id in ids {
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }
    assert_eq!(seen.len(), 200);
    assert_eq!(controller.jobs().len(), 200);
}

#[test]
fn trailing_ampersand_marks_background_and_is_stripped() {
    let (controller, _dir) = controller();
    let registry = registry();
    let (session, _io) = session();
    let job = create(&controller, &registry, &session, "sleep 10 &").expect("job");
    assert!(job.run_in_background());
    assert_eq!(job.line(), "sleep 10");
    assert_eq!(job.status(), JobStatus::Created);
}

#[test]
fn unknown_command_is_reported_without_consuming_an_id() {
    let (controller, _dir) = controller();
    let registry = registry();
    let (session, _io) = session();
    let err = create(&controller, &registry, &session, "badcmd arg1").expect_err("unknown");
    assert!(matches!(err, AppError::CommandNotFound(ref name) if name == "badcmd"));
    let job = create(&controller, &registry, &session, "echo ok").expect("job");
    assert_eq!(job.id(), JobId(1));
    assert_eq!(controller.jobs().len(), 1);
}

#[test]
fn leading_operator_is_malformed() {
    let (controller, _dir) = controller();
    let registry = registry();
    let (session, _io) = session();
    let err = create(&controller, &registry, &session, "| grep x").expect_err("malformed");
    assert!(matches!(err, AppError::MalformedPipeline(_)));
    let err = create(&controller, &registry, &session, "   ").expect_err("empty");
    assert!(matches!(err, AppError::MalformedPipeline(_)));
}

#[test]
fn unsupported_pipe_command_is_malformed() {
    let (controller, _dir) = controller();
    let registry = registry();
    let (session, _io) = session();
    let err = create(&controller, &registry, &session, "echo x | sort").expect_err("sort");
    assert!(matches!(err, AppError::MalformedPipeline(ref msg) if msg.contains("sort")));
}

#[test]
fn ninth_cache_redirect_is_rejected() {
    let (controller, dir) = controller();
    let registry = registry();
    let (session, _io) = session();

    for _ in 0..MAX_CACHED_REDIRECTS {
        let job = create(&controller, &registry, &session, "echo cached >").expect("job");
        let location = job.process().cache_location().expect("cache location");
        assert!(location.starts_with(dir.path()));
        assert!(location.ends_with(job.id().to_string()));
    }

    let err = create(&controller, &registry, &session, "echo cached >").expect_err("ceiling");
    assert!(matches!(err, AppError::TooManyCachedRedirects(8)));

    // Named targets are not counted against the ceiling.
    let out = dir.path().join("named.txt");
    let line = format!("echo named > {}", out.display());
    create(&controller, &registry, &session, &line).expect("named redirect");
}

#[tokio::test]
async fn cache_redirect_writes_file() {
    let (controller, _dir) = controller();
    let registry = registry();
    let (session, mut io) = session();

    let job = create(&controller, &registry, &session, "lines one two >>").expect("job");
    job.run().expect("run");
    wait_terminated(&job).await;

    let location = job.process().cache_location().expect("cache location");
    let written = std::fs::read_to_string(location).expect("cache file");
    assert_eq!(written, "one\ntwo\n");
    assert!(drain_text(&mut io).is_empty(), "redirected output skips the terminal");
}

#[tokio::test]
async fn pipes_filter_before_redirect() {
    let (controller, dir) = controller();
    let registry = registry();
    let (session, _io) = session();
    let out = dir.path().join("out.txt");

    let line = format!(
        "lines alpha beta gamma alphabet | grep alpha | head -n 1 > {}",
        out.display()
    );
    let job = create(&controller, &registry, &session, &line).expect("job");
    job.run().expect("run");
    wait_terminated(&job).await;

    assert_eq!(std::fs::read_to_string(&out).expect("out"), "alpha\n");
}

#[tokio::test]
async fn filters_see_whole_lines_from_chunked_writes() {
    let (controller, dir) = controller();
    let registry = registry();
    let (session, _io) = session();
    let chunks = r"chunks 'keep1\ndrop' '\n' 'keep2\n'";

    let grepped = dir.path().join("g.txt");
    let line = format!("{chunks} | grep keep > {}", grepped.display());
    let job = create(&controller, &registry, &session, &line).expect("grep job");
    job.run().expect("run");
    wait_terminated(&job).await;
    assert_eq!(
        std::fs::read_to_string(&grepped).expect("grep out"),
        "keep1\nkeep2\n"
    );

    let counted = dir.path().join("w.txt");
    let line = format!("{chunks} | wc -l > {}", counted.display());
    let job = create(&controller, &registry, &session, &line).expect("wc job");
    job.run().expect("run");
    wait_terminated(&job).await;
    assert_eq!(std::fs::read_to_string(&counted).expect("wc out"), "3\n");
}

#[tokio::test]
async fn save_result_mirrors_terminal_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = JobController::new(dir.path(), true);
    let registry = registry();
    let (session, mut io) = session();

    let job = create(&controller, &registry, &session, "lines a b").expect("job");
    job.run().expect("run");
    wait_terminated(&job).await;

    assert_eq!(controller.result_cache().lines(job.id()), vec!["a", "b"]);
    assert_eq!(drain_text(&mut io), "a\nb\n");
}

#[tokio::test]
async fn terminated_jobs_stay_until_reaped() {
    let (controller, _dir) = controller();
    let registry = registry();
    let (session, _io) = session();

    let live = create(&controller, &registry, &session, "spin").expect("job");
    live.run().expect("run");
    let done = create(&controller, &registry, &session, "echo done").expect("job");
    done.run().expect("run");
    wait_terminated(&done).await;

    assert_eq!(controller.jobs().len(), 2);
    assert!(!controller.reap(live.id()), "live jobs are not reaped");
    assert!(controller.reap(done.id()));
    assert!(controller.get_job(done.id()).is_none());

    live.terminate();
    assert_eq!(controller.reap_session(session.id()), 1);
    assert!(controller.jobs().is_empty());
}

#[tokio::test]
async fn close_terminates_everything_and_fires_once() {
    let (controller, _dir) = controller();
    let registry = registry();
    let (session, _io) = session();

    let running = create(&controller, &registry, &session, "spin").expect("job");
    running.run().expect("run");
    let stopped = create(&controller, &registry, &session, "spin &").expect("job");
    stopped.run().expect("run");
    stopped.suspend().expect("suspend");
    let created = create(&controller, &registry, &session, "echo never").expect("job");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    controller.close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for job in [&running, &stopped, &created] {
        wait_terminated(job).await;
        assert_eq!(job.status(), JobStatus::Terminated);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(controller.jobs().is_empty());
    assert!(controller.is_closed());

    let again = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&again);
    controller.close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(again.load(Ordering::SeqCst), 1, "second close completes at once");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn close_with_no_jobs_completes_immediately() {
    let (controller, _dir) = controller();
    controller.close_all().await;
    assert!(controller.is_closed());
}
