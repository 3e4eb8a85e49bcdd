//! Sessions and the session registry.

use std::sync::Arc;
use std::time::Duration;

use jobterm::shell::controller::JobController;
use jobterm::shell::session::{Session, SessionRegistry};
use jobterm::term::{Term, TermOutput};

use super::support::{create, registry, session};

#[test]
fn session_shares_the_terminal_id() {
    let (term, _io) = Term::pair("test");
    let id = term.handle.id().to_owned();
    let session = Session::new(term.handle);
    assert_eq!(session.id(), id);
    assert_eq!(session.term().kind(), "test");
}

#[test]
fn foreground_job_tracking() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = JobController::new(dir.path(), false);
    let registry = registry();
    let (session, _io) = session();

    assert!(session.foreground_job().is_none());
    let first = create(&controller, &registry, &session, "echo 1").expect("job");
    let second = create(&controller, &registry, &session, "echo 2").expect("job");
    session.set_foreground_job(&first);
    assert!(session.is_foreground_job(&first));
    assert!(!session.is_foreground_job(&second));
    session.set_foreground_job(&second);
    assert_eq!(session.foreground_job().map(|j| j.id()), Some(second.id()));
}

#[test]
fn registry_tracks_sessions() {
    let registry = SessionRegistry::new();
    let (a, _io_a) = session();
    let (b, _io_b) = session();
    registry.register(&a);
    registry.register(&b);
    registry.register(&a);
    assert_eq!(registry.len(), 2);
    assert!(registry.get(a.id()).is_some());
    assert!(registry.remove(a.id()).is_some());
    assert!(registry.get(a.id()).is_none());
    assert!(!registry.is_empty());
}

#[test]
fn idle_sessions_are_closed() {
    let registry = SessionRegistry::new();
    let (idle, mut idle_io) = session();
    let (busy, _busy_io) = session();
    registry.register(&idle);
    registry.register(&busy);

    std::thread::sleep(Duration::from_millis(60));
    busy.touch();
    assert_eq!(registry.close_idle(Duration::from_millis(40)), 1);
    assert!(idle.term().is_closed());
    assert!(!busy.term().is_closed());
    assert_eq!(idle_io.output.try_recv().ok(), Some(TermOutput::Close));
}

#[test]
fn close_all_closes_every_terminal() {
    let registry = SessionRegistry::new();
    let sessions: Vec<Arc<Session>> = (0..3)
        .map(|_| {
            let (term, _io) = Term::pair("test");
            Arc::new(Session::new(term.handle))
        })
        .collect();
    for session in &sessions {
        registry.register(session);
    }
    registry.close_all();
    assert!(sessions.iter().all(|s| s.term().is_closed()));
}
