//! Display formats of `AppError`.

use jobterm::AppError;

#[test]
fn command_not_found_names_the_command() {
    let err = AppError::CommandNotFound("badcmd".into());
    assert_eq!(err.to_string(), "badcmd: command not found");
}

#[test]
fn too_many_cached_redirects_mentions_limit() {
    let err = AppError::TooManyCachedRedirects(8);
    assert!(err.to_string().contains("at most 8 jobs"));
}

#[test]
fn invalid_job_state_describes_transition() {
    let err = AppError::InvalidJobState {
        job: 4,
        transition: "resume",
        status: "running".into(),
    };
    assert_eq!(err.to_string(), "job 4: cannot resume while running");
}

#[test]
fn prefixed_variants_are_distinct() {
    let cases = [
        (AppError::MalformedPipeline("x".into()), "malformed pipeline: x"),
        (AppError::TransportBind("x".into()), "transport bind: x"),
        (AppError::Config("x".into()), "config: x"),
        (AppError::Io("x".into()), "io: x"),
        (AppError::NotFound("x".into()), "not found: x"),
        (AppError::AlreadyBound, "already bound"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn io_errors_convert() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("gone")));
}

#[test]
fn error_messages_have_no_trailing_period() {
    let err = AppError::Io("write failed".into());
    assert!(!err.to_string().ends_with('.'));
}
