//! Pipe filters.

use jobterm::shell::filter::pipe_stage;
use jobterm::shell::handler::OutputStage;
use jobterm::shell::token::tokenize;
use jobterm::AppError;

fn stage(segment: &str) -> Box<dyn OutputStage> {
    pipe_stage(&tokenize(segment)).expect("valid filter")
}

fn stage_err(segment: &str) -> AppError {
    match pipe_stage(&tokenize(segment)) {
        Ok(_) => panic!("expected '{segment}' to be rejected"),
        Err(err) => err,
    }
}

#[test]
fn grep_keeps_matching_lines() {
    let mut grep = stage("grep err");
    assert_eq!(
        grep.handle("ok\nerror one\nfine\nstderr\n".into()),
        Some("error one\nstderr\n".into())
    );
    assert_eq!(grep.handle("nothing\n".into()), None);
}

#[test]
fn grep_flags() {
    let mut grep = stage("grep -i -n WARN");
    assert_eq!(
        grep.handle("info\nwarn: disk\n".into()),
        Some("2:warn: disk\n".into())
    );

    let mut inverted = stage("grep -v debug");
    assert_eq!(
        inverted.handle("debug a\ninfo b\n".into()),
        Some("info b\n".into())
    );

    let mut limited = stage("grep -m 1 x");
    assert_eq!(limited.handle("x1\nx2\n".into()), Some("x1\n".into()));
    assert_eq!(limited.handle("x3\n".into()), None);
}

#[test]
fn grep_quoted_pattern_with_spaces() {
    let mut grep = stage("grep 'two words'");
    assert_eq!(
        grep.handle("two words here\ntwo\n".into()),
        Some("two words here\n".into())
    );
}

#[test]
fn grep_requires_a_valid_pattern() {
    assert!(matches!(stage_err("grep"), AppError::MalformedPipeline(_)));
    assert!(matches!(stage_err("grep ("), AppError::MalformedPipeline(_)));
}

#[test]
fn wc_counts_lines_on_finish() {
    let mut wc = stage("wc -l");
    assert_eq!(wc.handle("a\nb\n".into()), None);
    assert_eq!(wc.handle("c\n".into()), None);
    assert_eq!(wc.finish(), Some("3\n".into()));
    assert!(matches!(stage_err("wc -c"), AppError::MalformedPipeline(_)));
}

#[test]
fn head_stops_after_limit() {
    let mut head = stage("head -n 2");
    assert_eq!(head.handle("1\n2\n3\n".into()), Some("1\n2\n".into()));
    assert_eq!(head.handle("4\n".into()), None);

    let mut default = stage("head");
    let input: String = (1..=12).map(|n| format!("{n}\n")).collect();
    let kept = default.handle(input).expect("lines");
    assert_eq!(kept.lines().count(), 10);
}

#[test]
fn plaintext_strips_ansi() {
    let mut plain = stage("plaintext");
    assert_eq!(
        plain.handle("\u{1b}[1;31mred\u{1b}[0m text\n".into()),
        Some("red text\n".into())
    );
}

#[test]
fn empty_and_unknown_segments_are_malformed() {
    assert!(matches!(stage_err(""), AppError::MalformedPipeline(_)));
    let err = stage_err("sort -r");
    assert_eq!(err.to_string(), "malformed pipeline: sort: unsupported pipe command");
}

#[test]
fn grep_joins_lines_split_across_chunks() {
    let mut grep = stage("grep keep");
    assert_eq!(grep.handle("keep1\ndrop".into()), Some("keep1\n".into()));
    assert_eq!(grep.handle("\n".into()), None);
    assert_eq!(grep.handle("kee".into()), None);
    assert_eq!(grep.handle("p2\n".into()), Some("keep2\n".into()));
    assert_eq!(grep.handle("keep3".into()), None);
    assert_eq!(grep.finish(), Some("keep3".into()));
}

#[test]
fn wc_counts_whole_lines_across_chunks() {
    let mut wc = stage("wc -l");
    for chunk in ["keep1\ndrop", "\n", "keep2\n"] {
        assert_eq!(wc.handle(chunk.into()), None);
    }
    assert_eq!(wc.finish(), Some("3\n".into()));

    let mut unterminated = stage("wc");
    unterminated.handle("a\nb".into());
    assert_eq!(unterminated.finish(), Some("2\n".into()));
}

#[test]
fn head_counts_whole_lines_across_chunks() {
    let mut head = stage("head -n 2");
    assert_eq!(head.handle("1".into()), None);
    assert_eq!(head.handle("\n2".into()), Some("1\n".into()));
    assert_eq!(head.handle("\n3\n".into()), Some("2\n".into()));
    assert_eq!(head.finish(), None);

    let mut tail = stage("head -n 5");
    assert_eq!(tail.handle("x\ny".into()), Some("x\n".into()));
    assert_eq!(tail.finish(), Some("y".into()));
}
