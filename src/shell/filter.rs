//! Text filters usable after `|`.
//!
//! Each filter is an [`OutputStage`] built from the tokens of one pipe
//! segment. Line-oriented filters hold back a trailing partial line until
//! its newline arrives, or until the output ends.

use regex::{Regex, RegexBuilder};

use super::handler::OutputStage;
use super::token::CliToken;
use crate::{AppError, Result};

/// Names accepted as pipe commands.
pub const PIPE_COMMANDS: &[&str] = &["grep", "plaintext", "wc", "head"];

/// Build the stage for one pipe segment.
///
/// # Errors
///
/// Returns `AppError::MalformedPipeline` if the segment is empty, names an
/// unsupported filter, or has invalid arguments.
pub fn pipe_stage(segment: &[CliToken]) -> Result<Box<dyn OutputStage>> {
    let mut words = segment.iter().filter(|t| t.is_text()).map(CliToken::value);
    let Some(name) = words.next() else {
        return Err(AppError::MalformedPipeline(
            "missing command after '|'".into(),
        ));
    };
    let args: Vec<&str> = words.collect();
    match name {
        "grep" => Ok(Box::new(Grep::parse(&args)?)),
        "plaintext" => Ok(Box::new(Plaintext::new()?)),
        "wc" => Ok(Box::new(LineCount::parse(&args)?)),
        "head" => Ok(Box::new(Head::parse(&args)?)),
        other => Err(AppError::MalformedPipeline(format!(
            "{other}: unsupported pipe command"
        ))),
    }
}

/// Carries the unterminated tail of one chunk over to the next, so filters
/// only ever see whole lines.
#[derive(Debug, Default)]
struct LineBuffer {
    partial: String,
}

impl LineBuffer {
    /// Complete lines of the buffered tail plus `text`, without terminators.
    fn push(&mut self, text: &str) -> Vec<String> {
        self.partial.push_str(text);
        let Some(end) = self.partial.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(end + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete.lines().map(str::to_owned).collect()
    }

    /// The unterminated tail left when output ends.
    fn take(&mut self) -> Option<String> {
        (!self.partial.is_empty()).then(|| std::mem::take(&mut self.partial))
    }
}

/// Newline-terminate each kept line.
fn terminated(kept: &[String]) -> Option<String> {
    if kept.is_empty() {
        return None;
    }
    let mut out = kept.join("\n");
    out.push('\n');
    Some(out)
}

fn parse_count(flag: &str, value: Option<&&str>) -> Result<usize> {
    value
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| AppError::MalformedPipeline(format!("{flag} expects a number")))
}

/// `grep [-i] [-v] [-n] [-m N] [-e] PATTERN`
pub struct Grep {
    pattern: Regex,
    invert: bool,
    line_numbers: bool,
    max_count: Option<usize>,
    seen: usize,
    matched: usize,
    buffer: LineBuffer,
}

impl Grep {
    fn parse(args: &[&str]) -> Result<Self> {
        let mut ignore_case = false;
        let mut invert = false;
        let mut line_numbers = false;
        let mut max_count = None;
        let mut pattern = None;

        let mut iter = args.iter();
        while let Some(&arg) = iter.next() {
            match arg {
                "-i" => ignore_case = true,
                "-v" => invert = true,
                "-n" => line_numbers = true,
                "-m" => max_count = Some(parse_count("-m", iter.next())?),
                "-e" => pattern = iter.next().map(|p| (*p).to_owned()),
                other if pattern.is_none() => pattern = Some(other.to_owned()),
                other => {
                    return Err(AppError::MalformedPipeline(format!(
                        "grep: unexpected argument '{other}'"
                    )))
                }
            }
        }

        let Some(pattern) = pattern else {
            return Err(AppError::MalformedPipeline("grep: missing pattern".into()));
        };
        let pattern = RegexBuilder::new(&pattern)
            .case_insensitive(ignore_case)
            .build()
            .map_err(|err| AppError::MalformedPipeline(format!("grep: {err}")))?;

        Ok(Self {
            pattern,
            invert,
            line_numbers,
            max_count,
            seen: 0,
            matched: 0,
            buffer: LineBuffer::default(),
        })
    }

    fn keep(&mut self, line: &str) -> Option<String> {
        self.seen += 1;
        if self.max_count.is_some_and(|max| self.matched >= max)
            || self.pattern.is_match(line) == self.invert
        {
            return None;
        }
        self.matched += 1;
        if self.line_numbers {
            Some(format!("{}:{line}", self.seen))
        } else {
            Some(line.to_owned())
        }
    }
}

impl OutputStage for Grep {
    fn handle(&mut self, text: String) -> Option<String> {
        let lines = self.buffer.push(&text);
        let kept: Vec<String> = lines.iter().filter_map(|line| self.keep(line)).collect();
        terminated(&kept)
    }

    fn finish(&mut self) -> Option<String> {
        let tail = self.buffer.take()?;
        self.keep(&tail)
    }
}

/// `plaintext`: strips ANSI escape sequences.
pub struct Plaintext {
    ansi: Regex,
}

impl Plaintext {
    fn new() -> Result<Self> {
        let ansi = Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]")
            .map_err(|err| AppError::MalformedPipeline(format!("plaintext: {err}")))?;
        Ok(Self { ansi })
    }
}

impl OutputStage for Plaintext {
    fn handle(&mut self, text: String) -> Option<String> {
        Some(self.ansi.replace_all(&text, "").into_owned())
    }
}

/// `wc -l`: emits the number of lines seen once the output ends.
pub struct LineCount {
    lines: usize,
    buffer: LineBuffer,
}

impl LineCount {
    fn parse(args: &[&str]) -> Result<Self> {
        match args {
            [] | ["-l"] => Ok(Self {
                lines: 0,
                buffer: LineBuffer::default(),
            }),
            _ => Err(AppError::MalformedPipeline(
                "wc: only -l is supported".into(),
            )),
        }
    }
}

impl OutputStage for LineCount {
    fn handle(&mut self, text: String) -> Option<String> {
        self.lines += self.buffer.push(&text).len();
        None
    }

    fn finish(&mut self) -> Option<String> {
        if self.buffer.take().is_some() {
            self.lines += 1;
        }
        Some(format!("{}\n", self.lines))
    }
}

/// `head [-n N]`: keeps the first N lines.
pub struct Head {
    remaining: usize,
    buffer: LineBuffer,
}

impl Head {
    fn parse(args: &[&str]) -> Result<Self> {
        match args {
            [] => Ok(Self::keeping(10)),
            ["-n", count] => Ok(Self::keeping(parse_count("-n", Some(count))?)),
            _ => Err(AppError::MalformedPipeline("head: usage: head [-n N]".into())),
        }
    }

    fn keeping(remaining: usize) -> Self {
        Self {
            remaining,
            buffer: LineBuffer::default(),
        }
    }
}

impl OutputStage for Head {
    fn handle(&mut self, text: String) -> Option<String> {
        if self.remaining == 0 {
            return None;
        }
        let kept: Vec<String> = self
            .buffer
            .push(&text)
            .into_iter()
            .take(self.remaining)
            .collect();
        self.remaining -= kept.len();
        terminated(&kept)
    }

    fn finish(&mut self) -> Option<String> {
        let tail = self.buffer.take()?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(tail)
    }
}
