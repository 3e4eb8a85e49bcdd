//! Output handler chain.
//!
//! Every chunk of text a process writes passes through its stages in
//! construction order. Transform stages (pipe filters) may rewrite or drop
//! text; sink stages (terminal, redirect, result cache) consume it and pass
//! it on unchanged so later sinks see the same text. A chain built by the
//! controller always contains at least one terminal or redirect sink.

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::models::job::JobId;
use crate::term::TermHandle;
use crate::Result;

/// Lines kept per job by the [`ResultCache`].
pub const RESULT_CACHE_LINES: usize = 1000;

/// One link of an output chain.
pub trait OutputStage: Send {
    /// Process one chunk, returning what the next stage should receive.
    fn handle(&mut self, text: String) -> Option<String>;

    /// Flush buffered state once the producing process has ended.
    fn finish(&mut self) -> Option<String> {
        None
    }
}

/// Ordered list of stages applied to a process's output.
#[derive(Default)]
pub struct HandlerChain {
    stages: Vec<Box<dyn OutputStage>>,
    finished: bool,
}

impl HandlerChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn push(&mut self, stage: impl OutputStage + 'static) {
        self.stages.push(Box::new(stage));
    }

    /// Append an already boxed stage.
    pub fn push_boxed(&mut self, stage: Box<dyn OutputStage>) {
        self.stages.push(stage);
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the chain has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run `text` through every stage.
    pub fn write(&mut self, text: String) {
        if !self.finished {
            self.feed(0, text);
        }
    }

    /// Flush every stage in order. Later calls are no-ops.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        for idx in 0..self.stages.len() {
            if let Some(flushed) = self.stages[idx].finish() {
                self.feed(idx + 1, flushed);
            }
        }
        self.finished = true;
    }

    fn feed(&mut self, from: usize, text: String) {
        let mut current = Some(text);
        for stage in self.stages.iter_mut().skip(from) {
            match current.take() {
                Some(text) => current = stage.handle(text),
                None => break,
            }
        }
    }
}

/// Terminal sink: writes to the owning session's terminal.
pub struct TermStage {
    term: TermHandle,
}

impl TermStage {
    /// Sink writing to `term`.
    #[must_use]
    pub fn new(term: TermHandle) -> Self {
        Self { term }
    }
}

impl OutputStage for TermStage {
    fn handle(&mut self, text: String) -> Option<String> {
        self.term.write(&text);
        Some(text)
    }
}

/// Redirect sink: appends to or overwrites a file.
pub struct RedirectStage {
    path: PathBuf,
    file: Option<File>,
}

impl RedirectStage {
    /// Open `path`, truncating it unless `append` is set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be opened.
    pub fn open(path: impl Into<PathBuf>, append: bool) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .map_err(|err| crate::AppError::Io(format!("{}: {err}", path.display())))?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Open a cache file, creating its parent directories first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory or the file cannot be created.
    pub fn open_cache(path: &Path, append: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| crate::AppError::Io(format!("{}: {err}", parent.display())))?;
        }
        Self::open(path, append)
    }

    /// Target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputStage for RedirectStage {
    fn handle(&mut self, text: String) -> Option<String> {
        if let Some(file) = self.file.as_mut() {
            if let Err(err) = file.write_all(text.as_bytes()) {
                warn!(path = %self.path.display(), %err, "redirect write failed, closing file");
                self.file = None;
            }
        }
        Some(text)
    }

    fn finish(&mut self) -> Option<String> {
        if let Some(mut file) = self.file.take() {
            if let Err(err) = file.flush() {
                warn!(path = %self.path.display(), %err, "redirect flush failed");
            }
        }
        None
    }
}

/// Shared store of recent output per job.
#[derive(Debug, Clone, Default)]
pub struct ResultCache {
    inner: Arc<Mutex<HashMap<JobId, VecDeque<String>>>>,
}

impl ResultCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the lines of `text` for `job`, keeping the newest ones.
    pub fn record(&self, job: JobId, text: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let lines = inner.entry(job).or_default();
        for line in text.lines() {
            if lines.len() == RESULT_CACHE_LINES {
                lines.pop_front();
            }
            lines.push_back(line.to_owned());
        }
    }

    /// Cached lines for `job`, oldest first.
    #[must_use]
    pub fn lines(&self, job: JobId) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .get(&job)
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop cached lines for `job`.
    pub fn remove(&self, job: JobId) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job);
    }
}

/// Result-cache sink: mirrors output into a [`ResultCache`].
pub struct ResultCacheStage {
    job: JobId,
    cache: ResultCache,
}

impl ResultCacheStage {
    /// Sink recording output of `job` into `cache`.
    #[must_use]
    pub fn new(job: JobId, cache: ResultCache) -> Self {
        Self { job, cache }
    }
}

impl OutputStage for ResultCacheStage {
    fn handle(&mut self, text: String) -> Option<String> {
        self.cache.record(self.job, &text);
        Some(text)
    }
}
