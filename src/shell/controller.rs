//! Job controller: job table, pipeline parsing and the creation protocol.
//!
//! The table is one coarse lock over an id-ordered map. Job status lives
//! behind each job's own lock, so slow transitions never block lookups.
//! Jobs stay in the table after they terminate and are only removed when
//! reaped, either explicitly or by [`JobController::close`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::command::CommandRegistry;
use super::filter;
use super::handler::{HandlerChain, RedirectStage, ResultCache, ResultCacheStage, TermStage};
use super::job::Job;
use super::process::{Process, ProcessOutput};
use super::session::Session;
use super::token::{join_raw, CliToken, Operator};
use crate::config::GlobalConfig;
use crate::models::job::{JobId, JobInfo};
use crate::{AppError, Result};

/// Most jobs that may redirect to the internal cache at once.
pub const MAX_CACHED_REDIRECTS: usize = 8;

#[derive(Default)]
struct JobTable {
    jobs: BTreeMap<JobId, Arc<Job>>,
    closed: bool,
}

/// Redirect requested by `>` or `>>`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Redirect {
    target: Option<String>,
    append: bool,
}

/// A line after the leading command, split into its parts.
#[derive(Debug, Default)]
struct Pipeline {
    args: Vec<CliToken>,
    pipes: Vec<Vec<CliToken>>,
    redirect: Option<Redirect>,
}

/// Owner of every job in the engine.
pub struct JobController {
    table: Arc<Mutex<JobTable>>,
    next_id: AtomicU64,
    tracker: TaskTracker,
    cache_root: PathBuf,
    save_result: bool,
    results: ResultCache,
}

impl JobController {
    /// Create a controller writing cache redirects below `cache_root`.
    ///
    /// With `save_result`, terminal-bound output is also mirrored into the
    /// result cache.
    #[must_use]
    pub fn new(cache_root: impl Into<PathBuf>, save_result: bool) -> Self {
        Self {
            table: Arc::new(Mutex::new(JobTable::default())),
            next_id: AtomicU64::new(0),
            tracker: TaskTracker::new(),
            cache_root: cache_root.into(),
            save_result,
            results: ResultCache::new(),
        }
    }

    /// Create a controller from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(config.cache_root.clone(), config.save_result)
    }

    /// Tracker owning every spawned process task.
    #[must_use]
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Store fed by result-cache stages.
    #[must_use]
    pub fn result_cache(&self) -> &ResultCache {
        &self.results
    }

    /// Parse one raw token line into a job and insert it into the table.
    ///
    /// A trailing `&` marks the job as background and is removed from the
    /// recorded line.
    ///
    /// # Errors
    ///
    /// - `AppError::MalformedPipeline` if there is no leading command token
    ///   or the pipeline is structurally invalid.
    /// - `AppError::CommandNotFound` if the leading token is not registered.
    /// - `AppError::TooManyCachedRedirects` if the cache redirect ceiling is
    ///   reached.
    /// - `AppError::Io` if a redirect target cannot be opened.
    pub fn create_job(
        &self,
        registry: &Arc<CommandRegistry>,
        mut tokens: Vec<CliToken>,
        session: &Session,
    ) -> Result<Arc<Job>> {
        let background = strip_background(&mut tokens);
        let line = join_raw(&tokens).trim().to_owned();

        let mut rest = tokens.into_iter().skip_while(CliToken::is_blank);
        let name = match rest.next() {
            Some(token) if token.is_text() => token.value().to_owned(),
            Some(token) => {
                return Err(AppError::MalformedPipeline(format!(
                    "unexpected '{}' before command",
                    token.raw()
                )))
            }
            None => return Err(AppError::MalformedPipeline("no command given".into())),
        };
        let command = registry
            .resolve(&name)
            .ok_or_else(|| AppError::CommandNotFound(name.clone()))?;

        let pipeline = parse_pipeline(rest.collect())?;
        let mut chain = HandlerChain::new();
        for segment in &pipeline.pipes {
            chain.push_boxed(filter::pipe_stage(segment)?);
        }

        let mut table = self.lock();
        // Allocated under the table lock and committed only once the job is tracked.
        let id = JobId(self.next_id.load(Ordering::SeqCst) + 1);
        let mut cache_location = None;
        match pipeline.redirect {
            Some(Redirect {
                target: Some(target),
                append,
            }) => chain.push(RedirectStage::open(target, append)?),
            Some(Redirect {
                target: None,
                append,
            }) => {
                let cached = table
                    .jobs
                    .values()
                    .filter(|job| job.process().cache_location().is_some())
                    .count();
                if cached >= MAX_CACHED_REDIRECTS {
                    return Err(AppError::TooManyCachedRedirects(MAX_CACHED_REDIRECTS));
                }
                let path = self
                    .cache_root
                    .join(std::process::id().to_string())
                    .join(id.to_string());
                chain.push(RedirectStage::open_cache(&path, append)?);
                cache_location = Some(path);
            }
            None => {
                chain.push(TermStage::new(session.term().clone()));
                if self.save_result {
                    chain.push(ResultCacheStage::new(id, self.results.clone()));
                }
            }
        }

        let process = Process::new(
            command,
            pipeline.args,
            ProcessOutput::new(chain),
            cache_location,
            Arc::clone(registry),
        );
        let job = Arc::new(Job::new(
            id,
            session.id().to_owned(),
            line,
            background,
            process,
            self.tracker.clone(),
        ));
        table.jobs.insert(id, Arc::clone(&job));
        self.next_id.store(id.0, Ordering::SeqCst);
        drop(table);

        debug!(job_id = %id, session_id = %session.id(), background, line = %job.line(), "job created");
        Ok(job)
    }

    /// Look up a tracked job.
    #[must_use]
    pub fn get_job(&self, id: JobId) -> Option<Arc<Job>> {
        self.lock().jobs.get(&id).cloned()
    }

    /// Snapshot of every tracked job, ascending by id.
    #[must_use]
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.lock().jobs.values().cloned().collect()
    }

    /// Serializable snapshot of every tracked job.
    #[must_use]
    pub fn job_infos(&self) -> Vec<JobInfo> {
        self.jobs().iter().map(|job| job.info()).collect()
    }

    /// Remove a terminated job from the table.
    ///
    /// Returns `false` if the job is unknown or still live.
    pub fn reap(&self, id: JobId) -> bool {
        let mut table = self.lock();
        let terminated = table
            .jobs
            .get(&id)
            .is_some_and(|job| job.status().is_terminal());
        if terminated {
            table.jobs.remove(&id);
            self.results.remove(id);
        }
        terminated
    }

    /// Remove every terminated job owned by `session_id`.
    pub fn reap_session(&self, session_id: &str) -> usize {
        let mut table = self.lock();
        let reaped: Vec<JobId> = table
            .jobs
            .values()
            .filter(|job| job.session_id() == session_id && job.status().is_terminal())
            .map(|job| job.id())
            .collect();
        for id in &reaped {
            table.jobs.remove(id);
            self.results.remove(*id);
        }
        reaped.len()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Terminate every tracked job, then reap them and call `on_complete`.
    ///
    /// `on_complete` runs exactly once, after every job's completion signal
    /// has fired, or immediately when there is nothing to close. A second
    /// call visits no jobs.
    pub fn close(&self, on_complete: impl FnOnce() + Send + 'static) {
        let jobs: Vec<Arc<Job>> = {
            let mut table = self.lock();
            if table.closed {
                Vec::new()
            } else {
                table.closed = true;
                table.jobs.values().cloned().collect()
            }
        };

        if jobs.is_empty() {
            on_complete();
            return;
        }

        info!(jobs = jobs.len(), "closing job controller");
        let remaining = Arc::new(AtomicUsize::new(jobs.len()));
        let ids: Arc<Vec<JobId>> = Arc::new(jobs.iter().map(|job| job.id()).collect());
        let on_complete = Arc::new(Mutex::new(Some(on_complete)));
        for job in &jobs {
            let remaining = Arc::clone(&remaining);
            let ids = Arc::clone(&ids);
            let on_complete = Arc::clone(&on_complete);
            let table = Arc::clone(&self.table);
            let results = self.results.clone();
            job.on_terminate(move || {
                if remaining.fetch_sub(1, Ordering::SeqCst) != 1 {
                    return;
                }
                {
                    let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
                    for id in ids.iter() {
                        table.jobs.remove(id);
                        results.remove(*id);
                    }
                }
                let callback = on_complete
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(callback) = callback {
                    callback();
                }
            });
            job.terminate();
        }
    }

    /// Async form of [`close`](Self::close).
    pub async fn close_all(&self) {
        let (tx, rx) = oneshot::channel();
        self.close(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }

    fn lock(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Remove a trailing `&` (and any blanks around it); returns whether one was found.
fn strip_background(tokens: &mut Vec<CliToken>) -> bool {
    let Some(last) = tokens.iter().rposition(|t| !t.is_blank()) else {
        return false;
    };
    if tokens[last].operator() == Some(Operator::Background) {
        tokens.truncate(last);
        while tokens.last().is_some_and(CliToken::is_blank) {
            tokens.pop();
        }
        true
    } else {
        false
    }
}

/// Split the tokens after the leading command into arguments, pipe
/// segments and an optional redirect. Parsing stops at the redirect target.
fn parse_pipeline(rest: Vec<CliToken>) -> Result<Pipeline> {
    let mut pipeline = Pipeline::default();
    let mut segment: Option<Vec<CliToken>> = None;
    let mut iter = rest.into_iter();

    while let Some(token) = iter.next() {
        match token.operator() {
            Some(Operator::Pipe) => {
                if let Some(done) = segment.take() {
                    pipeline.pipes.push(done);
                }
                segment = Some(Vec::new());
            }
            Some(op @ (Operator::Redirect | Operator::Append)) => {
                let target = iter.find(CliToken::is_text).map(|t| t.value().to_owned());
                pipeline.redirect = Some(Redirect {
                    target,
                    append: op == Operator::Append,
                });
                break;
            }
            Some(Operator::Background) => {
                return Err(AppError::MalformedPipeline(
                    "'&' is only allowed at the end of a line".into(),
                ))
            }
            None => match segment.as_mut() {
                Some(current) => current.push(token),
                None => pipeline.args.push(token),
            },
        }
    }
    if let Some(done) = segment {
        pipeline.pipes.push(done);
    }

    Ok(pipeline)
}
