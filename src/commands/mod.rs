//! Built-in commands.
//!
//! These are the commands every server registers before any other
//! resolver: `echo`, `sleep`, `tick`, `help`, `session` and `version`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::shell::command::{Command, CommandResolver};
use crate::shell::process::ProcessContext;

/// Granularity at which long-running built-ins check for suspension.
const SLICE: Duration = Duration::from_millis(50);

type ProcessFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Resolver over the built-in commands.
pub struct BuiltinCommands {
    commands: Vec<Arc<dyn Command>>,
}

impl BuiltinCommands {
    /// Every built-in command.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: vec![
                Arc::new(Echo),
                Arc::new(Sleep),
                Arc::new(Tick),
                Arc::new(Help),
                Arc::new(SessionInfo),
                Arc::new(Version),
            ],
        }
    }
}

impl Default for BuiltinCommands {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandResolver for BuiltinCommands {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands
            .iter()
            .find(|cmd| cmd.name() == name)
            .cloned()
    }

    fn commands(&self) -> Vec<Arc<dyn Command>> {
        self.commands.clone()
    }
}

/// Sleep for `total`, honouring suspension and termination.
///
/// Time spent stopped does not count. Returns `false` if the job was
/// terminated first.
async fn pause(ctx: &mut ProcessContext, total: Duration) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if !ctx.checkpoint().await {
            return false;
        }
        let step = remaining.min(SLICE);
        tokio::select! {
            () = tokio::time::sleep(step) => remaining -= step,
            () = ctx.terminated() => return false,
        }
    }
    ctx.checkpoint().await
}

/// Parse a duration given in (possibly fractional) seconds.
fn parse_seconds(arg: &str) -> Option<Duration> {
    arg.parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

struct Echo;

impl Command for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn summary(&self) -> &str {
        "print the arguments"
    }

    fn process(&self, ctx: ProcessContext) -> ProcessFuture<'_> {
        Box::pin(async move {
            ctx.println(ctx.args().join(" "));
        })
    }
}

struct Sleep;

impl Command for Sleep {
    fn name(&self) -> &str {
        "sleep"
    }

    fn summary(&self) -> &str {
        "wait for the given number of seconds"
    }

    fn process(&self, mut ctx: ProcessContext) -> ProcessFuture<'_> {
        Box::pin(async move {
            let Some(arg) = ctx.args().first().cloned() else {
                ctx.println("sleep: missing operand");
                return;
            };
            let Some(total) = parse_seconds(&arg) else {
                ctx.println(format!("sleep: invalid time interval '{arg}'"));
                return;
            };
            pause(&mut ctx, total).await;
        })
    }
}

/// Options accepted by `tick`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TickOptions {
    count: u64,
    interval: Duration,
}

impl Default for TickOptions {
    fn default() -> Self {
        Self {
            count: 10,
            interval: Duration::from_secs(1),
        }
    }
}

fn parse_tick(args: &[String]) -> std::result::Result<TickOptions, String> {
    let mut options = TickOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let value = iter.next();
        match (arg.as_str(), value) {
            ("-n", Some(v)) => {
                options.count = v.parse().map_err(|_| format!("tick: invalid count '{v}'"))?;
            }
            ("-i", Some(v)) => {
                let millis: u64 = v
                    .parse()
                    .map_err(|_| format!("tick: invalid interval '{v}'"))?;
                options.interval = Duration::from_millis(millis);
            }
            ("-n" | "-i", None) => return Err(format!("tick: option '{arg}' needs a value")),
            _ => return Err(format!("tick: unknown option '{arg}'")),
        }
    }
    Ok(options)
}

struct Tick;

impl Command for Tick {
    fn name(&self) -> &str {
        "tick"
    }

    fn summary(&self) -> &str {
        "print a numbered line every interval [-n count (0 = forever)] [-i millis]"
    }

    fn process(&self, mut ctx: ProcessContext) -> ProcessFuture<'_> {
        Box::pin(async move {
            let options = match parse_tick(ctx.args()) {
                Ok(options) => options,
                Err(msg) => {
                    ctx.println(msg);
                    return;
                }
            };
            let mut n = 0_u64;
            while options.count == 0 || n < options.count {
                if !ctx.checkpoint().await {
                    return;
                }
                n += 1;
                ctx.println(format!("tick {n}"));
                if (options.count == 0 || n < options.count)
                    && !pause(&mut ctx, options.interval).await
                {
                    return;
                }
            }
        })
    }
}

/// Control verbs handled by the shell itself.
const SHELL_VERBS: [(&str, &str); 5] = [
    ("jobs", "list jobs"),
    ("fg", "bring a job to the foreground"),
    ("bg", "resume a stopped job in the background"),
    ("kill", "terminate a job"),
    ("exit", "close the session"),
];

struct Help;

impl Command for Help {
    fn name(&self) -> &str {
        "help"
    }

    fn summary(&self) -> &str {
        "list the available commands"
    }

    fn process(&self, ctx: ProcessContext) -> ProcessFuture<'_> {
        Box::pin(async move {
            let commands = ctx.commands();
            let width = commands
                .iter()
                .map(|(name, _)| name.len())
                .max()
                .unwrap_or(0);
            for (name, summary) in &commands {
                ctx.println(format!("  {name:<width$}  {summary}"));
            }
            for (name, summary) in SHELL_VERBS {
                ctx.println(format!("  {name:<width$}  {summary}"));
            }
        })
    }
}

struct SessionInfo;

impl Command for SessionInfo {
    fn name(&self) -> &str {
        "session"
    }

    fn summary(&self) -> &str {
        "show the current session and job ids"
    }

    fn process(&self, ctx: ProcessContext) -> ProcessFuture<'_> {
        Box::pin(async move {
            ctx.println(format!("session: {}", ctx.session_id()));
            ctx.println(format!("job: {}", ctx.job_id()));
        })
    }
}

struct Version;

impl Command for Version {
    fn name(&self) -> &str {
        "version"
    }

    fn summary(&self) -> &str {
        "print the server version"
    }

    fn process(&self, ctx: ProcessContext) -> ProcessFuture<'_> {
        Box::pin(async move {
            ctx.println(env!("CARGO_PKG_VERSION"));
        })
    }
}
