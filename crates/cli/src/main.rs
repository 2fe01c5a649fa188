use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytesize::ByteSize;
use deepcount_core::fs::EntryKind;
use deepcount_core::{
    CancelToken, CountError, CountOptions, CountSnapshot, DeepCountJob, Error, MainContext,
    Result, TaskRunner,
};
use log::{debug, warn};
use serde::Serialize;

const EXIT_FAILURE: i32 = 2;
const EXIT_CANCELLED: i32 = 130;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn main() {
    match real_main() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(EXIT_FAILURE);
        }
    }
}

fn real_main() -> Result<i32> {
    let mut args = std::env::args().skip(1);
    let Some(cmd) = args.next() else {
        print_help();
        return Ok(0);
    };

    match cmd.as_str() {
        "--help" | "-h" | "help" => {
            print_help();
            Ok(0)
        }
        "count" => {
            let args = parse_count_args(args, env_flag("DEEPCOUNT_FOLLOW_SYMLINKS"))?;
            init_logging(args.verbose);
            run_count(args)
        }
        "ls" => {
            let dir = args.next().map(PathBuf::from).ok_or_else(|| {
                Error::InvalidArgument("missing <dir>".to_string())
            })?;
            if let Some(extra) = args.next() {
                return Err(Error::InvalidArgument(format!("unknown arg: {extra}")));
            }
            init_logging(false);
            run_ls(dir)
        }
        _ => Err(Error::InvalidArgument(format!("unknown command: {cmd}"))),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CountArgs {
    roots: Vec<PathBuf>,
    follow_symlinks: bool,
    json: bool,
    quiet: bool,
    verbose: bool,
    interval: Duration,
    timeout: Option<Duration>,
}

fn parse_count_args<I>(mut args: I, follow_default: bool) -> Result<CountArgs>
where
    I: Iterator<Item = String>,
{
    let mut parsed = CountArgs {
        roots: Vec::new(),
        follow_symlinks: follow_default,
        json: false,
        quiet: false,
        verbose: false,
        interval: CountOptions::default().progress_interval,
        timeout: None,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--follow-symlinks" | "-L" => parsed.follow_symlinks = true,
            "--json" => parsed.json = true,
            "--quiet" | "-q" => parsed.quiet = true,
            "-v" | "--verbose" => parsed.verbose = true,
            "--interval-ms" => {
                parsed.interval = Duration::from_millis(number_arg(&arg, args.next())?);
            }
            "--timeout-secs" => {
                parsed.timeout = Some(Duration::from_secs(number_arg(&arg, args.next())?));
            }
            "--" => parsed.roots.extend(args.by_ref().map(PathBuf::from)),
            _ if arg.starts_with('-') && arg.len() > 1 => {
                return Err(Error::InvalidArgument(format!("unknown arg: {arg}")));
            }
            _ => parsed.roots.push(PathBuf::from(arg)),
        }
    }

    if parsed.roots.is_empty() {
        parsed.roots.push(PathBuf::from("."));
    }
    Ok(parsed)
}

fn number_arg(flag: &str, value: Option<String>) -> Result<u64> {
    let value = value.ok_or_else(|| Error::InvalidArgument(format!("missing value for {flag}")))?;
    value
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("invalid value for {flag}: {value}")))
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("DEEPCOUNT_LOG", default_filter))
        .format_timestamp(None)
        .init();
}

fn run_count(args: CountArgs) -> Result<i32> {
    let options = CountOptions::default()
        .follow_symlinks(args.follow_symlinks)
        .progress_interval(args.interval);
    let mut job = DeepCountJob::new(args.roots.clone(), options)?;

    let show_progress = !args.quiet && !args.json;
    if show_progress {
        job.on_progress(|snapshot| eprint!("\r\x1b[2K{}", summary_line(snapshot)));
    }

    let cancel = job.cancel_token().clone();
    if let Err(err) = ctrlc::set_handler(move || cancel.cancel()) {
        warn!("could not install Ctrl-C handler: {err}");
    }

    let runner = TaskRunner::new()?;
    let context = MainContext::new();
    let outcome = Arc::new(Mutex::new(None));
    let slot = outcome.clone();
    let handle = job.run(&runner, &context.handle(), move |result| {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
    })?;

    let deadline = args.timeout.map(|timeout| Instant::now() + timeout);
    while !handle.is_finished() {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline && !job.cancel_token().is_cancelled() {
                debug!("timeout reached, cancelling");
                job.cancel();
            }
        }
        context.iteration_timeout(POLL_INTERVAL);
    }
    if show_progress {
        eprint!("\r\x1b[2K");
    }

    let outcome = outcome
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .ok_or_else(|| Error::InvalidArgument("count finished without a result".to_string()))?;

    match outcome {
        Ok(totals) => {
            report(&totals, false, args.json)?;
            Ok(0)
        }
        Err(CountError::Cancelled { partial }) => {
            eprintln!("cancelled");
            if args.json {
                report(&partial, true, true)?;
            }
            Ok(EXIT_CANCELLED)
        }
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Serialize)]
struct SnapshotDto {
    total_size: u64,
    file_count: u64,
    directory_count: u64,
    unreadable_directory_count: u64,
    lower_bound: bool,
    cancelled: bool,
}

impl SnapshotDto {
    fn new(snapshot: &CountSnapshot, cancelled: bool) -> Self {
        Self {
            total_size: snapshot.total_size,
            file_count: snapshot.file_count,
            directory_count: snapshot.directory_count,
            unreadable_directory_count: snapshot.unreadable_directory_count,
            lower_bound: snapshot.is_lower_bound() || cancelled,
            cancelled,
        }
    }
}

fn report(totals: &CountSnapshot, cancelled: bool, json: bool) -> Result<()> {
    if json {
        let body = serde_json::to_string_pretty(&SnapshotDto::new(totals, cancelled))
            .map_err(|err| Error::InvalidArgument(format!("json encoding failed: {err}")))?;
        println!("{body}");
        return Ok(());
    }

    println!("{}", summary_line(totals));
    if totals.is_lower_bound() {
        println!(
            "note: {} folder(s) could not be read; totals are a lower bound",
            totals.unreadable_directory_count
        );
    }
    Ok(())
}

fn summary_line(snapshot: &CountSnapshot) -> String {
    format!(
        "{} files, {} folders, {} ({} bytes)",
        snapshot.file_count,
        snapshot.directory_count,
        ByteSize(snapshot.total_size),
        snapshot.total_size
    )
}

fn run_ls(dir: PathBuf) -> Result<i32> {
    let runner = TaskRunner::new()?;
    let context = MainContext::new();
    let listing = Arc::new(Mutex::new(None));
    let slot = listing.clone();
    let handle = runner.list_directory(dir, CancelToken::new(), &context.handle(), move |result| {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
    });

    while !handle.is_finished() {
        context.iteration_timeout(POLL_INTERVAL);
    }

    let entries = listing
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .ok_or_else(|| Error::InvalidArgument("listing finished without a result".to_string()))??;

    for entry in entries {
        let marker = match entry.kind {
            EntryKind::Directory => 'd',
            EntryKind::Symlink => 'l',
            EntryKind::File => '-',
            EntryKind::Other => '?',
        };
        println!(
            "{marker} {:>10} {}",
            ByteSize(entry.size).to_string(),
            entry.name.to_string_lossy()
        );
    }
    Ok(0)
}

fn print_help() {
    println!(
        r#"deepcount

USAGE:
  deepcount count [--follow-symlinks] [--json] [--quiet] [-v]
                  [--interval-ms <n>] [--timeout-secs <n>] [<path>...]
  deepcount ls <dir>

NOTES:
  - Counting stays on the filesystem of each given path; mounts below it are skipped.
  - Ctrl-C cancels a running count (exit code 130).
  - DEEPCOUNT_LOG sets the log filter, DEEPCOUNT_FOLLOW_SYMLINKS=1 follows symlinks by default.
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CountArgs> {
        parse_count_args(args.iter().map(|a| a.to_string()), false)
    }

    #[test]
    fn defaults_to_the_current_directory() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.roots, vec![PathBuf::from(".")]);
        assert!(!args.follow_symlinks);
        assert_eq!(args.interval, Duration::from_millis(250));
        assert_eq!(args.timeout, None);
    }

    #[test]
    fn flags_and_roots_mix() {
        let args = parse(&[
            "/a",
            "--follow-symlinks",
            "--json",
            "--interval-ms",
            "100",
            "--timeout-secs",
            "3",
            "/b",
        ])
        .unwrap();
        assert_eq!(args.roots, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert!(args.follow_symlinks);
        assert!(args.json);
        assert_eq!(args.interval, Duration::from_millis(100));
        assert_eq!(args.timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn double_dash_ends_flag_parsing() {
        let args = parse(&["--", "--json"]).unwrap();
        assert_eq!(args.roots, vec![PathBuf::from("--json")]);
        assert!(!args.json);
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(matches!(parse(&["--nope"]), Err(Error::InvalidArgument(_))));
        assert!(matches!(parse(&["--interval-ms"]), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            parse(&["--timeout-secs", "soon"]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn environment_default_can_enable_following() {
        let args = parse_count_args(std::iter::empty(), true).unwrap();
        assert!(args.follow_symlinks);
    }

    #[test]
    fn json_marks_cancelled_totals_as_lower_bound() {
        let dto = SnapshotDto::new(&CountSnapshot::default(), true);
        let value = serde_json::to_value(&dto).unwrap();
        assert_eq!(value["cancelled"], true);
        assert_eq!(value["lower_bound"], true);
        assert_eq!(value["file_count"], 0);
    }
}
