use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant, SystemTime};

use clap::Parser;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use thiserror::Error;
use tracing::info;

use velasync::config::ConfigSource;
use velasync::connection::SftpConnector;
use velasync::paths::ProjectRoots;
use velasync::{Engine, Level, LogNotifier, Notifier};

#[derive(Debug, Error)]
enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Logging setup failed: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// Terminal host for the sync engine.
#[derive(Parser, Debug)]
#[command(name = "velasync", version)]
#[command(about = "Browse a remote server over SFTP and upload local edits on save")]
struct Cli {
    /// Config file (.toml, or .json)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory that receives velasync.log
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Project root for upload path fallback (repeatable)
    #[arg(short, long = "project", value_name = "DIR")]
    projects: Vec<PathBuf>,

    /// Server to connect to on start
    server: Option<String>,
}

/// Prints notifications to the terminal and mirrors them into the log.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, level: Level, message: &str) {
        LogNotifier.notify(level, message);
        match level {
            Level::Error | Level::Warning => eprintln!("[{level}] {message}"),
            Level::Info | Level::Success => println!("[{level}] {message}"),
        }
    }
}

fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    let log_dir = cli.log_dir.clone().unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&log_dir)?;
    let _guard = velasync::logging::init_tracing(&cli.log_level, &log_dir)?;

    let config = cli.config.clone().map(ConfigSource::new).unwrap_or_else(ConfigSource::default_location);
    info!("using config {}", config.path().display());

    let mut engine = Engine::new(config, Box::new(SftpConnector), Box::new(ConsoleNotifier));
    if !cli.projects.is_empty() {
        engine = engine.with_projects(ProjectRoots::new(cli.projects.clone()));
    }

    if let Some(server) = cli.server.as_deref() {
        let _ = engine.connect(Some(server));
    }

    let result = repl(&engine);
    engine.deactivate();
    result
}

fn default_log_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("velasync")
}

// ---------------------------------------------------------------------------
// Command loop
// ---------------------------------------------------------------------------

const HELP: &str = "\
servers                 list configured servers
connect [name]          connect (default server when no name)
disconnect              close the connection
ls                      refresh and list the current directory
cd <name>               enter a directory
up                      go to the parent directory
pwd                     print the current directory
select <n>|none         select an entry by index
open [n]                download the selected file and edit it
put <local> [remote]    upload a file or directory
drop <local>...         upload several items into the current directory
mkdir <name>            create a directory here
touch <name>            create an empty file here
mv <new-name>           rename the selected entry
rm                      delete the selected entry
chmod <mode>            change permissions of the selected entry
zip                     download the selected directory as a zip
help                    show this help
quit                    exit";

fn repl(engine: &Engine) -> Result<(), AppError> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("{}> ", prompt(engine));
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            return Ok(());
        };
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        // Engine results are already reported through the notifier.
        match command {
            "quit" | "exit" => return Ok(()),
            "help" | "?" => println!("{HELP}"),
            "servers" => print_servers(engine),
            "connect" => {
                let _ = engine.connect(non_empty(rest));
            }
            "disconnect" => {
                if !engine.disconnect() {
                    println!("not connected");
                }
            }
            "ls" => {
                if engine.refresh().is_ok() {
                    print_listing(engine);
                }
            }
            "cd" => match non_empty(rest) {
                Some(name) => {
                    if engine.enter_directory(name).is_ok() {
                        print_listing(engine);
                    }
                }
                None => println!("usage: cd <name>"),
            },
            "up" => {
                if engine.go_to_parent().is_ok() {
                    print_listing(engine);
                }
            }
            "pwd" => println!("{}", engine.browser().current_dir()),
            "select" => select(engine, rest),
            "open" => {
                if !rest.is_empty() {
                    select(engine, rest);
                }
                if let Ok(local) = engine.download_selected() {
                    edit(engine, &local)?;
                }
            }
            "put" => put(engine, rest),
            "drop" => {
                let locals: Vec<PathBuf> = rest.split_whitespace().map(PathBuf::from).collect();
                if locals.is_empty() {
                    println!("usage: drop <local>...");
                } else if let Ok(report) = engine.batch_upload(&locals, None) {
                    println!("{} uploaded, {} failed", report.uploaded.len(), report.failed.len());
                }
            }
            "mkdir" => with_arg(rest, "mkdir <name>", |name| {
                let _ = engine.new_folder(name);
            }),
            "touch" => with_arg(rest, "touch <name>", |name| {
                let _ = engine.new_file(name);
            }),
            "mv" => with_arg(rest, "mv <new-name>", |name| {
                let _ = engine.rename_selected(name);
            }),
            "rm" => {
                let _ = engine.delete_selected();
            }
            "chmod" => with_arg(rest, "chmod <mode>", |mode| {
                let _ = engine.chmod_selected(mode);
            }),
            "zip" => {
                let _ = engine.download_selected_as_zip();
            }
            other => println!("unknown command '{other}', try 'help'"),
        }
    }
}

fn prompt(engine: &Engine) -> String {
    match engine.connected_server() {
        Some(server) => format!("{}:{}", server.identifier(), engine.browser().current_dir()),
        None => "velasync".to_string(),
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn with_arg(rest: &str, usage: &str, f: impl FnOnce(&str)) {
    match non_empty(rest) {
        Some(arg) => f(arg),
        None => println!("usage: {usage}"),
    }
}

fn print_servers(engine: &Engine) {
    let connected = engine.connected_server().map(|s| s.name);
    let servers = engine.servers();
    if servers.is_empty() {
        println!("No servers configured");
        return;
    }
    for server in servers {
        let marker = if connected.as_deref() == Some(server.name.as_str()) { "*" } else { " " };
        println!(
            "{marker} {:<20} {}@{}:{}  {}",
            server.identifier(),
            server.user,
            server.host,
            server.port,
            server.base_path()
        );
    }
}

fn print_listing(engine: &Engine) {
    let browser = engine.browser();
    if browser.items().is_empty() {
        println!("(empty)");
        return;
    }
    for (i, entry) in browser.items().iter().enumerate() {
        let marker = if browser.selected_index() == Some(i) { ">" } else { " " };
        let kind = if entry.is_dir() { "[DIR] " } else { "[FILE]" };
        let size = entry.size.map(|s| s.to_string()).unwrap_or_default();
        let perms = entry.permissions.as_deref().unwrap_or("");
        println!("{marker}{i:>4} {kind} {perms:<10} {size:>10}  {}", entry.name);
    }
}

fn select(engine: &Engine, arg: &str) {
    let index = match arg {
        "none" | "-" => None,
        n => match n.parse::<usize>() {
            Ok(i) => Some(i),
            Err(_) => {
                println!("usage: select <n>|none");
                return;
            }
        },
    };
    if !engine.select(index) {
        println!("no entry {arg}");
    }
}

fn put(engine: &Engine, rest: &str) {
    let mut parts = rest.split_whitespace();
    let Some(local) = parts.next().map(PathBuf::from) else {
        println!("usage: put <local> [remote]");
        return;
    };
    let remote = parts.next();
    if local.is_dir() {
        let _ = engine.upload_directory(&local, remote);
    } else {
        let _ = engine.upload_file(&local, remote);
    }
}

// ---------------------------------------------------------------------------
// Editing
// ---------------------------------------------------------------------------

/// Find an editor binary that is actually installed on this system.
/// Search order: $EDITOR, $VISUAL, vim, nano, vi.
fn find_editor() -> Option<String> {
    [
        std::env::var("EDITOR").ok(),
        std::env::var("VISUAL").ok(),
        Some("vim".to_string()),
        Some("nano".to_string()),
        Some("vi".to_string()),
    ]
    .into_iter()
    .flatten()
    .filter(|s| !s.trim().is_empty())
    .find(|candidate| {
        Command::new("which")
            .arg(candidate)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

const EDITOR_POLL: Duration = Duration::from_millis(200);
const SAVE_QUIET: Duration = Duration::from_millis(300);

/// Collapses the burst of events an editor produces for one save.
struct SaveDebounce {
    quiet: Duration,
    due: Option<Instant>,
}

impl SaveDebounce {
    fn new(quiet: Duration) -> Self {
        Self { quiet, due: None }
    }

    fn touch(&mut self, now: Instant) {
        self.due = Some(now + self.quiet);
    }

    /// True once per burst, when it has been quiet long enough or `flush`
    /// is set.
    fn take_due(&mut self, now: Instant, flush: bool) -> bool {
        match self.due {
            Some(due) if flush || now >= due => {
                self.due = None;
                true
            }
            _ => false,
        }
    }
}

/// Run the editor on `local`. Write events from the watcher are debounced
/// and handed to the engine's save hook; the close hook fires when the
/// editor exits.
fn edit(engine: &Engine, local: &Path) -> Result<(), AppError> {
    let Some(editor) = find_editor() else {
        println!("No editor found (set $EDITOR). The copy is at {}", local.display());
        return Ok(());
    };

    // Editors often replace the file instead of writing it in place, so the
    // parent directory is watched and events are matched by file name.
    let (tx, rx) = mpsc::channel();
    let file_name = local.file_name().map(|n| n.to_os_string());
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            let relevant = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                && event.paths.iter().any(|p| p.file_name() == file_name.as_deref());
            if relevant {
                let _ = tx.send(());
            }
        }
    })?;
    let dir = local.parent().unwrap_or_else(|| Path::new("."));
    watcher.watch(dir, RecursiveMode::NonRecursive)?;

    let mut child = Command::new(&editor).arg(local).spawn()?;
    let mut debounce = SaveDebounce::new(SAVE_QUIET);
    // Metadata-only events (atime, chmod) leave the mtime alone.
    let mut last_upload = modified(local);
    loop {
        let exited = child.try_wait()?.is_some();
        match rx.recv_timeout(EDITOR_POLL) {
            Ok(()) => debounce.touch(Instant::now()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(EDITOR_POLL),
        }
        while rx.try_recv().is_ok() {
            debounce.touch(Instant::now());
        }

        if debounce.take_due(Instant::now(), exited) {
            let current = modified(local);
            if current.is_some() && current != last_upload {
                last_upload = current;
                let _ = engine.on_save(local);
            }
        }
        if exited {
            break;
        }
    }

    drop(watcher);
    engine.on_editing_surface_closed(local);
    Ok(())
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debounce_fires_once_per_burst() {
        let start = Instant::now();
        let mut debounce = SaveDebounce::new(Duration::from_millis(300));
        assert!(!debounce.take_due(start, false));

        debounce.touch(start);
        debounce.touch(start + Duration::from_millis(100));
        assert!(!debounce.take_due(start + Duration::from_millis(300), false));
        assert!(debounce.take_due(start + Duration::from_millis(400), false));
        assert!(!debounce.take_due(start + Duration::from_millis(800), false));
    }

    #[test]
    fn test_debounce_flushes_pending_save_on_exit() {
        let start = Instant::now();
        let mut debounce = SaveDebounce::new(Duration::from_millis(300));
        debounce.touch(start);
        assert!(debounce.take_due(start, true));
        assert!(!debounce.take_due(start, true));
    }
}
