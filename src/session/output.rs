//! Per-process output directories and log files.
//!
//! The initial process picks the base directory. When more than one process
//! may run, every process writes into `<base>/<logical index>` so siblings
//! never touch each other's files. A child re-opens everything in its own
//! subdirectory right after duplication.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::core::errors::{ForkscopeError, Result};
use crate::core::limits::ProcessLimits;
use crate::process::identity::WorkerIdentity;
use crate::session::sink::{BoxedSink, ConsoleTarget, Decorated, FanOut, SharedFile};

pub const OUTPUT_DIR_PREFIX: &str = "forkscope-out-";
pub const LAST_OUTPUT_ALIAS: &str = "forkscope-last";
pub const INFO_FILE: &str = "info";
pub const DEBUG_FILE: &str = "debug.txt";
pub const MESSAGES_FILE: &str = "messages.txt";
pub const WARNINGS_FILE: &str = "warnings.txt";
pub const CONFIG_COPY_FILE: &str = "forkscope.config.yaml";
pub const CMDLINE_FILE: &str = "forkscope.cmdline";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Info,
    Debug,
    Message,
    Warning,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Where `forkscope-out-<n>` and the alias are created
    pub root: PathBuf,
    /// Fixed base directory; disables automatic `forkscope-out-<n>` selection
    pub base_dir: Option<PathBuf>,
    pub verbose: bool,
    pub console: ConsoleTarget,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            base_dir: None,
            verbose: false,
            console: ConsoleTarget::Stderr,
        }
    }
}

struct SessionFiles {
    info: SharedFile,
    debug: SharedFile,
    messages: SharedFile,
    warnings: SharedFile,
}

impl SessionFiles {
    fn open(dir: &Path) -> Result<Self> {
        let open = |name: &str| -> Result<SharedFile> {
            let path = dir.join(name);
            File::create(&path)
                .map(SharedFile::new)
                .map_err(|e| ForkscopeError::io(format!("create {}", path.display()), e))
        };
        Ok(Self {
            info: open(INFO_FILE)?,
            debug: open(DEBUG_FILE)?,
            messages: open(MESSAGES_FILE)?,
            warnings: open(WARNINGS_FILE)?,
        })
    }
}

pub struct OutputSession {
    base_dir: PathBuf,
    output_dir: PathBuf,
    multi_process: bool,
    verbose: bool,
    console: ConsoleTarget,
    files: SessionFiles,
}

impl OutputSession {
    /// Session of the initial process
    pub fn init(
        options: &SessionOptions,
        limits: ProcessLimits,
        identity: &WorkerIdentity,
    ) -> Result<Self> {
        let base_dir = match &options.base_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|e| {
                    ForkscopeError::io(format!("create output directory {}", dir.display()), e)
                })?;
                dir.clone()
            }
            None => create_numbered_dir(&options.root)?,
        };
        refresh_last_alias(&options.root, &base_dir)?;

        let multi_process = limits.is_multi_process();
        let output_dir = process_dir(&base_dir, multi_process, identity)?;
        let files = SessionFiles::open(&output_dir)?;
        info!("Output directory is {}", output_dir.display());

        Ok(Self {
            base_dir,
            output_dir,
            multi_process,
            verbose: options.verbose,
            console: options.console.clone(),
            files,
        })
    }

    /// Re-open everything for a freshly duplicated child.
    ///
    /// Handles inherited from the parent are dropped, never written again.
    /// The `forkscope-last` alias is left alone.
    pub fn reinit_for_child(&mut self, identity: &WorkerIdentity) -> Result<()> {
        let output_dir = process_dir(&self.base_dir, self.multi_process, identity)?;
        self.files = SessionFiles::open(&output_dir)?;
        self.output_dir = output_dir;
        debug!(
            "Process {} writes to {}",
            identity,
            self.output_dir.display()
        );
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn output_filename(&self, name: impl AsRef<Path>) -> PathBuf {
        self.output_dir.join(name)
    }

    /// Creates or truncates `name` inside this process's directory
    pub fn open_output_file(&self, name: impl AsRef<Path>) -> Result<File> {
        let path = self.output_filename(name);
        File::create(&path).map_err(|e| ForkscopeError::io(format!("open {}", path.display()), e))
    }

    /// Sink for one class of output.
    ///
    /// Messages reach the messages and debug files (and the console when
    /// verbose); warnings additionally reach the warnings file and always
    /// the console, highlighted when verbose.
    pub fn sink(&self, kind: LogKind) -> BoxedSink {
        match kind {
            LogKind::Info => Box::new(self.files.info.clone()),
            LogKind::Debug => Box::new(self.files.debug.clone()),
            LogKind::Message => {
                let mut fan_out = FanOut::new()
                    .with(self.files.messages.clone())
                    .with(self.files.debug.clone());
                if self.verbose {
                    fan_out.push(self.console.sink());
                }
                Box::new(fan_out)
            }
            LogKind::Warning => {
                let console: BoxedSink = if self.verbose {
                    Box::new(Decorated::highlight(self.console.sink()))
                } else {
                    self.console.sink()
                };
                let mut fan_out = FanOut::new()
                    .with(self.files.warnings.clone())
                    .with(self.files.messages.clone())
                    .with(self.files.debug.clone());
                fan_out.push(console);
                Box::new(fan_out)
            }
        }
    }

    pub fn write_run_info(&self, identity: &WorkerIdentity, started: DateTime<Utc>) -> Result<()> {
        let mut info = self.sink(LogKind::Info);
        writeln!(info, "start time: {}", started.to_rfc3339())
            .and_then(|_| writeln!(info, "pid: {}", identity.os_pid))
            .and_then(|_| writeln!(info, "logical index: {}", identity.logical_index))
            .and_then(|_| writeln!(info, "slot: {}", identity.slot))
            .and_then(|_| info.flush())
            .map_err(|e| ForkscopeError::io("write run info", e))
    }

    pub fn save_config_copy(&self, config_path: &Path) -> Result<()> {
        let target = self.output_filename(CONFIG_COPY_FILE);
        fs::copy(config_path, &target).map_err(|e| {
            ForkscopeError::io(format!("copy {} into output", config_path.display()), e)
        })?;
        Ok(())
    }

    pub fn save_command_line(&self, argv: &[String]) -> Result<()> {
        let mut file = self.open_output_file(CMDLINE_FILE)?;
        writeln!(file, "{}", quote_command_line(argv))
            .map_err(|e| ForkscopeError::io("write command line", e))
    }

    pub fn flush(&self) -> Result<()> {
        for kind in [LogKind::Info, LogKind::Debug, LogKind::Message, LogKind::Warning] {
            self.sink(kind)
                .flush()
                .map_err(|e| ForkscopeError::io("flush output session", e))?;
        }
        Ok(())
    }
}

/// `"<secs>s [Node <logical>/<slot> - State <id>] "`, without the node part
/// in single-process runs.
pub fn format_log_prefix(
    elapsed: chrono::Duration,
    multi_process: bool,
    identity: &WorkerIdentity,
    state_id: u64,
) -> String {
    let seconds = elapsed.num_seconds();
    if multi_process {
        format!("{}s [Node {} - State {}] ", seconds, identity, state_id)
    } else {
        format!("{}s [State {}] ", seconds, state_id)
    }
}

fn quote_command_line(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn create_numbered_dir(root: &Path) -> Result<PathBuf> {
    for n in 0u32.. {
        let candidate = root.join(format!("{}{}", OUTPUT_DIR_PREFIX, n));
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(ForkscopeError::io(
                    format!("create output directory {}", candidate.display()),
                    e,
                ))
            }
        }
    }
    Err(ForkscopeError::internal("ran out of output directory names"))
}

fn process_dir(base: &Path, multi_process: bool, identity: &WorkerIdentity) -> Result<PathBuf> {
    if !multi_process {
        return Ok(base.to_path_buf());
    }
    let dir = base.join(identity.logical_index.to_string());
    fs::create_dir(&dir).map_err(|e| {
        ForkscopeError::io(format!("create process directory {}", dir.display()), e)
    })?;
    Ok(dir)
}

/// Point `<root>/forkscope-last` at `target`, relative to `root` when possible.
///
/// An existing symlink is replaced. Anything else at that path is an error.
fn refresh_last_alias(root: &Path, target: &Path) -> Result<()> {
    let alias = root.join(LAST_OUTPUT_ALIAS);
    match fs::symlink_metadata(&alias) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(&alias).map_err(|e| {
                ForkscopeError::io(format!("remove stale {}", alias.display()), e)
            })?;
        }
        Ok(_) => {
            return Err(ForkscopeError::io(
                format!("refresh {}", alias.display()),
                io::Error::new(io::ErrorKind::AlreadyExists, "not a symbolic link"),
            ));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(ForkscopeError::io(format!("inspect {}", alias.display()), e));
        }
    }

    let link_target = alias_target(root, target)?;
    std::os::unix::fs::symlink(&link_target, &alias)
        .map_err(|e| ForkscopeError::io(format!("create {}", alias.display()), e))?;
    debug!("{} -> {}", alias.display(), link_target.display());
    Ok(())
}

fn alias_target(root: &Path, target: &Path) -> Result<PathBuf> {
    let canonical = |path: &Path| {
        fs::canonicalize(path)
            .map_err(|e| ForkscopeError::io(format!("resolve {}", path.display()), e))
    };
    let root = canonical(root)?;
    let target = canonical(target)?;
    Ok(match target.strip_prefix(&root) {
        Ok(relative) if relative.as_os_str().is_empty() => PathBuf::from("."),
        Ok(relative) => relative.to_path_buf(),
        Err(_) => target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::sink::MemorySink;
    use pretty_assertions::assert_eq;

    fn options(root: &Path, verbose: bool, console: &MemorySink) -> SessionOptions {
        SessionOptions {
            root: root.to_path_buf(),
            base_dir: None,
            verbose,
            console: ConsoleTarget::Memory(console.clone()),
        }
    }

    fn read(session: &OutputSession, name: &str) -> String {
        fs::read_to_string(session.output_filename(name)).unwrap()
    }

    #[test]
    fn test_numbered_dirs_and_alias() {
        let root = tempfile::tempdir().unwrap();
        let console = MemorySink::new();
        let opts = options(root.path(), false, &console);
        let identity = WorkerIdentity::initial(1);

        let first = OutputSession::init(&opts, ProcessLimits::new(1), &identity).unwrap();
        let second = OutputSession::init(&opts, ProcessLimits::new(1), &identity).unwrap();

        assert_eq!(first.output_dir(), root.path().join("forkscope-out-0"));
        assert_eq!(second.output_dir(), root.path().join("forkscope-out-1"));
        let alias = fs::read_link(root.path().join(LAST_OUTPUT_ALIAS)).unwrap();
        assert_eq!(alias, PathBuf::from("forkscope-out-1"));
        assert!(first.output_filename(DEBUG_FILE).exists());
        assert!(first.output_filename(INFO_FILE).exists());
    }

    #[test]
    fn test_multi_process_uses_index_subdirs() {
        let root = tempfile::tempdir().unwrap();
        let console = MemorySink::new();
        let opts = options(root.path(), false, &console);

        let mut session =
            OutputSession::init(&opts, ProcessLimits::new(4), &WorkerIdentity::initial(1)).unwrap();
        assert_eq!(session.output_dir(), session.base_dir().join("0"));

        let child = WorkerIdentity {
            slot: 1,
            logical_index: 3,
            os_pid: 2,
        };
        session.reinit_for_child(&child).unwrap();
        assert_eq!(session.output_dir(), session.base_dir().join("3"));
        assert!(session.output_filename(WARNINGS_FILE).exists());

        // The same logical index must never be reused.
        assert!(session.reinit_for_child(&child).is_err());
    }

    #[test]
    fn test_fixed_base_dir_gets_alias() {
        let root = tempfile::tempdir().unwrap();
        let console = MemorySink::new();
        let mut opts = options(root.path(), false, &console);
        opts.base_dir = Some(root.path().join("run"));

        let session =
            OutputSession::init(&opts, ProcessLimits::new(1), &WorkerIdentity::initial(1)).unwrap();
        assert_eq!(session.output_dir(), root.path().join("run"));
        let alias = fs::read_link(root.path().join(LAST_OUTPUT_ALIAS)).unwrap();
        assert_eq!(alias, PathBuf::from("run"));
    }

    #[test]
    fn test_fixed_base_dir_outside_root_gets_absolute_alias() {
        let root = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let console = MemorySink::new();
        let mut opts = options(root.path(), false, &console);
        opts.base_dir = Some(elsewhere.path().join("run"));

        OutputSession::init(&opts, ProcessLimits::new(1), &WorkerIdentity::initial(1)).unwrap();
        let alias = fs::read_link(root.path().join(LAST_OUTPUT_ALIAS)).unwrap();
        assert!(alias.is_absolute(), "{}", alias.display());
        assert_eq!(
            fs::canonicalize(root.path().join(LAST_OUTPUT_ALIAS)).unwrap(),
            fs::canonicalize(elsewhere.path().join("run")).unwrap()
        );
    }

    #[test]
    fn test_regular_file_at_alias_fails_init() {
        let root = tempfile::tempdir().unwrap();
        let console = MemorySink::new();
        fs::write(root.path().join(LAST_OUTPUT_ALIAS), "keep me").unwrap();

        let err = OutputSession::init(
            &options(root.path(), false, &console),
            ProcessLimits::new(1),
            &WorkerIdentity::initial(1),
        )
        .err()
        .unwrap();
        assert_eq!(err.category(), "os");
        assert_eq!(
            fs::read_to_string(root.path().join(LAST_OUTPUT_ALIAS)).unwrap(),
            "keep me"
        );
    }

    #[test]
    fn test_unusable_root_fails_init() {
        let root = tempfile::tempdir().unwrap();
        let console = MemorySink::new();
        let not_a_dir = root.path().join("plain-file");
        fs::write(&not_a_dir, "").unwrap();

        let err = OutputSession::init(
            &options(&not_a_dir, false, &console),
            ProcessLimits::new(1),
            &WorkerIdentity::initial(1),
        )
        .err()
        .unwrap();
        assert_eq!(err.category(), "os");
        assert!(err.to_string().contains("create output directory"), "{err}");
    }

    #[test]
    fn test_existing_process_dir_fails_init() {
        let root = tempfile::tempdir().unwrap();
        let console = MemorySink::new();
        let mut opts = options(root.path(), false, &console);
        opts.base_dir = Some(root.path().join("run"));
        fs::create_dir_all(root.path().join("run").join("0")).unwrap();

        let err = OutputSession::init(&opts, ProcessLimits::new(2), &WorkerIdentity::initial(1))
            .err()
            .unwrap();
        assert_eq!(err.category(), "os");
        assert!(err.to_string().contains("create process directory"), "{err}");
    }

    #[test]
    fn test_child_leaves_alias_untouched() {
        let root = tempfile::tempdir().unwrap();
        let console = MemorySink::new();
        let opts = options(root.path(), false, &console);
        let alias = root.path().join(LAST_OUTPUT_ALIAS);

        let mut session =
            OutputSession::init(&opts, ProcessLimits::new(4), &WorkerIdentity::initial(1)).unwrap();
        let before = fs::read_link(&alias).unwrap();
        let modified = fs::symlink_metadata(&alias).unwrap().modified().unwrap();

        let child = WorkerIdentity {
            slot: 1,
            logical_index: 1,
            os_pid: 2,
        };
        session.reinit_for_child(&child).unwrap();
        assert_eq!(fs::read_link(&alias).unwrap(), before);
        assert_eq!(fs::symlink_metadata(&alias).unwrap().modified().unwrap(), modified);

        // A dangling alias stays dangling: children never repair it.
        fs::remove_file(&alias).unwrap();
        std::os::unix::fs::symlink("gone", &alias).unwrap();
        let grandchild = WorkerIdentity {
            slot: 2,
            logical_index: 2,
            os_pid: 3,
        };
        session.reinit_for_child(&grandchild).unwrap();
        assert_eq!(fs::read_link(&alias).unwrap(), PathBuf::from("gone"));
    }

    #[test]
    fn test_message_and_warning_routing() {
        let root = tempfile::tempdir().unwrap();
        let console = MemorySink::new();
        let session = OutputSession::init(
            &options(root.path(), false, &console),
            ProcessLimits::new(1),
            &WorkerIdentity::initial(1),
        )
        .unwrap();

        session.sink(LogKind::Message).write_all(b"m ").unwrap();
        session.sink(LogKind::Warning).write_all(b"w ").unwrap();
        session.sink(LogKind::Debug).write_all(b"d").unwrap();
        session.flush().unwrap();

        assert_eq!(read(&session, MESSAGES_FILE), "m w ");
        assert_eq!(read(&session, WARNINGS_FILE), "w ");
        assert_eq!(read(&session, DEBUG_FILE), "m w d");
        assert_eq!(console.contents(), "w ");
    }

    #[test]
    fn test_verbose_console_highlights_warnings() {
        let root = tempfile::tempdir().unwrap();
        let console = MemorySink::new();
        let session = OutputSession::init(
            &options(root.path(), true, &console),
            ProcessLimits::new(1),
            &WorkerIdentity::initial(1),
        )
        .unwrap();

        session.sink(LogKind::Message).write_all(b"hello").unwrap();
        session.sink(LogKind::Warning).write_all(b"oops").unwrap();
        assert_eq!(console.contents(), "hello\x1b[31moops\x1b[0m");
    }

    #[test]
    fn test_open_output_file_truncates() {
        let root = tempfile::tempdir().unwrap();
        let console = MemorySink::new();
        let session = OutputSession::init(
            &options(root.path(), false, &console),
            ProcessLimits::new(1),
            &WorkerIdentity::initial(1),
        )
        .unwrap();

        session
            .open_output_file("report.txt")
            .unwrap()
            .write_all(b"long contents")
            .unwrap();
        session
            .open_output_file("report.txt")
            .unwrap()
            .write_all(b"short")
            .unwrap();
        assert_eq!(read(&session, "report.txt"), "short");
    }

    #[test]
    fn test_run_metadata_files() {
        let root = tempfile::tempdir().unwrap();
        let console = MemorySink::new();
        let identity = WorkerIdentity::initial(4242);
        let session = OutputSession::init(
            &options(root.path(), false, &console),
            ProcessLimits::new(1),
            &identity,
        )
        .unwrap();

        session.write_run_info(&identity, Utc::now()).unwrap();
        session
            .save_command_line(&["forkscope".to_string(), "my \"run\".yaml".to_string()])
            .unwrap();

        let info = read(&session, INFO_FILE);
        assert!(info.contains("pid: 4242"));
        assert!(info.contains("logical index: 0"));
        assert_eq!(
            read(&session, CMDLINE_FILE),
            "\"forkscope\" \"my \\\"run\\\".yaml\"\n"
        );
    }

    #[test]
    fn test_log_prefix() {
        let identity = WorkerIdentity {
            slot: 2,
            logical_index: 5,
            os_pid: 9,
        };
        assert_eq!(
            format_log_prefix(chrono::Duration::seconds(12), true, &identity, 40),
            "12s [Node 5/2 - State 40] "
        );
        assert_eq!(
            format_log_prefix(chrono::Duration::seconds(3), false, &identity, 40),
            "3s [State 40] "
        );
    }
}
