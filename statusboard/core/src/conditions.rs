//! Condition Store - Ordered Match Rules
//!
//! Loads the ordered list of [`StatusCondition`] rows from a `|`-delimited
//! rule file and keeps it current while the daemon runs.
//!
//! # Rule File Format
//!
//! The file is a markdown-style table. The header row names the columns,
//! every following row is one rule, and row order is the evaluation order:
//!
//! ```text
//! # comment lines are skipped
//! | work_emoji   | work_presence | home_emoji | home_presence | display_emoji | display_text        |
//! |--------------|---------------|------------|---------------|---------------|---------------------|
//! | :palm_tree:  |               |            |               | :palm_tree:   | (WORK_STATUS_TEXT)  |
//! | *            |               |            |               | :red_circle:  | Busy                |
//! |              | active        |            |               | :computer:    | Working             |
//! ```
//!
//! Cells are trimmed. A lone `-` cell is the same as an empty cell. The
//! leading empty column produced by lines starting with `|` is dropped.
//!
//! # Reloading
//!
//! The list is published through one `Arc` swap: a reload builds the full
//! new list off to the side and replaces the pointer, so a reader holds
//! either the old list or the new one, never a partial list. A failed
//! reload keeps the previous list.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Rule file column delimiter
pub const DELIMITER: char = '|';

/// Default debounce for rule file change events
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// One row of the rule file
///
/// The four match fields use `None` for "match anything"; `Some("*")`
/// matches any non-empty value; anything else must match exactly.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCondition {
    /// Work account emoji to match
    pub work_emoji: Option<String>,
    /// Work account presence to match
    pub work_presence: Option<String>,
    /// Home account emoji to match
    pub home_emoji: Option<String>,
    /// Home account presence to match
    pub home_presence: Option<String>,
    /// Emoji to display when this row matches
    pub display_emoji: String,
    /// Text template; may contain `(WORK_STATUS_TEXT)` / `(HOME_STATUS_TEXT)`
    pub display_text: String,
}

/// Errors from loading a rule file
#[derive(Debug, Error)]
pub enum RuleParseError {
    /// The file could not be read
    #[error("failed to read rule file {path}: {source}")]
    Io {
        /// Path that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// No header row was found
    #[error("rule file has no header row")]
    MissingHeader,

    /// A required column is absent from the header
    #[error("rule file header is missing column `{0}`")]
    MissingColumn(&'static str),
}

/// Column order of the six known fields after header mapping
#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    work_emoji: usize,
    work_presence: usize,
    home_emoji: usize,
    home_presence: usize,
    display_emoji: usize,
    display_text: usize,
}

impl ColumnMap {
    fn from_header(cells: &[String]) -> Result<Self, RuleParseError> {
        let find = |names: &[&str], column: &'static str| {
            cells
                .iter()
                .position(|c| names.contains(&normalize_header(c).as_str()))
                .ok_or(RuleParseError::MissingColumn(column))
        };

        Ok(Self {
            work_emoji: find(&["workemoji"], "work_emoji")?,
            work_presence: find(&["workpresence"], "work_presence")?,
            home_emoji: find(&["homeemoji"], "home_emoji")?,
            home_presence: find(&["homepresence"], "home_presence")?,
            display_emoji: find(&["displayemoji", "emoji"], "display_emoji")?,
            display_text: find(&["displaytext", "text"], "display_text")?,
        })
    }
}

fn normalize_header(cell: &str) -> String {
    cell.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Split one line into trimmed cells, dropping the leading empty column
fn split_row(line: &str) -> Vec<String> {
    let mut cells: Vec<String> = line
        .split(DELIMITER)
        .map(|c| c.trim().to_string())
        .collect();

    if line.trim_start().starts_with(DELIMITER) && !cells.is_empty() {
        cells.remove(0);
    }
    // `| a | b |` also leaves a trailing empty cell
    if line.trim_end().ends_with(DELIMITER) && cells.last().is_some_and(String::is_empty) {
        cells.pop();
    }
    cells
}

/// Markdown table separator (`|---|:---:|`)
fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|c| {
            !c.is_empty() && c.contains('-') && c.chars().all(|ch| ch == '-' || ch == ':')
        })
}

fn cell(cells: &[String], index: usize) -> &str {
    cells.get(index).map_or("", |c| if c == "-" { "" } else { c.as_str() })
}

fn match_field(cells: &[String], index: usize) -> Option<String> {
    let value = cell(cells, index);
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parse rule file contents into an ordered list of conditions
pub fn parse_rules(contents: &str) -> Result<Vec<StatusCondition>, RuleParseError> {
    let mut columns: Option<ColumnMap> = None;
    let mut rules = Vec::new();

    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let cells = split_row(line);
        if is_separator_row(&cells) {
            continue;
        }

        let Some(map) = columns else {
            columns = Some(ColumnMap::from_header(&cells)?);
            continue;
        };

        rules.push(StatusCondition {
            work_emoji: match_field(&cells, map.work_emoji),
            work_presence: match_field(&cells, map.work_presence),
            home_emoji: match_field(&cells, map.home_emoji),
            home_presence: match_field(&cells, map.home_presence),
            display_emoji: cell(&cells, map.display_emoji).to_string(),
            display_text: cell(&cells, map.display_text).to_string(),
        });
    }

    if columns.is_none() {
        return Err(RuleParseError::MissingHeader);
    }
    Ok(rules)
}

/// Read and parse a rule file
pub fn load_rules(path: &Path) -> Result<Vec<StatusCondition>, RuleParseError> {
    let contents = std::fs::read_to_string(path).map_err(|source| RuleParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_rules(&contents)
}

/// Shared, atomically replaced rule list backed by a file
pub struct ConditionStore {
    path: PathBuf,
    rules: RwLock<Arc<Vec<StatusCondition>>>,
}

impl ConditionStore {
    /// Create a store and perform the initial load
    ///
    /// A failed initial load is logged and leaves the store empty; the
    /// watcher picks the file up once it becomes valid.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = Self::with_rules(path, Vec::new());
        if let Err(e) = store.reload() {
            warn!(error = %e, "Initial rule load failed, starting with no rules");
        }
        store
    }

    /// Create a store with an explicit rule list (no file read)
    pub fn with_rules(path: impl Into<PathBuf>, rules: Vec<StatusCondition>) -> Self {
        Self {
            path: path.into(),
            rules: RwLock::new(Arc::new(rules)),
        }
    }

    /// Backing file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current rule list
    ///
    /// The returned `Arc` stays valid across later reloads.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<StatusCondition>> {
        Arc::clone(&self.rules.read())
    }

    /// Re-read the backing file and publish the new list
    ///
    /// On error the previous list is kept and the error returned.
    pub fn reload(&self) -> Result<usize, RuleParseError> {
        let rules = load_rules(&self.path)?;
        let count = rules.len();
        self.replace(rules);
        info!(path = ?self.path, rules = count, "Rules loaded");
        Ok(count)
    }

    /// Publish a new list in one pointer swap
    pub fn replace(&self, rules: Vec<StatusCondition>) {
        let rules = Arc::new(rules);
        *self.rules.write() = rules;
    }
}

/// Watches the rule file and reloads the store on change
pub struct RuleWatcher {
    /// Handle to stop the watcher thread
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl RuleWatcher {
    /// Start watching the store's file on a blocking thread
    ///
    /// The parent directory is watched so editors that replace the file
    /// (write to temp, rename over) are still seen. `on_reload` runs after
    /// every successful reload.
    pub fn start<F>(store: Arc<ConditionStore>, debounce: Duration, on_reload: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();

        let spawned = std::thread::Builder::new()
            .name("rule-watcher".to_string())
            .spawn(move || Self::run(&store, debounce, on_reload, stop_rx));
        if let Err(e) = spawned {
            error!(error = %e, "Failed to spawn rule watcher thread");
        }

        Self {
            stop_tx: Some(stop_tx),
        }
    }

    /// Stop the watcher
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Check if the watcher is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.stop_tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn run<F>(
        store: &Arc<ConditionStore>,
        debounce: Duration,
        on_reload: F,
        stop_rx: tokio::sync::oneshot::Receiver<()>,
    ) where
        F: Fn() + Send + 'static,
    {
        let rule_path = store.path().to_path_buf();
        let file_name = rule_path.file_name().map(std::ffi::OsStr::to_os_string);
        let watch_dir = match rule_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let handler_store = Arc::clone(store);

        let debouncer_result = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let touched = events.iter().any(|event| {
                        event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(std::ffi::OsStr::to_os_string) == file_name)
                    });
                    if !touched {
                        return;
                    }

                    debug!(events = events.len(), "Rule file changed");
                    match handler_store.reload() {
                        Ok(_) => on_reload(),
                        Err(e) => {
                            warn!(error = %e, "Rule reload failed, keeping previous rules");
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = ?e, "Rule watcher error");
                    }
                }
            }
        });

        let mut debouncer = match debouncer_result {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "Failed to create rule watcher");
                return;
            }
        };

        if let Err(e) = debouncer.watch(&watch_dir, RecursiveMode::NonRecursive) {
            error!(error = %e, path = ?watch_dir, "Failed to watch rule directory");
            return;
        }
        info!(path = ?rule_path, "Watching rule file");

        // Sender dropped counts as a stop request too
        let _ = stop_rx.blocking_recv();
        info!("Rule watcher stopping");
    }
}

impl Drop for RuleWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
