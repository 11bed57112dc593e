// FlowGrid - constraint workbook viewer and editor
//
// With no flags this opens the interactive viewer. --plain and --stats print
// to stdout and exit without touching the session file.

mod exit_codes;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use flowgrid_cli::plain;
use flowgrid_cli::tui::{self, data::ClusterView, Services};
use flowgrid_config::{JsonSessionStore, SessionManager, SessionState, SessionStore, SessionUpdate, Settings};
use flowgrid_engine::color::ColorFormatter;
use flowgrid_engine::ExcelDataManager;
use flowgrid_io::{AutoSaveConfig, AutoSaveManager, ExcelStorage, LatestStatus};
use log::{info, warn};

use exit_codes::{EXIT_ERROR, EXIT_NOT_FOUND, EXIT_SUCCESS, EXIT_USAGE, EXIT_WORKBOOK};

/// Session files kept besides the current one.
const SESSION_BACKUPS_KEPT: usize = 5;

#[derive(Parser)]
#[command(name = "flowgrid")]
#[command(about = "View and edit power-flow constraint workbooks")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Constraint workbook (.xlsx). Defaults to the last file opened.
    path: Option<PathBuf>,

    /// Sheet to open (default: last used, else the first sheet)
    #[arg(long, short = 's')]
    sheet: Option<String>,

    /// Cluster to open, or the only cluster printed with --plain
    #[arg(long, short = 'c')]
    cluster: Option<String>,

    /// Print clusters as aligned text and exit
    #[arg(long, conflicts_with = "stats")]
    plain: bool,

    /// Print a workbook summary and exit
    #[arg(long)]
    stats: bool,

    /// Settings file (default: ~/.config/flowgrid/settings.json)
    #[arg(long, env = "FLOWGRID_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for session state and the viewer log
    #[arg(long, env = "FLOWGRID_SESSION_DIR")]
    session_dir: Option<PathBuf>,
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  flowgrid-engine ", env!("CARGO_PKG_VERSION"),
    )
}

pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn general(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn workbook(msg: impl Into<String>) -> Self {
        Self { code: EXIT_WORKBOOK, message: msg.into(), hint: None }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { code: EXIT_NOT_FOUND, message: msg.into(), hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let store = match &cli.session_dir {
        Some(dir) => JsonSessionStore::new(dir),
        None => JsonSessionStore::default_location(),
    };
    let interactive = !(cli.plain || cli.stats);
    init_logging(interactive.then(|| store.dir().join("flowgrid.log")));

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };

    let result = if interactive {
        cmd_view(&cli, settings, store)
    } else {
        cmd_print(&cli, &settings, &store)
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

/// Logs go to `log_file` while the viewer owns the terminal, stderr otherwise.
/// `FLOWGRID_LOG` takes the usual env_logger filter syntax.
fn init_logging(log_file: Option<PathBuf>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().filter_or("FLOWGRID_LOG", "warn"));
    if let Some(path) = log_file {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("warning: cannot open log file {}: {}", path.display(), e),
        }
    }
    let _ = builder.try_init();
}

/// Positional path, else the file from the previous session.
fn resolve_path(cli: &Cli, previous: &SessionState) -> Result<PathBuf, CliError> {
    if let Some(path) = &cli.path {
        return Ok(path.clone());
    }
    if !previous.last_file.is_empty() {
        return Ok(PathBuf::from(&previous.last_file));
    }
    Err(CliError::usage("no workbook given").with_hint("flowgrid <FILE.xlsx>"))
}

fn open_workbook(path: &Path) -> Result<Arc<ExcelDataManager>, CliError> {
    let storage = ExcelStorage::open(path).map_err(|e| CliError::workbook(e.to_string()))?;
    let manager = Arc::new(ExcelDataManager::new(Arc::new(storage)));
    manager
        .load_workbook(path)
        .map_err(|e| CliError::workbook(e.to_string()))?;
    if manager.sheet_names().is_empty() {
        return Err(CliError::workbook(format!("{} has no sheets", path.display())));
    }
    Ok(manager)
}

fn select_sheet(manager: &ExcelDataManager, wanted: Option<&str>) -> Result<String, CliError> {
    let names = manager.sheet_names();
    let sheet = match wanted {
        Some(name) if names.iter().any(|n| n == name) => name.to_string(),
        Some(name) => {
            return Err(CliError::not_found(format!("sheet '{}' not found", name))
                .with_hint(format!("available sheets: {}", names.join(", "))));
        }
        None => names.first().cloned().unwrap_or_default(),
    };
    manager
        .set_active_sheet(&sheet)
        .map_err(|e| CliError::workbook(e.to_string()))?;
    Ok(sheet)
}

fn cluster_position(manager: &ExcelDataManager, cluster: &str) -> Result<usize, CliError> {
    let clusters = manager.get_all_clusters();
    clusters
        .iter()
        .position(|c| c == cluster)
        .ok_or_else(|| CliError::not_found(format!("cluster '{}' not found", cluster)))
}

fn cmd_print(cli: &Cli, settings: &Settings, store: &JsonSessionStore) -> Result<(), CliError> {
    let path = resolve_path(cli, &store.load_session())?;
    let manager = open_workbook(&path)?;
    select_sheet(&manager, cli.sheet.as_deref())?;

    if cli.stats {
        let names = manager.sheet_names();
        print!("{}", plain::render_stats(&path.display().to_string(), &names, &manager.data_stats()));
        return Ok(());
    }

    let formatter = ColorFormatter::with_config(settings.color_config());
    let clusters = match &cli.cluster {
        Some(cluster) => {
            cluster_position(&manager, cluster)?;
            vec![cluster.clone()]
        }
        None => manager.get_all_clusters(),
    };
    for (i, cluster) in clusters.iter().enumerate() {
        if i > 0 {
            println!();
        }
        let data = manager.get_cluster_data(cluster, None);
        let view = ClusterView::build(cluster, &data, &formatter);
        print!("{}", plain::render_cluster(manager.cluster_info(cluster).as_ref(), &view));
    }
    Ok(())
}

fn cmd_view(cli: &Cli, settings: Settings, store: JsonSessionStore) -> Result<(), CliError> {
    let store = Arc::new(store);
    let previous = store.load_session();
    let path = resolve_path(cli, &previous)?;
    let manager = open_workbook(&path)?;

    if let Some(backup) = store.backup_current_session() {
        info!("Previous session backed up to {}", backup.display());
    }
    store.clean_old_sessions(SESSION_BACKUPS_KEPT);

    let session = Arc::new(
        SessionManager::new(store.clone())
            .with_auto_save_interval(settings.session_auto_save_interval())
            .with_history_limit(settings.session_history_limit),
    );
    let mut restore = session.start_session();
    let path_text = path.display().to_string();
    if restore.last_file != path_text {
        // Positions from another workbook mean nothing here.
        restore = SessionState { last_file: path_text.clone(), ..SessionState::default() };
    }
    if let Some(sheet) = &cli.sheet {
        select_sheet(&manager, Some(sheet))?;
        restore.current_sheet = sheet.clone();
        restore.current_cluster = 0;
        restore.current_row = 0;
    }
    if let Some(cluster) = &cli.cluster {
        let wanted = Some(restore.current_sheet.as_str()).filter(|s| !s.is_empty());
        let sheet = match select_sheet(&manager, wanted) {
            Ok(sheet) => sheet,
            Err(_) => select_sheet(&manager, None)?,
        };
        restore.current_cluster = cluster_position(&manager, cluster)?;
        restore.current_sheet = sheet;
        restore.current_row = 0;
    }
    session.update_state(SessionUpdate::new().last_file(path_text.clone()));

    let save_status = Arc::new(LatestStatus::new());
    let autosave_config = AutoSaveConfig {
        debounce: settings.autosave_debounce(),
        backup_count: settings.autosave_backup_count,
        max_retries: settings.autosave_max_retries,
        base_retry_delay: settings.autosave_base_retry_delay(),
    };
    let autosave = AutoSaveManager::new(manager.clone(), save_status.clone(), autosave_config)
        .map_err(|e| CliError::general(format!("failed to start autosave: {}", e)))?;
    if !settings.autosave_enabled {
        warn!("Autosave disabled; edits are saved on Ctrl+S and on exit");
    }

    let services = Services {
        manager,
        session,
        autosave,
        save_status,
        formatter: ColorFormatter::with_config(settings.color_config()),
        autosave_on_edit: settings.autosave_enabled,
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or(path_text);
    tui::run(services, file_name, &restore).map_err(CliError::general)
}
