pub mod data;

use std::io::stdout;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use flowgrid_config::{SessionManager, SessionState, SessionUpdate};
use flowgrid_engine::cell::CellValue;
use flowgrid_engine::color::ColorFormatter;
use flowgrid_engine::ExcelDataManager;
use flowgrid_io::{AutoSaveManager, LatestStatus};
use log::{debug, info, warn};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame, Terminal,
};

use crate::util;
use data::ClusterView;

/// Everything the viewer drives.
pub struct Services {
    pub manager: Arc<ExcelDataManager>,
    pub session: Arc<SessionManager>,
    pub autosave: AutoSaveManager,
    /// Status messages from background backups.
    pub save_status: Arc<LatestStatus>,
    pub formatter: ColorFormatter,
    /// Debounced autosave after each edit.
    pub autosave_on_edit: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Mode {
    Normal,
    Editing { column: String, buffer: String },
}

pub(crate) struct TuiApp {
    services: Services,
    file_name: String,
    sheets: Vec<String>,
    active_sheet: usize,
    clusters: Vec<String>,
    cluster_idx: usize,
    view: ClusterView,
    cursor_row: usize,
    cursor_col: usize,
    scroll_row: usize,
    scroll_col: usize,
    mode: Mode,
    /// Ids of this run's edits still undoable, newest last.
    undo_stack: Vec<String>,
    /// Ctrl+S save of the edited workbook in flight.
    save_job: Option<JoinHandle<Result<PathBuf, String>>>,
    /// Last message for the status bar and whether it is an error.
    message: Option<(String, bool)>,
    should_quit: bool,
    show_help: bool,
}

impl TuiApp {
    /// Open on the sheet and cluster position saved in `restore`.
    pub(crate) fn new(services: Services, file_name: String, restore: &SessionState) -> Self {
        let sheets = services.manager.sheet_names();
        let active_sheet = sheets
            .iter()
            .position(|s| *s == restore.current_sheet)
            .unwrap_or(0);
        let mut app = Self {
            services,
            file_name,
            sheets,
            active_sheet,
            clusters: Vec::new(),
            cluster_idx: 0,
            view: ClusterView::default(),
            cursor_row: 0,
            cursor_col: 0,
            scroll_row: 0,
            scroll_col: 0,
            mode: Mode::Normal,
            undo_stack: Vec::new(),
            save_job: None,
            message: None,
            should_quit: false,
            show_help: false,
        };
        app.activate_sheet();
        app.cluster_idx = restore.current_cluster.min(app.clusters.len().saturating_sub(1));
        app.refresh_view();
        app.cursor_row = restore.current_row.min(app.view.num_rows().saturating_sub(1));
        app.cursor_col = app.first_editable_col().unwrap_or(0);
        app
    }

    fn activate_sheet(&mut self) {
        self.clusters.clear();
        self.cluster_idx = 0;
        let Some(name) = self.sheets.get(self.active_sheet).cloned() else {
            self.info("Workbook has no sheets", true);
            return;
        };
        match self.services.manager.set_active_sheet(&name) {
            Ok(()) => self.clusters = self.services.manager.get_all_clusters(),
            Err(e) => self.info(e.to_string(), true),
        }
    }

    fn current_cluster(&self) -> Option<&str> {
        self.clusters.get(self.cluster_idx).map(String::as_str)
    }

    fn refresh_view(&mut self) {
        self.view = match self.current_cluster() {
            Some(cluster) => {
                let data = self.services.manager.get_cluster_data(cluster, None);
                ClusterView::build(cluster, &data, &self.services.formatter)
            }
            None => ClusterView::default(),
        };
        if self.view.num_rows() > 0 {
            self.cursor_row = self.cursor_row.min(self.view.num_rows() - 1);
        } else {
            self.cursor_row = 0;
        }
        if self.view.num_cols() > 0 {
            self.cursor_col = self.cursor_col.min(self.view.num_cols() - 1);
        }
    }

    fn first_editable_col(&self) -> Option<usize> {
        self.view
            .columns
            .iter()
            .position(|c| self.services.manager.can_edit_column(c))
    }

    fn info(&mut self, msg: impl Into<String>, is_error: bool) {
        self.message = Some((msg.into(), is_error));
    }

    /// Record position with the session manager, checkpointing when due.
    fn track_position(&mut self) {
        let sheet = self.sheets.get(self.active_sheet).cloned().unwrap_or_default();
        let session = &self.services.session;
        session.update_state(
            SessionUpdate::new()
                .current_sheet(sheet)
                .current_cluster(self.cluster_idx)
                .current_row(self.cursor_row),
        );
        if session.should_auto_save() {
            // Detached; the manager keeps the dirty flag if it fails.
            let _ = session.checkpoint();
        }
    }

    fn switch_sheet(&mut self, idx: usize) {
        if idx >= self.sheets.len() || idx == self.active_sheet {
            return;
        }
        self.active_sheet = idx;
        self.activate_sheet();
        self.cursor_row = 0;
        self.scroll_row = 0;
        self.scroll_col = 0;
        self.refresh_view();
        self.cursor_col = self.first_editable_col().unwrap_or(0);
    }

    fn next_sheet(&mut self) {
        if self.sheets.len() > 1 {
            self.switch_sheet((self.active_sheet + 1) % self.sheets.len());
        }
    }

    fn prev_sheet(&mut self) {
        if self.sheets.len() > 1 {
            let prev = self.active_sheet.checked_sub(1).unwrap_or(self.sheets.len() - 1);
            self.switch_sheet(prev);
        }
    }

    fn step_cluster(&mut self, forward: bool) {
        let n = self.clusters.len();
        if n < 2 {
            return;
        }
        self.cluster_idx = if forward {
            (self.cluster_idx + 1) % n
        } else {
            self.cluster_idx.checked_sub(1).unwrap_or(n - 1)
        };
        self.cursor_row = 0;
        self.scroll_row = 0;
        self.refresh_view();
    }

    pub(crate) fn handle_key(&mut self, key: KeyEvent) {
        if self.show_help {
            // Any key dismisses help
            self.show_help = false;
            return;
        }
        if let Mode::Editing { .. } = self.mode {
            self.handle_edit_key(key);
            return;
        }

        let before = (self.active_sheet, self.cluster_idx, self.cursor_row);
        match key.code {
            KeyCode::Char('s') if key.modifiers.contains(KeyModifiers::CONTROL) => self.manual_save(),
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('?') => self.show_help = true,
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(-1, 0),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(1, 0),
            KeyCode::Left | KeyCode::Char('h') => self.move_cursor(0, -1),
            KeyCode::Right | KeyCode::Char('l') => self.move_cursor(0, 1),
            KeyCode::Char('n') => self.step_cluster(true),
            KeyCode::Char('p') => self.step_cluster(false),
            KeyCode::Tab if key.modifiers.contains(KeyModifiers::SHIFT) => self.prev_sheet(),
            KeyCode::Tab => self.next_sheet(),
            KeyCode::BackTab => self.prev_sheet(),
            KeyCode::Enter | KeyCode::Char('e') => self.begin_edit(),
            KeyCode::Char('u') => self.undo_last_edit(),
            _ => {}
        }
        if before != (self.active_sheet, self.cluster_idx, self.cursor_row) {
            self.track_position();
        }
    }

    fn handle_edit_key(&mut self, key: KeyEvent) {
        let Mode::Editing { column, buffer } = &mut self.mode else {
            return;
        };
        match key.code {
            KeyCode::Esc => self.mode = Mode::Normal,
            KeyCode::Enter => {
                let column = column.clone();
                let input = buffer.clone();
                self.mode = Mode::Normal;
                self.submit_edit(&column, &input);
            }
            KeyCode::Backspace => {
                buffer.pop();
            }
            KeyCode::Char(c) => buffer.push(c),
            _ => {}
        }
    }

    fn begin_edit(&mut self) {
        let Some(column) = self.view.columns.get(self.cursor_col).cloned() else {
            return;
        };
        if self.view.num_rows() == 0 {
            return;
        }
        if !self.services.manager.can_edit_column(&column) {
            self.info(format!("Column '{}' is read-only", column), true);
            return;
        }
        let buffer = self
            .view
            .cell(self.cursor_row, self.cursor_col)
            .map(|c| c.text.clone())
            .unwrap_or_default();
        self.mode = Mode::Editing { column, buffer };
    }

    fn submit_edit(&mut self, column: &str, input: &str) {
        let Some(cluster) = self.current_cluster().map(str::to_string) else {
            return;
        };
        let value = CellValue::from_input(input);
        let (ok, msg) = self
            .services
            .manager
            .validate_and_update(&cluster, self.cursor_row, column, &value);
        if ok {
            if let Some(record) = self.services.manager.last_edit() {
                self.undo_stack.push(record.id.clone());
                self.services.session.record_edit(record);
            }
            if self.services.autosave_on_edit {
                self.services.autosave.on_data_edited();
            }
            self.refresh_view();
        }
        self.info(msg, !ok);
    }

    /// Roll back this run's edits one at a time, newest first.
    fn undo_last_edit(&mut self) {
        let Some(id) = self.undo_stack.last().cloned() else {
            self.info("Nothing to undo", false);
            return;
        };
        let Some(record) = self.services.manager.find_edit(&id) else {
            // Evicted from the manager's bounded log
            self.undo_stack.clear();
            self.info("Nothing to undo", false);
            return;
        };
        if self.services.manager.rollback_edit(&record.id) {
            self.undo_stack.pop();
            if self.services.autosave_on_edit {
                self.services.autosave.on_data_edited();
            }
            self.refresh_view();
            self.info(format!("Restored {} to {}", record.column, record.old_value), false);
        } else {
            self.info(format!("Switch to sheet {} to undo its edit", record.sheet), true);
        }
    }

    /// Write the edited workbook (`<stem>_edited_<ts>`) on a background thread.
    fn manual_save(&mut self) {
        if self.save_job.as_ref().is_some_and(|job| !job.is_finished()) {
            self.info("Save already in progress", false);
            return;
        }
        self.collect_save();
        if !self.services.manager.has_unsaved_changes() {
            self.info("No unsaved changes", false);
            return;
        }
        let manager = self.services.manager.clone();
        let spawned = thread::Builder::new()
            .name("flowgrid-save".into())
            .spawn(move || manager.save_workbook().map_err(|e| e.to_string()));
        match spawned {
            Ok(job) => {
                self.save_job = Some(job);
                self.info("Saving...", false);
            }
            Err(e) => self.info(format!("Save failed: {}", e), true),
        }
    }

    /// Report a finished save; joins if one is still running.
    fn collect_save(&mut self) {
        let Some(job) = self.save_job.take() else {
            return;
        };
        match job.join() {
            Ok(Ok(path)) => self.info(format!("Saved to {}", path.display()), false),
            Ok(Err(e)) => self.info(format!("Save failed: {}", e), true),
            Err(_) => self.info("Save failed: save thread panicked", true),
        }
    }

    fn poll_save(&mut self) {
        if self.save_job.as_ref().is_some_and(JoinHandle::is_finished) {
            self.collect_save();
        }
    }

    fn move_cursor(&mut self, drow: i32, dcol: i32) {
        if self.view.num_rows() == 0 || self.view.num_cols() == 0 {
            return;
        }
        let max_row = self.view.num_rows() as i32 - 1;
        let max_col = self.view.num_cols() as i32 - 1;
        self.cursor_row = (self.cursor_row as i32 + drow).clamp(0, max_row) as usize;
        self.cursor_col = (self.cursor_col as i32 + dcol).clamp(0, max_col) as usize;
    }

    fn ensure_visible(&mut self, visible_rows: usize, area_width: u16) {
        if self.cursor_row < self.scroll_row {
            self.scroll_row = self.cursor_row;
        }
        if visible_rows > 0 && self.cursor_row >= self.scroll_row + visible_rows {
            self.scroll_row = self.cursor_row - visible_rows + 1;
        }

        if self.cursor_col < self.scroll_col {
            self.scroll_col = self.cursor_col;
        }
        let available = area_width as usize;
        while self.scroll_col < self.cursor_col
            && !self.visible_columns(self.scroll_col, available).contains(&self.cursor_col)
        {
            self.scroll_col += 1;
        }
    }

    fn visible_columns(&self, start_col: usize, available: usize) -> Vec<usize> {
        let mut cols = Vec::new();
        let mut used = 0usize;
        for c in start_col..self.view.num_cols() {
            let w = self.view.col_widths.get(c).copied().unwrap_or(3) + 1;
            if used + w > available && !cols.is_empty() {
                break;
            }
            used += w;
            cols.push(c);
        }
        cols
    }

    /// Drain background status into the status bar.
    fn poll_status(&mut self) {
        if let Some(status) = self.services.save_status.take() {
            let is_error = status.starts_with("Save failed");
            self.info(format!("Backup: {}", status), is_error);
        }
        self.poll_save();
    }

    fn draw(&self, frame: &mut Frame) {
        let area = frame.area();
        let chunks = Layout::vertical([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(area);

        self.draw_title(frame, chunks[0]);
        self.draw_tab_bar(frame, chunks[1]);
        self.draw_cluster_header(frame, chunks[2]);
        self.draw_grid(frame, chunks[3]);
        self.draw_status(frame, chunks[4]);

        if self.show_help {
            self.draw_help(frame, area);
        }
    }

    fn draw_title(&self, frame: &mut Frame, area: Rect) {
        let dirty = if self.services.manager.has_unsaved_changes() { " [modified]" } else { "" };
        let title = format!(" flowgrid: {}{} | {} sheets ", self.file_name, dirty, self.sheets.len());
        let para = Paragraph::new(Line::from(vec![Span::styled(
            title,
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )]))
        .style(Style::default().bg(Color::Cyan));
        frame.render_widget(para, area);
    }

    fn draw_tab_bar(&self, frame: &mut Frame, area: Rect) {
        let mut spans = Vec::new();
        for (i, name) in self.sheets.iter().enumerate() {
            let style = if i == self.active_sheet {
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::White)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray).bg(Color::DarkGray)
            };
            spans.push(Span::styled(format!(" {} ", name), style));
            spans.push(Span::styled(" ", Style::default().bg(Color::Black)));
        }
        let para = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
        frame.render_widget(para, area);
    }

    fn draw_cluster_header(&self, frame: &mut Frame, area: Rect) {
        let text = match self.current_cluster() {
            Some(cluster) => {
                let summary = self
                    .services
                    .manager
                    .cluster_info(cluster)
                    .map(|info| {
                        let mon = info.monitor.as_deref().unwrap_or("-");
                        let cont = info.contingency.as_deref().unwrap_or("-");
                        format!("{}  MON {}  CONT {}", info, mon, cont)
                    })
                    .unwrap_or_else(|| format!("Cluster {}", cluster));
                format!(" {}  [{}/{}]", summary, self.cluster_idx + 1, self.clusters.len())
            }
            None => " (no clusters)".to_string(),
        };
        let para = Paragraph::new(Span::styled(
            text,
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ));
        frame.render_widget(para, area);
    }

    fn draw_grid(&self, frame: &mut Frame, area: Rect) {
        let view = &self.view;
        if view.num_rows() == 0 || view.num_cols() == 0 {
            let msg = Paragraph::new("(empty)").style(Style::default().fg(Color::DarkGray));
            frame.render_widget(msg, area);
            return;
        }

        let vis_cols = self.visible_columns(self.scroll_col, area.width as usize);
        let mut lines: Vec<Line> = Vec::with_capacity(area.height as usize);

        let header_spans: Vec<Span> = vis_cols
            .iter()
            .map(|&c| {
                let w = view.col_widths[c];
                let name = util::pad_right(&view.columns[c], w);
                let editable = self.services.manager.can_edit_column(&view.columns[c]);
                let mut style = Style::default().add_modifier(Modifier::BOLD);
                style = if c == self.cursor_col {
                    style.fg(Color::Yellow)
                } else if editable {
                    style.fg(Color::Green)
                } else {
                    style.fg(Color::Cyan)
                };
                Span::styled(format!("{} ", name), style)
            })
            .collect();
        lines.push(Line::from(header_spans));

        let visible_rows = area.height.saturating_sub(1) as usize;
        let end_row = (self.scroll_row + visible_rows).min(view.num_rows());
        for r in self.scroll_row..end_row {
            let spans: Vec<Span> = vis_cols
                .iter()
                .map(|&c| {
                    let w = view.col_widths[c];
                    let Some(cell) = view.cell(r, c) else {
                        return Span::raw(" ".repeat(w + 1));
                    };
                    let text = if cell.numeric {
                        util::pad_left(&cell.text, w)
                    } else {
                        util::pad_right(&cell.text, w)
                    };
                    let mut style = match cell.bg {
                        Some(bg) => Style::default().bg(util::to_color(bg)).fg(util::text_on(bg)),
                        None => Style::default().fg(Color::Gray),
                    };
                    if cell.bold {
                        style = style.add_modifier(Modifier::BOLD);
                    }
                    if r == self.cursor_row && c == self.cursor_col {
                        style = style.add_modifier(Modifier::REVERSED | Modifier::BOLD);
                    } else if r == self.cursor_row {
                        style = style.add_modifier(Modifier::UNDERLINED);
                    }
                    Span::styled(format!("{} ", text), style)
                })
                .collect();
            lines.push(Line::from(spans));
        }

        frame.render_widget(Paragraph::new(lines), area);
    }

    fn draw_status(&self, frame: &mut Frame, area: Rect) {
        let (text, style) = match (&self.mode, &self.message) {
            (Mode::Editing { column, buffer }, _) => (
                format!(" {} = {}_   Enter: apply  Esc: cancel", column, buffer),
                Style::default().fg(Color::Black).bg(Color::Yellow),
            ),
            (Mode::Normal, Some((msg, true))) => (
                format!(" {}", msg),
                Style::default().fg(Color::White).bg(Color::Red),
            ),
            (Mode::Normal, message) => {
                let left = message.as_ref().map(|(m, _)| m.clone()).unwrap_or_default();
                let right = format!("Row {}/{}  ?: help ", self.cursor_row + 1, self.view.num_rows());
                let padding = (area.width as usize)
                    .saturating_sub(util::display_width(&left) + right.len() + 1);
                (
                    format!(" {}{:pad$}{}", left, "", right, pad = padding),
                    Style::default().fg(Color::Black).bg(Color::DarkGray),
                )
            }
        };
        let para = Paragraph::new(Line::from(Span::styled(text, style))).style(style);
        frame.render_widget(para, area);
    }

    fn draw_help(&self, frame: &mut Frame, area: Rect) {
        let help_lines = [
            "",
            "  Navigation",
            "  ----------",
            "  arrows / hjkl     Move cursor",
            "  n / p             Next/prev cluster",
            "  Tab / Shift+Tab   Next/prev sheet",
            "",
            "  Editing",
            "  -------",
            "  Enter / e         Edit VIEW or SHORTLIMIT",
            "  u                 Undo (repeat for older)",
            "  Ctrl+S            Save edited workbook",
            "",
            "  General",
            "  -------",
            "  q                 Quit",
            "  ?                 Toggle this help",
            "",
        ];
        let help_width: u16 = 46;
        let help_height: u16 = help_lines.len() as u16 + 2;
        let x = area.width.saturating_sub(help_width) / 2;
        let y = area.height.saturating_sub(help_height) / 2;
        let popup = Rect::new(
            area.x + x,
            area.y + y,
            help_width.min(area.width),
            help_height.min(area.height),
        );

        let lines: Vec<Line> = help_lines
            .iter()
            .map(|s| Line::from(Span::styled(*s, Style::default().fg(Color::White))))
            .collect();
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" Keybindings ")
            .title_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
            .style(Style::default().bg(Color::Black));

        frame.render_widget(Clear, popup);
        frame.render_widget(Paragraph::new(lines).block(block), popup);
    }

    /// Write the edited workbook if needed, then close the session.
    /// A failed save still leaves a backup copy behind.
    fn finish(&mut self) -> Result<(), String> {
        self.collect_save();
        let mut result = Ok(());
        if self.services.manager.has_unsaved_changes() {
            match self.services.manager.save_workbook() {
                Ok(path) => info!("Edits saved to {}", path.display()),
                Err(e) => {
                    warn!("Final save failed: {}", e);
                    if let Err(backup) = self.services.autosave.save_blocking() {
                        warn!("Backup failed too: {}", backup);
                    }
                    result = Err(format!("final save failed: {}", e));
                }
            }
        }
        self.services.autosave.shutdown();
        if !self.services.session.end_session() {
            warn!("Session state could not be saved");
        }
        result
    }
}

/// Run the interactive viewer until the user quits.
pub fn run(services: Services, file_name: String, restore: &SessionState) -> Result<(), String> {
    let app = TuiApp::new(services, file_name, restore);
    run_app(app)
}

fn run_app(mut app: TuiApp) -> Result<(), String> {
    terminal::enable_raw_mode().map_err(|e| format!("failed to enable raw mode: {}", e))?;
    stdout()
        .execute(EnterAlternateScreen)
        .map_err(|e| format!("failed to enter alternate screen: {}", e))?;

    struct Cleanup;
    impl Drop for Cleanup {
        fn drop(&mut self) {
            let _ = stdout().execute(LeaveAlternateScreen);
            let _ = terminal::disable_raw_mode();
        }
    }
    let _cleanup = Cleanup;

    let backend = CrosstermBackend::new(stdout());
    let mut terminal = Terminal::new(backend).map_err(|e| format!("failed to create terminal: {}", e))?;

    loop {
        let size = terminal.size().map(|s| (s.width, s.height)).unwrap_or((120, 40));
        app.services
            .session
            .update_state(SessionUpdate::new().window_size(size.0, size.1));
        // title, tabs, cluster header, column header, status
        let visible_rows = size.1.saturating_sub(5) as usize;
        app.ensure_visible(visible_rows, size.0);
        app.poll_status();

        terminal
            .draw(|frame| app.draw(frame))
            .map_err(|e| format!("draw error: {}", e))?;

        if event::poll(Duration::from_millis(100)).map_err(|e| format!("event poll error: {}", e))? {
            if let Event::Key(key) = event::read().map_err(|e| format!("event read error: {}", e))? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key);
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    debug!("Viewer closing");
    app.finish()
}
