//! Modern TUI implementation using ratatui
//!
//! Provides the `ScanUi::Full` experience: a scanning progress screen
//! followed by an ncdu-like file browser, both driven by the same `Tree`
//! the core scanner/importer produce. `browser.rs` covers the lighter
//! raw-crossterm fallback used for `ScanUi::Line`/`None`.

use crate::config::Config;
use crate::error::{Result, RsduError};
use crate::model::{EntryId, EntryKind, Tree};
use crate::scanner::{ScanObserver, ScanOptions};
use crate::utils::{format_file_size, sorted_children};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{block::Title, Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::{Duration, Instant};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// TUI application state
pub struct TuiApp {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    config: Config,
    mode: AppMode,
    quit_scan: Arc<AtomicBool>,
}

/// Application modes
pub enum AppMode {
    Scanning {
        progress: Arc<ScanProgress>,
        receiver: Option<Receiver<ScanMessage>>,
    },
    Browsing {
        tree: Tree,
        current: EntryId,
        children: Vec<EntryId>,
        path_stack: Vec<EntryId>,
        list_state: ListState,
        show_help: bool,
        status: Option<String>,
    },
    Quit,
}

/// Scanning progress shared between the background walker and the UI
/// thread. Only `items_seen` is tracked incrementally (§4.2) — the core
/// does not maintain a running breakdown by directories/files/errors.
#[derive(Debug)]
pub struct ScanProgress {
    pub current_path: Mutex<String>,
    pub items_seen: AtomicU64,
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self {
            current_path: Mutex::new(String::new()),
            items_seen: AtomicU64::new(0),
        }
    }
}

/// Messages sent during scanning.
pub enum ScanMessage {
    Progress { current_path: String, items_seen: u64 },
    Complete { tree: Tree },
    Error { message: String },
}

/// Forwards `ScanObserver::tick` calls over an mpsc channel, throttled
/// by `Config::update_delay`, and checks a shared cancellation flag —
/// the single suspension/cancellation point the concurrency model (§5)
/// asks collaborators to provide.
pub struct ChannelObserver {
    sender: Sender<ScanMessage>,
    last_update: Instant,
    update_delay: Duration,
    quit: Arc<AtomicBool>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<ScanMessage>, quit: Arc<AtomicBool>, update_delay: Duration) -> Self {
        Self { sender, last_update: Instant::now(), update_delay, quit }
    }
}

impl ScanObserver for ChannelObserver {
    fn tick(&mut self, current_path: &str, items_seen: u64) -> bool {
        if self.last_update.elapsed() >= self.update_delay {
            let _ = self.sender.send(ScanMessage::Progress {
                current_path: current_path.to_string(),
                items_seen,
            });
            self.last_update = Instant::now();
        }
        self.quit.load(Ordering::Relaxed)
    }
}

impl TuiApp {
    /// Create a new TUI application
    pub fn new(config: Config) -> Result<Self> {
        enable_raw_mode()
            .map_err(|e| RsduError::UiError(format!("Failed to enable raw mode: {}", e)))?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
            .map_err(|e| RsduError::UiError(format!("Failed to setup terminal: {}", e)))?;

        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)
            .map_err(|e| RsduError::UiError(format!("Failed to create terminal: {}", e)))?;

        Ok(Self {
            terminal,
            config,
            mode: AppMode::Quit,
            quit_scan: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Start scanning with progress display, returning the sender the
    /// background walker should feed and the cancellation flag it
    /// should poll (both already wired into `self`).
    pub fn start_scan(&mut self, scan_path: String) -> Result<(Sender<ScanMessage>, Arc<AtomicBool>)> {
        let progress = Arc::new(ScanProgress::default());
        let (sender, receiver) = mpsc::channel();

        self.mode = AppMode::Scanning {
            progress: progress.clone(),
            receiver: Some(receiver),
        };

        if let Ok(mut current_path) = progress.current_path.lock() {
            *current_path = scan_path;
        }

        Ok((sender, self.quit_scan.clone()))
    }

    /// Convenience wrapper: spawn the scan on a background thread and
    /// run the event loop to completion.
    pub fn run_scan_and_browse(&mut self, scan_path: PathBuf) -> Result<()> {
        let (sender, quit_flag) = self.start_scan(scan_path.display().to_string())?;
        let opts = ScanOptions::from_config(&self.config)?;
        let update_delay = self.config.update_delay;
        std::thread::spawn(move || {
            let mut observer = ChannelObserver::new(sender.clone(), quit_flag, update_delay);
            match crate::scanner::scan_root(&scan_path, &opts, &mut observer) {
                Ok(tree) => {
                    let _ = sender.send(ScanMessage::Complete { tree });
                }
                Err(e) => {
                    let _ = sender.send(ScanMessage::Error { message: e.to_string() });
                }
            }
        });
        self.run()
    }

    /// Run the main application loop
    pub fn run(&mut self) -> Result<()> {
        let mut last_tick = Instant::now();
        let mut last_ui_update = Instant::now();
        let tick_rate = Duration::from_millis(50);
        let ui_update_rate = Duration::from_millis(100);

        loop {
            if last_tick.elapsed() >= tick_rate {
                self.update()?;
                last_tick = Instant::now();
            }

            let should_draw = match &self.mode {
                AppMode::Scanning { .. } => last_ui_update.elapsed() >= ui_update_rate,
                _ => true,
            };

            if should_draw {
                let should_quit = {
                    let mode_ref = &self.mode;
                    let config_ref = &self.config;
                    self.terminal
                        .draw(|f| draw_ui_for_mode(f, mode_ref, config_ref))
                        .map_err(|e| RsduError::UiError(format!("Failed to draw: {}", e)))?;
                    matches!(self.mode, AppMode::Quit)
                };

                if should_quit {
                    break;
                }
                last_ui_update = Instant::now();
            }

            let timeout = Duration::from_millis(10);
            if event::poll(timeout)
                .map_err(|e| RsduError::UiError(format!("Event poll error: {}", e)))?
            {
                if let Event::Key(key) = event::read()
                    .map_err(|e| RsduError::UiError(format!("Event read error: {}", e)))?
                {
                    if key.kind == KeyEventKind::Press {
                        if self.handle_key_event(key.code)? {
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        match &mut self.mode {
            AppMode::Scanning { receiver, progress } => {
                if let Some(rx) = receiver {
                    let mut processed = 0;
                    while processed < 10 {
                        match rx.try_recv() {
                            Ok(msg) => {
                                processed += 1;
                                match msg {
                                    ScanMessage::Progress { current_path, items_seen } => {
                                        if let Ok(mut path) = progress.current_path.lock() {
                                            *path = current_path;
                                        }
                                        progress.items_seen.store(items_seen, Ordering::Relaxed);
                                    }
                                    ScanMessage::Complete { tree } => {
                                        self.start_browsing(tree)?;
                                        return Ok(());
                                    }
                                    ScanMessage::Error { message } => {
                                        return Err(RsduError::ScanError {
                                            path: std::path::PathBuf::from("unknown"),
                                            message,
                                        });
                                    }
                                }
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
            AppMode::Browsing { .. } => {}
            AppMode::Quit => {}
        }
        Ok(())
    }

    fn start_browsing(&mut self, tree: Tree) -> Result<()> {
        let mut list_state = ListState::default();
        list_state.select(Some(0));
        let root = tree.root;
        let children = sorted_children(&tree, root, &self.config);

        self.mode = AppMode::Browsing {
            current: root,
            children,
            tree,
            path_stack: Vec::new(),
            list_state,
            show_help: false,
            status: None,
        };
        Ok(())
    }

    fn handle_key_event(&mut self, key: KeyCode) -> Result<bool> {
        match &mut self.mode {
            AppMode::Scanning { .. } => {
                if matches!(key, KeyCode::Char('q') | KeyCode::Esc | KeyCode::Char('c')) {
                    self.quit_scan.store(true, Ordering::Relaxed);
                    return Ok(true);
                }
            }
            AppMode::Browsing { show_help, .. } => {
                if matches!(key, KeyCode::Char('q') | KeyCode::Esc) {
                    if *show_help {
                        *show_help = false;
                        return Ok(false);
                    }
                    return Ok(true);
                }
                if matches!(key, KeyCode::Char('?') | KeyCode::F(1)) {
                    *show_help = !*show_help;
                    return Ok(false);
                }
                if *show_help {
                    return Ok(false);
                }
            }
            AppMode::Quit => {}
        }

        let browsing_last_index = match &self.mode {
            AppMode::Browsing { children, .. } => Some(children.len().saturating_sub(1)),
            _ => None,
        };

        if let Some(last_index) = browsing_last_index {
            match key {
                KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
                KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
                KeyCode::Home | KeyCode::Char('g') => self.select_index(0),
                KeyCode::End | KeyCode::Char('G') => self.select_index(last_index),
                KeyCode::Enter | KeyCode::Right | KeyCode::Char('l') => self.enter_selected(),
                KeyCode::Left | KeyCode::Char('h') | KeyCode::Backspace => self.go_back(),
                KeyCode::Char('s') => self.toggle_sort(),
                KeyCode::Char('r') => self.reverse_sort(),
                KeyCode::Char('a') => self.config.show_blocks = !self.config.show_blocks,
                KeyCode::Char('R') if self.config.can_refresh != Some(false) => self.refresh_current(),
                _ => {}
            }
        }
        Ok(false)
    }

    fn move_selection(&mut self, delta: i32) {
        if let AppMode::Browsing { children, list_state, .. } = &mut self.mode {
            if children.is_empty() {
                return;
            }
            let current = list_state.selected().unwrap_or(0);
            let max_index = children.len() - 1;
            let new_index = if delta < 0 {
                current.saturating_sub((-delta) as usize)
            } else {
                (current + delta as usize).min(max_index)
            };
            list_state.select(Some(new_index));
        }
    }

    fn select_index(&mut self, index: usize) {
        if let AppMode::Browsing { list_state, .. } = &mut self.mode {
            list_state.select(Some(index));
        }
    }

    fn enter_selected(&mut self) {
        if let AppMode::Browsing { tree, current, children, path_stack, list_state, .. } = &mut self.mode {
            if let Some(selected_index) = list_state.selected() {
                if let Some(&selected) = children.get(selected_index) {
                    if tree.get(selected).is_dir() {
                        path_stack.push(*current);
                        *current = selected;
                        *children = sorted_children(tree, *current, &self.config);
                        list_state.select(Some(0));
                    }
                }
            }
        }
    }

    fn go_back(&mut self) {
        if let AppMode::Browsing { tree, current, children, path_stack, list_state, .. } = &mut self.mode {
            if let Some(parent) = path_stack.pop() {
                *current = parent;
                *children = sorted_children(tree, *current, &self.config);
                list_state.select(Some(0));
            }
        }
    }

    fn toggle_sort(&mut self) {
        use crate::config::SortColumn::*;
        self.config.sort_col = match self.config.sort_col {
            Name => Blocks,
            Blocks => Size,
            Size => Items,
            Items => Mtime,
            Mtime => Name,
        };
        self.resort();
    }

    fn reverse_sort(&mut self) {
        use crate::config::SortOrder::*;
        self.config.sort_order = match self.config.sort_order {
            Asc => Desc,
            Desc => Asc,
        };
        self.resort();
    }

    fn resort(&mut self) {
        let config = self.config.clone();
        if let AppMode::Browsing { tree, current, children, .. } = &mut self.mode {
            *children = sorted_children(tree, *current, &config);
        }
    }

    /// Re-walk the current directory against the live filesystem (§4.6).
    fn refresh_current(&mut self) {
        let config = self.config.clone();
        let opts = match ScanOptions::from_config(&config) {
            Ok(o) => o,
            Err(e) => {
                self.set_status(format!("refresh failed: {}", e));
                return;
            }
        };
        let mut null_observer = crate::scanner::NullObserver;
        let outcome = if let AppMode::Browsing { tree, current, children, list_state, .. } = &mut self.mode {
            match crate::scanner::refresh_subtree(tree, *current, &opts, &mut null_observer) {
                Ok(()) => {
                    *children = sorted_children(tree, *current, &config);
                    let max = children.len().saturating_sub(1);
                    let sel = list_state.selected().unwrap_or(0).min(max);
                    list_state.select(Some(sel));
                    "refreshed".to_string()
                }
                Err(e) => format!("refresh failed: {}", e),
            }
        } else {
            return;
        };
        self.set_status(outcome);
    }

    fn set_status(&mut self, message: String) {
        if let AppMode::Browsing { status, .. } = &mut self.mode {
            *status = Some(message);
        }
    }
}

fn draw_ui_for_mode(f: &mut Frame, mode: &AppMode, config: &Config) {
    match mode {
        AppMode::Scanning { progress, .. } => {
            draw_scanning_ui(f, progress, config);
        }
        AppMode::Browsing { show_help: true, .. } => {
            draw_help_ui(f);
        }
        AppMode::Browsing { tree, current, children, list_state, status, .. } => {
            draw_browsing_ui(f, tree, *current, children, list_state, status, config);
        }
        AppMode::Quit => {}
    }
}

fn draw_scanning_ui(f: &mut Frame, progress: &Arc<ScanProgress>, _config: &Config) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(5),
            Constraint::Length(4),
            Constraint::Min(3),
            Constraint::Length(2),
        ])
        .split(f.size());

    let title = Paragraph::new("rsdu - Disk Usage Analyzer")
        .style(Style::default().fg(Color::White).add_modifier(Modifier::BOLD))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, chunks[0]);

    let current_path = progress.current_path.lock().unwrap().clone();
    let max_len = (chunks[1].width as usize).saturating_sub(9);
    let truncated_path = if current_path.len() > max_len {
        format!("...{}", &current_path[current_path.len().saturating_sub(max_len)..])
    } else {
        current_path.clone()
    };

    let current_file_widget = Paragraph::new(Text::from(vec![
        Line::from(""),
        Line::from(vec![
            Span::raw("Scanning: "),
            Span::styled(truncated_path, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        ]),
        Line::from(""),
    ]))
    .block(Block::default().borders(Borders::ALL))
    .alignment(Alignment::Left);
    f.render_widget(current_file_widget, chunks[1]);

    let items_seen = progress.items_seen.load(Ordering::Relaxed);
    let progress_text = vec![Line::from(vec![
        Span::raw("Items seen: "),
        Span::styled(items_seen.to_string(), Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
    ])];
    let progress_info = Paragraph::new(Text::from(progress_text))
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .alignment(Alignment::Left);
    f.render_widget(progress_info, chunks[2]);

    let instructions = Paragraph::new("Press q to cancel, or wait for scan to complete...")
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(instructions, chunks[4]);
}

fn draw_help_ui(f: &mut Frame) {
    let help_text = vec![
        Line::from(Span::styled("rsdu - Help", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))),
        Line::from(""),
        Line::from("Navigation:"),
        Line::from("  \u{2191}/k        Move up"),
        Line::from("  \u{2193}/j        Move down"),
        Line::from("  \u{2190}/h        Go back to parent directory"),
        Line::from("  \u{2192}/l/Enter  Enter directory"),
        Line::from("  Home/g     Go to first item"),
        Line::from("  End/G      Go to last item"),
        Line::from(""),
        Line::from("Sorting & Display:"),
        Line::from("  s          Cycle sort column"),
        Line::from("  r          Reverse sort order"),
        Line::from("  a          Toggle apparent size/disk usage"),
        Line::from("  R          Refresh current directory"),
        Line::from(""),
        Line::from("Other:"),
        Line::from("  ?/F1       Toggle this help"),
        Line::from("  q/Esc      Quit"),
        Line::from(""),
        Line::from("Press ? or Esc to return to browser"),
    ];

    let area = centered_rect(60, 70, f.size());
    f.render_widget(Clear, area);

    let help_widget = Paragraph::new(Text::from(help_text))
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .wrap(Wrap { trim: true });
    f.render_widget(help_widget, area);
}

#[allow(clippy::too_many_arguments)]
fn draw_browsing_ui(
    f: &mut Frame,
    tree: &Tree,
    current: EntryId,
    children: &[EntryId],
    list_state: &ListState,
    status: &Option<String>,
    config: &Config,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(5), Constraint::Length(3)])
        .split(f.size());

    let current_path = tree.full_path(current).to_string_lossy().into_owned();
    let current_entry = tree.get(current);
    let total_display = if config.show_blocks {
        current_entry.blocks * crate::model::BLOCK_SIZE
    } else {
        current_entry.size
    };

    let header_text = vec![
        Line::from(vec![Span::raw("Path: "), Span::styled(&current_path, Style::default().fg(Color::Cyan))]),
        Line::from(vec![
            Span::raw("Total: "),
            Span::styled(format_file_size(total_display, config.si), Style::default().fg(Color::Yellow)),
            Span::raw(" ("),
            Span::styled(format!("{} items", children.len()), Style::default().fg(Color::Green)),
            Span::raw(")"),
        ]),
    ];

    let header = Paragraph::new(Text::from(header_text)).block(
        Block::default()
            .borders(Borders::ALL)
            .title(Title::from("rsdu - Disk Usage Analyzer").alignment(Alignment::Center)),
    );
    f.render_widget(header, chunks[0]);

    if children.is_empty() {
        let empty_msg = Paragraph::new("(empty directory)")
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(empty_msg, chunks[1]);
    } else {
        let items = create_file_list_items(tree, children, chunks[1].width as usize, config);
        let file_list = List::new(items)
            .block(Block::default().borders(Borders::ALL))
            .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
            .highlight_symbol("> ");
        f.render_stateful_widget(file_list, chunks[1], &mut list_state.clone());
    }

    let selected_index = list_state.selected().unwrap_or(0);
    let base = if children.is_empty() {
        "Empty directory | q:quit ?:help".to_string()
    } else {
        format!(
            "{}/{} | q:quit ?:help \u{2191}\u{2193}:navigate \u{2190}\u{2192}:dir s:sort r:rev R:refresh",
            selected_index + 1,
            children.len()
        )
    };
    let status_text = match status {
        Some(s) => format!("{} | {}", s, base),
        None => base,
    };

    let status_widget = Paragraph::new(status_text)
        .style(Style::default().fg(Color::Gray))
        .block(Block::default().borders(Borders::TOP));
    f.render_widget(status_widget, chunks[2]);
}

fn create_file_list_items(tree: &Tree, children: &[EntryId], available_width: usize, config: &Config) -> Vec<ListItem> {
    let mut items = Vec::new();

    let size_width = 10;
    let bar_width = 15;
    let spacing = 2;
    let name_width = available_width.saturating_sub(size_width + bar_width + spacing + 4);

    let total: u64 = children
        .iter()
        .map(|&id| {
            let e = tree.get(id);
            if config.show_blocks { e.blocks * crate::model::BLOCK_SIZE } else { e.size }
        })
        .sum();

    for &id in children {
        let entry = tree.get(id);
        let entry_value = if config.show_blocks { entry.blocks * crate::model::BLOCK_SIZE } else { entry.size };
        let size_str = format_file_size(entry_value, config.si);

        let percentage = if total > 0 { (entry_value as f64 / total as f64 * 100.0) as u8 } else { 0 };
        let bar = create_percentage_bar(percentage, bar_width.saturating_sub(2));

        let (type_char, color) = get_file_type_info(tree, id);
        let name_with_type = format!("{}{}", type_char, entry.name_str());
        let truncated_name = if name_with_type.width() > name_width {
            let mut truncated = String::new();
            let mut current_width = 0;
            for ch in name_with_type.chars() {
                let char_width = ch.width().unwrap_or(0);
                if current_width + char_width + 3 > name_width {
                    truncated.push_str("...");
                    break;
                }
                truncated.push(ch);
                current_width += char_width;
            }
            truncated
        } else {
            name_with_type
        };

        let line = Line::from(vec![
            Span::styled(size_str, Style::default().fg(Color::Yellow)),
            Span::raw(" "),
            Span::styled(format!("[{}]", bar), Style::default().fg(Color::Blue)),
            Span::raw(" "),
            Span::styled(truncated_name, Style::default().fg(color)),
        ]);

        items.push(ListItem::new(line));
    }

    items
}

fn create_percentage_bar(percentage: u8, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    let filled = (percentage as usize * width / 100).min(width);
    let mut bar = String::new();
    for i in 0..width {
        bar.push(if i < filled { '\u{2588}' } else { ' ' });
    }
    bar
}

fn get_file_type_info(tree: &Tree, id: EntryId) -> (char, Color) {
    let entry = tree.get(id);
    match &entry.kind {
        EntryKind::Dir(_) => ('/', Color::Blue),
        EntryKind::Link(_) => ('>', Color::Yellow),
        EntryKind::File(flags) => {
            if flags.excluded.is_some() {
                ('x', Color::DarkGray)
            } else if flags.other_fs {
                ('~', Color::DarkGray)
            } else if flags.kernfs {
                ('#', Color::DarkGray)
            } else if flags.notreg {
                ('=', Color::Magenta)
            } else if flags.err {
                ('!', Color::Red)
            } else {
                (' ', Color::White)
            }
        }
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

impl Drop for TuiApp {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture);
        let _ = self.terminal.show_cursor();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_progress_defaults_to_empty() {
        let progress = ScanProgress::default();
        assert_eq!(progress.items_seen.load(Ordering::Relaxed), 0);
        assert!(progress.current_path.lock().unwrap().is_empty());
    }

    #[test]
    fn percentage_bar_fills_proportionally() {
        assert_eq!(create_percentage_bar(0, 10), " ".repeat(10));
        assert_eq!(create_percentage_bar(100, 10), "\u{2588}".repeat(10));
        assert_eq!(create_percentage_bar(50, 10).matches('\u{2588}').count(), 5);
    }
}
