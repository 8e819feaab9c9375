//! Terminal UI browser module
//!
//! A lighter-weight, raw-crossterm interactive browser used for
//! `ScanUi::Line`/`ScanUi::None` sessions and for browsing an imported
//! dump. `tui.rs` covers the richer ratatui-based `ScanUi::Full` mode;
//! both walk the same `Tree`.

use crate::config::Config;
use crate::error::{Result, RsduError};
use crate::model::{EntryId, EntryKind, Tree};
use crate::scanner::{NullObserver, ScanOptions};
use crate::utils::{format_file_size, sorted_children};
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute, queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{self, Clear, ClearType},
};
use std::cmp;
use std::io::{self, Write};

/// Browser state: an owned `Tree` plus the navigation cursor into it.
pub struct Browser {
    tree: Tree,
    current: EntryId,
    path_stack: Vec<EntryId>,
    children: Vec<EntryId>,
    selected_index: usize,
    scroll_offset: usize,
    config: Config,
    terminal_height: u16,
    terminal_width: u16,
    show_help: bool,
    status: Option<String>,
}

impl Browser {
    pub fn new(tree: Tree, config: Config) -> Result<Self> {
        let (width, height) = terminal::size()
            .map_err(|e| RsduError::UiError(format!("Cannot get terminal size: {}", e)))?;

        let root = tree.root;
        let children = sorted_children(&tree, root, &config);
        Ok(Browser {
            tree,
            current: root,
            path_stack: Vec::new(),
            children,
            selected_index: 0,
            scroll_offset: 0,
            config,
            terminal_height: height,
            terminal_width: width,
            show_help: false,
            status: None,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        terminal::enable_raw_mode()
            .map_err(|e| RsduError::UiError(format!("Cannot enable raw mode: {}", e)))?;

        let mut stdout = io::stdout();
        execute!(stdout, terminal::Clear(ClearType::All), cursor::Hide)
            .map_err(|e| RsduError::UiError(format!("Terminal setup error: {}", e)))?;

        let result = self.main_loop();

        let _ = execute!(stdout, cursor::Show, ResetColor);
        let _ = terminal::disable_raw_mode();

        result
    }

    fn main_loop(&mut self) -> Result<()> {
        loop {
            self.update_terminal_size()?;
            self.draw()?;

            if event::poll(std::time::Duration::from_millis(100))
                .map_err(|e| RsduError::UiError(format!("Event poll error: {}", e)))?
            {
                match event::read()
                    .map_err(|e| RsduError::UiError(format!("Event read error: {}", e)))?
                {
                    Event::Key(key_event) => {
                        if key_event.kind == KeyEventKind::Press {
                            match self.handle_key(key_event.code, key_event.modifiers)? {
                                BrowserAction::Quit => break,
                                BrowserAction::Continue => {}
                            }
                        }
                    }
                    Event::Resize(width, height) => {
                        self.terminal_width = width;
                        self.terminal_height = height;
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }

    fn handle_key(&mut self, key: KeyCode, modifiers: KeyModifiers) -> Result<BrowserAction> {
        if modifiers.contains(KeyModifiers::CONTROL) && key == KeyCode::Char('c') {
            return Ok(BrowserAction::Quit);
        }

        match key {
            KeyCode::Char('q') | KeyCode::Esc => Ok(BrowserAction::Quit),
            KeyCode::Char('?') | KeyCode::F(1) => {
                self.show_help = !self.show_help;
                Ok(BrowserAction::Continue)
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.move_selection(-1);
                Ok(BrowserAction::Continue)
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.move_selection(1);
                Ok(BrowserAction::Continue)
            }
            KeyCode::PageUp => {
                self.move_selection(-(self.get_visible_height() as i32));
                Ok(BrowserAction::Continue)
            }
            KeyCode::PageDown => {
                self.move_selection(self.get_visible_height() as i32);
                Ok(BrowserAction::Continue)
            }
            KeyCode::Home | KeyCode::Char('g') => {
                self.selected_index = 0;
                self.scroll_offset = 0;
                Ok(BrowserAction::Continue)
            }
            KeyCode::End | KeyCode::Char('G') => {
                if !self.children.is_empty() {
                    self.selected_index = self.children.len() - 1;
                    self.adjust_scroll();
                }
                Ok(BrowserAction::Continue)
            }
            KeyCode::Enter | KeyCode::Right | KeyCode::Char('l') => {
                self.enter_selected();
                Ok(BrowserAction::Continue)
            }
            KeyCode::Left | KeyCode::Char('h') | KeyCode::Backspace => {
                self.go_back();
                Ok(BrowserAction::Continue)
            }
            KeyCode::Char('s') => {
                self.toggle_sort();
                Ok(BrowserAction::Continue)
            }
            KeyCode::Char('r') => {
                self.reverse_sort();
                Ok(BrowserAction::Continue)
            }
            KeyCode::Char('a') => {
                self.toggle_apparent_size();
                Ok(BrowserAction::Continue)
            }
            KeyCode::Char('d') => {
                self.toggle_show_hidden();
                Ok(BrowserAction::Continue)
            }
            KeyCode::Char('R') if self.config.can_refresh != Some(false) => {
                self.refresh_current();
                Ok(BrowserAction::Continue)
            }
            _ => Ok(BrowserAction::Continue),
        }
    }

    fn resort(&mut self) {
        let selected = self.children.get(self.selected_index).copied();
        self.children = sorted_children(&self.tree, self.current, &self.config);
        if let Some(id) = selected {
            self.selected_index = self.children.iter().position(|&c| c == id).unwrap_or(0);
        }
    }

    fn move_selection(&mut self, delta: i32) {
        if self.children.is_empty() {
            return;
        }

        let max_index = self.children.len() - 1;
        let new_index = if delta < 0 {
            self.selected_index.saturating_sub((-delta) as usize)
        } else {
            cmp::min(self.selected_index + delta as usize, max_index)
        };

        self.selected_index = new_index;
        self.adjust_scroll();
    }

    fn enter_selected(&mut self) {
        if self.children.is_empty() {
            return;
        }
        let selected = self.children[self.selected_index];
        if self.tree.get(selected).is_dir() {
            self.path_stack.push(self.current);
            self.current = selected;
            self.children = sorted_children(&self.tree, self.current, &self.config);
            self.selected_index = 0;
            self.scroll_offset = 0;
        }
    }

    fn go_back(&mut self) {
        if let Some(parent) = self.path_stack.pop() {
            self.current = parent;
            self.children = sorted_children(&self.tree, self.current, &self.config);
            self.selected_index = 0;
            self.scroll_offset = 0;
        }
    }

    /// Cycle through the available sort columns (§5: sorting is a UI
    /// concern, not tracked by the core model).
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

    fn toggle_apparent_size(&mut self) {
        self.config.show_blocks = !self.config.show_blocks;
    }

    fn toggle_show_hidden(&mut self) {
        self.config.show_hidden = !self.config.show_hidden;
    }

    /// Re-walk the currently open directory against the live filesystem
    /// (§4.6 `ScanDir` merge via `refresh_subtree`). No-op on an imported
    /// dump directory whose path no longer resolves on this host.
    fn refresh_current(&mut self) {
        let opts = match ScanOptions::from_config(&self.config) {
            Ok(o) => o,
            Err(e) => {
                self.status = Some(format!("refresh failed: {}", e));
                return;
            }
        };
        match crate::scanner::refresh_subtree(&mut self.tree, self.current, &opts, &mut NullObserver) {
            Ok(()) => {
                self.children = sorted_children(&self.tree, self.current, &self.config);
                self.selected_index = self.selected_index.min(self.children.len().saturating_sub(1));
                self.status = Some("refreshed".to_string());
            }
            Err(e) => self.status = Some(format!("refresh failed: {}", e)),
        }
    }

    fn adjust_scroll(&mut self) {
        let visible_height = self.get_visible_height();

        if self.selected_index < self.scroll_offset {
            self.scroll_offset = self.selected_index;
        } else if self.selected_index >= self.scroll_offset + visible_height {
            self.scroll_offset = self.selected_index + 1 - visible_height;
        }
    }

    fn get_visible_height(&self) -> usize {
        (self.terminal_height as usize).saturating_sub(4)
    }

    fn update_terminal_size(&mut self) -> Result<()> {
        let (width, height) = terminal::size()
            .map_err(|e| RsduError::UiError(format!("Cannot get terminal size: {}", e)))?;
        self.terminal_width = width;
        self.terminal_height = height;
        Ok(())
    }

    fn draw(&mut self) -> Result<()> {
        let mut stdout = io::stdout();

        queue!(stdout, cursor::MoveTo(0, 0), Clear(ClearType::All))?;

        if self.show_help {
            self.draw_help(&mut stdout)?;
        } else {
            self.draw_browser(&mut stdout)?;
        }

        stdout
            .flush()
            .map_err(|e| RsduError::UiError(format!("Cannot flush stdout: {}", e)))?;

        Ok(())
    }

    fn draw_browser(&mut self, stdout: &mut impl Write) -> Result<()> {
        self.draw_header(stdout)?;
        self.draw_current_path(stdout)?;
        self.draw_file_list(stdout)?;
        self.draw_status_bar(stdout)?;
        Ok(())
    }

    fn draw_header(&self, stdout: &mut impl Write) -> Result<()> {
        queue!(
            stdout,
            cursor::MoveTo(0, 0),
            SetForegroundColor(Color::White),
            Print("    Size    Items  Name"),
            ResetColor
        )?;
        Ok(())
    }

    fn draw_current_path(&self, stdout: &mut impl Write) -> Result<()> {
        let path = self.get_current_path();
        let width = self.terminal_width as usize;
        let display_path = if path.len() > width.saturating_sub(2) {
            let tail_len = width.saturating_sub(5);
            format!("...{}", &path[path.len().saturating_sub(tail_len)..])
        } else {
            path
        };

        queue!(
            stdout,
            cursor::MoveTo(0, 1),
            SetForegroundColor(Color::Cyan),
            Print(display_path),
            ResetColor
        )?;
        Ok(())
    }

    fn draw_file_list(&self, stdout: &mut impl Write) -> Result<()> {
        let visible_height = self.get_visible_height();
        let start_y = 3;

        if self.children.is_empty() {
            queue!(
                stdout,
                cursor::MoveTo(2, start_y),
                Print("(empty directory)")
            )?;
            return Ok(());
        }

        let end_index = cmp::min(self.scroll_offset + visible_height, self.children.len());

        for (i, &id) in self.children[self.scroll_offset..end_index].iter().enumerate() {
            let line_y = start_y + i as u16;
            let global_index = self.scroll_offset + i;
            let is_selected = global_index == self.selected_index;
            self.draw_file_entry(stdout, id, line_y, is_selected)?;
        }

        Ok(())
    }

    fn draw_file_entry(&self, stdout: &mut impl Write, id: EntryId, y: u16, is_selected: bool) -> Result<()> {
        queue!(stdout, cursor::MoveTo(0, y))?;

        if is_selected {
            queue!(stdout, SetForegroundColor(Color::Black))?;
        }

        let entry = self.tree.get(id);
        let display_value = if self.config.show_blocks {
            entry.blocks * crate::model::BLOCK_SIZE
        } else {
            entry.size
        };
        let size_str = format!("{:>8} ", format_file_size(display_value, self.config.si));

        let items_str = match &entry.kind {
            EntryKind::Dir(d) => format!("{:>6} ", d.items),
            _ => "      ".to_string(),
        };

        let (type_char, color) = self.get_type_indicator(id);
        let name = entry.name_str();

        let available_width = (self.terminal_width as usize).saturating_sub(20);
        let display_name = if name.len() > available_width {
            format!("{}...", &name[..available_width.saturating_sub(3)])
        } else {
            name.into_owned()
        };

        queue!(
            stdout,
            Print(size_str),
            Print(items_str),
            SetForegroundColor(color),
            Print(type_char),
            Print(display_name),
            ResetColor
        )?;

        if self.tree.err(id) {
            queue!(stdout, SetForegroundColor(Color::Red), Print(" [err]"), ResetColor)?;
        } else if self.tree.suberr(id) {
            queue!(stdout, SetForegroundColor(Color::Yellow), Print(" [suberr]"), ResetColor)?;
        }

        Ok(())
    }

    fn get_type_indicator(&self, id: EntryId) -> (char, Color) {
        let entry = self.tree.get(id);
        match &entry.kind {
            EntryKind::Dir(_) => ('/', Color::Blue),
            EntryKind::Link(_) => ('>', Color::Yellow),
            EntryKind::File(flags) => {
                if flags.excluded.is_some() {
                    ('x', Color::DarkGrey)
                } else if flags.other_fs {
                    ('~', Color::DarkGrey)
                } else if flags.kernfs {
                    ('#', Color::DarkGrey)
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

    fn draw_status_bar(&self, stdout: &mut impl Write) -> Result<()> {
        let status_y = self.terminal_height.saturating_sub(1);
        let total_items = self.children.len();

        let base = if total_items > 0 {
            format!(
                "{}/{} items | q:quit ?:help ↑↓:navigate ←→:enter/back s:sort r:rev R:refresh",
                self.selected_index + 1,
                total_items,
            )
        } else {
            "Empty directory | q:quit ?:help".to_string()
        };
        let status = match &self.status {
            Some(s) => format!("{} | {}", s, base),
            None => base,
        };

        let width = self.terminal_width as usize;
        let display_status = if status.len() > width {
            format!("{}...", &status[..width.saturating_sub(3)])
        } else {
            status
        };

        queue!(
            stdout,
            cursor::MoveTo(0, status_y),
            SetForegroundColor(Color::DarkGrey),
            Print(display_status),
            ResetColor
        )?;

        Ok(())
    }

    fn draw_help(&self, stdout: &mut impl Write) -> Result<()> {
        let help_text = [
            "rsdu - Disk Usage Analyzer",
            "",
            "Navigation:",
            "  \u{2191}/k        Move up",
            "  \u{2193}/j        Move down",
            "  \u{2190}/h        Go back to parent directory",
            "  \u{2192}/l/Enter  Enter directory",
            "  PgUp/PgDn  Page up/down",
            "  Home/g     Go to first item",
            "  End/G      Go to last item",
            "",
            "Sorting & Display:",
            "  s          Cycle sort column",
            "  r          Reverse sort order",
            "  a          Toggle apparent size/disk usage",
            "  d          Toggle hidden files",
            "  R          Refresh current directory",
            "",
            "Other:",
            "  ?/F1       Toggle this help",
            "  q/Esc      Quit",
            "  Ctrl+C     Quit",
            "",
            "Press ? or F1 to return to browser",
        ];

        for (i, line) in help_text.iter().enumerate() {
            if i as u16 >= self.terminal_height {
                break;
            }
            queue!(stdout, cursor::MoveTo(2, i as u16), Print(*line))?;
        }

        Ok(())
    }

    fn get_current_path(&self) -> String {
        self.tree.full_path(self.current).to_string_lossy().into_owned()
    }
}

#[derive(Debug, PartialEq)]
enum BrowserAction {
    Continue,
    Quit,
}

/// Run the interactive browser over an already-scanned or imported `Tree`.
pub fn run_browser(tree: Tree, config: Config) -> Result<()> {
    let mut browser = Browser::new(tree, config)?;
    browser.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tree;

    fn small_tree() -> Tree {
        let mut tree = Tree::new(b"root".to_vec(), 0);
        let dev_id = tree.get(tree.root).dev_id;
        tree.insert_child(
            tree.root,
            crate::model::Entry {
                name: b"a".to_vec(),
                size: 0,
                blocks: 0,
                dev_id,
                next: None,
                parent: None,
                ext: None,
                is_root: false,
                kind: EntryKind::Dir(Default::default()),
            },
        );
        tree.insert_child(
            tree.root,
            crate::model::Entry {
                name: b"b".to_vec(),
                size: 100,
                blocks: 1,
                dev_id,
                next: None,
                parent: None,
                ext: None,
                is_root: false,
                kind: EntryKind::File(Default::default()),
            },
        );
        tree
    }

    #[test]
    fn browser_starts_at_root_with_sorted_children() {
        let tree = small_tree();
        let config = Config::default();
        let root = tree.root;
        let children = sorted_children(&tree, root, &config);
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn entering_and_leaving_a_directory_restores_parent_listing() {
        let tree = small_tree();
        let config = Config::default();
        let root = tree.root;
        let children = sorted_children(&tree, root, &config);
        let mut browser = Browser {
            children: children.clone(),
            current: root,
            path_stack: Vec::new(),
            selected_index: 0,
            scroll_offset: 0,
            config,
            terminal_height: 24,
            terminal_width: 80,
            show_help: false,
            status: None,
            tree,
        };
        browser.enter_selected();
        if browser.current != root {
            browser.go_back();
        }
        assert_eq!(browser.current, root);
    }
}
