//! rsdu - A disk usage analyzer with an ncurses interface
//!
//! This is a Rust implementation of ncdu (NCurses Disk Usage), providing
//! fast directory scanning and an interactive terminal interface for
//! exploring disk usage.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Instant;

mod browser;
mod cli;
mod config;
mod error;
mod export;
mod import;
mod model;
mod scanner;
mod tui;
mod utils;

use cli::Args;
use config::{Config, ScanUi};
use scanner::{ScanObserver, ScanOptions};
use tui::TuiApp;

const PROGNAME: &str = "rsdu";
const PROGVER: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    let args = Args::parse();
    args.validate().map_err(|e| anyhow::anyhow!(e))?;
    let mut config = Config::from_args(&args)?;

    if let Some(import_file) = args.import_file.clone() {
        return handle_import(&import_file, config);
    }

    let scan_path = resolve_scan_path(args.directory.as_deref())?;

    if config.export_json.is_some() || config.export_binary.is_some() {
        return handle_export(&scan_path, config);
    }

    if config.scan_ui.is_none() {
        config.scan_ui = Some(if atty::is(atty::Stream::Stdout) {
            ScanUi::Full
        } else {
            ScanUi::None
        });
    }

    run_interactive(scan_path, config)
}

fn resolve_scan_path(dir: Option<&Path>) -> Result<PathBuf> {
    let dir = dir.unwrap_or_else(|| Path::new("."));
    dir.canonicalize()
        .with_context(|| format!("cannot access directory '{}'", dir.display()))
}

/// A `ScanObserver` that drives an indeterminate `indicatif` spinner on
/// stderr, throttled by `config.update_delay` (ScanUi::Line), or does
/// nothing at all (ScanUi::None).
struct LineObserver {
    bar: Option<indicatif::ProgressBar>,
    last_update: Instant,
    delay: std::time::Duration,
}

impl LineObserver {
    fn new(delay: std::time::Duration, quiet: bool) -> Self {
        let bar = if quiet {
            None
        } else {
            let bar = indicatif::ProgressBar::new_spinner();
            bar.set_style(indicatif::ProgressStyle::default_spinner());
            Some(bar)
        };
        Self { bar, last_update: Instant::now(), delay }
    }

    fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

impl ScanObserver for LineObserver {
    fn tick(&mut self, current_path: &str, items_seen: u64) -> bool {
        if let Some(bar) = &self.bar {
            if self.last_update.elapsed() >= self.delay {
                bar.set_message(format!("{} items, scanning {}", items_seen, current_path));
                bar.tick();
                self.last_update = Instant::now();
            }
        }
        false
    }
}

/// Handle `--export-json`/`--export-binary`: a streaming scan straight to
/// the dump writer, never materializing a `Tree` (§4.2 "File sink").
fn handle_export(scan_path: &Path, config: Config) -> Result<()> {
    let opts = ScanOptions::from_config(&config).map_err(|e| anyhow::anyhow!("{}", e))?;
    let (out_path, compress) = if let Some(p) = &config.export_binary {
        (p.clone(), true)
    } else {
        (config.export_json.clone().unwrap(), config.compress)
    };

    let writer = export::create_dump_writer(&out_path, compress, config.compress_level as i32)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let metadata = export::DumpMetadata::now(PROGNAME, PROGVER);
    let quiet = matches!(config.scan_ui, Some(ScanUi::None)) || out_path == "-";
    let mut observer = LineObserver::new(config.update_delay, quiet);

    scanner::scan_root_to_writer(scan_path, &opts, writer, metadata, &mut observer)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    observer.finish();
    Ok(())
}

/// Handle `-f FILE` / `--import FILE`: parse the dump into a `Tree` and
/// either re-emit it through an export writer (dump-to-dump conversion)
/// or open it for browsing.
fn handle_import(import_file: &str, mut config: Config) -> Result<()> {
    config.imported = true;
    let path = PathBuf::from(import_file);

    if config.export_json.is_some() || config.export_binary.is_some() {
        let (out_path, compress) = if let Some(p) = &config.export_binary {
            (p.clone(), true)
        } else {
            (config.export_json.clone().unwrap(), config.compress)
        };
        let reader = import::open_dump_reader(&path).map_err(|e| anyhow::anyhow!("{}", e))?;
        let writer = export::create_dump_writer(&out_path, compress, config.compress_level as i32)
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        let metadata = export::DumpMetadata::now(PROGNAME, PROGVER);
        import::import_to_writer(reader, writer, metadata, &mut scanner::NullObserver)
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        return Ok(());
    }

    let mut observer = LineObserver::new(config.update_delay, !atty::is(atty::Stream::Stderr));
    let tree = import::import_dump(&path, &mut observer).map_err(|e| anyhow::anyhow!("{}", e))?;
    if !atty::is(atty::Stream::Stdout) {
        print_summary(&tree);
        return Ok(());
    }
    browser::run_browser(tree, config).map_err(|e| anyhow::anyhow!("{}", e))
}

/// Scan (interactively, unless stdout isn't a terminal) then browse.
fn run_interactive(scan_path: PathBuf, config: Config) -> Result<()> {
    match config.scan_ui {
        Some(ScanUi::Full) if atty::is(atty::Stream::Stdout) => {
            let mut app = TuiApp::new(config)?;
            app.run_scan_and_browse(scan_path)?;
        }
        _ => {
            let opts = ScanOptions::from_config(&config).map_err(|e| anyhow::anyhow!("{}", e))?;
            let quiet = matches!(config.scan_ui, Some(ScanUi::None));
            let mut observer = LineObserver::new(config.update_delay, quiet);
            let tree = scanner::scan_root(&scan_path, &opts, &mut observer)
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            observer.finish();
            if atty::is(atty::Stream::Stdout) {
                browser::run_browser(tree, config).map_err(|e| anyhow::anyhow!("{}", e))?;
            } else {
                print_summary(&tree);
            }
        }
    }
    Ok(())
}

fn print_summary(tree: &model::Tree) {
    let root = tree.get(tree.root);
    println!(
        "{}\t{}\t{}",
        utils::format_file_size(root.size, false),
        utils::format_blocks(root.blocks, false),
        String::from_utf8_lossy(&root.name)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_scan_path_defaults_to_cwd() {
        let resolved = resolve_scan_path(None).unwrap();
        assert!(resolved.is_absolute());
    }
}
