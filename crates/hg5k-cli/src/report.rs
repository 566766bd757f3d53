//! State reports
//!
//! Every view is read-only: it issues administrative commands through the
//! cluster runtime and turns their text output into something readable.

use std::io::Write;

use chrono::{DateTime, Utc};
use clap::ValueEnum;

use hg5k_common::{Generation, Result};

use crate::runtime::{Capability, ClusterRuntime};

/// Report view selected with `--state`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum StateView {
    /// Identity, hosts, racks and service flags (default)
    #[default]
    General,
    /// Filesystem tree and total size
    Files,
    /// Filesystem health report
    Dfs,
    /// Block integrity report
    Dfsblocks,
    /// Job listing
    Mrjobs,
}

impl StateView {
    /// Views backed by filesystem or job administration commands.
    pub fn needs_filesystem(self) -> bool {
        self != StateView::General
    }
}

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Human-readable size: bytes up to 1024, then KB, MB and GB with one decimal.
pub fn format_size(bytes: u64) -> String {
    if bytes > GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes > MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes > KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format a timestamp as a human-readable age (e.g., "2d", "5h", "30m", "15s")
pub fn format_age(timestamp: &DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(*timestamp);
    if duration.num_seconds() < 0 {
        return "0s".to_string();
    }
    if duration.num_days() > 0 {
        return format!("{}d", duration.num_days());
    }
    if duration.num_hours() > 0 {
        return format!("{}h", duration.num_hours());
    }
    if duration.num_minutes() > 0 {
        return format!("{}m", duration.num_minutes());
    }
    format!("{}s", duration.num_seconds())
}

/// Write rows as a column-aligned table with headers.
pub fn write_table(out: &mut dyn Write, headers: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let render = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<width$}", c, width = widths.get(i).copied().unwrap_or(0)))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    writeln!(out, "{}", render(headers.to_vec()))?;
    for row in rows {
        writeln!(out, "{}", render(row.iter().map(String::as_str).collect()))?;
    }
    Ok(())
}

/// Framework log lines interleaved with command output.
fn is_warning(line: &str) -> bool {
    line.starts_with("WARN") || line.contains(" WARN ")
}

fn without_warnings(output: &str) -> String {
    output
        .lines()
        .filter(|l| !is_warning(l))
        .map(|l| format!("{}\n", l))
        .collect()
}

/// Total size from the disk usage command.
///
/// Legacy `fs -dus` prints `<uri>\t<bytes>`, modern `fs -du -s` prints
/// `<bytes> [<raw bytes>] <path>`.
pub fn parse_disk_usage(output: &str, generation: Generation) -> Option<u64> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !is_warning(l))?;
    let mut tokens = line.split_whitespace();
    let figure = match generation {
        Generation::Legacy => tokens.last(),
        Generation::Modern => tokens.next(),
    }?;
    figure.parse().ok()
}

/// Render a recursive listing as an indented tree.
///
/// Only entry lines (permissions first) are kept; directories get a
/// trailing slash.
pub fn render_listing(output: &str) -> String {
    let mut tree = String::new();
    for line in output.lines() {
        let is_dir = line.starts_with('d');
        if !(is_dir || line.starts_with('-')) {
            continue;
        }
        let Some(path) = line.split_whitespace().last() else {
            continue;
        };
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let Some(name) = parts.last() else {
            continue;
        };
        let indent = "  ".repeat(parts.len() - 1);
        let slash = if is_dir { "/" } else { "" };
        tree.push_str(&format!("{}{}{}\n", indent, name, slash));
    }
    tree
}

/// Write the requested view of the cluster to `out`.
pub async fn report(
    runtime: &dyn ClusterRuntime,
    view: StateView,
    out: &mut dyn Write,
    verbose: bool,
) -> Result<()> {
    match view {
        StateView::General => general(runtime, out),
        StateView::Files => files(runtime, out, verbose).await,
        StateView::Dfs => {
            let output = raw(runtime, "dfsadmin -report", verbose).await?;
            write!(out, "{}", without_warnings(&output))?;
            Ok(())
        }
        StateView::Dfsblocks => {
            let output = raw(runtime, "fsck / -files -blocks", verbose).await?;
            write!(out, "{}", output)?;
            Ok(())
        }
        StateView::Mrjobs => {
            let output = raw(runtime, "job -list all", verbose).await?;
            write!(out, "{}", output)?;
            Ok(())
        }
    }
}

async fn raw(runtime: &dyn ClusterRuntime, command: &str, verbose: bool) -> Result<String> {
    Ok(runtime
        .execute(command, None, verbose)
        .await?
        .check(command)?
        .stdout)
}

fn general(runtime: &dyn ClusterRuntime, out: &mut dyn Write) -> Result<()> {
    let handle = runtime.handle();
    let yes_no = |b: bool| if b { "yes" } else { "no" };

    writeln!(out, "{} cluster {}", handle.cluster_type, handle.id)?;
    writeln!(out, "  version      {}", handle.version)?;
    writeln!(out, "  master       {}", handle.master)?;
    writeln!(out, "  initialized  {}", yes_no(handle.initialized))?;
    writeln!(out, "  age          {}", format_age(&handle.created_at))?;
    for service in handle.services() {
        let state = if handle.is_running(*service) {
            "running"
        } else {
            "stopped"
        };
        writeln!(out, "  {:<12} {}", service.to_string(), state)?;
    }
    writeln!(out)?;

    let rows: Vec<Vec<String>> = handle
        .hosts
        .iter()
        .map(|h| {
            vec![
                h.clone(),
                handle.topology.get(h).cloned().unwrap_or_default(),
            ]
        })
        .collect();
    write_table(out, &["HOST", "RACK"], &rows)
}

async fn files(runtime: &dyn ClusterRuntime, out: &mut dyn Write, verbose: bool) -> Result<()> {
    let generation = runtime.handle().generation();
    let (list, du) = match generation {
        Generation::Legacy => ("fs -lsr /", "fs -dus /"),
        Generation::Modern => ("fs -ls -R /", "fs -du -s /"),
    };

    let listing = raw(runtime, list, verbose).await?;
    write!(out, "{}", render_listing(&listing))?;

    let usage = runtime.execute(du, None, verbose).await?;
    let size = usage
        .success
        .then(|| parse_disk_usage(&usage.stdout, generation))
        .flatten();
    if let Some(bytes) = size {
        writeln!(out)?;
        writeln!(out, "Total size: {}", format_size(bytes))?;
    }
    Ok(())
}

/// Whether `view` can be rendered for this runtime.
pub fn supported(runtime: &dyn ClusterRuntime, view: StateView) -> bool {
    !view.needs_filesystem() || runtime.supports(Capability::FilesystemReports)
}
