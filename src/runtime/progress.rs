use crate::config::OutputFormat;
use crate::runtime::{ExecutionResult, RunSummary, TaskStatus};
use std::fmt::Write as _;
use std::io::Write;

/// Logs per-task progress while hosts converge and renders the final
/// summary once the run is over
#[derive(Debug, Clone, Copy)]
pub struct RunReporter {
    format: OutputFormat,
}

impl RunReporter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn report_host_start(&self, host: &str, task_count: usize) {
        tracing::info!("{}: converging {} tasks", host, task_count);
    }

    pub fn report_task_complete(&self, result: &ExecutionResult) {
        match result.status {
            TaskStatus::Failed => tracing::error!(
                "{} [{}] {}: failed: {}",
                result.host,
                result.task_id,
                result.task_name,
                result.message
            ),
            TaskStatus::Skipped => tracing::debug!(
                "{} [{}] {}: skipped ({})",
                result.host,
                result.task_id,
                result.task_name,
                result.message
            ),
            status => tracing::info!(
                "{} [{}] {}: {} in {:?}",
                result.host,
                result.task_id,
                result.task_name,
                status,
                result.duration
            ),
        }
    }

    pub fn write_summary<W: Write>(
        &self,
        summary: &RunSummary,
        out: &mut W,
    ) -> Result<(), std::io::Error> {
        match self.format {
            OutputFormat::Text => out.write_all(render_text(summary).as_bytes()),
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut *out, summary)?;
                out.write_all(b"\n")
            }
        }
    }
}

fn counts_line(counts: &crate::runtime::StatusCounts) -> String {
    format!(
        "changed={} unchanged={} skipped={} failed={}",
        counts.changed, counts.unchanged, counts.skipped, counts.failed
    )
}

/// One line per (host, task), a recap per host, then the totals
pub fn render_text(summary: &RunSummary) -> String {
    let mut text = String::new();
    let width = summary
        .hosts
        .iter()
        .map(|h| h.host.len())
        .max()
        .unwrap_or(0);

    for result in &summary.results {
        let _ = write!(
            text,
            "{:<9} {:<width$}  [{}] {}",
            result.status.to_string(),
            result.host,
            result.task_id,
            result.task_name,
        );
        if !result.message.is_empty() {
            let _ = write!(text, ": {}", result.message);
        }
        text.push('\n');
    }

    text.push_str("\nRECAP\n");
    for host in &summary.hosts {
        let _ = writeln!(
            text,
            "{:<width$}  {}{}",
            host.host,
            counts_line(&host.counts),
            if host.best_effort { " (best effort)" } else { "" },
        );
    }

    let outcome = if summary.aborted {
        "ABORTED"
    } else if summary.success {
        "SUCCESS"
    } else {
        "FAILED"
    };
    let _ = writeln!(
        text,
        "\n{}{}: {} in {:.1}s",
        if summary.check_mode { "CHECK " } else { "" },
        outcome,
        counts_line(&summary.totals),
        summary.duration.as_secs_f64()
    );
    text
}
