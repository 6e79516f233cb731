//! Console rendering of run summaries

use std::fmt::Write as _;

use gatebench_core::{ResultDocument, RunSummary};

const RULE: &str = "══════════════════════════════════════════════════════════════";

fn row(out: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "║ {:<19}{:>41} ║", label, value.to_string());
}

/// Boxed report for one target's run
pub fn render_report(name: &str, summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n╔{}╗", RULE);
    let _ = writeln!(out, "║ {:^60} ║", format!("{} RESULTS", truncate(&name.to_uppercase(), 52)));
    let _ = writeln!(out, "╠{}╣", RULE);
    row(&mut out, "Duration:", format!("{:.2} s", summary.duration_secs));
    row(&mut out, "Total Requests:", summary.requests);
    row(&mut out, "Successful:", summary.success_count);
    row(&mut out, "Failed:", summary.failure_count);
    row(&mut out, "Success Rate:", format!("{:.2}%", summary.success_rate));
    row(&mut out, "Request Rate:", format!("{:.2} req/s", summary.rate));
    row(&mut out, "Throughput:", format!("{:.2} req/s", summary.throughput_rps));

    let _ = writeln!(out, "╠{}╣", RULE);
    let _ = writeln!(out, "║ {:<60} ║", "LATENCY (milliseconds)");
    row(&mut out, "  mean:", format!("{:.2}", summary.mean_latency_ms));
    row(&mut out, "  p50:", format!("{:.2}", summary.p50_latency_ms));
    row(&mut out, "  p99:", format!("{:.2}", summary.p99_latency_ms));
    row(&mut out, "  min:", format!("{:.2}", summary.min_latency_ms));
    row(&mut out, "  max:", format!("{:.2}", summary.max_latency_ms));

    let _ = writeln!(out, "╠{}╣", RULE);
    let _ = writeln!(out, "║ {:<60} ║", "SERVER MEMORY");
    if summary.has_memory_data() {
        row(&mut out, "  peak:", format!("{:.2} MB", summary.server_peak_memory_mb));
        row(&mut out, "  average:", format!("{:.2} MB", summary.server_avg_memory_mb));
        row(&mut out, "  samples:", summary.memory_samples);
    } else {
        let _ = writeln!(out, "║ {:<60} ║", "  No server memory statistics available");
    }

    if !summary.status_code_counts.is_empty() {
        let _ = writeln!(out, "╠{}╣", RULE);
        let _ = writeln!(out, "║ {:<60} ║", "STATUS CODES");
        for (status, count) in &summary.status_code_counts {
            row(&mut out, &format!("  {}", truncate(status, 17)), count);
        }
    }

    if !summary.drop_reasons.is_empty() {
        let _ = writeln!(out, "╠{}╣", RULE);
        let _ = writeln!(out, "║ {:<60} ║", "ERRORS");
        for (reason, count) in &summary.drop_reasons {
            let _ = writeln!(out, "║   {:<46}{:>12} ║", truncate(reason, 45), count);
        }
    }

    let _ = writeln!(out, "╚{}╝", RULE);
    out
}

pub fn print_report(name: &str, summary: &RunSummary) {
    println!("{}", render_report(name, summary));
}

/// One row per stored target, in document order
pub fn render_comparison(document: &ResultDocument) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", RULE);
    let _ = writeln!(out, "{:^62}", "COMPARISON");
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(
        out,
        "{:<14}{:>9}{:>9}{:>10}{:>10}{:>10}",
        "target", "req/s", "ok %", "mean ms", "p99 ms", "peak MB"
    );

    for name in document.names() {
        match document.get(name) {
            Some(summary) => {
                let peak = if summary.has_memory_data() || summary.server_peak_memory_mb > 0.0 {
                    format!("{:.1}", summary.server_peak_memory_mb)
                } else {
                    "-".to_string()
                };
                let _ = writeln!(
                    out,
                    "{:<14}{:>9.1}{:>9.2}{:>10.2}{:>10.2}{:>10}",
                    truncate(name, 13),
                    summary.throughput_rps,
                    summary.success_rate,
                    summary.mean_latency_ms,
                    summary.p99_latency_ms,
                    peak
                );
            }
            None => {
                let _ = writeln!(out, "{:<14}{:>48}", truncate(name, 13), "unreadable entry");
            }
        }
    }
    let _ = writeln!(out, "{}", RULE);
    out
}

pub fn print_comparison(document: &ResultDocument) {
    println!("{}", render_comparison(document));
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut cut: String = s.chars().take(max.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}
