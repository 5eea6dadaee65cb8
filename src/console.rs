//! Colorful console output for scheduling runs.
//!
//! Everything here prints only when the `console` feature is enabled.

use num_format::{Locale, ToFormattedString};
use owo_colors::OwoColorize;
use std::time::{Duration, Instant};

use crate::engine::{PhaseReport, ScheduleSummary};

fn enabled() -> bool {
    cfg!(feature = "console")
}

/// ASCII art banner for server startup.
pub fn print_banner() {
    if !enabled() {
        return;
    }
    let banner = r#"
  _   _                        ____       _              _       _
 | \ | |_   _ _ __ ___  ___   / ___|  ___| |__   ___  __| |_   _| | ___
 |  \| | | | | '__/ __|/ _ \  \___ \ / __| '_ \ / _ \/ _` | | | | |/ _ \
 | |\  | |_| | |  \__ \  __/   ___) | (__| | | |  __/ (_| | |_| | |  __/
 |_| \_|\__,_|_|  |___/\___|  |____/ \___|_| |_|\___|\__,_|\__,_|_|\___|
"#;
    println!("{}", banner.cyan().bold());
    println!(
        "  {} {}\n",
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black(),
        "Nurse Shift Allocation".bright_cyan()
    );
}

/// Prints the size of the problem about to be scheduled.
pub fn print_problem(ward: &str, period: &str, staff: usize, shift_types: usize, days: u32) {
    if !enabled() {
        return;
    }
    let slots = shift_types * days as usize;
    println!(
        "{} {} {} Problem: ward ({}), period ({}), staff ({}), shift types ({}), slots ({})",
        timestamp().bright_black(),
        "INFO".bright_green(),
        "[Engine]".bright_cyan(),
        ward.white().bold(),
        period.white(),
        staff.to_formatted_string(&Locale::en).bright_yellow(),
        shift_types.to_formatted_string(&Locale::en).bright_yellow(),
        slots.to_formatted_string(&Locale::en).bright_yellow()
    );
}

/// Prints a phase start message.
pub fn print_phase_start(phase_name: &str, phase_index: usize) {
    if !enabled() {
        return;
    }
    println!(
        "{} {} {} {} phase ({}) started",
        timestamp().bright_black(),
        "INFO".bright_green(),
        format!("[{}]", phase_name).bright_cyan(),
        phase_name.white().bold(),
        phase_index.to_string().yellow()
    );
}

/// Prints a phase end message with candidate and commit counts.
pub fn print_phase_end(phase_name: &str, phase_index: usize, duration: Duration, report: &PhaseReport) {
    if !enabled() {
        return;
    }
    let commit_rate = if report.attempts > 0 {
        (report.commits as f64 / report.attempts as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "{} {} {} {} phase ({}) ended: time spent ({}), candidates ({}), commits ({}, {:.1}% accepted)",
        timestamp().bright_black(),
        "INFO".bright_green(),
        format!("[{}]", phase_name).bright_cyan(),
        phase_name.white().bold(),
        phase_index.to_string().yellow(),
        format_duration(duration).yellow(),
        report.attempts.to_formatted_string(&Locale::en).bright_magenta().bold(),
        report.commits.to_formatted_string(&Locale::en).white(),
        commit_rate
    );
}

/// Prints a warning line, e.g. an optimizer fallback.
pub fn print_warning(message: &str) {
    if !enabled() {
        return;
    }
    println!(
        "{} {} {} {}",
        timestamp().bright_black(),
        "WARN".bright_yellow(),
        "[Engine]".bright_cyan(),
        message
    );
}

/// Prints the run summary box.
pub fn print_run_ended(total_duration: Duration, summary: &ScheduleSummary) {
    if !enabled() {
        return;
    }
    println!(
        "{} {} {} Scheduling ended: time spent ({}), assignments ({}), phase total ({})",
        timestamp().bright_black(),
        "INFO".bright_green(),
        "[Engine]".bright_cyan(),
        format_duration(total_duration).yellow(),
        summary.total_assigned.to_formatted_string(&Locale::en).bright_magenta().bold(),
        summary.phases.len().to_string().white()
    );

    // 60 chars wide, 56 char content area
    println!();
    println!("{}", "╔══════════════════════════════════════════════════════════╗".bright_cyan());

    let complete = summary.is_complete();
    let status_text = if complete {
        "✓ ALL SLOTS COVERED"
    } else {
        "✗ SCHEDULE HAS GAPS"
    };
    let status_colored = if complete {
        status_text.bright_green().bold().to_string()
    } else {
        status_text.bright_red().bold().to_string()
    };
    let status_padding = 56 - status_text.chars().count();
    let left_pad = status_padding / 2;
    let right_pad = status_padding - left_pad;
    println!(
        "{}{}{}{}{}",
        "║".bright_cyan(),
        " ".repeat(left_pad),
        status_colored,
        " ".repeat(right_pad),
        "║".bright_cyan()
    );

    println!("{}", "╠══════════════════════════════════════════════════════════╣".bright_cyan());

    let rows = [
        ("Assignments:", summary.total_assigned.to_formatted_string(&Locale::en)),
        ("Understaffed slots:", summary.understaffed.len().to_string()),
        ("Senior shortfalls:", summary.senior_shortfalls.len().to_string()),
        ("Below minimum:", summary.below_minimum.to_string()),
        ("Above target:", summary.above_target.to_string()),
        ("Rule errors:", summary.rule_errors.len().to_string()),
        ("Run time:", format!("{:.2}s", total_duration.as_secs_f64())),
    ];
    for (label, value) in rows {
        println!("{}  {:<20}{:>34}  {}", "║".bright_cyan(), label, value, "║".bright_cyan());
    }

    println!("{}", "╚══════════════════════════════════════════════════════════╝".bright_cyan());
    println!();
}

/// Formats a duration nicely.
fn format_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms < 1000 {
        format!("{}ms", total_ms)
    } else if total_ms < 60_000 {
        format!("{:.2}s", d.as_secs_f64())
    } else {
        let mins = total_ms / 60_000;
        let secs = (total_ms % 60_000) / 1000;
        format!("{}m {}s", mins, secs)
    }
}

/// Returns a timestamp string.
fn timestamp() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| format!("{}.{:03}", d.as_secs(), d.subsec_millis()))
        .unwrap_or_else(|_| "0.000".to_string())
}

/// A timer around one engine phase.
pub struct PhaseTimer {
    start: Instant,
    phase_name: String,
    phase_index: usize,
}

impl PhaseTimer {
    pub fn start(phase_name: impl Into<String>, phase_index: usize) -> Self {
        let name = phase_name.into();
        print_phase_start(&name, phase_index);
        Self {
            start: Instant::now(),
            phase_name: name,
            phase_index,
        }
    }

    pub fn finish(self, report: &PhaseReport) {
        print_phase_end(&self.phase_name, self.phase_index, self.start.elapsed(), report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }
}
