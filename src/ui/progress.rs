//! Batch progress UI.
//!
//! Renders `ScheduleEvent`s in one of three modes:
//! - `full`: progress bars and colors
//! - `minimal`: one line per finished account
//! - `json`: one JSON event per line for machine consumption

use std::io::Write;
use std::time::Duration;

use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::scheduler::{AccountResult, BatchSummary, Role, ScheduleEvent};
use crate::ui::icons::{CHECK, CLOCK, CROSS, KEY, LINK, SEED, SPARKLE, WARN};

/// Output mode for the batch UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    #[default]
    Full,
    Minimal,
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

/// Terminal UI for one batch run.
///
/// Events arrive from a single display task, so no internal locking is
/// needed beyond what `indicatif` does itself.
pub struct BatchUI {
    mode: UiMode,
    multi: MultiProgress,
    batch_bar: ProgressBar,
    group_bar: ProgressBar,
    verbose: bool,
    term: Term,
}

impl BatchUI {
    pub fn new(total_accounts: usize, mode: UiMode, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let batch_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let batch_bar = multi.add(ProgressBar::new(total_accounts as u64));
        batch_bar.set_style(batch_style);
        batch_bar.set_prefix("Accounts");

        let group_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let group_bar = multi.add(ProgressBar::new_spinner());
        group_bar.set_style(group_style);
        group_bar.set_prefix("   Group");

        if mode != UiMode::Full {
            batch_bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
            group_bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        }

        Self {
            mode,
            multi,
            batch_bar,
            group_bar,
            verbose,
            term: Term::stdout(),
        }
    }

    pub fn mode(&self) -> UiMode {
        self.mode
    }

    pub fn handle_event(&self, event: &ScheduleEvent) {
        match self.mode {
            UiMode::Json => self.handle_json(event),
            UiMode::Minimal => self.handle_minimal(event),
            UiMode::Full => self.handle_full(event),
        }
    }

    fn handle_json(&self, event: &ScheduleEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(&self.term, "{}", json);
        }
    }

    fn handle_minimal(&self, event: &ScheduleEvent) {
        match event {
            ScheduleEvent::AccountFinished { result } => {
                let _ = writeln!(&self.term, "{}", result_line(result));
            }
            ScheduleEvent::BatchCompleted { summary } => {
                let _ = writeln!(
                    &self.term,
                    "Done: {}/{} succeeded, {} failed",
                    summary.succeeded, summary.total_accounts, summary.failed
                );
            }
            _ => {}
        }
    }

    fn handle_full(&self, event: &ScheduleEvent) {
        match event {
            ScheduleEvent::BatchStarted { seeds, dependents } => {
                self.print_line(format!(
                    "{}Batch: {} seeds, {} dependents",
                    SPARKLE,
                    style(seeds).cyan().bold(),
                    style(dependents).cyan().bold()
                ));
            }
            ScheduleEvent::GroupStarted { role, accounts } => {
                let icon = match role {
                    Role::Seed => SEED,
                    Role::Dependent => LINK,
                };
                self.group_bar
                    .set_message(format!("{}{} {} accounts", icon, role, accounts));
                self.group_bar
                    .enable_steady_tick(Duration::from_millis(100));
            }
            ScheduleEvent::AccountStarted { display_id, role } => {
                if self.verbose {
                    self.print_line(format!(
                        "    {} {} {}",
                        style("→").dim(),
                        role,
                        style(display_id).dim()
                    ));
                }
            }
            ScheduleEvent::AccountFinished { result } => {
                self.batch_bar.inc(1);
                if !result.success || self.verbose {
                    self.print_line(format!("  {}", result_line(result)));
                }
            }
            ScheduleEvent::CodesAssigned {
                codes,
                groups,
                degraded_groups,
            } => {
                self.print_line(format!(
                    "{}{} codes over {} dependent groups",
                    KEY,
                    style(codes.len()).cyan(),
                    groups
                ));
                if *degraded_groups > 0 {
                    self.print_line(format!(
                        "{}{} groups received no code and will fail the exchange",
                        WARN,
                        style(degraded_groups).yellow().bold()
                    ));
                }
            }
            ScheduleEvent::BatchCompleted { summary } => self.on_batch_completed(summary),
        }
    }

    fn on_batch_completed(&self, summary: &BatchSummary) {
        self.group_bar.finish_and_clear();
        self.batch_bar.finish_and_clear();

        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(60)).cyan()));
        if summary.all_success() {
            self.print_line(format!(
                "{}Batch {} {}",
                SPARKLE,
                style("COMPLETE").green().bold(),
                SPARKLE
            ));
        } else {
            self.print_line(format!(
                "{}Batch finished with {}",
                CROSS,
                style("FAILURES").red().bold()
            ));
        }
        self.print_line(format!("{}", style("═".repeat(60)).cyan()));
        self.print_line(format!(
            "{}Accounts: {}/{} succeeded ({} already complete)",
            CLOCK,
            style(summary.succeeded).green().bold(),
            summary.total_accounts,
            summary.skipped
        ));
        if summary.failed > 0 {
            self.print_line(format!(
                "     {} accounts failed, see error logs",
                style(summary.failed).red().bold()
            ));
        }
        self.print_line(format!(
            "     Duration: {}",
            format_duration(summary.duration)
        ));
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }
}

fn result_line(result: &AccountResult) -> String {
    let icon = if result.success { CHECK } else { CROSS };
    let status = if result.skipped {
        "already complete".to_string()
    } else if result.success {
        format!("done in {}", format_duration(result.duration))
    } else {
        result.error.clone().unwrap_or_else(|| "failed".to_string())
    };
    format!("{}{} {}: {}", icon, result.role, result.display_id, status)
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}
