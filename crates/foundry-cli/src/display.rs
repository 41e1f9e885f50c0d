//! Display formatting for CLI output

use console::style;
use foundry_component::{ComponentSpec, ComponentStatus, ReconcileAction, ReconcileOutcome};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub fn step(message: impl std::fmt::Display) {
    println!("{} {}", style("→").blue().bold(), message);
}

pub fn success(message: impl std::fmt::Display) {
    println!("{} {}", style("✓").green().bold(), message);
}

pub fn warning(message: impl std::fmt::Display) {
    println!("{} {}", style("⚠").yellow(), message);
}

/// Spinner shown while a reconciliation runs; hidden when stdout is not a terminal
pub fn spinner(message: String) -> ProgressBar {
    if !console::Term::stdout().is_term() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.blue} {msg} {elapsed:.dim}") {
        bar.set_style(template);
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

pub fn print_outcome(outcome: &ReconcileOutcome) {
    let name = style(&outcome.component).cyan();
    match outcome.action {
        ReconcileAction::Planned(action) => {
            let from = outcome
                .previous
                .as_ref()
                .map(|status| format!(" (release is {})", style(status).yellow()))
                .unwrap_or_default();
            println!(
                "{} Dry run: would {} {}{}",
                style("→").blue().bold(),
                style(action).bold(),
                name,
                from
            );
        }
        ReconcileAction::Skipped => {
            success(format!("{} is already installed, nothing to do", name));
        }
        action => {
            let from = outcome
                .previous
                .as_ref()
                .filter(|status| !status.is_deployed())
                .map(|status| format!(" (was {})", style(status).yellow()))
                .unwrap_or_default();
            success(format!("{} {}{}", name, action, from));
        }
    }

    for record in &outcome.dns_records {
        println!(
            "  {} {} → {}",
            style("dns").dim(),
            record.fqdn(),
            style(&record.address).dim()
        );
    }
    for message in &outcome.warnings {
        warning(message);
    }
}

pub fn print_status(name: &str, status: &ComponentStatus) {
    let state = if !status.installed {
        style("not installed").dim()
    } else if status.healthy {
        style("healthy").green()
    } else {
        style("unhealthy").red()
    };
    println!("{}: {}", style(name).cyan().bold(), state);
    if !status.version.is_empty() {
        println!("  {} {}", style("version:").dim(), status.version);
    }
    if !status.message.is_empty() {
        println!("  {} {}", style("message:").dim(), status.message);
    }
}

/// One line per component: name, substrate, recorded state, dependencies
pub fn print_component_table(rows: &[(ComponentSpec, Option<bool>)]) {
    let width = rows.iter().map(|(s, _)| s.name.len()).max().unwrap_or(4).max(4);
    println!(
        "{}",
        style(format!(
            "{:<width$}  {:<16}  {:<13}  DEPENDS ON",
            "NAME", "SUBSTRATE", "STATE"
        ))
        .bold()
    );

    for (spec, recorded) in rows {
        let state = match recorded {
            Some(true) => style(format!("{:<13}", "installed")).green(),
            Some(false) => style(format!("{:<13}", "not installed")).dim(),
            None => style(format!("{:<13}", "-")).dim(),
        };
        let dependencies = if spec.dependencies.is_empty() {
            "-".to_string()
        } else {
            spec.dependencies.join(", ")
        };
        println!(
            "{:<width$}  {:<16}  {}  {}",
            spec.name,
            spec.substrate.to_string(),
            state,
            dependencies
        );
    }
}
