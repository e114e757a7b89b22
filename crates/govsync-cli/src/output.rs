use colored::Colorize;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::apply::{ApplyReport, Status};

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

pub fn print_report(report: &ApplyReport) {
    if report.resources.is_empty() {
        println!("No resources in manifest.");
        return;
    }
    println!("{}", render_table(report));
    println!("{}", summary(report));
}

fn render_table(report: &ApplyReport) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Handle", "Kind", "Key", "Status", "ID", "Detail"]);
    for resource in &report.resources {
        builder.push_record([
            resource.handle.clone(),
            resource.kind.clone(),
            resource.key.clone(),
            colored_status(resource.status),
            resource.identifier.clone().unwrap_or_else(|| "-".into()),
            resource.detail.clone().unwrap_or_default(),
        ]);
    }
    builder.build().with(Style::rounded()).to_string()
}

fn colored_status(status: Status) -> String {
    let text = status.to_string();
    match status {
        Status::Created | Status::Removed => text.green().to_string(),
        Status::Updated => text.cyan().to_string(),
        Status::Unchanged | Status::Absent => text.dimmed().to_string(),
        Status::Pending => text.yellow().to_string(),
        Status::Failed | Status::Skipped => text.red().to_string(),
    }
}

pub fn summary(report: &ApplyReport) -> String {
    let counts = [
        Status::Created,
        Status::Updated,
        Status::Unchanged,
        Status::Pending,
        Status::Removed,
        Status::Absent,
        Status::Failed,
        Status::Skipped,
    ]
    .into_iter()
    .filter_map(|status| match report.count(status) {
        0 => None,
        n => Some(format!("{n} {status}")),
    })
    .collect::<Vec<_>>();
    format!("{}: {}", "Summary".cyan(), counts.join(", "))
}
