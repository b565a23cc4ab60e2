use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    InitResult, MergeReport, ProgressEvent, ProgressSink, ShowResult, Status, UpdateResult,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_update(result: &UpdateResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_init(result: &InitResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_show(result: &ShowResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_update(result: &UpdateResult) {
        let green = "\x1b[32m";
        let yellow = "\x1b[33m";
        let cyan = "\x1b[36m";
        let red = "\x1b[31m";
        let reset = "\x1b[0m";

        let color = match result.status {
            Status::Ok => green,
            Status::Impossible => yellow,
            Status::Error => red,
        };
        println!("{color}[{}] {}{reset}", result.status, result.message);
        for report in &result.branches {
            let state = if report.changed { "updated" } else { "unchanged" };
            let merge = match &report.merge {
                MergeReport::NotRequested => String::new(),
                MergeReport::Absent => ", absent".to_string(),
                MergeReport::UpToDate => ", already merged".to_string(),
                MergeReport::Covered { by } => format!(", merged via {by}"),
                MergeReport::Merged { commit_id } => format!(", merged as {}", short(commit_id)),
                MergeReport::Conflict { paths } => format!(", conflict on {}", paths.join(", ")),
                MergeReport::Skipped => ", merge skipped".to_string(),
            };
            let commit = report.commit.as_deref().map(short).unwrap_or("-");
            println!("{cyan}  {} {commit} ({state}{merge}){reset}", report.branch);
        }
        for warning in &result.warnings {
            println!("{yellow}  warning: {warning}{reset}");
        }
    }

    pub fn print_init(result: &InitResult) {
        println!(
            "{} record set for subject {} at {}",
            if result.replaced { "Replaced" } else { "Initialized" },
            result.subject_id,
            result.config_path
        );
        println!("  records: {}", result.records.join(" "));
        println!("  standardized layout: {}", result.use_standard_layout);
    }

    pub fn print_show(result: &ShowResult) {
        println!("subject: {}", result.subject_id);
        println!("records: {}", result.records.join(" "));
        println!("standardized layout: {}", result.use_standard_layout);
        println!("current branch: {}", result.current_branch);
        for state in &result.branches {
            let marker = if state.is_current_checkout { "*" } else { " " };
            let tip = state.tip.as_deref().map(short).unwrap_or("(absent)");
            println!("{marker} {} {tip}", state.name);
        }
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}

fn short(commit: &str) -> &str {
    commit.get(..10).unwrap_or(commit)
}
