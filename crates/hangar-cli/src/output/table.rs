use hangar_core::matching::{MatchDetails, RuleOutcome, StageStatus};
use hangar_core::HangingReport;

pub fn print(report: &HangingReport, verbose: bool) {
    println!("=== {} ===\n", report.protocol_name);

    match &report.selection {
        Some(selection) if selection.fallback => {
            println!("  Protocol: {} (fallback, nothing else matched)", report.protocol_id)
        }
        Some(selection) => println!(
            "  Protocol: {} (score {})",
            report.protocol_id, selection.score
        ),
        None => println!("  Protocol: {} (set manually)", report.protocol_id),
    }

    let status = report
        .stage_statuses
        .get(report.stage_index)
        .map(status_label)
        .unwrap_or("-");
    println!(
        "  Stage:    {} ({}/{}, {})\n",
        report.assignment.stage_name,
        report.stage_index + 1,
        report.stage_count,
        status
    );

    if verbose {
        print_candidates(report);
        if let Some(selection) = &report.selection {
            print_details("  ", &selection.result.details);
            println!();
        }
    }

    println!("  Viewports:");
    for slot in &report.assignment.slots {
        let shared = if slot.allow_reuse { " (shared)" } else { "" };
        match &slot.series {
            Some(series) => {
                println!(
                    "    [{}]{} {}  series {}  image {}",
                    slot.viewport_index,
                    shared,
                    series.series_instance_uid,
                    series.series_score,
                    series.image_index
                );
                if verbose {
                    println!("        study {}", series.study_instance_uid);
                    print_details("        ", &series.details);
                }
            }
            None => println!("    [{}]{} (empty)", slot.viewport_index, shared),
        }
    }
    println!();

    let filled = report.assignment.filled_count();
    let total = report.assignment.slots.len();
    if filled < total {
        println!("  {} of {} viewports filled.\n", filled, total);
    }
}

fn print_candidates(report: &HangingReport) {
    if report.candidates.is_empty() {
        println!("  No protocol qualified.\n");
        return;
    }

    let width = report
        .candidates
        .iter()
        .map(|c| c.protocol_id.len())
        .max()
        .unwrap_or(10);

    println!("  Candidates:");
    for candidate in &report.candidates {
        let marker = if candidate.protocol_id == report.protocol_id {
            " <-"
        } else {
            ""
        };
        println!(
            "    {:<width$}  {}{}",
            candidate.protocol_id,
            candidate.score,
            marker,
            width = width
        );
    }
    println!();
}

fn print_details(indent: &str, details: &MatchDetails) {
    for outcome in &details.passed {
        println!("{indent}+ {}", describe(outcome));
    }
    for outcome in &details.failed {
        let required = if outcome.required { " [required]" } else { "" };
        println!("{indent}- {}{}", describe(outcome), required);
        if let Some(message) = &outcome.message {
            println!("{indent}    {message}");
        }
    }
}

fn describe(outcome: &RuleOutcome) -> String {
    format!(
        "{} {} (weight {})",
        outcome.attribute, outcome.constraint, outcome.weight
    )
}

fn status_label(status: &StageStatus) -> &'static str {
    match status {
        StageStatus::Enabled => "enabled",
        StageStatus::Passive => "passive",
        StageStatus::Disabled => "disabled",
    }
}
