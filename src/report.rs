use std::fmt::Write;

use crate::fields::{weekday_name, FieldId};
use crate::models::{CohortInsights, CohortStats, StudyPlan};

pub fn build_plan_report(learner: Option<&str>, plan: &StudyPlan) -> String {
    let mut output = String::new();
    let learner_label = learner.unwrap_or("anonymous learner");

    let _ = writeln!(output, "# Weekly Study Plan");
    let _ = writeln!(
        output,
        "Generated for {} at {}",
        learner_label,
        plan.generated_at.to_rfc3339()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Schedule");
    let _ = writeln!(output, "| Day | Focus | Suggested | Logged | Why |");
    let _ = writeln!(output, "|-----|-------|-----------|--------|-----|");

    for slot in plan.schedule.iter() {
        let _ = writeln!(
            output,
            "| {} | {} | {:.1}h | {:.1}h | {} |",
            slot.day, slot.focus, slot.suggested_hours, slot.already_logged, slot.reason
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Suggestions");

    if plan.suggestions.is_empty() {
        let _ = writeln!(output, "Nothing to add this week.");
    } else {
        for suggestion in plan.suggestions.iter() {
            let _ = writeln!(output, "- (P{}) {}", suggestion.priority, suggestion.message);
        }
    }

    output
}

fn describe_peaks(stats: &CohortStats) -> String {
    if stats.peak_days.is_empty() {
        return "none".to_string();
    }
    stats
        .peak_days
        .iter()
        .map(|day| weekday_name(*day))
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_cohort_line(output: &mut String, label: &str, stats: &CohortStats) {
    let weekly: f64 = stats.avg_weekly_hours.iter().sum();
    let _ = writeln!(
        output,
        "- {}: {} learners, {:.2}h avg total, {:.2}h avg this week, peak days {}",
        label,
        stats.n,
        stats.avg_total_hours,
        weekly,
        describe_peaks(stats)
    );
}

pub fn build_cohort_report(insights: &CohortInsights) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Cohort Insights");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overall");
    write_cohort_line(&mut output, "All learners", &insights.global);

    let _ = writeln!(output);
    let _ = writeln!(output, "## By Course Area");

    if insights.by_course_area.is_empty() {
        let _ = writeln!(output, "No learners recorded yet.");
    } else {
        let mut areas: Vec<(&String, &CohortStats)> = insights.by_course_area.iter().collect();
        areas.sort_by(|a, b| b.1.n.cmp(&a.1.n));
        for (area, stats) in areas {
            write_cohort_line(&mut output, area, stats);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Fields Engaged");

    if insights.global.quiz_by_field.is_empty() {
        let _ = writeln!(output, "No field progress recorded yet.");
    } else {
        for (field, count) in insights.global.quiz_by_field.iter() {
            let name = FieldId::parse(field).map(FieldId::display_name).unwrap_or(field.as_str());
            let completed = insights
                .global
                .activity_quiz_by_field
                .as_ref()
                .and_then(|activity| activity.get(field))
                .copied()
                .unwrap_or(0);
            let _ = writeln!(
                output,
                "- {}: {} learners engaged, {} quizzes completed",
                name, count, completed
            );
        }
    }

    output
}
