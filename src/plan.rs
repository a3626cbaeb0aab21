//! Weekly plan synthesis.
//!
//! Builds a 7-day schedule and ranked suggestions from the learner's own
//! progress, then layers on cohort comparisons and the classifier's pick.
//! Every input except the profile is optional; the output is always a full
//! week.

use chrono::{DateTime, Utc};

use crate::fields::{normalize_course_area, resolve_interest, weekday_name, FieldId, Proficiency, WEEKDAYS};
use crate::models::{
    round_places, CohortInsights, DaySlot, LearnerProfile, NextTopic, StudyPlan, Suggestion,
    SuggestionKind,
};

pub const TARGET_WEEKLY_HOURS: f64 = 10.0;
pub const MIN_SLOT_HOURS: f64 = 0.5;
pub const MAX_SLOT_HOURS: f64 = 2.0;
/// Final scores below this still need work.
pub const NEEDS_WORK_BELOW: f64 = 70.0;
pub const LOW_SCORE_BELOW: f64 = 50.0;
pub const BASE_SUGGESTION_LIMIT: usize = 10;
pub const SUGGESTION_LIMIT: usize = 12;
/// Weekly hours under which a consistency nudge is added.
pub const CONSISTENCY_HOURS: f64 = 5.0;
const WEAK_TOPICS_SHOWN: usize = 5;
const FALLBACK_FOCUS: [&str; 2] = ["Your interests", "Quizzes & resources"];

/// Fields without a final score or with one below [`NEEDS_WORK_BELOW`], in
/// field order.
pub fn needs_work(profile: &LearnerProfile) -> Vec<FieldId> {
    FieldId::ALL
        .into_iter()
        .filter(|field| match profile.study_stats.final_score(*field) {
            None => true,
            Some(score) => score < NEEDS_WORK_BELOW,
        })
        .collect()
}

/// Focus topics for the week: fields needing work, then interests that map
/// to a field, without duplicates.
pub fn focus_topics(profile: &LearnerProfile) -> Vec<String> {
    let interest_fields = profile
        .interests()
        .iter()
        .filter_map(|interest| resolve_interest(interest))
        .collect::<Vec<_>>();

    let mut topics: Vec<String> = Vec::new();
    for field in needs_work(profile).into_iter().chain(interest_fields) {
        let name = field.display_name();
        if !topics.iter().any(|topic| topic == name) {
            topics.push(name.to_string());
        }
    }

    if topics.is_empty() {
        topics.extend(FALLBACK_FOCUS.iter().map(|topic| topic.to_string()));
    }
    topics
}

pub fn build_schedule(profile: &LearnerProfile) -> Vec<DaySlot> {
    let topics = focus_topics(profile);
    let any_needs_work = !needs_work(profile).is_empty();
    let slot_hours = (TARGET_WEEKLY_HOURS / WEEKDAYS.len() as f64).clamp(MIN_SLOT_HOURS, MAX_SLOT_HOURS);

    WEEKDAYS
        .iter()
        .enumerate()
        .map(|(day, name)| {
            let logged = profile.study_stats.weekly_hours[day];
            let suggested = (slot_hours - logged).max(0.0);
            let reason = if suggested <= 0.0 {
                "You've logged time today"
            } else if any_needs_work {
                "Prioritise weak / incomplete fields"
            } else {
                "Stay consistent"
            };

            DaySlot {
                day: name.to_string(),
                focus: topics[day % topics.len()].clone(),
                suggested_hours: (suggested * 2.0).round() / 2.0,
                already_logged: round_places(logged, 1),
                reason: reason.to_string(),
            }
        })
        .collect()
}

fn field_suggestion(kind: SuggestionKind, field: FieldId, message: String, priority: u8) -> Suggestion {
    Suggestion {
        kind,
        field_id: Some(field.as_str().to_string()),
        field_name: Some(field.display_name().to_string()),
        message,
        priority,
    }
}

fn general_suggestion(kind: SuggestionKind, message: String, priority: u8) -> Suggestion {
    Suggestion {
        kind,
        field_id: None,
        field_name: None,
        message,
        priority,
    }
}

/// Suggestions drawn from the learner's own progress, best first, at most
/// [`BASE_SUGGESTION_LIMIT`].
pub fn build_suggestions(profile: &LearnerProfile) -> Vec<Suggestion> {
    let stats = &profile.study_stats;
    let mut suggestions: Vec<Suggestion> = FieldId::ALL
        .into_iter()
        .filter_map(|field| {
            let name = field.display_name();
            let Some(score) = stats.final_score(field) else {
                return Some(field_suggestion(
                    SuggestionKind::TakeFinal,
                    field,
                    format!("You haven't taken the {name} final yet. Add it to your plan to track proficiency."),
                    1,
                ));
            };

            if score < LOW_SCORE_BELOW {
                return Some(field_suggestion(
                    SuggestionKind::Improve,
                    field,
                    format!("Your {name} final score is {score}%. Review resources and retake quizzes to improve."),
                    1,
                ));
            }
            if score < NEEDS_WORK_BELOW {
                return Some(field_suggestion(
                    SuggestionKind::Improve,
                    field,
                    format!("Your {name} score is {score}%. A bit more practice (e.g. retake quizzes) could get you to Advanced."),
                    2,
                ));
            }

            match Proficiency::from_score(score) {
                tier @ (Proficiency::Advanced | Proficiency::Expert) => Some(field_suggestion(
                    SuggestionKind::OnTrack,
                    field,
                    format!(
                        "You're on track in {name} ({}). Consider helping peers or exploring the next field.",
                        tier.as_str()
                    ),
                    3,
                )),
                _ => None,
            }
        })
        .collect();

    let weak = profile.weak_topic_list();
    if !weak.is_empty() {
        let shown = weak.iter().take(WEAK_TOPICS_SHOWN).cloned().collect::<Vec<_>>().join(", ");
        let more = if weak.len() > WEAK_TOPICS_SHOWN { "…" } else { "" };
        suggestions.push(general_suggestion(
            SuggestionKind::WeakTopics,
            format!("You marked these as weak: {shown}{more}. Allocate extra time this week."),
            1,
        ));
    }

    if stats.hours_this_week() < CONSISTENCY_HOURS && stats.total_hours > 0.0 {
        suggestions.push(general_suggestion(
            SuggestionKind::Consistency,
            "This week you've logged fewer hours than usual. Try to fit in at least one session.".to_string(),
            2,
        ));
    }

    suggestions.sort_by_key(|suggestion| suggestion.priority);
    suggestions.truncate(BASE_SUGGESTION_LIMIT);
    suggestions
}

/// Adds "students like you" suggestions from cohort statistics. Without
/// insights the suggestions are returned untouched.
pub fn apply_cohort_insights(
    mut suggestions: Vec<Suggestion>,
    profile: &LearnerProfile,
    insights: Option<&CohortInsights>,
) -> Vec<Suggestion> {
    let Some(insights) = insights else {
        return suggestions;
    };

    let area = normalize_course_area(profile.course_area.as_deref());
    let cohort = insights.cohort_for(&area);
    if cohort.n > 0 {
        if let Some(&top_day) = cohort.peak_days.first() {
            suggestions.push(general_suggestion(
                SuggestionKind::Cohort,
                format!(
                    "Students in your field often study most on {}. Consider matching that rhythm.",
                    weekday_name(top_day)
                ),
                2,
            ));
        }
        if cohort.avg_total_hours > 0.0 {
            suggestions.push(general_suggestion(
                SuggestionKind::Cohort,
                format!(
                    "Peers in {area} average {}h total study. Keep building your streak.",
                    cohort.avg_total_hours
                ),
                3,
            ));
        }
    }

    let global = &insights.global;
    if global.n > 1 && !global.peak_days.is_empty() {
        let busiest = global
            .peak_days
            .iter()
            .take(2)
            .map(|day| weekday_name(*day))
            .collect::<Vec<_>>()
            .join(" and ");
        suggestions.push(general_suggestion(
            SuggestionKind::Cohort,
            format!("Based on all users, the busiest study days are {busiest}."),
            3,
        ));
    }

    suggestions.sort_by_key(|suggestion| suggestion.priority);
    suggestions.truncate(SUGGESTION_LIMIT);
    suggestions
}

/// Puts the classifier's pick first. Inserting before truncation means it
/// pushes out the lowest-ranked entry when the list is full.
pub fn apply_next_topic(mut suggestions: Vec<Suggestion>, next: Option<&NextTopic>) -> Vec<Suggestion> {
    let Some(next) = next.filter(|next| !next.field_id.is_empty() && !next.field_name.is_empty()) else {
        return suggestions;
    };

    suggestions.insert(
        0,
        Suggestion {
            kind: SuggestionKind::Ml,
            field_id: Some(next.field_id.clone()),
            field_name: Some(next.field_name.clone()),
            message: format!(
                "Our ML model suggests focusing on {} next, based on your progress and similar learners.",
                next.field_name
            ),
            priority: 1,
        },
    );
    suggestions.truncate(SUGGESTION_LIMIT);
    suggestions
}

pub fn generate(
    profile: &LearnerProfile,
    insights: Option<&CohortInsights>,
    next: Option<&NextTopic>,
) -> StudyPlan {
    generate_at(profile, insights, next, Utc::now())
}

pub fn generate_at(
    profile: &LearnerProfile,
    insights: Option<&CohortInsights>,
    next: Option<&NextTopic>,
    generated_at: DateTime<Utc>,
) -> StudyPlan {
    let suggestions = apply_cohort_insights(build_suggestions(profile), profile, insights);
    StudyPlan {
        schedule: build_schedule(profile),
        suggestions: apply_next_topic(suggestions, next),
        generated_at,
    }
}
