use std::collections::BTreeMap;

use tracing::debug;

use crate::fields::normalize_course_area;
use crate::models::{
    parse_study_stats, round_places, CohortInsights, CohortStats, EventRow, StudyStats, UserRow,
};

pub const QUIZ_COMPLETED: &str = "quiz_completed";
const PEAK_DAY_COUNT: usize = 3;

/// Running totals for one cohort during the population scan.
#[derive(Debug, Clone, Default)]
struct Tally {
    n: u64,
    weekly_sum: [f64; 7],
    total_hours_sum: f64,
    quiz_by_field: BTreeMap<String, u64>,
}

impl Tally {
    /// Counts the learner; unreadable stats add nothing to the sums.
    fn absorb(&mut self, stats: Option<&StudyStats>) {
        self.n += 1;
        let Some(stats) = stats else {
            return;
        };

        for (sum, hours) in self.weekly_sum.iter_mut().zip(stats.weekly_hours) {
            *sum += hours;
        }
        self.total_hours_sum += stats.total_hours;
        for field in stats.field_progress.keys() {
            *self.quiz_by_field.entry(field.clone()).or_insert(0) += 1;
        }
    }

    fn summarize(self) -> CohortStats {
        let divisor = self.n.max(1) as f64;
        CohortStats {
            n: self.n,
            avg_weekly_hours: self.weekly_sum.map(|sum| round_places(sum / divisor, 2)),
            avg_total_hours: round_places(self.total_hours_sum / divisor, 2),
            peak_days: peak_days(&self.weekly_sum),
            quiz_by_field: self.quiz_by_field,
            activity_quiz_by_field: None,
        }
    }
}

/// Day indices with the largest sums, largest first. Equal sums keep weekday order.
pub fn peak_days(weekly_sum: &[f64; 7]) -> Vec<usize> {
    let mut days: Vec<usize> = (0..weekly_sum.len()).collect();
    days.sort_by(|a, b| {
        weekly_sum[*b]
            .partial_cmp(&weekly_sum[*a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    days.truncate(PEAK_DAY_COUNT);
    days
}

/// Counts `quiz_completed` events per field from their JSON payloads.
pub fn count_activity_quizzes(events: &[EventRow]) -> BTreeMap<String, u64> {
    events
        .iter()
        .filter(|event| event.event_type == QUIZ_COMPLETED)
        .filter_map(|event| {
            let payload: serde_json::Value = serde_json::from_str(event.payload.as_deref()?).ok()?;
            payload
                .get("fieldId")
                .or_else(|| payload.get("field_id"))
                .and_then(serde_json::Value::as_str)
                .filter(|field| !field.is_empty())
                .map(str::to_string)
        })
        .fold(BTreeMap::new(), |mut counts, field| {
            *counts.entry(field).or_insert(0) += 1;
            counts
        })
}

/// Summarizes the learner population per course area and overall.
///
/// Admin rows are skipped. Event rows, when supplied, only feed the global
/// `activity_quiz_by_field` count.
pub fn build(users: &[UserRow], events: Option<&[EventRow]>) -> CohortInsights {
    let (areas, global) = users.iter().filter(|row| !row.is_admin()).fold(
        (BTreeMap::<String, Tally>::new(), Tally::default()),
        |(mut areas, mut global), row| {
            let stats = parse_study_stats(row.study_stats.as_deref());
            let area = normalize_course_area(row.course_area.as_deref());
            areas.entry(area).or_default().absorb(stats.as_ref());
            global.absorb(stats.as_ref());
            (areas, global)
        },
    );

    debug!(learners = global.n, cohorts = areas.len(), "cohort scan complete");

    let mut global = global.summarize();
    global.activity_quiz_by_field = events.map(count_activity_quizzes);

    CohortInsights {
        by_course_area: areas
            .into_iter()
            .map(|(area, tally)| (area, tally.summarize()))
            .collect(),
        global,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(area: Option<&str>, stats: Option<&str>) -> UserRow {
        UserRow {
            id: "u".to_string(),
            role: "user".to_string(),
            course_area: area.map(str::to_string),
            study_stats: stats.map(str::to_string),
            ..UserRow::default()
        }
    }

    fn event(event_type: &str, payload: Option<&str>) -> EventRow {
        EventRow {
            event_type: event_type.to_string(),
            payload: payload.map(str::to_string),
        }
    }

    #[test]
    fn averages_and_peaks_for_a_two_person_cohort() {
        let users = vec![
            user(
                Some("Computing & IT"),
                Some(r#"{"totalHours": 10, "weeklyHours": [2,0,0,0,0,0,0], "fieldProgress": {"ai": {"finalScore": 40}}}"#),
            ),
            user(
                Some("Computing & IT"),
                Some(r#"{"totalHours": 5, "weeklyHours": [0,0,0,4,0,0,0], "fieldProgress": {"ai": {}, "web": {"finalScore": null}}}"#),
            ),
        ];
        let insights = build(&users, None);
        let cohort = &insights.by_course_area["Computing & IT"];

        assert_eq!(cohort.n, 2);
        assert_eq!(cohort.avg_weekly_hours, [1.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0]);
        assert_eq!(cohort.avg_total_hours, 7.5);
        assert_eq!(cohort.peak_days, vec![3, 0, 1]);
        assert_eq!(cohort.quiz_by_field["ai"], 2);
        assert_eq!(cohort.quiz_by_field["web"], 1);
        assert_eq!(insights.global.n, 2);
        assert_eq!(insights.global.activity_quiz_by_field, None);
    }

    #[test]
    fn empty_population_has_no_division_by_zero() {
        let insights = build(&[], None);
        assert!(insights.by_course_area.is_empty());
        assert_eq!(insights.global.n, 0);
        assert_eq!(insights.global.avg_weekly_hours, [0.0; 7]);
        assert_eq!(insights.global.avg_total_hours, 0.0);
        assert_eq!(insights.global.peak_days, vec![0, 1, 2]);
    }

    #[test]
    fn malformed_rows_count_but_add_nothing() {
        let users = vec![
            user(Some("Law"), Some("{oops")),
            user(Some("Law"), None),
            user(Some("Law"), Some(r#"{"totalHours": 9, "weeklyHours": [0,0,0,0,3,0,0]}"#)),
        ];
        let cohort = build(&users, None).by_course_area["Law"].clone();
        assert_eq!(cohort.n, 3);
        assert_eq!(cohort.avg_total_hours, 3.0);
        assert_eq!(cohort.avg_weekly_hours[4], 1.0);
        assert_eq!(cohort.peak_days[0], 4);
    }

    #[test]
    fn odd_nested_values_still_contribute_hours_and_fields() {
        let users = vec![user(
            Some("Computing & IT"),
            Some(r#"{"totalHours": 40, "weeklyHours": [5,0,0,0,0,0,0],
                "fieldProgress": {"ai": {"finalScore": 95, "proficiency": "expert"},
                                  "ml": {"quizScores": {"q1": null}}}}"#),
        )];
        let insights = build(&users, None);
        let cohort = &insights.by_course_area["Computing & IT"];

        assert_eq!(cohort.avg_total_hours, 40.0);
        assert_eq!(cohort.avg_weekly_hours[0], 5.0);
        assert_eq!(cohort.quiz_by_field["ai"], 1);
        assert_eq!(cohort.quiz_by_field["ml"], 1);
        assert_eq!(insights.global.avg_total_hours, 40.0);
    }

    #[test]
    fn averages_round_to_two_places() {
        let users = vec![
            user(None, Some(r#"{"totalHours": 1, "weeklyHours": [1,0,0,0,0,0,0]}"#)),
            user(None, Some(r#"{"totalHours": 0, "weeklyHours": [0,0,0,0,0,0,0]}"#)),
            user(None, Some(r#"{"totalHours": 0, "weeklyHours": [0,0,0,0,0,0,0]}"#)),
        ];
        let insights = build(&users, None);
        let cohort = &insights.by_course_area["Other"];
        assert_eq!(cohort.avg_total_hours, 0.33);
        assert_eq!(cohort.avg_weekly_hours[0], 0.33);
    }

    #[test]
    fn admins_are_excluded_and_blank_areas_become_other() {
        let mut admin = user(Some("Law"), None);
        admin.role = "admin".to_string();
        let users = vec![admin, user(Some("  "), None), user(None, None)];
        let insights = build(&users, None);
        assert_eq!(insights.global.n, 2);
        assert!(!insights.by_course_area.contains_key("Law"));
        assert_eq!(insights.by_course_area["Other"].n, 2);
    }

    #[test]
    fn peak_days_are_stable_on_ties() {
        assert_eq!(peak_days(&[1.0, 3.0, 3.0, 0.0, 3.0, 0.0, 0.0]), vec![1, 2, 4]);
        assert_eq!(peak_days(&[0.0; 7]), vec![0, 1, 2]);
    }

    #[test]
    fn activity_events_feed_only_the_global_count() {
        let users = vec![user(Some("Law"), None)];
        let events = vec![
            event(QUIZ_COMPLETED, Some(r#"{"fieldId": "law"}"#)),
            event(QUIZ_COMPLETED, Some(r#"{"field_id": "law"}"#)),
            event(QUIZ_COMPLETED, Some(r#"{"fieldId": "ml", "score": 0.8}"#)),
            event(QUIZ_COMPLETED, Some("not json")),
            event(QUIZ_COMPLETED, None),
            event("login", Some(r#"{"fieldId": "ai"}"#)),
        ];
        let insights = build(&users, Some(events.as_slice()));
        let activity = insights.global.activity_quiz_by_field.expect("activity counts");
        assert_eq!(activity.len(), 2);
        assert_eq!(activity["law"], 2);
        assert_eq!(activity["ml"], 1);
        assert_eq!(insights.by_course_area["Law"].activity_quiz_by_field, None);
        assert!(insights.by_course_area["Law"].quiz_by_field.is_empty());
    }
}
