use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::fields::{FieldId, Proficiency};

/// Credit awarded the first time a quiz or final is passed.
pub const PASS_CREDIT_HOURS: f64 = 0.25;
pub const PASSING_SCORE: f64 = 0.7;
pub const WEEKLY_GOAL_HOURS: f64 = 20.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldProgress {
    /// Non-numeric scores are dropped on read.
    #[serde(deserialize_with = "score_map")]
    pub quiz_scores: BTreeMap<String, f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub final_score: Option<f64>,
    /// Mirrors `final_score`; only ever written alongside it. Unknown stored
    /// tiers read as `None`.
    #[serde(deserialize_with = "lenient_proficiency")]
    pub proficiency: Option<Proficiency>,
}

impl FieldProgress {
    /// Derived tier; `None` means the final has not been taken.
    pub fn proficiency(&self) -> Option<Proficiency> {
        self.final_score.map(Proficiency::from_score)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudyStats {
    #[serde(deserialize_with = "nullable_hours")]
    pub total_hours: f64,
    #[serde(deserialize_with = "week_of_hours")]
    pub weekly_hours: [f64; 7],
    #[serde(deserialize_with = "field_progress_map")]
    pub field_progress: BTreeMap<String, FieldProgress>,
    #[serde(deserialize_with = "lenient_count")]
    pub sessions_completed: u32,
    #[serde(deserialize_with = "lenient_count")]
    pub study_progress: u32,
    /// Keys owned by other subsystems, carried through on write-back.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StudyStats {
    pub fn progress(&self, field: FieldId) -> Option<&FieldProgress> {
        self.field_progress.get(field.as_str())
    }

    pub fn final_score(&self, field: FieldId) -> Option<f64> {
        self.progress(field).and_then(|p| p.final_score)
    }

    pub fn hours_this_week(&self) -> f64 {
        self.weekly_hours.iter().sum()
    }

    /// Records a quiz or final result given as a fraction in [0, 1].
    ///
    /// The first pass of a quiz (or of the final) credits study time to
    /// `weekday` (0 = Monday) and to the lifetime total. Returns whether time
    /// was credited.
    pub fn record_field_result(
        &mut self,
        field: FieldId,
        quiz_id: &str,
        score: f64,
        is_final: bool,
        weekday: usize,
    ) -> bool {
        let percent = (score * 100.0).round();
        let passed = score >= PASSING_SCORE;
        let progress = self
            .field_progress
            .entry(field.as_str().to_string())
            .or_default();

        let was_passed = if is_final {
            progress.final_score.is_some() || progress.proficiency.is_some()
        } else {
            progress.quiz_scores.get(quiz_id).copied().unwrap_or(0.0) >= 70.0
        };

        if is_final {
            progress.final_score = Some(percent);
            progress.proficiency = Some(Proficiency::from_score(percent));
        } else {
            progress.quiz_scores.insert(quiz_id.to_string(), percent);
        }

        let credited = passed && !was_passed && weekday < 7;
        if credited {
            self.weekly_hours[weekday] += PASS_CREDIT_HOURS;
            self.total_hours += PASS_CREDIT_HOURS;
            self.sessions_completed += 1;
        }

        let ratio = self.hours_this_week() / WEEKLY_GOAL_HOURS * 100.0;
        self.study_progress = ratio.round().clamp(0.0, 100.0) as u32;
        self.total_hours = round_places(self.total_hours, 2);
        for hours in self.weekly_hours.iter_mut() {
            *hours = round_places(*hours, 2);
        }

        credited
    }
}

/// Parses a stored `study_stats` blob. Missing, `null`, malformed or
/// non-object input yields `None`; callers decide what an absent value
/// contributes. Odd values nested inside an object are read leniently.
pub fn parse_study_stats(raw: Option<&str>) -> Option<StudyStats> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    if !value.is_object() {
        return None;
    }
    StudyStats::deserialize(value).ok()
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(serde_json::Value::deserialize(deserializer)?.as_f64())
}

fn nullable_hours<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_number(deserializer)?.unwrap_or(0.0))
}

fn lenient_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let count = lenient_number(deserializer)?.unwrap_or(0.0);
    Ok(count.round().clamp(0.0, u32::MAX as f64) as u32)
}

fn week_of_hours<'de, D>(deserializer: D) -> Result<[f64; 7], D::Error>
where
    D: Deserializer<'de>,
{
    let mut week = [0.0; 7];
    if let serde_json::Value::Array(values) = serde_json::Value::deserialize(deserializer)? {
        for (slot, value) in week.iter_mut().zip(values) {
            *slot = value.as_f64().unwrap_or(0.0);
        }
    }
    Ok(week)
}

fn score_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let serde_json::Value::Object(entries) = serde_json::Value::deserialize(deserializer)? else {
        return Ok(BTreeMap::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|(quiz, score)| Some((quiz, score.as_f64()?)))
        .collect())
}

fn lenient_proficiency<'de, D>(deserializer: D) -> Result<Option<Proficiency>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Proficiency::deserialize(serde_json::Value::deserialize(deserializer)?).ok())
}

fn field_progress_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, FieldProgress>, D::Error>
where
    D: Deserializer<'de>,
{
    let serde_json::Value::Object(entries) = serde_json::Value::deserialize(deserializer)? else {
        return Ok(BTreeMap::new());
    };
    Ok(entries
        .into_iter()
        .map(|(fid, progress)| (fid, FieldProgress::deserialize(progress).unwrap_or_default()))
        .collect())
}

fn nullable_stats<'de, D>(deserializer: D) -> Result<StudyStats, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(StudyStats::deserialize(serde_json::Value::deserialize(deserializer)?).unwrap_or_default())
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(text) => Some(text),
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn nullable_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.unwrap_or_default())
}

/// Splits a comma-separated label list, dropping blanks.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LearnerProfile {
    #[serde(deserialize_with = "lenient_text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub course_area: Option<String>,
    #[serde(deserialize_with = "nullable_text")]
    pub ordered_interests: String,
    #[serde(deserialize_with = "nullable_text")]
    pub weak_topics: String,
    #[serde(deserialize_with = "nullable_text")]
    pub strong_topics: String,
    #[serde(deserialize_with = "nullable_stats")]
    pub study_stats: StudyStats,
}

impl LearnerProfile {
    /// Builds a profile from an arbitrary JSON value. A non-object becomes
    /// the empty profile; inside an object, fields of the wrong shape fall
    /// back to their defaults one by one.
    pub fn from_value(value: &serde_json::Value) -> LearnerProfile {
        if !value.is_object() {
            return LearnerProfile::default();
        }
        LearnerProfile::deserialize(value).unwrap_or_default()
    }

    pub fn interests(&self) -> Vec<String> {
        parse_list(&self.ordered_interests)
    }

    pub fn weak_topic_list(&self) -> Vec<String> {
        parse_list(&self.weak_topics)
    }

    pub fn strong_topic_list(&self) -> Vec<String> {
        parse_list(&self.strong_topics)
    }
}

/// One row of the learner population as read from storage.
#[derive(Debug, Clone, Default)]
pub struct UserRow {
    pub id: String,
    pub role: String,
    pub course_area: Option<String>,
    pub ordered_interests: Option<String>,
    pub weak_topics: Option<String>,
    pub strong_topics: Option<String>,
    pub study_stats: Option<String>,
}

impl UserRow {
    pub fn is_admin(&self) -> bool {
        self.role.trim().eq_ignore_ascii_case("admin")
    }

    pub fn to_profile(&self) -> LearnerProfile {
        LearnerProfile {
            id: Some(self.id.clone()),
            course_area: self.course_area.clone(),
            ordered_interests: self.ordered_interests.clone().unwrap_or_default(),
            weak_topics: self.weak_topics.clone().unwrap_or_default(),
            strong_topics: self.strong_topics.clone().unwrap_or_default(),
            study_stats: parse_study_stats(self.study_stats.as_deref()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub event_type: String,
    pub payload: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortStats {
    pub n: u64,
    pub avg_weekly_hours: [f64; 7],
    pub avg_total_hours: f64,
    pub peak_days: Vec<usize>,
    pub quiz_by_field: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_quiz_by_field: Option<BTreeMap<String, u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortInsights {
    pub by_course_area: BTreeMap<String, CohortStats>,
    pub global: CohortStats,
}

impl CohortInsights {
    pub fn empty() -> CohortInsights {
        CohortInsights::default()
    }

    /// The learner's own cohort, falling back to the global summary.
    pub fn cohort_for(&self, area: &str) -> &CohortStats {
        self.by_course_area.get(area).unwrap_or(&self.global)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySlot {
    pub day: String,
    pub focus: String,
    pub suggested_hours: f64,
    pub already_logged: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    TakeFinal,
    Improve,
    OnTrack,
    WeakTopics,
    Consistency,
    Cohort,
    Ml,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    pub message: String,
    pub priority: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyPlan {
    pub schedule: Vec<DaySlot>,
    pub suggestions: Vec<Suggestion>,
    pub generated_at: DateTime<Utc>,
}

/// The classifier's pick, paired with its display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextTopic {
    pub field_id: String,
    pub field_name: String,
}

impl From<FieldId> for NextTopic {
    fn from(field: FieldId) -> Self {
        NextTopic {
            field_id: field.as_str().to_string(),
            field_name: field.display_name().to_string(),
        }
    }
}

pub fn round_places(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_well_formed_stats() {
        let raw = r#"{"totalHours": 12.5, "weeklyHours": [1, 2, 0, 0, 0, 0, 3],
            "fieldProgress": {"ai": {"quizScores": {"q1": 80}, "finalScore": 72, "proficiency": "Advanced"}},
            "quizCompletions": {"x": 1}}"#;
        let stats = parse_study_stats(Some(raw)).expect("stats");
        assert_eq!(stats.total_hours, 12.5);
        assert_eq!(stats.weekly_hours, [1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 3.0]);
        assert_eq!(stats.final_score(FieldId::Ai), Some(72.0));
        assert_eq!(
            stats.progress(FieldId::Ai).and_then(FieldProgress::proficiency),
            Some(Proficiency::Advanced)
        );
        assert!(stats.extra.contains_key("quizCompletions"));
    }

    #[test]
    fn tolerates_nulls_and_short_weeks() {
        let raw = r#"{"totalHours": null, "weeklyHours": [2, null, 1], "fieldProgress": {"law": null}}"#;
        let stats = parse_study_stats(Some(raw)).expect("stats");
        assert_eq!(stats.total_hours, 0.0);
        assert_eq!(stats.weekly_hours, [2.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(stats.final_score(FieldId::Law), None);
        assert_eq!(stats.field_progress.len(), 1);
    }

    #[test]
    fn malformed_stats_are_ignored() {
        assert_eq!(parse_study_stats(None), None);
        assert_eq!(parse_study_stats(Some("")), None);
        assert_eq!(parse_study_stats(Some("null")), None);
        assert_eq!(parse_study_stats(Some("{not json")), None);
        assert_eq!(parse_study_stats(Some("[1, 2]")), None);
        assert_eq!(parse_study_stats(Some("\"text\"")), None);
    }

    #[test]
    fn odd_nested_values_keep_the_rest_of_the_record() {
        let raw = r#"{"totalHours": 40, "weeklyHours": [5, "x", 1, 0, 0, 0, 0],
            "sessionsCompleted": "many",
            "fieldProgress": {
                "ai": {"finalScore": 95, "proficiency": "expert"},
                "ml": {"quizScores": {"q1": null, "q2": 80}, "finalScore": "n/a"},
                "law": 7
            }}"#;
        let stats = parse_study_stats(Some(raw)).expect("stats");
        assert_eq!(stats.total_hours, 40.0);
        assert_eq!(stats.weekly_hours, [5.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(stats.sessions_completed, 0);
        assert_eq!(stats.field_progress.len(), 3);

        let ai = stats.progress(FieldId::Ai).expect("ai");
        assert_eq!(ai.final_score, Some(95.0));
        assert_eq!(ai.proficiency, None);
        assert_eq!(ai.proficiency(), Some(Proficiency::Expert));

        let ml = stats.progress(FieldId::Ml).expect("ml");
        assert_eq!(ml.quiz_scores.len(), 1);
        assert_eq!(ml.quiz_scores["q2"], 80.0);
        assert_eq!(ml.final_score, None);
        assert_eq!(stats.progress(FieldId::Law), Some(&FieldProgress::default()));
    }

    #[test]
    fn profile_survives_an_odd_stored_tier() {
        let profile = LearnerProfile::from_value(&json!({
            "id": 17,
            "courseArea": "Computing & IT",
            "weakTopics": "recursion, pointers",
            "orderedInterests": ["not", "a", "string"],
            "studyStats": {"totalHours": 3, "fieldProgress": {"ai": {"finalScore": 82, "proficiency": "N/A"}}}
        }));
        assert_eq!(profile.id.as_deref(), Some("17"));
        assert_eq!(profile.course_area.as_deref(), Some("Computing & IT"));
        assert_eq!(profile.weak_topic_list(), vec!["recursion", "pointers"]);
        assert!(profile.interests().is_empty());
        assert_eq!(profile.study_stats.total_hours, 3.0);
        assert_eq!(profile.study_stats.final_score(FieldId::Ai), Some(82.0));
    }

    #[test]
    fn retaking_a_final_with_an_unreadable_tier_does_not_credit_again() {
        let mut stats = parse_study_stats(Some(
            r#"{"fieldProgress": {"web": {"finalScore": 91, "proficiency": "N/A"}}}"#,
        ))
        .expect("stats");
        assert!(!stats.record_field_result(FieldId::Web, "final", 0.95, true, 0));
        assert_eq!(stats.total_hours, 0.0);
        assert_eq!(
            stats.progress(FieldId::Web).and_then(|p| p.proficiency),
            Some(Proficiency::Expert)
        );
    }

    #[test]
    fn profile_from_non_object_is_empty() {
        assert_eq!(LearnerProfile::from_value(&json!(42)), LearnerProfile::default());
        assert_eq!(LearnerProfile::from_value(&json!(null)), LearnerProfile::default());
    }

    #[test]
    fn profile_from_object_reads_lists_and_stats() {
        let profile = LearnerProfile::from_value(&json!({
            "courseArea": "Law",
            "orderedInterests": "Law, , Accounting",
            "weakTopics": null,
            "studyStats": null
        }));
        assert_eq!(profile.course_area.as_deref(), Some("Law"));
        assert_eq!(profile.interests(), vec!["Law", "Accounting"]);
        assert!(profile.weak_topic_list().is_empty());
        assert_eq!(profile.study_stats, StudyStats::default());
    }

    #[test]
    fn first_pass_credits_time_once() {
        let mut stats = StudyStats::default();
        assert!(!stats.record_field_result(FieldId::Ml, "q1", 0.5, false, 2));
        assert_eq!(stats.total_hours, 0.0);

        assert!(stats.record_field_result(FieldId::Ml, "q1", 0.8, false, 2));
        assert!(!stats.record_field_result(FieldId::Ml, "q1", 0.9, false, 2));
        assert_eq!(stats.weekly_hours[2], 0.25);
        assert_eq!(stats.total_hours, 0.25);
        assert_eq!(stats.sessions_completed, 1);
        assert_eq!(stats.progress(FieldId::Ml).map(|p| p.quiz_scores["q1"]), Some(90.0));
    }

    #[test]
    fn final_result_sets_score_and_proficiency() {
        let mut stats = StudyStats::default();
        assert!(stats.record_field_result(FieldId::Web, "final", 0.934, true, 0));
        let progress = stats.progress(FieldId::Web).expect("progress");
        assert_eq!(progress.final_score, Some(93.0));
        assert_eq!(progress.proficiency, Some(Proficiency::Expert));
        assert!(!stats.record_field_result(FieldId::Web, "final", 0.95, true, 0));
        assert_eq!(stats.study_progress, 1);
    }

    #[test]
    fn suggestion_serializes_with_wire_names() {
        let suggestion = Suggestion {
            kind: SuggestionKind::TakeFinal,
            field_id: Some("ai".to_string()),
            field_name: None,
            message: "m".to_string(),
            priority: 1,
        };
        let value = serde_json::to_value(&suggestion).expect("json");
        assert_eq!(value, json!({"type": "take_final", "fieldId": "ai", "message": "m", "priority": 1}));
    }
}
