//! Shared, immutable reference data: learning fields, course areas, weekdays
//! and proficiency tiers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldId {
    Ai,
    Ml,
    Ds,
    Nlp,
    Cv,
    Cyber,
    Web,
    Law,
    Business,
}

impl FieldId {
    /// Fixed enumeration order. Feature vectors and plan priorities depend on it.
    pub const ALL: [FieldId; 9] = [
        FieldId::Ai,
        FieldId::Ml,
        FieldId::Ds,
        FieldId::Nlp,
        FieldId::Cv,
        FieldId::Cyber,
        FieldId::Web,
        FieldId::Law,
        FieldId::Business,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldId::Ai => "ai",
            FieldId::Ml => "ml",
            FieldId::Ds => "ds",
            FieldId::Nlp => "nlp",
            FieldId::Cv => "cv",
            FieldId::Cyber => "cyber",
            FieldId::Web => "web",
            FieldId::Law => "law",
            FieldId::Business => "business",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            FieldId::Ai => "Artificial Intelligence",
            FieldId::Ml => "Machine Learning",
            FieldId::Ds => "Data Science",
            FieldId::Nlp => "Natural Language Processing",
            FieldId::Cv => "Computer Vision",
            FieldId::Cyber => "Cybersecurity",
            FieldId::Web => "Web Development",
            FieldId::Law => "Law",
            FieldId::Business => "Business & Management",
        }
    }

    pub fn parse(raw: &str) -> Option<FieldId> {
        FieldId::ALL.into_iter().find(|fid| fid.as_str() == raw)
    }
}

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Course areas known to the classifier, in one-hot order. The last slot is
/// the catch-all.
pub const COURSE_AREAS: [&str; 4] = ["Computing & IT", "Law", "Business & Management", "Other"];

pub const OTHER_AREA: &str = "Other";

pub const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Trims a raw course area label; blank or missing becomes `Other`.
pub fn normalize_course_area(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(area) if !area.is_empty() => area.to_string(),
        _ => OTHER_AREA.to_string(),
    }
}

/// Index of the area in [`COURSE_AREAS`]; unrecognized areas map to `Other`.
pub fn course_area_index(area: &str) -> usize {
    COURSE_AREAS
        .iter()
        .position(|known| *known == area)
        .unwrap_or(COURSE_AREAS.len() - 1)
}

pub fn weekday_name(index: usize) -> &'static str {
    WEEKDAYS.get(index).copied().unwrap_or("Unknown")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proficiency {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Proficiency {
    pub fn from_score(score_percent: f64) -> Proficiency {
        if score_percent >= 90.0 {
            Proficiency::Expert
        } else if score_percent >= 70.0 {
            Proficiency::Advanced
        } else if score_percent >= 50.0 {
            Proficiency::Intermediate
        } else {
            Proficiency::Beginner
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Proficiency::Beginner => "Beginner",
            Proficiency::Intermediate => "Intermediate",
            Proficiency::Advanced => "Advanced",
            Proficiency::Expert => "Expert",
        }
    }
}

fn mentions_law(label: &str) -> bool {
    label.contains("law")
}

fn mentions_business(label: &str) -> bool {
    label.contains("business") || label.contains("accounting") || label.contains("marketing")
}

fn mentions_ml(label: &str) -> bool {
    label.contains("machine learning") || label.contains("ml")
}

fn mentions_data_science(label: &str) -> bool {
    label.contains("data science")
}

fn mentions_ai(label: &str) -> bool {
    label.contains("ai") || label.contains("artificial")
}

/// Substring rules for compound interest labels, evaluated top to bottom
/// after exact name/id matching fails.
const INTEREST_RULES: [(fn(&str) -> bool, FieldId); 5] = [
    (mentions_law, FieldId::Law),
    (mentions_business, FieldId::Business),
    (mentions_ml, FieldId::Ml),
    (mentions_data_science, FieldId::Ds),
    (mentions_ai, FieldId::Ai),
];

/// Resolves a free-text interest label to a canonical field.
pub fn resolve_interest(label: &str) -> Option<FieldId> {
    let lower = label.to_lowercase();
    FieldId::ALL
        .into_iter()
        .find(|fid| fid.display_name().to_lowercase() == lower || fid.as_str() == lower)
        .or_else(|| {
            INTEREST_RULES
                .iter()
                .find(|(matches, _)| matches(lower.as_str()))
                .map(|(_, fid)| *fid)
        })
}
