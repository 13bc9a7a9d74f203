use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Owner + school year pair that scopes every query.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope {
    pub owner: String,
    pub context_year: String,
}

impl Scope {
    pub fn new(owner: impl Into<String>, context_year: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            context_year: context_year.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// Descriptive fields of a plan or event. Opaque to rescheduling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub name: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub topic: Option<String>,
    pub objective: Option<String>,
    pub resources: Option<String>,
    pub assignments: Option<String>,
    pub homework: Option<String>,
    pub notes: Option<String>,
    pub standards: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub color_bg: Option<String>,
    pub color_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct History {
    pub created_at: String,
    pub updated_at: String,
    pub shifted_from_date: Option<NaiveDate>,
}

/// A lesson plan (when `category` is set) or a one-off calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub key: String,
    #[serde(rename = "teacherId")]
    pub owner: String,
    #[serde(rename = "schoolYearId")]
    pub context_year: String,
    #[serde(rename = "periodId")]
    pub category: Option<String>,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(rename = "meta")]
    pub history: History,
}

impl Entry {
    pub fn scope(&self) -> Scope {
        Scope::new(self.owner.clone(), self.context_year.clone())
    }

    pub fn in_scope(&self, scope: &Scope) -> bool {
        self.owner == scope.owner && self.context_year == scope.context_year
    }

    pub fn is_event(&self) -> bool {
        self.category.is_none()
    }
}

/// Maps the wire form of a period id to the category. Blank means "no category".
pub fn category_from_wire(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
