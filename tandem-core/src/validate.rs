//! Wire-level validation of project and step payloads.
//!
//! Payloads arrive as loose JSON objects. Validation is strict: values are
//! rejected, never coerced or clamped, so every client sees the same
//! contract regardless of what its UI layer does.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::model::ProjectStatus;

/// A payload that does not satisfy the project/step contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("`{0}` is required")]
    Missing(&'static str),

    #[error("`{field}` is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("project `{0}` already exists")]
    DuplicateId(String),
}

impl ValidationError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Validated project-level fields. `None` means "not supplied".
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectFields {
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
    pub progress: Option<u8>,
    pub next_step: Option<String>,
    pub team: Option<Vec<String>>,
    pub deadline: Option<NaiveDate>,
    pub steps: Option<Vec<StepFields>>,
}

/// Validated step fields.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFields {
    pub id: Option<String>,
    pub project_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<String>,
    pub assigned_to: Option<String>,
}

/// Validate a full project payload; `title` is mandatory.
pub fn validate_project(value: &Value) -> Result<ProjectFields, ValidationError> {
    let fields = project_fields(value)?;
    if fields.title.is_none() {
        return Err(ValidationError::Missing("title"));
    }
    Ok(fields)
}

/// Validate a partial project payload used by updates.
///
/// Same rules as [`validate_project`], except absent fields are allowed.
/// A supplied title must still be non-blank.
pub fn validate_project_patch(value: &Value) -> Result<ProjectFields, ValidationError> {
    project_fields(value)
}

fn project_fields(value: &Value) -> Result<ProjectFields, ValidationError> {
    let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

    let title = match optional_string(obj, "title")? {
        Some(t) if t.trim().is_empty() => return Err(ValidationError::Missing("title")),
        other => other,
    };

    let steps = match present(obj, "steps") {
        None => None,
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(validate_step)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Some(_) => return Err(ValidationError::invalid("steps", "must be an array")),
    };

    Ok(ProjectFields {
        id: optional_string(obj, "id")?,
        title,
        description: optional_string(obj, "description")?,
        status: optional_status(obj)?,
        progress: optional_progress(obj)?,
        next_step: optional_string(obj, "nextStep")?,
        team: optional_team(obj)?,
        deadline: optional_date(obj, "deadline")?,
        steps,
    })
}

/// Validate a step payload. `projectId` is optional here; callers that
/// need it (step upserts) check it themselves.
pub fn validate_step(value: &Value) -> Result<StepFields, ValidationError> {
    let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

    let completed = match present(obj, "completed") {
        None => return Err(ValidationError::Missing("completed")),
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(ValidationError::invalid("completed", "must be a boolean")),
    };

    Ok(StepFields {
        id: optional_string(obj, "id")?,
        project_id: optional_string(obj, "projectId")?,
        title: required_string(obj, "title")?,
        description: optional_string(obj, "description")?,
        completed,
        due_date: optional_date(obj, "dueDate")?,
        priority: optional_string(obj, "priority")?,
        assigned_to: optional_string(obj, "assignedTo")?,
    })
}

/// Parse a strict `YYYY-MM-DD` date.
pub fn parse_date(field: &'static str, raw: &str) -> Result<NaiveDate, ValidationError> {
    let shaped = raw.len() == 10
        && raw
            .bytes()
            .enumerate()
            .all(|(i, b)| if i == 4 || i == 7 { b == b'-' } else { b.is_ascii_digit() });
    if !shaped {
        return Err(ValidationError::invalid(field, "expected YYYY-MM-DD"));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| ValidationError::invalid(field, e.to_string()))
}

/// Field value, treating explicit `null` as absent.
fn present<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn required_string(obj: &Map<String, Value>, key: &'static str) -> Result<String, ValidationError> {
    match optional_string(obj, key)? {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(ValidationError::Missing(key)),
    }
}

fn optional_string(
    obj: &Map<String, Value>,
    key: &'static str,
) -> Result<Option<String>, ValidationError> {
    match present(obj, key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidationError::invalid(key, "must be a string")),
    }
}

fn optional_status(obj: &Map<String, Value>) -> Result<Option<ProjectStatus>, ValidationError> {
    match present(obj, "status") {
        None => Ok(None),
        Some(Value::String(s)) => ProjectStatus::parse(s).map(Some).ok_or_else(|| {
            ValidationError::invalid(
                "status",
                format!("`{s}` is not one of on-track, at-risk, delayed, completed"),
            )
        }),
        Some(_) => Err(ValidationError::invalid("status", "must be a string")),
    }
}

fn optional_progress(obj: &Map<String, Value>) -> Result<Option<u8>, ValidationError> {
    let Some(raw) = present(obj, "progress") else {
        return Ok(None);
    };
    match raw.as_f64() {
        Some(n) if (0.0..=100.0).contains(&n) => Ok(Some(n.round() as u8)),
        Some(n) => Err(ValidationError::invalid(
            "progress",
            format!("{n} is outside 0..=100"),
        )),
        None => Err(ValidationError::invalid("progress", "must be a number")),
    }
}

fn optional_team(obj: &Map<String, Value>) -> Result<Option<Vec<String>>, ValidationError> {
    match present(obj, "team") {
        None => Ok(None),
        Some(Value::Array(members)) => members
            .iter()
            .map(|m| {
                m.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ValidationError::invalid("team", "members must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(ValidationError::invalid("team", "must be an array")),
    }
}

fn optional_date(
    obj: &Map<String, Value>,
    key: &'static str,
) -> Result<Option<NaiveDate>, ValidationError> {
    match present(obj, key) {
        None => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => parse_date(key, s).map(Some),
        Some(_) => Err(ValidationError::invalid(key, "must be a YYYY-MM-DD string")),
    }
}
