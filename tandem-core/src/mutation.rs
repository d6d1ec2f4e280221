//! Validated writes against the [`ProjectStore`].
//!
//! ```text
//! Mutation ──► validate ──► apply to store ──► recompute derived fields
//!                                   │
//!                                   ▼
//!                        Commit { change, pre_image }
//! ```
//!
//! A [`Commit`] tells the caller what to broadcast and whether a backup of
//! the pre-mutation collection must be written before persisting. Auth
//! gating happens one layer up; by the time a mutation reaches this module
//! it is allowed.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::clock::Clock;
use crate::derive;
use crate::model::{Project, ProjectMap, Step};
use crate::store::ProjectStore;
use crate::validate::{
    validate_project, validate_project_patch, validate_step, ProjectFields, StepFields,
    ValidationError,
};

/// A write request.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    AddProject(Value),
    UpdateProject(Value),
    DeleteProject { id: String },
    /// Insert or update by step id.
    UpsertStep(Value),
    DeleteStep { project_id: String, step_id: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MutationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: String },
}

/// What a committed mutation changed. Step variants carry the owning
/// project after derived fields were recomputed.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    ProjectAdded(Project),
    ProjectUpdated(Project),
    ProjectDeleted { id: String },
    StepAdded { project: Project, step_id: String },
    StepUpdated { project: Project, step_id: String },
    StepDeleted { project: Project, step_id: String },
}

impl Change {
    pub fn project_id(&self) -> &str {
        match self {
            Change::ProjectAdded(p) | Change::ProjectUpdated(p) => &p.id,
            Change::ProjectDeleted { id } => id,
            Change::StepAdded { project, .. }
            | Change::StepUpdated { project, .. }
            | Change::StepDeleted { project, .. } => &project.id,
        }
    }

    /// Project as it now exists in the store, `None` after a project delete.
    pub fn project(&self) -> Option<&Project> {
        match self {
            Change::ProjectAdded(p) | Change::ProjectUpdated(p) => Some(p),
            Change::ProjectDeleted { .. } => None,
            Change::StepAdded { project, .. }
            | Change::StepUpdated { project, .. }
            | Change::StepDeleted { project, .. } => Some(project),
        }
    }

    /// Id of the entity the mutation targeted (step id for step changes).
    pub fn entity_id(&self) -> &str {
        match self {
            Change::StepAdded { step_id, .. }
            | Change::StepUpdated { step_id, .. }
            | Change::StepDeleted { step_id, .. } => step_id,
            other => other.project_id(),
        }
    }
}

/// Outcome of a mutation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Commit {
    /// `None` when the mutation was a no-op (e.g. deleting a missing id).
    pub change: Option<Change>,
    /// Collection as it was before a destructive change; back this up
    /// before persisting.
    pub pre_image: Option<ProjectMap>,
}

impl Commit {
    fn noop() -> Self {
        Self::default()
    }

    fn changed(change: Change) -> Self {
        Self {
            change: Some(change),
            pre_image: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.change.is_none()
    }
}

pub struct MutationProcessor<'a> {
    store: &'a mut ProjectStore,
    now: DateTime<Utc>,
    today: NaiveDate,
}

impl<'a> MutationProcessor<'a> {
    pub fn new(store: &'a mut ProjectStore, clock: &dyn Clock) -> Self {
        let now = clock.now();
        Self {
            store,
            now,
            today: now.date_naive(),
        }
    }

    pub fn apply(&mut self, mutation: Mutation) -> Result<Commit, MutationError> {
        match mutation {
            Mutation::AddProject(data) => self.add_project(&data),
            Mutation::UpdateProject(data) => self.update_project(&data),
            Mutation::DeleteProject { id } => Ok(self.delete_project(&id)),
            Mutation::UpsertStep(data) => self.upsert_step(&data),
            Mutation::DeleteStep {
                project_id,
                step_id,
            } => Ok(self.delete_step(&project_id, &step_id)),
        }
    }

    pub fn add_project(&mut self, data: &Value) -> Result<Commit, MutationError> {
        let fields = validate_project(data)?;
        let id = fields
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.store.contains(&id) {
            return Err(ValidationError::DuplicateId(id).into());
        }

        let mut project = Project::new(id, String::new(), self.now);
        let explicit_status = fields.status;
        let has_steps = fields.steps.is_some();
        self.overlay(&mut project, fields, true);
        derive::refresh_from_steps(&mut project);
        project.status = match explicit_status {
            Some(status) => status,
            None => derive::derive_status(project.progress, project.deadline, self.today),
        };
        log::debug!(
            "Adding project {} ({} steps supplied: {has_steps})",
            project.id,
            project.steps.len()
        );

        self.store.put(project.clone());
        Ok(Commit::changed(Change::ProjectAdded(project)))
    }

    /// Overlay the supplied fields onto the stored project.
    ///
    /// An explicit `status` wins over derivation; derivation only runs when
    /// the update replaces the step list without naming a status.
    pub fn update_project(&mut self, data: &Value) -> Result<Commit, MutationError> {
        let obj = data.as_object().ok_or(ValidationError::NotAnObject)?;
        let id = match obj.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(ValidationError::Missing("id").into()),
        };
        let fields = validate_project_patch(data)?;
        let clears_deadline = obj.contains_key("deadline") && fields.deadline.is_none();

        let mut project = self
            .store
            .get(&id)
            .cloned()
            .ok_or_else(|| MutationError::NotFound {
                kind: "project",
                id: id.clone(),
            })?;

        let explicit_status = fields.status;
        let replaces_steps = fields.steps.is_some();
        self.overlay(&mut project, fields, clears_deadline);
        derive::refresh_from_steps(&mut project);
        if let Some(status) = explicit_status {
            project.status = status;
        } else if replaces_steps {
            project.status = derive::derive_status(project.progress, project.deadline, self.today);
        }
        project.updated_at = self.now;

        self.store.put(project.clone());
        Ok(Commit::changed(Change::ProjectUpdated(project)))
    }

    /// Unknown ids are a silent no-op.
    pub fn delete_project(&mut self, id: &str) -> Commit {
        if !self.store.contains(id) {
            log::debug!("Delete of unknown project {id} ignored");
            return Commit::noop();
        }
        let pre_image = self.store.get_all();
        self.store.remove(id);
        Commit {
            change: Some(Change::ProjectDeleted { id: id.to_string() }),
            pre_image: Some(pre_image),
        }
    }

    /// Insert or update a step, then recompute the owner's derived fields.
    pub fn upsert_step(&mut self, data: &Value) -> Result<Commit, MutationError> {
        let fields = validate_step(data)?;
        let project_id = fields
            .project_id
            .clone()
            .ok_or(ValidationError::Missing("projectId"))?;
        let (now, today) = (self.now, self.today);

        let project = self
            .store
            .get_mut(&project_id)
            .ok_or_else(|| MutationError::NotFound {
                kind: "project",
                id: project_id.clone(),
            })?;

        let step_id = fields
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let created = match project.step_index(&step_id) {
            Some(idx) => {
                let step = build_step(&project_id, &step_id, fields, Some(&project.steps[idx]), now);
                project.steps[idx] = step;
                false
            }
            None => {
                let step = build_step(&project_id, &step_id, fields, None, now);
                project.steps.push(step);
                true
            }
        };
        project.updated_at = now;
        derive::recompute(project, today);

        let project = project.clone();
        Ok(Commit::changed(if created {
            Change::StepAdded { project, step_id }
        } else {
            Change::StepUpdated { project, step_id }
        }))
    }

    /// Missing project or step is a silent no-op.
    pub fn delete_step(&mut self, project_id: &str, step_id: &str) -> Commit {
        let Some(idx) = self.store.get(project_id).and_then(|p| p.step_index(step_id)) else {
            log::debug!("Delete of unknown step {project_id}/{step_id} ignored");
            return Commit::noop();
        };
        let pre_image = self.store.get_all();
        let (now, today) = (self.now, self.today);

        let Some(project) = self.store.get_mut(project_id) else {
            return Commit::noop();
        };
        project.steps.remove(idx);
        project.updated_at = now;
        derive::recompute(project, today);

        Commit {
            change: Some(Change::StepDeleted {
                project: project.clone(),
                step_id: step_id.to_string(),
            }),
            pre_image: Some(pre_image),
        }
    }

    fn overlay(&self, project: &mut Project, fields: ProjectFields, set_deadline: bool) {
        if let Some(title) = fields.title {
            project.title = title;
        }
        if let Some(description) = fields.description {
            project.description = description;
        }
        if let Some(progress) = fields.progress {
            project.progress = progress;
        }
        if let Some(next_step) = fields.next_step {
            project.next_step = next_step;
        }
        if let Some(team) = fields.team {
            project.team = team;
        }
        if fields.deadline.is_some() || set_deadline {
            project.deadline = fields.deadline;
        }
        if let Some(steps) = fields.steps {
            let previous = std::mem::take(&mut project.steps);
            project.steps = steps
                .into_iter()
                .map(|step| {
                    let step_id = step
                        .id
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().to_string());
                    let prior = previous.iter().find(|s| s.id == step_id);
                    build_step(&project.id, &step_id, step, prior, self.now)
                })
                .collect();
        }
    }
}

/// Materialize a step. Ownership is by the project it is stored in, so the
/// back-reference always names that project.
fn build_step(
    project_id: &str,
    step_id: &str,
    fields: StepFields,
    previous: Option<&Step>,
    now: DateTime<Utc>,
) -> Step {
    Step {
        id: step_id.to_string(),
        project_id: project_id.to_string(),
        title: fields.title,
        description: fields.description.unwrap_or_default(),
        completed: fields.completed,
        due_date: fields.due_date,
        priority: fields.priority,
        assigned_to: fields.assigned_to,
        created_at: previous.map_or(now, |s| s.created_at),
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::ProjectStatus;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap())
    }

    fn seeded(store: &mut ProjectStore, clock: &ManualClock) {
        MutationProcessor::new(store, clock)
            .add_project(&json!({ "id": "p1", "title": "Launch", "deadline": "2024-06-30" }))
            .unwrap();
    }

    #[test]
    fn test_add_project_assigns_id_and_stamps() {
        let clock = clock();
        let mut store = ProjectStore::new();
        let commit = MutationProcessor::new(&mut store, &clock)
            .add_project(&json!({ "title": "Docs", "progress": 20, "team": ["ana"] }))
            .unwrap();

        let Some(Change::ProjectAdded(project)) = commit.change else {
            panic!("expected ProjectAdded");
        };
        assert!(!project.id.is_empty());
        assert_eq!(project.created_at, clock.now());
        assert_eq!(project.progress, 20);
        assert_eq!(project.status, ProjectStatus::OnTrack);
        assert!(store.contains(&project.id));
    }

    #[test]
    fn test_add_project_validation_boundary() {
        let clock = clock();
        let mut store = ProjectStore::new();
        let mut processor = MutationProcessor::new(&mut store, &clock);

        let bogus = processor.add_project(&json!({ "title": "x", "status": "bogus", "progress": 50 }));
        assert!(matches!(bogus, Err(MutationError::Validation(_))));

        let too_far = processor.add_project(&json!({ "title": "x", "status": "on-track", "progress": 150 }));
        assert!(matches!(too_far, Err(MutationError::Validation(_))));

        assert!(store.is_empty());
    }

    #[test]
    fn test_add_project_rejects_duplicate_id() {
        let clock = clock();
        let mut store = ProjectStore::new();
        seeded(&mut store, &clock);
        let err = MutationProcessor::new(&mut store, &clock)
            .add_project(&json!({ "id": "p1", "title": "Again" }))
            .unwrap_err();
        assert_eq!(
            err,
            MutationError::Validation(ValidationError::DuplicateId("p1".into()))
        );
    }

    #[test]
    fn test_add_project_with_steps_derives_progress() {
        let clock = clock();
        let mut store = ProjectStore::new();
        let commit = MutationProcessor::new(&mut store, &clock)
            .add_project(&json!({
                "title": "Steps",
                "progress": 5,
                "steps": [
                    { "title": "a", "completed": true },
                    { "title": "b", "completed": false }
                ]
            }))
            .unwrap();
        let project = commit.change.unwrap().project().cloned().unwrap();
        assert_eq!(project.progress, 50);
        assert_eq!(project.next_step, "b");
        assert!(project.steps.iter().all(|s| s.project_id == project.id));
    }

    #[test]
    fn test_update_project_preserves_created_at() {
        let clock = clock();
        let mut store = ProjectStore::new();
        seeded(&mut store, &clock);
        let created = store.get("p1").unwrap().created_at;

        clock.advance(Duration::hours(2));
        MutationProcessor::new(&mut store, &clock)
            .update_project(&json!({ "id": "p1", "title": "Launch v2", "createdAt": "1999-01-01T00:00:00Z" }))
            .unwrap();

        let project = store.get("p1").unwrap();
        assert_eq!(project.title, "Launch v2");
        assert_eq!(project.created_at, created);
        assert_eq!(project.updated_at, clock.now());
        assert_eq!(project.deadline, chrono::NaiveDate::from_ymd_opt(2024, 6, 30));
    }

    #[test]
    fn test_update_project_unknown_id() {
        let clock = clock();
        let mut store = ProjectStore::new();
        let err = MutationProcessor::new(&mut store, &clock)
            .update_project(&json!({ "id": "ghost", "title": "x" }))
            .unwrap_err();
        assert!(matches!(err, MutationError::NotFound { kind: "project", .. }));
    }

    #[test]
    fn test_update_project_keeps_manual_status() {
        let clock = clock();
        let mut store = ProjectStore::new();
        seeded(&mut store, &clock);
        MutationProcessor::new(&mut store, &clock)
            .update_project(&json!({ "id": "p1", "status": "delayed" }))
            .unwrap();
        assert_eq!(store.get("p1").unwrap().status, ProjectStatus::Delayed);
    }

    #[test]
    fn test_update_project_null_deadline_clears() {
        let clock = clock();
        let mut store = ProjectStore::new();
        seeded(&mut store, &clock);
        MutationProcessor::new(&mut store, &clock)
            .update_project(&json!({ "id": "p1", "deadline": null }))
            .unwrap();
        assert!(store.get("p1").unwrap().deadline.is_none());
    }

    #[test]
    fn test_delete_project_captures_pre_image() {
        let clock = clock();
        let mut store = ProjectStore::new();
        seeded(&mut store, &clock);

        let commit = MutationProcessor::new(&mut store, &clock).delete_project("p1");
        assert!(commit.pre_image.as_ref().unwrap().contains_key("p1"));
        assert!(!store.contains("p1"));

        let again = MutationProcessor::new(&mut store, &clock).delete_project("p1");
        assert!(again.is_noop());
    }

    #[test]
    fn test_upsert_step_insert_then_update() {
        let clock = clock();
        let mut store = ProjectStore::new();
        seeded(&mut store, &clock);

        let added = MutationProcessor::new(&mut store, &clock)
            .upsert_step(&json!({ "projectId": "p1", "id": "s1", "title": "Draft", "completed": false }))
            .unwrap();
        assert!(matches!(added.change, Some(Change::StepAdded { .. })));
        let created = store.get("p1").unwrap().step("s1").unwrap().created_at;

        clock.advance(Duration::minutes(5));
        let updated = MutationProcessor::new(&mut store, &clock)
            .upsert_step(&json!({ "projectId": "p1", "id": "s1", "title": "Draft", "completed": true }))
            .unwrap();
        assert!(matches!(updated.change, Some(Change::StepUpdated { .. })));

        let project = store.get("p1").unwrap();
        let step = project.step("s1").unwrap();
        assert_eq!(step.created_at, created);
        assert_eq!(step.updated_at, clock.now());
        assert_eq!(project.progress, 100);
        assert_eq!(project.status, ProjectStatus::Completed);
    }

    #[test]
    fn test_upsert_step_requires_project() {
        let clock = clock();
        let mut store = ProjectStore::new();
        let mut processor = MutationProcessor::new(&mut store, &clock);

        let missing = processor.upsert_step(&json!({ "title": "a", "completed": false }));
        assert_eq!(
            missing.unwrap_err(),
            MutationError::Validation(ValidationError::Missing("projectId"))
        );

        let unknown = processor.upsert_step(&json!({ "projectId": "nope", "title": "a", "completed": false }));
        assert!(matches!(unknown, Err(MutationError::NotFound { .. })));
    }

    #[test]
    fn test_step_recompute_overrides_manual_status() {
        let clock = clock();
        let mut store = ProjectStore::new();
        MutationProcessor::new(&mut store, &clock)
            .add_project(&json!({ "id": "p1", "title": "Soon", "deadline": "2024-05-13", "status": "on-track" }))
            .unwrap();
        assert_eq!(store.get("p1").unwrap().status, ProjectStatus::OnTrack);

        MutationProcessor::new(&mut store, &clock)
            .upsert_step(&json!({ "projectId": "p1", "title": "a", "completed": false }))
            .unwrap();
        assert_eq!(store.get("p1").unwrap().status, ProjectStatus::AtRisk);
    }

    #[test]
    fn test_delete_step_recomputes_and_ignores_missing() {
        let clock = clock();
        let mut store = ProjectStore::new();
        seeded(&mut store, &clock);
        {
            let mut processor = MutationProcessor::new(&mut store, &clock);
            processor
                .upsert_step(&json!({ "projectId": "p1", "id": "a", "title": "a", "completed": true }))
                .unwrap();
            processor
                .upsert_step(&json!({ "projectId": "p1", "id": "b", "title": "b", "completed": false }))
                .unwrap();
        }
        assert_eq!(store.get("p1").unwrap().progress, 50);

        let commit = MutationProcessor::new(&mut store, &clock).delete_step("p1", "b");
        assert!(commit.pre_image.is_some());
        assert_eq!(store.get("p1").unwrap().progress, 100);

        let again = MutationProcessor::new(&mut store, &clock).delete_step("p1", "b");
        assert!(again.is_noop());
        let orphan = MutationProcessor::new(&mut store, &clock).delete_step("ghost", "b");
        assert!(orphan.is_noop());
    }
}
