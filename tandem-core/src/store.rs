//! Authoritative in-memory project map.
//!
//! No validation happens here; callers validate before `put`.

use crate::model::{Project, ProjectMap};

#[derive(Debug, Clone, Default)]
pub struct ProjectStore {
    projects: ProjectMap,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, e.g. from persisted state.
    pub fn from_map(projects: ProjectMap) -> Self {
        Self { projects }
    }

    pub fn get(&self, id: &str) -> Option<&Project> {
        self.projects.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Project> {
        self.projects.get_mut(id)
    }

    /// Owned copy of the whole collection.
    pub fn get_all(&self) -> ProjectMap {
        self.projects.clone()
    }

    /// Insert or replace by id. Returns the previous project, if any.
    pub fn put(&mut self, project: Project) -> Option<Project> {
        self.projects.insert(project.id.clone(), project)
    }

    /// Returns `true` if a project was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        self.projects.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.projects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Project)> {
        self.projects.iter()
    }
}
