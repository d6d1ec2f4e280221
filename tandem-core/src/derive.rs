//! Derived project fields: progress, status and next step.
//!
//! Rules:
//! - `progress` = rounded share of completed steps; untouched when a
//!   project has no steps (the caller-supplied value stands).
//! - `status` = `completed` at 100, else `delayed` past the deadline, else
//!   `at-risk` when the deadline is at most 7 days out and progress < 70,
//!   else `on-track`.
//! - `next_step` = title of the first incomplete step.

use chrono::NaiveDate;

use crate::model::{Project, ProjectStatus, Step};

/// Days before the deadline at which a lagging project turns at-risk.
pub const AT_RISK_WINDOW_DAYS: i64 = 7;

/// Progress below which a project near its deadline is at-risk.
pub const AT_RISK_PROGRESS_THRESHOLD: u8 = 70;

/// `next_step` value once every step is done.
pub const ALL_STEPS_COMPLETED: &str = "All steps completed";

/// Rounded completion percentage, or `None` for an empty step list.
pub fn progress_from_steps(steps: &[Step]) -> Option<u8> {
    if steps.is_empty() {
        return None;
    }
    let done = steps.iter().filter(|s| s.completed).count() as f64;
    let pct = (done * 100.0 / steps.len() as f64).round();
    Some(pct.clamp(0.0, 100.0) as u8)
}

/// Title of the first incomplete step, or `None` for an empty step list.
pub fn next_step_from(steps: &[Step]) -> Option<String> {
    if steps.is_empty() {
        return None;
    }
    Some(
        steps
            .iter()
            .find(|s| !s.completed)
            .map(|s| s.title.clone())
            .unwrap_or_else(|| ALL_STEPS_COMPLETED.to_string()),
    )
}

/// Status implied by progress and deadline as of `today`.
pub fn derive_status(progress: u8, deadline: Option<NaiveDate>, today: NaiveDate) -> ProjectStatus {
    if progress >= 100 {
        return ProjectStatus::Completed;
    }
    let Some(deadline) = deadline else {
        return ProjectStatus::OnTrack;
    };
    let days_left = (deadline - today).num_days();
    if days_left < 0 {
        ProjectStatus::Delayed
    } else if days_left <= AT_RISK_WINDOW_DAYS && progress < AT_RISK_PROGRESS_THRESHOLD {
        ProjectStatus::AtRisk
    } else {
        ProjectStatus::OnTrack
    }
}

/// Refresh `progress` and `next_step` from the step list.
///
/// Leaves both alone when there are no steps.
pub fn refresh_from_steps(project: &mut Project) {
    if let Some(progress) = progress_from_steps(&project.steps) {
        project.progress = progress;
    }
    if let Some(next) = next_step_from(&project.steps) {
        project.next_step = next;
    }
}

/// Full recompute used after every step mutation. Overrides any manual status.
pub fn recompute(project: &mut Project, today: NaiveDate) {
    refresh_from_steps(project);
    project.status = derive_status(project.progress, project.deadline, today);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
    }

    fn project_with_steps(done: &[bool]) -> Project {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut project = Project::new("p1", "Launch", now);
        for (i, completed) in done.iter().enumerate() {
            let mut step = Step::new(format!("s{i}"), "p1", format!("Step {i}"), now);
            step.completed = *completed;
            project.steps.push(step);
        }
        project
    }

    #[test]
    fn test_progress_two_of_four() {
        let project = project_with_steps(&[true, false, true, false]);
        assert_eq!(progress_from_steps(&project.steps), Some(50));
    }

    #[test]
    fn test_progress_rounds() {
        let project = project_with_steps(&[true, false, false]);
        assert_eq!(progress_from_steps(&project.steps), Some(33));
        let project = project_with_steps(&[true, true, false]);
        assert_eq!(progress_from_steps(&project.steps), Some(67));
    }

    #[test]
    fn test_empty_steps_leave_progress_alone() {
        let mut project = project_with_steps(&[]);
        project.progress = 42;
        project.next_step = "Call vendor".into();
        refresh_from_steps(&mut project);
        assert_eq!(project.progress, 42);
        assert_eq!(project.next_step, "Call vendor");
    }

    #[test]
    fn test_status_completed_ignores_deadline() {
        let past = today() - Duration::days(30);
        assert_eq!(derive_status(100, Some(past), today()), ProjectStatus::Completed);
    }

    #[test]
    fn test_status_delayed_past_deadline() {
        let past = today() - Duration::days(1);
        assert_eq!(derive_status(99, Some(past), today()), ProjectStatus::Delayed);
    }

    #[test]
    fn test_status_at_risk_near_deadline() {
        let soon = today() + Duration::days(3);
        assert_eq!(derive_status(40, Some(soon), today()), ProjectStatus::AtRisk);
        // Deadline today still counts as "within 7 days".
        assert_eq!(derive_status(40, Some(today()), today()), ProjectStatus::AtRisk);
    }

    #[test]
    fn test_status_near_deadline_but_far_along() {
        let soon = today() + Duration::days(3);
        assert_eq!(derive_status(70, Some(soon), today()), ProjectStatus::OnTrack);
    }

    #[test]
    fn test_status_on_track_far_deadline() {
        let later = today() + Duration::days(30);
        assert_eq!(derive_status(40, Some(later), today()), ProjectStatus::OnTrack);
        assert_eq!(derive_status(40, None, today()), ProjectStatus::OnTrack);
    }

    #[test]
    fn test_next_step_first_incomplete() {
        let project = project_with_steps(&[true, false, false]);
        assert_eq!(next_step_from(&project.steps).as_deref(), Some("Step 1"));

        let project = project_with_steps(&[true, true]);
        assert_eq!(next_step_from(&project.steps).as_deref(), Some(ALL_STEPS_COMPLETED));
    }

    #[test]
    fn test_recompute_overrides_manual_status() {
        let mut project = project_with_steps(&[true, false, false, false]);
        project.deadline = Some(today() + Duration::days(2));
        project.status = ProjectStatus::OnTrack;

        recompute(&mut project, today());

        assert_eq!(project.progress, 25);
        assert_eq!(project.status, ProjectStatus::AtRisk);
        assert_eq!(project.next_step, "Step 1");
    }
}
