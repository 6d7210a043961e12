use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Open,
    InProgress,
    Completed,
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Open => "open",
            ProjectStatus::InProgress => "in_progress",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled projects stay closed.
    pub fn can_become(&self, next: ProjectStatus) -> bool {
        !matches!(self, ProjectStatus::Completed | ProjectStatus::Cancelled) && *self != next
    }
}

impl FromStr for ProjectStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ProjectStatus::Open),
            "in_progress" => Ok(ProjectStatus::InProgress),
            "completed" => Ok(ProjectStatus::Completed),
            "cancelled" => Ok(ProjectStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for ProjectStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Withdrawn => "withdrawn",
        }
    }
}

impl FromStr for ApplicationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApplicationStatus::Pending),
            "accepted" => Ok(ApplicationStatus::Accepted),
            "rejected" => Ok(ApplicationStatus::Rejected),
            "withdrawn" => Ok(ApplicationStatus::Withdrawn),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for ApplicationStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of an application is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationActor {
    ProjectOwner,
    Applicant,
}

/// Only pending applications move. Owners decide; applicants may withdraw.
pub fn application_transition_allowed(
    actor: ApplicationActor,
    current: ApplicationStatus,
    next: ApplicationStatus,
) -> bool {
    if current != ApplicationStatus::Pending {
        return false;
    }
    match actor {
        ApplicationActor::ProjectOwner => {
            matches!(next, ApplicationStatus::Accepted | ApplicationStatus::Rejected)
        }
        ApplicationActor::Applicant => next == ApplicationStatus::Withdrawn,
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub skills_required: Vec<String>,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deadline: Option<OffsetDateTime>,
    #[sqlx(try_from = "String")]
    pub status: ProjectStatus,
    pub client_name: Option<String>,
    pub application_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub client_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub skills_required: Vec<String>,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub deadline: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Application {
    pub id: Uuid,
    pub project_id: Uuid,
    pub freelancer_id: Uuid,
    pub cover_letter: String,
    pub proposed_rate: Option<f64>,
    pub estimated_duration: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ApplicationStatus,
    pub project_title: Option<String>,
    pub freelancer_name: Option<String>,
    pub freelancer_avatar: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewApplication {
    pub project_id: Uuid,
    pub freelancer_id: Uuid,
    pub cover_letter: String,
    pub proposed_rate: Option<f64>,
    pub estimated_duration: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub project_id: Option<Uuid>,
    pub content: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    pub fn is_unread_by(&self, reader_id: Uuid) -> bool {
        self.recipient_id == reader_id && self.read_at.is_none()
    }
}

/// Ids in `page` that `reader_id` received and has not read yet.
pub fn unread_ids(page: &[Message], reader_id: Uuid) -> Vec<Uuid> {
    page.iter()
        .filter(|m| m.is_unread_by(reader_id))
        .map(|m| m.id)
        .collect()
}

/// Latest message exchanged with one counterparty.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Conversation {
    pub counterparty_id: Uuid,
    pub counterparty_name: Option<String>,
    pub counterparty_avatar: Option<String>,
    pub last_message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_message_at: OffsetDateTime,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, FromRow)]
pub struct UserStats {
    pub projects_posted: i64,
    pub open_projects: i64,
    pub applications_received: i64,
    pub applications_sent: i64,
    pub applications_accepted: i64,
    pub unread_messages: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_match_columns() {
        assert_eq!("in_progress".parse::<ProjectStatus>().unwrap(), ProjectStatus::InProgress);
        assert_eq!(
            serde_json::to_value(ProjectStatus::InProgress).unwrap(),
            "in_progress"
        );
        assert!("Open".parse::<ProjectStatus>().is_err());
        assert_eq!(ApplicationStatus::Withdrawn.to_string(), "withdrawn");
    }

    #[test]
    fn closed_projects_do_not_reopen() {
        assert!(ProjectStatus::Open.can_become(ProjectStatus::InProgress));
        assert!(ProjectStatus::InProgress.can_become(ProjectStatus::Completed));
        assert!(!ProjectStatus::Completed.can_become(ProjectStatus::Open));
        assert!(!ProjectStatus::Cancelled.can_become(ProjectStatus::Open));
        assert!(!ProjectStatus::Open.can_become(ProjectStatus::Open));
    }

    #[test]
    fn application_transitions_depend_on_actor() {
        use ApplicationActor::*;
        use ApplicationStatus::*;
        assert!(application_transition_allowed(ProjectOwner, Pending, Accepted));
        assert!(application_transition_allowed(ProjectOwner, Pending, Rejected));
        assert!(!application_transition_allowed(ProjectOwner, Pending, Withdrawn));
        assert!(application_transition_allowed(Applicant, Pending, Withdrawn));
        assert!(!application_transition_allowed(Applicant, Pending, Accepted));
        assert!(!application_transition_allowed(ProjectOwner, Accepted, Rejected));
    }

    fn message(sender_id: Uuid, recipient_id: Uuid, read: bool) -> Message {
        let now = OffsetDateTime::now_utc();
        Message {
            id: Uuid::new_v4(),
            sender_id,
            recipient_id,
            project_id: None,
            content: "hi".into(),
            read_at: read.then_some(now),
            created_at: now,
        }
    }

    #[test]
    fn only_unread_incoming_messages_in_the_page_are_marked() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let page = vec![
            message(other, me, false),
            message(me, other, false),
            message(other, me, true),
            message(other, me, false),
        ];
        assert_eq!(unread_ids(&page, me), vec![page[0].id, page[3].id]);
        assert_eq!(unread_ids(&page, other), vec![page[1].id]);
        assert!(unread_ids(&[], me).is_empty());
    }
}
