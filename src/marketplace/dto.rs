use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{
    Application, ApplicationStatus, Conversation, Message, NewProject, Project, ProjectFilter,
    ProjectStatus, UserStats,
};
use crate::accounts::AccountType;
use crate::error::ApiError;

const MAX_PAGE_SIZE: i64 = 100;
const MAX_TITLE_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 10_000;
const MAX_COVER_LETTER_LEN: usize = 5_000;
pub const MAX_MESSAGE_LEN: usize = 5_000;
const MAX_SKILLS: usize = 50;

#[derive(Debug, Default, Deserialize)]
pub struct ProjectQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<ProjectQuery> for ProjectFilter {
    fn from(q: ProjectQuery) -> Self {
        let (limit, offset) = paging(q.limit, q.offset);
        Self {
            search: non_blank(q.search),
            category: non_blank(q.category),
            limit,
            offset,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub fn paging(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(20).clamp(1, MAX_PAGE_SIZE),
        offset.unwrap_or(0).max(0),
    )
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn required_text(field: &str, value: &str, max: usize) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    if value.chars().count() > max {
        return Err(ApiError::BadRequest(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(value.to_string())
}

fn non_negative(field: &str, value: Option<f64>) -> Result<Option<f64>, ApiError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(ApiError::BadRequest(format!(
            "{field} must be a non-negative number"
        ))),
        other => Ok(other),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    #[serde(default)]
    pub skills_required: Vec<String>,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deadline: Option<OffsetDateTime>,
}

impl CreateProjectRequest {
    pub fn validate(self, client_id: Uuid) -> Result<NewProject, ApiError> {
        let title = required_text("title", &self.title, MAX_TITLE_LEN)?;
        let description = required_text("description", &self.description, MAX_DESCRIPTION_LEN)?;
        let budget_min = non_negative("budget_min", self.budget_min)?;
        let budget_max = non_negative("budget_max", self.budget_max)?;
        if let (Some(min), Some(max)) = (budget_min, budget_max) {
            if min > max {
                return Err(ApiError::BadRequest(
                    "budget_min must not exceed budget_max".into(),
                ));
            }
        }

        let mut skills_required: Vec<String> = Vec::new();
        for skill in self.skills_required {
            let skill = skill.trim().to_string();
            if !skill.is_empty() && !skills_required.contains(&skill) {
                skills_required.push(skill);
            }
        }
        if skills_required.len() > MAX_SKILLS {
            return Err(ApiError::BadRequest(format!(
                "at most {MAX_SKILLS} skills are allowed"
            )));
        }

        Ok(NewProject {
            client_id,
            title,
            description,
            category: non_blank(self.category),
            skills_required,
            budget_min,
            budget_max,
            deadline: self.deadline,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ProjectStatusRequest {
    pub status: ProjectStatus,
}

#[derive(Debug, Serialize)]
pub struct ProjectDetails {
    #[serde(flatten)]
    pub project: Project,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_applied: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ProjectList {
    pub items: Vec<Project>,
}

#[derive(Debug, Deserialize)]
pub struct CreateApplicationRequest {
    pub cover_letter: String,
    pub proposed_rate: Option<f64>,
    pub estimated_duration: Option<String>,
}

impl CreateApplicationRequest {
    pub fn validate(self) -> Result<(String, Option<f64>, Option<String>), ApiError> {
        let cover_letter = required_text("cover_letter", &self.cover_letter, MAX_COVER_LETTER_LEN)?;
        let proposed_rate = non_negative("proposed_rate", self.proposed_rate)?;
        Ok((cover_letter, proposed_rate, non_blank(self.estimated_duration)))
    }
}

#[derive(Debug, Deserialize)]
pub struct ApplicationStatusRequest {
    pub status: ApplicationStatus,
}

#[derive(Debug, Serialize)]
pub struct ApplicationList {
    pub items: Vec<Application>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: Uuid,
    pub content: String,
    pub project_id: Option<Uuid>,
}

impl SendMessageRequest {
    pub fn validate(&self, sender_id: Uuid) -> Result<String, ApiError> {
        if self.recipient_id == sender_id {
            return Err(ApiError::BadRequest("cannot message yourself".into()));
        }
        required_text("content", &self.content, MAX_MESSAGE_LEN)
    }
}

#[derive(Debug, Serialize)]
pub struct MessageList {
    pub items: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct ConversationList {
    pub items: Vec<Conversation>,
}

/// Counters relevant to the caller's side of the marketplace.
#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum RoleStats {
    Client {
        projects_posted: i64,
        open_projects: i64,
        applications_received: i64,
    },
    Freelancer {
        applications_sent: i64,
        applications_accepted: i64,
    },
}

#[derive(Debug, Serialize, PartialEq)]
pub struct UserStatsResponse {
    pub account_type: AccountType,
    #[serde(flatten)]
    pub stats: RoleStats,
    pub unread_messages: i64,
}

impl UserStatsResponse {
    pub fn for_type(account_type: AccountType, s: UserStats) -> Self {
        let stats = match account_type {
            AccountType::Client => RoleStats::Client {
                projects_posted: s.projects_posted,
                open_projects: s.open_projects,
                applications_received: s.applications_received,
            },
            AccountType::Freelancer => RoleStats::Freelancer {
                applications_sent: s.applications_sent,
                applications_accepted: s.applications_accepted,
            },
        };
        Self {
            account_type,
            stats,
            unread_messages: s.unread_messages,
        }
    }
}
