use serde::{Deserialize, Serialize};

use super::model::{Account, DirectoryFilter, ProfileUpdate};
use crate::error::ApiError;

pub const MAX_PAGE_SIZE: i64 = 100;
pub const MAX_SKILLS: usize = 50;
const MAX_SKILL_LEN: usize = 50;
const MAX_NAME_LEN: usize = 120;
const MAX_BIO_LEN: usize = 2000;
const MAX_FIELD_LEN: usize = 200;
const MAX_URL_LEN: usize = 500;

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub profile: Account,
}

#[derive(Debug, Serialize)]
pub struct DirectoryResponse {
    pub items: Vec<Account>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct DirectoryQuery {
    pub search: Option<String>,
    pub skill: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<DirectoryQuery> for DirectoryFilter {
    fn from(q: DirectoryQuery) -> Self {
        let defaults = DirectoryFilter::default();
        Self {
            search: non_blank(q.search),
            skill: non_blank(q.skill),
            limit: q.limit.unwrap_or(defaults.limit).clamp(1, MAX_PAGE_SIZE),
            offset: q.offset.unwrap_or(0).max(0),
        }
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn check_len(field: &str, value: &Option<String>, max: usize) -> Result<(), ApiError> {
    match value {
        Some(v) if v.chars().count() > max => Err(ApiError::BadRequest(format!(
            "{field} must be at most {max} characters"
        ))),
        _ => Ok(()),
    }
}

fn check_url(field: &str, value: &Option<String>) -> Result<(), ApiError> {
    check_len(field, value, MAX_URL_LEN)?;
    match value.as_deref() {
        Some(v) if !v.is_empty() && url::Url::parse(v).map_or(true, |u| {
            !matches!(u.scheme(), "http" | "https")
        }) =>
        {
            Err(ApiError::BadRequest(format!("{field} must be an http(s) URL")))
        }
        _ => Ok(()),
    }
}

/// Trims the update and rejects values the profile columns should not hold.
pub fn validate_profile_update(mut update: ProfileUpdate) -> Result<ProfileUpdate, ApiError> {
    for field in [
        &mut update.full_name,
        &mut update.bio,
        &mut update.location,
        &mut update.company_name,
        &mut update.website,
        &mut update.avatar_url,
    ] {
        if let Some(v) = field.as_mut() {
            *v = v.trim().to_string();
        }
    }

    check_len("full_name", &update.full_name, MAX_NAME_LEN)?;
    check_len("bio", &update.bio, MAX_BIO_LEN)?;
    check_len("location", &update.location, MAX_FIELD_LEN)?;
    check_len("company_name", &update.company_name, MAX_FIELD_LEN)?;
    check_url("website", &update.website)?;
    check_url("avatar_url", &update.avatar_url)?;

    if let Some(rate) = update.hourly_rate {
        if !rate.is_finite() || rate < 0.0 {
            return Err(ApiError::BadRequest(
                "hourly_rate must be a non-negative number".into(),
            ));
        }
    }

    if let Some(skills) = update.skills.take() {
        let mut cleaned: Vec<String> = Vec::with_capacity(skills.len());
        for skill in skills {
            let skill = skill.trim().to_string();
            if skill.is_empty() || cleaned.contains(&skill) {
                continue;
            }
            if skill.chars().count() > MAX_SKILL_LEN {
                return Err(ApiError::BadRequest(format!(
                    "each skill must be at most {MAX_SKILL_LEN} characters"
                )));
            }
            cleaned.push(skill);
        }
        if cleaned.len() > MAX_SKILLS {
            return Err(ApiError::BadRequest(format!(
                "at most {MAX_SKILLS} skills are allowed"
            )));
        }
        update.skills = Some(cleaned);
    }

    Ok(update)
}
