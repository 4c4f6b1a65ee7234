use shared::domain::{TeamId, UserId};

use crate::error::ValidationError;

pub const SECTION_NAME_MIN: usize = 2;
pub const SECTION_NAME_MAX: usize = 50;
pub const TEAM_NAME_MAX: usize = 50;

pub fn section_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "section name",
        });
    }
    let len = name.chars().count();
    if !(SECTION_NAME_MIN..=SECTION_NAME_MAX).contains(&len) {
        return Err(ValidationError::Length {
            field: "section name",
            min: SECTION_NAME_MIN,
            max: SECTION_NAME_MAX,
        });
    }
    Ok(name.to_string())
}

pub fn team_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "workspace name",
        });
    }
    if name.chars().count() > TEAM_NAME_MAX {
        return Err(ValidationError::Length {
            field: "workspace name",
            min: 1,
            max: TEAM_NAME_MAX,
        });
    }
    Ok(name.to_string())
}

pub fn project_name(raw: &str) -> Result<String, ValidationError> {
    required(raw, "project name")
}

pub fn project_team(team: Option<TeamId>) -> Result<TeamId, ValidationError> {
    team.ok_or(ValidationError::Required { field: "team" })
}

pub fn task_description(raw: &str) -> Result<String, ValidationError> {
    required(raw, "task description")
}

pub fn subtask_description(raw: &str) -> Result<String, ValidationError> {
    required(raw, "subtask description")
}

pub fn member_selection(selected: &[UserId]) -> Result<(), ValidationError> {
    if selected.is_empty() {
        return Err(ValidationError::NoMembersSelected);
    }
    Ok(())
}

/// Selection for a new team always contains the owner exactly once, first.
pub fn team_selection(owner: UserId, selected: &[UserId]) -> Vec<UserId> {
    let mut members = vec![owner];
    for user in selected {
        if !members.contains(user) {
            members.push(*user);
        }
    }
    members
}

fn required(raw: &str, field: &'static str) -> Result<String, ValidationError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ValidationError::Required { field });
    }
    Ok(value.to_string())
}

pub fn credentials(email: &str, password: &str) -> Result<String, ValidationError> {
    let email = required(email, "email")?;
    if !email.contains('@') {
        return Err(ValidationError::Request(format!(
            "'{email}' is not an email address"
        )));
    }
    if password.is_empty() {
        return Err(ValidationError::Required { field: "password" });
    }
    Ok(email)
}

pub fn full_name(raw: &str) -> Result<String, ValidationError> {
    required(raw, "full name")
}

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod tests;
