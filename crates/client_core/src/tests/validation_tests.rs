use super::*;

#[test]
fn section_names_are_trimmed_and_bounded() {
    assert_eq!(section_name("  Review ").as_deref(), Ok("Review"));
    assert_eq!(
        section_name("   "),
        Err(ValidationError::Required {
            field: "section name"
        })
    );
    assert!(matches!(
        section_name("x"),
        Err(ValidationError::Length { min: 2, max: 50, .. })
    ));
    assert!(section_name(&"a".repeat(50)).is_ok());
    assert!(section_name(&"a".repeat(51)).is_err());
    // Length counts characters, not bytes.
    assert!(section_name("éé").is_ok());
}

#[test]
fn team_names_are_required_and_capped() {
    assert_eq!(team_name(" Growth ").as_deref(), Ok("Growth"));
    assert!(team_name("").is_err());
    assert!(team_name(&"t".repeat(TEAM_NAME_MAX)).is_ok());
    assert!(team_name(&"t".repeat(TEAM_NAME_MAX + 1)).is_err());
}

#[test]
fn projects_need_a_name_and_a_team() {
    assert!(project_name("  ").is_err());
    assert_eq!(project_name(" Web ").as_deref(), Ok("Web"));
    assert_eq!(
        project_team(None),
        Err(ValidationError::Required { field: "team" })
    );
    let team = TeamId::random();
    assert_eq!(project_team(Some(team)), Ok(team));
}

#[test]
fn task_text_must_not_be_blank() {
    assert!(task_description("\t").is_err());
    assert!(subtask_description("").is_err());
    assert_eq!(task_description(" call vendor ").as_deref(), Ok("call vendor"));
}

#[test]
fn member_selection_must_not_be_empty() {
    assert_eq!(member_selection(&[]), Err(ValidationError::NoMembersSelected));
    assert!(member_selection(&[UserId::random()]).is_ok());
}

#[test]
fn team_selection_always_starts_with_the_owner() {
    let owner = UserId::random();
    let a = UserId::random();
    let b = UserId::random();

    assert_eq!(team_selection(owner, &[]), vec![owner]);
    assert_eq!(team_selection(owner, &[a, owner, b, a]), vec![owner, a, b]);
}

#[test]
fn credentials_need_an_address_and_a_password() {
    assert_eq!(
        credentials(" kim@example.com ", "secret").as_deref(),
        Ok("kim@example.com")
    );
    assert!(credentials("kim", "secret").is_err());
    assert_eq!(
        credentials("kim@example.com", ""),
        Err(ValidationError::Required { field: "password" })
    );
    assert!(full_name("  ").is_err());
}
