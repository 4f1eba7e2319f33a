use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    projects::Project,
    state::AppState,
    users::User,
};

/// Checks that every requested username exists and belongs to the project.
/// `found` is what the user lookup returned for `requested`.
pub fn check_members(
    project: &Project,
    requested: &[String],
    found: &[(Uuid, String)],
) -> ApiResult<Vec<Uuid>> {
    let unknown: Vec<&str> = requested
        .iter()
        .filter(|name| !found.iter().any(|(_, n)| n == *name))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(ApiError::NotFound(format!(
            "Unknown user(s): {}",
            unknown.join(", ")
        )));
    }

    let outsiders: Vec<&str> = found
        .iter()
        .filter(|(id, _)| !project.has_member(*id))
        .map(|(_, n)| n.as_str())
        .collect();
    if !outsiders.is_empty() {
        return Err(ApiError::Validation(format!(
            "Not members of {}: {}",
            project.name,
            outsiders.join(", ")
        )));
    }

    Ok(found.iter().map(|(id, _)| *id).collect())
}

pub async fn resolve_members(
    state: &AppState,
    project: &Project,
    usernames: &[String],
) -> ApiResult<Vec<Uuid>> {
    if usernames.is_empty() {
        return Ok(Vec::new());
    }
    let found = User::ids_by_usernames(&state.db, usernames).await?;
    check_members(project, usernames, &found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn project(owner: Uuid, collaborators: Vec<Uuid>) -> Project {
        Project {
            id: Uuid::new_v4(),
            name: "my-site".into(),
            owner_id: owner,
            owner: "owner".into(),
            collaborators: collaborators.iter().map(|id| id.to_string()).collect(),
            collaborator_ids: collaborators,
            bucket_name: "test-my-site".into(),
            site_url: None,
            storage_provider: "s3".into(),
            auth: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn members_must_exist() {
        let owner = Uuid::new_v4();
        let p = project(owner, vec![]);
        let requested = vec!["owner".to_string(), "ghost".to_string()];
        let found = vec![(owner, "owner".to_string())];
        match check_members(&p, &requested, &found) {
            Err(ApiError::NotFound(msg)) => assert!(msg.contains("ghost")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn members_must_belong_to_project() {
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let p = project(owner, vec![]);
        let requested = vec!["stranger".to_string()];
        let found = vec![(stranger, "stranger".to_string())];
        assert!(matches!(
            check_members(&p, &requested, &found),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn owner_and_collaborators_are_accepted() {
        let owner = Uuid::new_v4();
        let collab = Uuid::new_v4();
        let p = project(owner, vec![collab]);
        let requested = vec!["owner".to_string(), "collab".to_string()];
        let found = vec![(owner, "owner".to_string()), (collab, "collab".to_string())];
        let ids = check_members(&p, &requested, &found).unwrap();
        assert_eq!(ids, vec![owner, collab]);
    }
}
