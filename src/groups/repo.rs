use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::Group;

const GROUP_SELECT: &str = r#"
    SELECT g.id, g.project_id, p.name AS project, g.name,
           ARRAY(SELECT u.username FROM group_members gm
                  JOIN users u ON u.id = gm.user_id
                  WHERE gm.group_id = g.id ORDER BY u.username) AS members,
           g.created_at
      FROM groups g
      JOIN projects p ON p.id = g.project_id
"#;

impl Group {
    pub async fn list_for_project(db: &PgPool, project_id: Uuid) -> anyhow::Result<Vec<Group>> {
        let rows = sqlx::query_as::<_, Group>(&format!(
            "{GROUP_SELECT} WHERE g.project_id = $1 ORDER BY g.name"
        ))
        .bind(project_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    /// Groups the user belongs to, across projects.
    pub async fn list_for_member(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<Group>> {
        let rows = sqlx::query_as::<_, Group>(&format!(
            r#"{GROUP_SELECT}
             WHERE EXISTS (SELECT 1 FROM group_members gm
                            WHERE gm.group_id = g.id AND gm.user_id = $1)
             ORDER BY p.name, g.name"#
        ))
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn find(db: &PgPool, project_id: Uuid, name: &str) -> anyhow::Result<Option<Group>> {
        let group = sqlx::query_as::<_, Group>(&format!(
            "{GROUP_SELECT} WHERE g.project_id = $1 AND g.name = $2"
        ))
        .bind(project_id)
        .bind(name)
        .fetch_optional(db)
        .await?;
        Ok(group)
    }

    /// Fails with a unique violation when the name is taken in the project.
    pub async fn create(db: &PgPool, project_id: Uuid, name: &str) -> anyhow::Result<Uuid> {
        let (id,): (Uuid,) =
            sqlx::query_as("INSERT INTO groups (project_id, name) VALUES ($1, $2) RETURNING id")
                .bind(project_id)
                .bind(name)
                .fetch_one(db)
                .await?;
        Ok(id)
    }

    /// Returns the group id, creating the group when it doesn't exist yet.
    pub async fn get_or_create(db: &PgPool, project_id: Uuid, name: &str) -> anyhow::Result<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO groups (project_id, name) VALUES ($1, $2)
            ON CONFLICT (project_id, name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(project_id)
        .bind(name)
        .fetch_one(db)
        .await?;
        Ok(id)
    }

    pub async fn add_members(db: &PgPool, group_id: Uuid, user_ids: &[Uuid]) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            INSERT INTO group_members (group_id, user_id)
            SELECT $1, unnest($2::uuid[])
            ON CONFLICT (group_id, user_id) DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(user_ids)
        .execute(db)
        .await?;
        Ok(res.rows_affected())
    }

    pub async fn remove_members(db: &PgPool, group_id: Uuid, user_ids: &[Uuid]) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM group_members WHERE group_id = $1 AND user_id = ANY($2)")
            .bind(group_id)
            .bind(user_ids)
            .execute(db)
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn delete(db: &PgPool, project_id: Uuid, name: &str) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM groups WHERE project_id = $1 AND name = $2")
            .bind(project_id)
            .bind(name)
            .execute(db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sqlx::PgPool;

    use super::*;
    use crate::{
        error::ApiError,
        projects::{dto::CreateProjectRequest, services::create_project},
        state::{seed_user, AppState, MemoryQueue, MemoryStorage},
    };

    async fn project_with_owner(pool: PgPool) -> (AppState, Uuid, Uuid) {
        let state = AppState::with_db(
            pool,
            Arc::new(MemoryStorage::default()),
            Arc::new(MemoryQueue::default()),
        );
        let owner = seed_user(&state.db, "jane").await;
        let req = CreateProjectRequest {
            name: "my-site".into(),
            template: None,
        };
        let (project, _) = create_project(&state, &owner, req).await.unwrap();
        (state, project.id, owner.id)
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn group_names_are_unique_per_project(pool: PgPool) {
        let (state, project_id, _) = project_with_owner(pool).await;
        Group::create(&state.db, project_id, "editors").await.unwrap();

        let err: ApiError = Group::create(&state.db, project_id, "editors")
            .await
            .unwrap_err()
            .into();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(Group::list_for_project(&state.db, project_id).await.unwrap().len(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn get_or_create_makes_group_on_demand(pool: PgPool) {
        let (state, project_id, owner_id) = project_with_owner(pool).await;
        assert!(Group::find(&state.db, project_id, "editors").await.unwrap().is_none());

        let first = Group::get_or_create(&state.db, project_id, "editors").await.unwrap();
        let second = Group::get_or_create(&state.db, project_id, "editors").await.unwrap();
        assert_eq!(first, second);

        assert_eq!(Group::add_members(&state.db, first, &[owner_id]).await.unwrap(), 1);
        assert_eq!(Group::add_members(&state.db, first, &[owner_id]).await.unwrap(), 0);
        let group = Group::find(&state.db, project_id, "editors").await.unwrap().unwrap();
        assert_eq!(group.members, vec!["jane".to_string()]);
        assert_eq!(group.project, "my-site");

        let mine = Group::list_for_member(&state.db, owner_id).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(Group::remove_members(&state.db, first, &[owner_id]).await.unwrap(), 1);
    }
}
