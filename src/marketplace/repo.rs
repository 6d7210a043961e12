use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::model::{
    Application, ApplicationStatus, Conversation, Message, NewApplication, NewProject, Project,
    ProjectFilter, ProjectStatus, UserStats,
};
use crate::accounts::StoreError;

// Projection shared by every project query; expects the row under alias `p`.
const PROJECT_FIELDS: &str = r#"
    p.id, p.client_id, p.title, p.description, p.category, p.skills_required,
    p.budget_min, p.budget_max, p.deadline, p.status,
    u.full_name AS client_name,
    (SELECT COUNT(*) FROM applications a WHERE a.project_id = p.id) AS application_count,
    p.created_at, p.updated_at
"#;

const APPLICATION_FIELDS: &str = r#"
    a.id, a.project_id, a.freelancer_id, a.cover_letter, a.proposed_rate,
    a.estimated_duration, a.status,
    pr.title AS project_title,
    u.full_name AS freelancer_name,
    u.avatar_url AS freelancer_avatar,
    a.created_at, a.updated_at
"#;

const APPLICATION_JOINS: &str = r#"
    LEFT JOIN projects pr ON pr.id = a.project_id
    LEFT JOIN user_profiles u ON u.user_id = a.freelancer_id
"#;

const MESSAGE_FIELDS: &str =
    "id, sender_id, recipient_id, project_id, content, read_at, created_at";

pub async fn list_open_projects(
    db: &PgPool,
    filter: &ProjectFilter,
) -> Result<Vec<Project>, StoreError> {
    let sql = format!(
        r#"
        SELECT {PROJECT_FIELDS}
          FROM projects p
          LEFT JOIN user_profiles u ON u.user_id = p.client_id
         WHERE p.status = 'open'
           AND ($1::text IS NULL
                OR p.title ILIKE '%' || $1 || '%'
                OR p.description ILIKE '%' || $1 || '%')
           AND ($2::text IS NULL OR p.category = $2)
         ORDER BY p.created_at DESC
         LIMIT $3 OFFSET $4
        "#
    );
    let rows = sqlx::query_as::<_, Project>(&sql)
        .bind(&filter.search)
        .bind(&filter.category)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(db)
        .await?;
    Ok(rows)
}

pub async fn get_project(db: &PgPool, id: Uuid) -> Result<Option<Project>, StoreError> {
    let sql = format!(
        r#"
        SELECT {PROJECT_FIELDS}
          FROM projects p
          LEFT JOIN user_profiles u ON u.user_id = p.client_id
         WHERE p.id = $1
        "#
    );
    let row = sqlx::query_as::<_, Project>(&sql)
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(row)
}

pub async fn list_projects_by_client(
    db: &PgPool,
    client_id: Uuid,
) -> Result<Vec<Project>, StoreError> {
    let sql = format!(
        r#"
        SELECT {PROJECT_FIELDS}
          FROM projects p
          LEFT JOIN user_profiles u ON u.user_id = p.client_id
         WHERE p.client_id = $1
         ORDER BY p.created_at DESC
        "#
    );
    let rows = sqlx::query_as::<_, Project>(&sql)
        .bind(client_id)
        .fetch_all(db)
        .await?;
    Ok(rows)
}

pub async fn insert_project(db: &PgPool, project: NewProject) -> Result<Project, StoreError> {
    let sql = format!(
        r#"
        WITH p AS (
            INSERT INTO projects
                (id, client_id, title, description, category, skills_required,
                 budget_min, budget_max, deadline, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'open')
            RETURNING *
        )
        SELECT {PROJECT_FIELDS}
          FROM p
          LEFT JOIN user_profiles u ON u.user_id = p.client_id
        "#
    );
    let row = sqlx::query_as::<_, Project>(&sql)
        .bind(Uuid::new_v4())
        .bind(project.client_id)
        .bind(&project.title)
        .bind(&project.description)
        .bind(&project.category)
        .bind(&project.skills_required)
        .bind(project.budget_min)
        .bind(project.budget_max)
        .bind(project.deadline)
        .fetch_one(db)
        .await?;
    debug!(project_id = %row.id, client_id = %row.client_id, "project inserted");
    Ok(row)
}

pub async fn update_project_status(
    db: &PgPool,
    id: Uuid,
    status: ProjectStatus,
) -> Result<Project, StoreError> {
    let sql = format!(
        r#"
        WITH p AS (
            UPDATE projects
               SET status = $2, updated_at = now()
             WHERE id = $1
            RETURNING *
        )
        SELECT {PROJECT_FIELDS}
          FROM p
          LEFT JOIN user_profiles u ON u.user_id = p.client_id
        "#
    );
    sqlx::query_as::<_, Project>(&sql)
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(db)
        .await?
        .ok_or(StoreError::NotFound)
}

pub async fn has_applied(
    db: &PgPool,
    project_id: Uuid,
    freelancer_id: Uuid,
) -> Result<bool, StoreError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM applications WHERE project_id = $1 AND freelancer_id = $2)",
    )
    .bind(project_id)
    .bind(freelancer_id)
    .fetch_one(db)
    .await?;
    Ok(exists)
}

/// Fails with [`StoreError::UniqueViolation`] when the freelancer already applied.
pub async fn insert_application(
    db: &PgPool,
    application: NewApplication,
) -> Result<Application, StoreError> {
    let sql = format!(
        r#"
        WITH a AS (
            INSERT INTO applications
                (id, project_id, freelancer_id, cover_letter, proposed_rate,
                 estimated_duration, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending')
            RETURNING *
        )
        SELECT {APPLICATION_FIELDS}
          FROM a
          {APPLICATION_JOINS}
        "#
    );
    let row = sqlx::query_as::<_, Application>(&sql)
        .bind(Uuid::new_v4())
        .bind(application.project_id)
        .bind(application.freelancer_id)
        .bind(&application.cover_letter)
        .bind(application.proposed_rate)
        .bind(&application.estimated_duration)
        .fetch_one(db)
        .await?;
    debug!(application_id = %row.id, project_id = %row.project_id, "application inserted");
    Ok(row)
}

pub async fn get_application(db: &PgPool, id: Uuid) -> Result<Option<Application>, StoreError> {
    let sql = format!(
        r#"
        SELECT {APPLICATION_FIELDS}
          FROM applications a
          {APPLICATION_JOINS}
         WHERE a.id = $1
        "#
    );
    let row = sqlx::query_as::<_, Application>(&sql)
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(row)
}

pub async fn list_applications_for_project(
    db: &PgPool,
    project_id: Uuid,
) -> Result<Vec<Application>, StoreError> {
    let sql = format!(
        r#"
        SELECT {APPLICATION_FIELDS}
          FROM applications a
          {APPLICATION_JOINS}
         WHERE a.project_id = $1
         ORDER BY a.created_at DESC
        "#
    );
    let rows = sqlx::query_as::<_, Application>(&sql)
        .bind(project_id)
        .fetch_all(db)
        .await?;
    Ok(rows)
}

pub async fn list_applications_by_freelancer(
    db: &PgPool,
    freelancer_id: Uuid,
) -> Result<Vec<Application>, StoreError> {
    let sql = format!(
        r#"
        SELECT {APPLICATION_FIELDS}
          FROM applications a
          {APPLICATION_JOINS}
         WHERE a.freelancer_id = $1
         ORDER BY a.created_at DESC
        "#
    );
    let rows = sqlx::query_as::<_, Application>(&sql)
        .bind(freelancer_id)
        .fetch_all(db)
        .await?;
    Ok(rows)
}

pub async fn update_application_status(
    db: &PgPool,
    id: Uuid,
    status: ApplicationStatus,
) -> Result<Application, StoreError> {
    let sql = format!(
        r#"
        WITH a AS (
            UPDATE applications
               SET status = $2, updated_at = now()
             WHERE id = $1
            RETURNING *
        )
        SELECT {APPLICATION_FIELDS}
          FROM a
          {APPLICATION_JOINS}
        "#
    );
    sqlx::query_as::<_, Application>(&sql)
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(db)
        .await?
        .ok_or(StoreError::NotFound)
}

pub async fn insert_message(
    db: &PgPool,
    sender_id: Uuid,
    recipient_id: Uuid,
    project_id: Option<Uuid>,
    content: &str,
) -> Result<Message, StoreError> {
    let sql = format!(
        r#"
        INSERT INTO messages (id, sender_id, recipient_id, project_id, content)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {MESSAGE_FIELDS}
        "#
    );
    let row = sqlx::query_as::<_, Message>(&sql)
        .bind(Uuid::new_v4())
        .bind(sender_id)
        .bind(recipient_id)
        .bind(project_id)
        .bind(content)
        .fetch_one(db)
        .await?;
    Ok(row)
}

pub async fn list_conversations(
    db: &PgPool,
    user_id: Uuid,
) -> Result<Vec<Conversation>, StoreError> {
    let rows = sqlx::query_as::<_, Conversation>(
        r#"
        WITH thread AS (
            SELECT CASE WHEN sender_id = $1 THEN recipient_id ELSE sender_id END AS counterparty_id,
                   content,
                   created_at,
                   (recipient_id = $1 AND read_at IS NULL) AS unread
              FROM messages
             WHERE sender_id = $1 OR recipient_id = $1
        ),
        latest AS (
            SELECT DISTINCT ON (counterparty_id) counterparty_id, content, created_at
              FROM thread
             ORDER BY counterparty_id, created_at DESC
        ),
        unread AS (
            SELECT counterparty_id, COUNT(*) FILTER (WHERE unread) AS unread_count
              FROM thread
             GROUP BY counterparty_id
        )
        SELECT l.counterparty_id,
               u.full_name  AS counterparty_name,
               u.avatar_url AS counterparty_avatar,
               l.content    AS last_message,
               l.created_at AS last_message_at,
               n.unread_count
          FROM latest l
          JOIN unread n USING (counterparty_id)
          LEFT JOIN user_profiles u ON u.user_id = l.counterparty_id
         ORDER BY l.created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Messages between two users, oldest first.
pub async fn thread(
    db: &PgPool,
    user_id: Uuid,
    other_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Message>, StoreError> {
    let sql = format!(
        r#"
        SELECT {MESSAGE_FIELDS}
          FROM messages
         WHERE (sender_id = $1 AND recipient_id = $2)
            OR (sender_id = $2 AND recipient_id = $1)
         ORDER BY created_at ASC
         LIMIT $3 OFFSET $4
        "#
    );
    let rows = sqlx::query_as::<_, Message>(&sql)
        .bind(user_id)
        .bind(other_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;
    Ok(rows)
}

/// Marks the given messages read, skipping any not addressed to `recipient_id`.
pub async fn mark_read(
    db: &PgPool,
    recipient_id: Uuid,
    sender_id: Uuid,
    ids: &[Uuid],
) -> Result<u64, StoreError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let done = sqlx::query(
        r#"
        UPDATE messages
           SET read_at = now()
         WHERE recipient_id = $1 AND sender_id = $2 AND id = ANY($3) AND read_at IS NULL
        "#,
    )
    .bind(recipient_id)
    .bind(sender_id)
    .bind(ids)
    .execute(db)
    .await?;
    Ok(done.rows_affected())
}

pub async fn user_stats(db: &PgPool, user_id: Uuid) -> Result<UserStats, StoreError> {
    let stats = sqlx::query_as::<_, UserStats>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM projects WHERE client_id = $1) AS projects_posted,
            (SELECT COUNT(*) FROM projects WHERE client_id = $1 AND status = 'open') AS open_projects,
            (SELECT COUNT(*)
               FROM applications a
               JOIN projects p ON p.id = a.project_id
              WHERE p.client_id = $1) AS applications_received,
            (SELECT COUNT(*) FROM applications WHERE freelancer_id = $1) AS applications_sent,
            (SELECT COUNT(*)
               FROM applications
              WHERE freelancer_id = $1 AND status = 'accepted') AS applications_accepted,
            (SELECT COUNT(*)
               FROM messages
              WHERE recipient_id = $1 AND read_at IS NULL) AS unread_messages
        "#,
    )
    .bind(user_id)
    .fetch_one(db)
    .await?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::model::unread_ids;

    async fn pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database");
        let db = PgPool::connect(&url).await.unwrap();
        sqlx::migrate!("./migrations").run(&db).await.unwrap();
        db
    }

    async fn user(db: &PgPool, account_type: &str, provider: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO user_profiles (user_id, email, account_type, provider, full_name)
             VALUES ($1, $2, $3, $4, 'Repo User')",
        )
        .bind(id)
        .bind(format!("{id}@repo.test"))
        .bind(account_type)
        .bind(provider)
        .execute(db)
        .await
        .unwrap();
        id
    }

    fn new_project(client_id: Uuid, title: &str) -> NewProject {
        NewProject {
            client_id,
            title: title.into(),
            description: "Backend work".into(),
            category: Some("web".into()),
            skills_required: vec!["rust".into()],
            budget_min: Some(100.0),
            budget_max: Some(500.0),
            deadline: None,
        }
    }

    #[tokio::test]
    #[ignore] // Requires a Postgres DATABASE_URL
    async fn reading_a_thread_page_marks_only_that_page() {
        let db = pool().await;
        let me = user(&db, "client", "google").await;
        let other = user(&db, "freelancer", "github").await;
        for text in ["one", "two", "three"] {
            insert_message(&db, other, me, None, text).await.unwrap();
        }
        insert_message(&db, me, other, None, "reply").await.unwrap();

        let page = thread(&db, me, other, 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "one");
        let ids = unread_ids(&page, me);
        assert_eq!(ids.len(), 2);

        assert_eq!(mark_read(&db, other, me, &ids).await.unwrap(), 0);
        assert_eq!(mark_read(&db, me, other, &ids).await.unwrap(), 2);
        assert_eq!(mark_read(&db, me, other, &ids).await.unwrap(), 0);
        assert_eq!(mark_read(&db, me, other, &[]).await.unwrap(), 0);

        assert_eq!(user_stats(&db, me).await.unwrap().unread_messages, 1);
        assert_eq!(user_stats(&db, other).await.unwrap().unread_messages, 1);

        let conversations = list_conversations(&db, me).await.unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].counterparty_id, other);
        assert_eq!(conversations[0].last_message, "reply");
        assert_eq!(conversations[0].unread_count, 1);
    }

    #[tokio::test]
    #[ignore] // Requires a Postgres DATABASE_URL
    async fn application_rows_feed_project_counts_and_stats() {
        let db = pool().await;
        let client = user(&db, "client", "google").await;
        let freelancer = user(&db, "freelancer", "github").await;
        let title = format!("Rust API {}", Uuid::new_v4().simple());

        let project = insert_project(&db, new_project(client, &title)).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Open);
        assert_eq!(project.client_name.as_deref(), Some("Repo User"));

        let filter = ProjectFilter {
            search: Some(title.to_lowercase()),
            category: Some("web".into()),
            limit: 20,
            offset: 0,
        };
        assert_eq!(list_open_projects(&db, &filter).await.unwrap().len(), 1);
        assert!(!has_applied(&db, project.id, freelancer).await.unwrap());

        let apply = || NewApplication {
            project_id: project.id,
            freelancer_id: freelancer,
            cover_letter: "I have shipped this before".into(),
            proposed_rate: Some(60.0),
            estimated_duration: None,
        };
        let application = insert_application(&db, apply()).await.unwrap();
        assert_eq!(application.status, ApplicationStatus::Pending);
        assert_eq!(application.project_title.as_deref(), Some(title.as_str()));
        assert!(matches!(
            insert_application(&db, apply()).await,
            Err(StoreError::UniqueViolation(_))
        ));
        assert!(has_applied(&db, project.id, freelancer).await.unwrap());

        let stored = get_project(&db, project.id).await.unwrap().unwrap();
        assert_eq!(stored.application_count, 1);
        assert_eq!(list_applications_for_project(&db, project.id).await.unwrap().len(), 1);
        assert_eq!(list_applications_by_freelancer(&db, freelancer).await.unwrap().len(), 1);

        let accepted = update_application_status(&db, application.id, ApplicationStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(accepted.status, ApplicationStatus::Accepted);
        assert!(matches!(
            update_application_status(&db, Uuid::new_v4(), ApplicationStatus::Rejected).await,
            Err(StoreError::NotFound)
        ));

        let moved = update_project_status(&db, project.id, ProjectStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(moved.status, ProjectStatus::InProgress);
        assert!(list_open_projects(&db, &filter).await.unwrap().is_empty());
        assert_eq!(list_projects_by_client(&db, client).await.unwrap().len(), 1);

        let client_stats = user_stats(&db, client).await.unwrap();
        assert_eq!(client_stats.projects_posted, 1);
        assert_eq!(client_stats.open_projects, 0);
        assert_eq!(client_stats.applications_received, 1);
        let freelancer_stats = user_stats(&db, freelancer).await.unwrap();
        assert_eq!(freelancer_stats.applications_sent, 1);
        assert_eq!(freelancer_stats.applications_accepted, 1);
    }
}
