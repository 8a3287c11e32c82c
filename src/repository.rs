use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction, query_builder::QueryBuilder};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    cascade::{CascadeStep, CascadeStore, CascadeTx},
    error::{AppError, AppResult},
    models::{
        AuditLogQuery, AuditRecord, CleanReport, Comment, Identity, IdentityChanges,
        NewAuditRecord, NewIdentity, PageWindow, Post, Room,
    },
};

/// IdentityRepository
///
/// Persistence contract for operator and user identities (`users` table).
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Exact, case-sensitive lookup.
    async fn find_by_username(&self, username: &str) -> AppResult<Option<Identity>>;
    async fn get_identity(&self, id: Uuid) -> AppResult<Option<Identity>>;
    async fn list_identities(
        &self,
        window: PageWindow,
        keyword: Option<&str>,
    ) -> AppResult<(Vec<Identity>, i64)>;
    /// Fails with `Conflict` when the username is taken.
    async fn create_identity(&self, new: NewIdentity) -> AppResult<Identity>;
    async fn update_identity(&self, id: Uuid, changes: IdentityChanges)
    -> AppResult<Option<Identity>>;
    async fn delete_identity(&self, id: Uuid) -> AppResult<bool>;
    /// Stamps `last_login_at` after a successful admin login.
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<()>;
}

/// ContentRepository
///
/// Read access to moderated content plus the single-row mutations that do not go through
/// the cascade coordinator.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn list_posts(&self, window: PageWindow, keyword: Option<&str>)
    -> AppResult<(Vec<Post>, i64)>;
    async fn get_post(&self, id: Uuid) -> AppResult<Option<Post>>;
    async fn list_rooms(&self, window: PageWindow, keyword: Option<&str>)
    -> AppResult<(Vec<Room>, i64)>;
    async fn get_room(&self, id: Uuid) -> AppResult<Option<Room>>;
    /// Flips `is_active`; `None` when the room does not exist.
    async fn toggle_room(&self, id: Uuid) -> AppResult<Option<Room>>;
    async fn list_comments(
        &self,
        window: PageWindow,
        keyword: Option<&str>,
    ) -> AppResult<(Vec<Comment>, i64)>;
    async fn update_comment(&self, id: Uuid, content: &str) -> AppResult<Option<Comment>>;
    /// Removes blank tongue twisters, then duplicates by content keeping the earliest,
    /// in one transaction.
    async fn clean_tongue_twisters(&self) -> AppResult<CleanReport>;
}

/// AuditSink
///
/// Append-only store of operation-log lines. Newest first when listed.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: NewAuditRecord) -> AppResult<AuditRecord>;
    async fn list(&self, query: &AuditLogQuery) -> AppResult<(Vec<AuditRecord>, i64)>;
    async fn get(&self, id: Uuid) -> AppResult<Option<AuditRecord>>;
}

pub type IdentityState = Arc<dyn IdentityRepository>;
pub type ContentState = Arc<dyn ContentRepository>;
pub type AuditState = Arc<dyn AuditSink>;

const IDENTITY_COLUMNS: &str =
    "id, username, email, phone, password_hash, role, status, created_at, updated_at, last_login_at";
const POST_COLUMNS: &str = "id, user_id, content, tag, likes_count, comments_count, created_at";
const ROOM_COLUMNS: &str =
    "id, user_id, title, theme, type, max_members, current_members, is_active, created_at";
const COMMENT_COLUMNS: &str = "id, post_id, user_id, content, likes_count, created_at";
const AUDIT_COLUMNS: &str = "id, actor_id, actor_username, actor_role, action, resource_type, \
     resource_id, detail, outcome, created_at";

/// PostgresRepository
///
/// The Postgres-backed implementation of every store seam.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs a filtered `SELECT` twice: once for the page, once for the total.
    async fn paged<T>(
        &self,
        columns: &str,
        table: &str,
        order: &str,
        window: PageWindow,
        filter: impl Fn(&mut QueryBuilder<'_, Postgres>),
    ) -> AppResult<(Vec<T>, i64)>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
    {
        let mut count: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT COUNT(*) FROM {table} WHERE 1=1"));
        filter(&mut count);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {columns} FROM {table} WHERE 1=1"));
        filter(&mut select);
        select.push(format!(" ORDER BY {order} LIMIT "));
        select.push_bind(window.page_size);
        select.push(" OFFSET ");
        select.push_bind(window.offset());
        let items = select.build_query_as::<T>().fetch_all(&self.pool).await?;

        Ok((items, total))
    }
}

/// Turns a keyword into a substring pattern where `%`, `_` and `\` match literally.
pub(crate) fn like_pattern(keyword: &str) -> String {
    let mut pattern = String::with_capacity(keyword.len() + 2);
    pattern.push('%');
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Appends `AND (c1 ILIKE $n ESCAPE '\' OR ...)` for a non-blank keyword.
fn push_keyword(builder: &mut QueryBuilder<'_, Postgres>, columns: &[&str], keyword: Option<&str>) {
    let Some(keyword) = keyword else {
        return;
    };
    let pattern = like_pattern(keyword);
    builder.push(" AND (");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            builder.push(" OR ");
        }
        builder.push(format!("{column} ILIKE "));
        builder.push_bind(pattern.clone());
        builder.push(" ESCAPE '\\'");
    }
    builder.push(")");
}

fn push_equals(builder: &mut QueryBuilder<'_, Postgres>, column: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        builder.push(format!(" AND {column} = "));
        builder.push_bind(value.to_string());
    }
}

#[async_trait]
impl IdentityRepository for PostgresRepository {
    async fn find_by_username(&self, username: &str) -> AppResult<Option<Identity>> {
        let sql = format!("SELECT {IDENTITY_COLUMNS} FROM users WHERE username = $1");
        Ok(sqlx::query_as::<_, Identity>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_identity(&self, id: Uuid) -> AppResult<Option<Identity>> {
        let sql = format!("SELECT {IDENTITY_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, Identity>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_identities(
        &self,
        window: PageWindow,
        keyword: Option<&str>,
    ) -> AppResult<(Vec<Identity>, i64)> {
        self.paged(IDENTITY_COLUMNS, "users", "created_at DESC", window, |b| {
            push_keyword(b, &["username", "email", "phone"], keyword)
        })
        .await
    }

    async fn create_identity(&self, new: NewIdentity) -> AppResult<Identity> {
        let sql = format!(
            "INSERT INTO users (id, username, email, phone, password_hash, role, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW()) RETURNING {IDENTITY_COLUMNS}"
        );
        sqlx::query_as::<_, Identity>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.username)
            .bind(&new.email)
            .bind(&new.phone)
            .bind(&new.password_hash)
            .bind(new.role.as_str())
            .bind(new.status.as_i32())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match AppError::from(e) {
                AppError::Conflict(_) => {
                    AppError::Conflict(format!("username '{}' already exists", new.username))
                }
                other => other,
            })
    }

    /// COALESCE keeps every column whose change is `None`.
    async fn update_identity(
        &self,
        id: Uuid,
        changes: IdentityChanges,
    ) -> AppResult<Option<Identity>> {
        let sql = format!(
            "UPDATE users SET \
                email = COALESCE($2, email), \
                phone = COALESCE($3, phone), \
                password_hash = COALESCE($4, password_hash), \
                role = COALESCE($5, role), \
                status = COALESCE($6, status), \
                updated_at = NOW() \
             WHERE id = $1 RETURNING {IDENTITY_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Identity>(&sql)
            .bind(id)
            .bind(changes.email)
            .bind(changes.phone)
            .bind(changes.password_hash)
            .bind(changes.role.map(|r| r.as_str()))
            .bind(changes.status.map(|s| s.as_i32()))
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_identity(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE users SET last_login_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ContentRepository for PostgresRepository {
    async fn list_posts(
        &self,
        window: PageWindow,
        keyword: Option<&str>,
    ) -> AppResult<(Vec<Post>, i64)> {
        self.paged(POST_COLUMNS, "posts", "created_at DESC", window, |b| {
            push_keyword(b, &["content", "tag"], keyword)
        })
        .await
    }

    async fn get_post(&self, id: Uuid) -> AppResult<Option<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
        Ok(sqlx::query_as::<_, Post>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_rooms(
        &self,
        window: PageWindow,
        keyword: Option<&str>,
    ) -> AppResult<(Vec<Room>, i64)> {
        self.paged(ROOM_COLUMNS, "practice_rooms", "created_at DESC", window, |b| {
            push_keyword(b, &["title", "theme"], keyword)
        })
        .await
    }

    async fn get_room(&self, id: Uuid) -> AppResult<Option<Room>> {
        let sql = format!("SELECT {ROOM_COLUMNS} FROM practice_rooms WHERE id = $1");
        Ok(sqlx::query_as::<_, Room>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn toggle_room(&self, id: Uuid) -> AppResult<Option<Room>> {
        let sql = format!(
            "UPDATE practice_rooms SET is_active = NOT is_active WHERE id = $1 RETURNING {ROOM_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Room>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_comments(
        &self,
        window: PageWindow,
        keyword: Option<&str>,
    ) -> AppResult<(Vec<Comment>, i64)> {
        self.paged(COMMENT_COLUMNS, "comments", "created_at DESC", window, |b| {
            push_keyword(b, &["content"], keyword)
        })
        .await
    }

    async fn update_comment(&self, id: Uuid, content: &str) -> AppResult<Option<Comment>> {
        let sql =
            format!("UPDATE comments SET content = $2 WHERE id = $1 RETURNING {COMMENT_COLUMNS}");
        Ok(sqlx::query_as::<_, Comment>(&sql)
            .bind(id)
            .bind(content)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn clean_tongue_twisters(&self) -> AppResult<CleanReport> {
        let mut tx = self.pool.begin().await?;

        let blank = sqlx::query(
            "DELETE FROM tongue_twisters WHERE TRIM(title) = '' OR TRIM(content) = ''",
        )
        .execute(&mut *tx)
        .await?;

        let duplicate = sqlx::query(
            r#"
            DELETE FROM tongue_twisters
            WHERE id IN (
                SELECT id FROM (
                    SELECT id, ROW_NUMBER() OVER (PARTITION BY content ORDER BY created_at, id) AS rn
                    FROM tongue_twisters
                ) ranked
                WHERE ranked.rn > 1
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CleanReport {
            deleted_blank_count: blank.rows_affected(),
            deleted_duplicate_count: duplicate.rows_affected(),
        })
    }
}

#[async_trait]
impl AuditSink for PostgresRepository {
    async fn append(&self, record: NewAuditRecord) -> AppResult<AuditRecord> {
        let sql = format!(
            "INSERT INTO operation_logs (id, actor_id, actor_username, actor_role, action, resource_type, \
             resource_id, detail, outcome, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW()) RETURNING {AUDIT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, AuditRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(record.actor_id)
            .bind(record.actor_username)
            .bind(record.actor_role.as_str())
            .bind(record.action)
            .bind(record.resource_type)
            .bind(record.resource_id)
            .bind(record.detail)
            .bind(record.outcome.as_str())
            .fetch_one(&self.pool)
            .await?)
    }

    async fn list(&self, query: &AuditLogQuery) -> AppResult<(Vec<AuditRecord>, i64)> {
        self.paged(
            AUDIT_COLUMNS,
            "operation_logs",
            "created_at DESC, id DESC",
            query.window(),
            |b| {
                push_equals(b, "action", query.action.as_deref());
                push_equals(b, "resource_type", query.resource.as_deref());
                push_equals(b, "outcome", query.status.as_deref());
                push_equals(b, "actor_username", query.username.as_deref());
            },
        )
        .await
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<AuditRecord>> {
        let sql = format!("SELECT {AUDIT_COLUMNS} FROM operation_logs WHERE id = $1");
        Ok(sqlx::query_as::<_, AuditRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }
}

/// A cascade transaction on a pooled connection. Dropped without commit, sqlx rolls it back.
pub struct PgCascadeTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CascadeTx for PgCascadeTx {
    async fn delete(&mut self, step: &CascadeStep, ids: &[Uuid]) -> AppResult<u64> {
        let sql = step.delete_sql();
        let result = sqlx::query(&sql).bind(ids).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        Ok(self.tx.commit().await?)
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(self.tx.rollback().await?)
    }
}

#[async_trait]
impl CascadeStore for PostgresRepository {
    async fn begin(&self) -> AppResult<Box<dyn CascadeTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCascadeTx { tx }))
    }
}
