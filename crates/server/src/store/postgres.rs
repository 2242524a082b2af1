use anyhow::{anyhow, Context};
use chitchat_common::types::{
    sort_chats_by_recency, ChatSummary, Direction, FriendThread, Message, ReadStatus, UserSummary,
};
use sqlx::{
    types::chrono::{DateTime, Utc},
    PgPool,
};

use super::{NewUser, StoreError, ThreadRead, UserRecord};

// ── SQL Rows ─────────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct UserRow {
    username: String,
    email: String,
    password_hash: String,
    profile: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    username: String,
    email: String,
    profile: String,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    peer: String,
    body: String,
    has_image: bool,
    sent_at: DateTime<Utc>,
    direction: String,
    status: String,
}

#[derive(sqlx::FromRow)]
struct NumberedMessageRow {
    id: i64,
    #[sqlx(flatten)]
    message: MessageRow,
}

#[derive(sqlx::FromRow)]
struct ChatSummaryRow {
    peer: String,
    unseen: i64,
    last_message_at: Option<DateTime<Utc>>,
}

impl From<UserRow> for UserRecord {
    fn from(value: UserRow) -> Self {
        Self {
            username: value.username,
            email: value.email,
            password_hash: value.password_hash,
            profile: value.profile,
            created_at: value.created_at,
        }
    }
}

impl From<SummaryRow> for UserSummary {
    fn from(value: SummaryRow) -> Self {
        Self { username: value.username, email: value.email, profile: value.profile }
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(value: MessageRow) -> Result<Self, Self::Error> {
        let direction = Direction::from_db_value(&value.direction)
            .ok_or_else(|| anyhow!("unknown message direction `{}`", value.direction))?;
        let status = ReadStatus::from_db_value(&value.status)
            .ok_or_else(|| anyhow!("unknown message status `{}`", value.status))?;

        Ok(Self {
            text: value.body,
            has_image: value.has_image,
            time: value.sent_at,
            direction,
            status,
        })
    }
}

fn backend_error(error: sqlx::Error, operation: &'static str) -> StoreError {
    StoreError::Backend(anyhow::Error::new(error).context(format!("postgres {operation} failed")))
}

fn map_insert_user_error(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(database_error) = &error {
        if database_error.code().as_deref() == Some("23505") {
            return StoreError::Conflict(conflicting_field(database_error.constraint()));
        }
    }

    backend_error(error, "create_user")
}

fn conflicting_field(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("users_email_key") => "email",
        _ => "username",
    }
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for character in query.chars() {
        if matches!(character, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(character);
    }
    escaped
}

pub(super) async fn create_user(pool: &PgPool, user: &NewUser) -> Result<UserRecord, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        INSERT INTO users (username, email, password_hash)
        VALUES ($1, $2, $3)
        RETURNING username, email, password_hash, profile, created_at
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .fetch_one(pool)
    .await
    .map_err(map_insert_user_error)?;

    Ok(row.into())
}

pub(super) async fn user_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<UserRecord>, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT username, email, password_hash, profile, created_at
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await
    .map_err(|error| backend_error(error, "user_by_email"))?;

    Ok(row.map(Into::into))
}

pub(super) async fn user_by_username(
    pool: &PgPool,
    username: &str,
) -> Result<Option<UserRecord>, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT username, email, password_hash, profile, created_at
        FROM users
        WHERE username = $1
        "#,
    )
    .bind(username)
    .fetch_optional(pool)
    .await
    .map_err(|error| backend_error(error, "user_by_username"))?;

    Ok(row.map(Into::into))
}

pub(super) async fn search_users(
    pool: &PgPool,
    query: &str,
    exclude: &str,
    limit: usize,
) -> Result<Vec<UserSummary>, StoreError> {
    let rows = sqlx::query_as::<_, SummaryRow>(
        r#"
        SELECT username, email, profile
        FROM users
        WHERE username ILIKE '%' || $1 || '%' ESCAPE '\'
          AND username <> $2
        ORDER BY username
        LIMIT $3
        "#,
    )
    .bind(escape_like(query))
    .bind(exclude)
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .map_err(|error| backend_error(error, "search_users"))?;

    Ok(rows.into_iter().map(Into::into).collect())
}

pub(super) async fn list_users(pool: &PgPool, limit: usize) -> Result<Vec<UserSummary>, StoreError> {
    let rows = sqlx::query_as::<_, SummaryRow>(
        "SELECT username, email, profile FROM users ORDER BY username LIMIT $1",
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .map_err(|error| backend_error(error, "list_users"))?;

    Ok(rows.into_iter().map(Into::into).collect())
}

pub(super) async fn set_profile(
    pool: &PgPool,
    username: &str,
    profile: &str,
) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE users SET profile = $2 WHERE username = $1")
        .bind(username)
        .bind(profile)
        .execute(pool)
        .await
        .map_err(|error| backend_error(error, "set_profile"))?;

    Ok(result.rows_affected() == 1)
}

pub(super) async fn add_request(
    pool: &PgPool,
    recipient: &str,
    sender: &str,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO friend_requests (recipient, sender)
        VALUES ($1, $2)
        ON CONFLICT (recipient, sender) DO NOTHING
        "#,
    )
    .bind(recipient)
    .bind(sender)
    .execute(pool)
    .await
    .map_err(|error| backend_error(error, "add_request"))?;

    Ok(result.rows_affected() == 1)
}

pub(super) async fn remove_request(
    pool: &PgPool,
    recipient: &str,
    sender: &str,
) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM friend_requests WHERE recipient = $1 AND sender = $2")
        .bind(recipient)
        .bind(sender)
        .execute(pool)
        .await
        .map_err(|error| backend_error(error, "remove_request"))?;

    Ok(result.rows_affected() > 0)
}

pub(super) async fn pending_requests(
    pool: &PgPool,
    recipient: &str,
) -> Result<Vec<String>, StoreError> {
    sqlx::query_scalar::<_, String>(
        "SELECT sender FROM friend_requests WHERE recipient = $1 ORDER BY requested_at, sender",
    )
    .bind(recipient)
    .fetch_all(pool)
    .await
    .map_err(|error| backend_error(error, "pending_requests"))
}

pub(super) async fn count_requests(pool: &PgPool, recipient: &str) -> Result<u64, StoreError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM friend_requests WHERE recipient = $1",
    )
    .bind(recipient)
    .fetch_one(pool)
    .await
    .map_err(|error| backend_error(error, "count_requests"))?;

    u64::try_from(count).context("negative request count").map_err(StoreError::Backend)
}

pub(super) async fn add_friend_thread(
    pool: &PgPool,
    owner: &str,
    peer: &str,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO friend_threads (owner, peer)
        VALUES ($1, $2)
        ON CONFLICT (owner, peer) DO NOTHING
        "#,
    )
    .bind(owner)
    .bind(peer)
    .execute(pool)
    .await
    .map_err(|error| backend_error(error, "add_friend_thread"))?;

    Ok(result.rows_affected() == 1)
}

pub(super) async fn friend_threads(
    pool: &PgPool,
    owner: &str,
) -> Result<Vec<FriendThread>, StoreError> {
    let peers = sqlx::query_scalar::<_, String>(
        "SELECT peer FROM friend_threads WHERE owner = $1 ORDER BY id",
    )
    .bind(owner)
    .fetch_all(pool)
    .await
    .map_err(|error| backend_error(error, "friend_threads"))?;

    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT peer, body, has_image, sent_at, direction, status
        FROM thread_messages
        WHERE owner = $1
        ORDER BY id
        "#,
    )
    .bind(owner)
    .fetch_all(pool)
    .await
    .map_err(|error| backend_error(error, "friend_threads"))?;

    let mut threads: Vec<FriendThread> = peers.into_iter().map(FriendThread::new).collect();
    for row in rows {
        let Some(index) = threads.iter().position(|thread| thread.peer == row.peer) else {
            continue;
        };
        threads[index].messages.push(row.try_into()?);
    }

    Ok(threads)
}

pub(super) async fn has_thread(pool: &PgPool, owner: &str, peer: &str) -> Result<bool, StoreError> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM friend_threads WHERE owner = $1 AND peer = $2)",
    )
    .bind(owner)
    .bind(peer)
    .fetch_one(pool)
    .await
    .map_err(|error| backend_error(error, "has_thread"))
}

#[cfg(test)]
pub(super) async fn thread_messages(
    pool: &PgPool,
    owner: &str,
    peer: &str,
) -> Result<Option<Vec<Message>>, StoreError> {
    if !has_thread(pool, owner, peer).await? {
        return Ok(None);
    }

    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT peer, body, has_image, sent_at, direction, status
        FROM thread_messages
        WHERE owner = $1 AND peer = $2
        ORDER BY id
        "#,
    )
    .bind(owner)
    .bind(peer)
    .fetch_all(pool)
    .await
    .map_err(|error| backend_error(error, "thread_messages"))?;

    rows.into_iter().map(Message::try_from).collect::<Result<Vec<_>, _>>().map(Some)
}

pub(super) async fn append_message(
    pool: &PgPool,
    owner: &str,
    peer: &str,
    message: &Message,
) -> Result<bool, StoreError> {
    // Inserts nothing when the thread does not exist.
    let result = sqlx::query(
        r#"
        INSERT INTO thread_messages (owner, peer, body, has_image, sent_at, direction, status)
        SELECT owner, peer, $3, $4, $5, $6, $7
        FROM friend_threads
        WHERE owner = $1 AND peer = $2
        "#,
    )
    .bind(owner)
    .bind(peer)
    .bind(&message.text)
    .bind(message.has_image)
    .bind(message.time)
    .bind(message.direction.as_str())
    .bind(message.status.as_str())
    .execute(pool)
    .await
    .map_err(|error| backend_error(error, "append_message"))?;

    Ok(result.rows_affected() == 1)
}

pub(super) async fn mark_thread_read(
    pool: &PgPool,
    owner: &str,
    peer: &str,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE thread_messages
        SET status = 'read'
        WHERE owner = $1 AND peer = $2 AND direction = 'received' AND status = 'unread'
        "#,
    )
    .bind(owner)
    .bind(peer)
    .execute(pool)
    .await
    .map_err(|error| backend_error(error, "mark_thread_read"))?;

    Ok(result.rows_affected())
}

pub(super) async fn read_thread(
    pool: &PgPool,
    owner: &str,
    peer: &str,
) -> Result<Option<ThreadRead>, StoreError> {
    let mut tx = pool.begin().await.map_err(|error| backend_error(error, "read_thread"))?;

    // The row lock waits out in-flight appends (they hold a key-share lock
    // through the foreign key) and holds off new ones until commit.
    let thread = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM friend_threads WHERE owner = $1 AND peer = $2 FOR UPDATE",
    )
    .bind(owner)
    .bind(peer)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|error| backend_error(error, "read_thread"))?;
    if thread.is_none() {
        return Ok(None);
    }

    let rows = sqlx::query_as::<_, NumberedMessageRow>(
        r#"
        SELECT id, peer, body, has_image, sent_at, direction, status
        FROM thread_messages
        WHERE owner = $1 AND peer = $2
        ORDER BY id
        "#,
    )
    .bind(owner)
    .bind(peer)
    .fetch_all(&mut *tx)
    .await
    .map_err(|error| backend_error(error, "read_thread"))?;
    let Some(through) = rows.last().map(|row| row.id) else {
        tx.commit().await.map_err(|error| backend_error(error, "read_thread"))?;
        return Ok(Some(ThreadRead { messages: Vec::new(), marked: 0, unseen: 0 }));
    };
    let messages =
        rows.into_iter().map(|row| Message::try_from(row.message)).collect::<Result<Vec<_>, _>>()?;

    let marked = sqlx::query(
        r#"
        UPDATE thread_messages
        SET status = 'read'
        WHERE owner = $1 AND peer = $2 AND direction = 'received' AND status = 'unread'
            AND id <= $3
        "#,
    )
    .bind(owner)
    .bind(peer)
    .bind(through)
    .execute(&mut *tx)
    .await
    .map_err(|error| backend_error(error, "read_thread"))?
    .rows_affected();

    let unseen = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM thread_messages
        WHERE owner = $1 AND peer = $2 AND direction = 'received' AND status = 'unread'
        "#,
    )
    .bind(owner)
    .bind(peer)
    .fetch_one(&mut *tx)
    .await
    .map_err(|error| backend_error(error, "read_thread"))?;

    tx.commit().await.map_err(|error| backend_error(error, "read_thread"))?;

    let unseen = u64::try_from(unseen).context("negative unseen count").map_err(StoreError::Backend)?;
    Ok(Some(ThreadRead { messages, marked, unseen }))
}

pub(super) async fn unseen_count(pool: &PgPool, owner: &str, peer: &str) -> Result<u64, StoreError> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM thread_messages
        WHERE owner = $1 AND peer = $2 AND direction = 'received' AND status = 'unread'
        "#,
    )
    .bind(owner)
    .bind(peer)
    .fetch_one(pool)
    .await
    .map_err(|error| backend_error(error, "unseen_count"))?;

    u64::try_from(count).context("negative unseen count").map_err(StoreError::Backend)
}

pub(super) async fn chat_summaries(pool: &PgPool, owner: &str) -> Result<Vec<ChatSummary>, StoreError> {
    let rows = sqlx::query_as::<_, ChatSummaryRow>(
        r#"
        SELECT
            t.peer,
            COUNT(m.id) FILTER (WHERE m.direction = 'received' AND m.status = 'unread') AS unseen,
            MAX(m.sent_at) AS last_message_at
        FROM friend_threads t
        LEFT JOIN thread_messages m ON m.owner = t.owner AND m.peer = t.peer
        WHERE t.owner = $1
        GROUP BY t.id, t.peer
        ORDER BY t.id
        "#,
    )
    .bind(owner)
    .fetch_all(pool)
    .await
    .map_err(|error| backend_error(error, "chat_summaries"))?;

    let mut chats: Vec<ChatSummary> = rows
        .into_iter()
        .map(|row| ChatSummary {
            friend_username: row.peer,
            unseen_count: row.unseen.max(0) as u64,
            last_message_at: row.last_message_at,
        })
        .collect();
    sort_chats_by_recency(&mut chats);

    Ok(chats)
}
