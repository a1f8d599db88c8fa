//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the storage ports from the `core` crate on PostgreSQL via `sqlx`.
//!
//! Items and users keep the client's document in a JSONB column; the columns
//! next to it mirror the fields queries filter and sort on. Every write goes
//! through `item_document`/`user_document` so the two never disagree.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lemontree_core::document::{self, item_document, location_value, parse_items, user_document};
use lemontree_core::domain::{Conversation, GeoLocation, Item, Message, User};
use lemontree_core::ports::{ConversationStore, ItemStore, PortError, PortResult, UserStore};
use lemontree_core::query::{FieldValue, ItemField, ItemQuery, Op, SortOrder};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::warn;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the storage ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or_unexpected(what: String) -> impl FnOnce(sqlx::Error) -> PortError {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        other => PortError::Unexpected(other.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct DocumentRecord {
    id: Uuid,
    document: Value,
}

#[derive(FromRow)]
struct ConversationRecord {
    id: String,
    item_id: Uuid,
    participants: Vec<Uuid>,
    deleted_by: Vec<Uuid>,
    date_created: DateTime<Utc>,
}
impl ConversationRecord {
    fn to_domain(self) -> Conversation {
        Conversation {
            id: self.id,
            item_id: self.item_id,
            participants: self.participants,
            deleted_by: self.deleted_by,
            created_at: self.date_created,
        }
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: String,
    sender_id: Uuid,
    body: String,
    date_created: DateTime<Utc>,
}
impl MessageRecord {
    fn to_domain(self) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            body: self.body,
            created_at: self.date_created,
        }
    }
}

//=========================================================================================
// Query translation
//=========================================================================================

/// Rewrites an item from a snapshot. `saves` belongs to `adjust_saves`, so the
/// stored count is copied back into the new document instead of the snapshot's.
const UPDATE_ITEM_SQL: &str = "UPDATE items SET document = jsonb_set($2, '{saves}', to_jsonb(saves)), \
     name = $3, status = $4, categories = $5, geohash = $6, is_deleted = $7, is_approved = $8 \
     WHERE id = $1";

fn column(field: ItemField) -> &'static str {
    match field {
        ItemField::Name => "name",
        ItemField::Status => "status",
        ItemField::IsDeleted => "is_deleted",
        ItemField::IsApproved => "is_approved",
        ItemField::Categories => "categories",
        ItemField::Geohash => "geohash",
        ItemField::OwnerId => "user_id",
        ItemField::DateCreated => "date_created",
        ItemField::Saves => "saves",
    }
}

fn push_value(builder: &mut QueryBuilder<'_, Postgres>, value: &FieldValue) {
    match value {
        FieldValue::Bool(b) => builder.push_bind(*b),
        FieldValue::Text(s) => builder.push_bind(s.clone()),
        FieldValue::Int(n) => builder.push_bind(*n),
        FieldValue::Id(id) => builder.push_bind(*id),
        FieldValue::Timestamp(ts) => builder.push_bind(*ts),
    };
}

/// Builds the SQL for an [`ItemQuery`]. Must agree with `ItemQuery::apply`.
fn build_item_query(query: &ItemQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("SELECT id, document FROM items WHERE TRUE");

    for predicate in &query.predicates {
        builder.push(" AND ");
        match predicate.op {
            Op::ArrayContains => {
                push_value(&mut builder, &predicate.value);
                builder.push(format!(" = ANY({})", column(predicate.field)));
            }
            op => {
                let symbol = match op {
                    Op::Eq => " = ",
                    Op::Gte => " >= ",
                    _ => " <= ",
                };
                builder.push(column(predicate.field)).push(symbol);
                push_value(&mut builder, &predicate.value);
            }
        }
    }

    if let (SortOrder::Newest, Some(cursor)) = (query.order, query.start_after) {
        builder
            .push(" AND (date_created, id) < (")
            .push_bind(cursor.created_at)
            .push(", ")
            .push_bind(cursor.id)
            .push(")");
    }

    builder.push(match query.order {
        SortOrder::Newest => " ORDER BY date_created DESC, id DESC",
        SortOrder::MostSaved => " ORDER BY saves DESC, date_created DESC, id DESC",
    });

    if let Some(limit) = query.limit {
        builder.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    builder
}

//=========================================================================================
// `ItemStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ItemStore for DbAdapter {
    async fn query_items(&self, query: &ItemQuery) -> PortResult<Vec<Item>> {
        let records: Vec<DocumentRecord> = build_item_query(query)
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(parse_items(records.iter().map(|r| (r.id, &r.document))))
    }

    async fn get_item(&self, item_id: Uuid) -> PortResult<Item> {
        let record: DocumentRecord =
            sqlx::query_as("SELECT id, document FROM items WHERE id = $1")
                .bind(item_id)
                .fetch_one(&self.pool)
                .await
                .map_err(not_found_or_unexpected(format!("item {}", item_id)))?;
        document::parse_item(record.id, &record.document)
            .map_err(|e| PortError::Unexpected(format!("item {}: {}", item_id, e)))
    }

    async fn insert_item(&self, item: &Item) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO items (id, document, user_id, name, status, categories, geohash, \
             is_deleted, is_approved, saves, date_created) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(item.id)
        .bind(item_document(item))
        .bind(item.owner_id)
        .bind(&item.name)
        .bind(item.status.label())
        .bind(&item.categories)
        .bind(item.location.geohash())
        .bind(item.is_deleted)
        .bind(item.is_approved)
        .bind(i64::from(item.saves))
        .bind(item.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn update_item(&self, item: &Item) -> PortResult<()> {
        let result = sqlx::query(UPDATE_ITEM_SQL)
        .bind(item.id)
        .bind(item_document(item))
        .bind(&item.name)
        .bind(item.status.label())
        .bind(&item.categories)
        .bind(item.location.geohash())
        .bind(item.is_deleted)
        .bind(item.is_approved)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("item {}", item.id)));
        }
        Ok(())
    }

    async fn adjust_saves(&self, item_id: Uuid, delta: i32) -> PortResult<u32> {
        let saves: i64 = sqlx::query_scalar(
            "UPDATE items SET saves = GREATEST(saves + $2, 0), \
             document = jsonb_set(document, '{saves}', to_jsonb(GREATEST(saves + $2, 0))) \
             WHERE id = $1 RETURNING saves",
        )
        .bind(item_id)
        .bind(i64::from(delta))
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("item {}", item_id)))?;
        Ok(u32::try_from(saves).unwrap_or(u32::MAX))
    }

    async fn record_save(&self, user_id: Uuid, item_id: Uuid) -> PortResult<bool> {
        let result = sqlx::query(
            "INSERT INTO user_saves (user_id, item_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_save(&self, user_id: Uuid, item_id: Uuid) -> PortResult<bool> {
        let result = sqlx::query("DELETE FROM user_saves WHERE user_id = $1 AND item_id = $2")
            .bind(user_id)
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected() > 0)
    }

    async fn saved_item_ids(&self, user_id: Uuid) -> PortResult<Vec<Uuid>> {
        sqlx::query_scalar(
            "SELECT item_id FROM user_saves WHERE user_id = $1 ORDER BY date_saved DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)
    }

    async fn record_report(&self, item_id: Uuid, reported_by: Uuid) -> PortResult<()> {
        sqlx::query("INSERT INTO item_reports (id, item_id, reported_by) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(item_id)
            .bind(reported_by)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `UserStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl UserStore for DbAdapter {
    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let record: DocumentRecord = sqlx::query_as("SELECT id, document FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found_or_unexpected(format!("user {}", user_id)))?;
        document::parse_user(record.id, &record.document)
            .map_err(|e| PortError::Unexpected(format!("user {}: {}", user_id, e)))
    }

    async fn save_user(&self, user: &User) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO users (id, document, is_admin, allow_push, is_deleted) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET document = EXCLUDED.document, \
             is_admin = EXCLUDED.is_admin, allow_push = EXCLUDED.allow_push, \
             is_deleted = EXCLUDED.is_deleted",
        )
        .bind(user.id)
        .bind(user_document(user))
        .bind(user.is_admin)
        .bind(user.allow_push_notifications)
        .bind(user.is_deleted)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn update_location(&self, user_id: Uuid, location: &GeoLocation) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE users SET document = jsonb_set(document, '{location}', $2, true) WHERE id = $1",
        )
        .bind(user_id)
        .bind(location_value(location))
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }

    async fn set_push_notifications(
        &self,
        user_id: Uuid,
        allow: bool,
        push_token: Option<String>,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE users SET allow_push = $2, \
             document = jsonb_set( \
                 CASE WHEN $3::text IS NULL THEN document \
                      ELSE jsonb_set(document, '{expoPushToken}', to_jsonb($3::text), true) END, \
                 '{allowPushNotifications}', to_jsonb($2::boolean), true) \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(allow)
        .bind(push_token)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }

    async fn admins_accepting_push(&self) -> PortResult<Vec<User>> {
        let records: Vec<DocumentRecord> = sqlx::query_as(
            "SELECT id, document FROM users WHERE is_admin AND allow_push AND NOT is_deleted",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records
            .iter()
            .filter_map(|r| match document::parse_user(r.id, &r.document) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(user_id = %r.id, error = %e, "Skipping malformed user document");
                    None
                }
            })
            .collect())
    }

    async fn block_user(&self, blocked_by: Uuid, blocked_user: Uuid) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO user_blocks (blocked_by, blocked_user) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(blocked_by)
        .bind(blocked_user)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn has_blocked(&self, blocked_by: Uuid, blocked_user: Uuid) -> PortResult<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM user_blocks WHERE blocked_by = $1 AND blocked_user = $2)",
        )
        .bind(blocked_by)
        .bind(blocked_user)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)
    }
}

//=========================================================================================
// `ConversationStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ConversationStore for DbAdapter {
    async fn get_conversation(&self, conversation_id: &str) -> PortResult<Conversation> {
        let record: ConversationRecord = sqlx::query_as(
            "SELECT id, item_id, participants, deleted_by, date_created FROM conversations WHERE id = $1",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("conversation {}", conversation_id)))?;
        Ok(record.to_domain())
    }

    async fn create_conversation(&self, conversation: &Conversation) -> PortResult<Conversation> {
        sqlx::query(
            "INSERT INTO conversations (id, item_id, participants, deleted_by, date_created) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&conversation.id)
        .bind(conversation.item_id)
        .bind(&conversation.participants)
        .bind(&conversation.deleted_by)
        .bind(conversation.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        self.get_conversation(&conversation.id).await
    }

    async fn add_message(&self, message: &Message) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, body, date_created) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(message.id)
        .bind(&message.conversation_id)
        .bind(message.sender_id)
        .bind(&message.body)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> PortResult<Vec<Message>> {
        let records: Vec<MessageRecord> = sqlx::query_as(
            "SELECT id, conversation_id, sender_id, body, date_created FROM messages \
             WHERE conversation_id = $1 ORDER BY date_created ASC, id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn latest_message(&self, conversation_id: &str) -> PortResult<Option<Message>> {
        let record: Option<MessageRecord> = sqlx::query_as(
            "SELECT id, conversation_id, sender_id, body, date_created FROM messages \
             WHERE conversation_id = $1 ORDER BY date_created DESC, id DESC LIMIT 1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn conversations_for_user(&self, user_id: Uuid) -> PortResult<Vec<Conversation>> {
        let records: Vec<ConversationRecord> = sqlx::query_as(
            "SELECT id, item_id, participants, deleted_by, date_created FROM conversations \
             WHERE $1 = ANY(participants) ORDER BY date_created DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn mark_deleted(&self, conversation_id: &str, user_id: Uuid) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE conversations SET deleted_by = CASE WHEN $2 = ANY(deleted_by) \
             THEN deleted_by ELSE array_append(deleted_by, $2) END WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("conversation {}", conversation_id)));
        }
        Ok(())
    }

    async fn restore(&self, conversation_id: &str) -> PortResult<()> {
        let result = sqlx::query("UPDATE conversations SET deleted_by = '{}' WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("conversation {}", conversation_id)));
        }
        Ok(())
    }
}
