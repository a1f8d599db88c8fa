//! crates/lemontree_core/src/items.rs
//!
//! Item lifecycle: upload, edit, moderation, completion, saves and reports.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use futures::future::join_all;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Item, ItemStatus, SessionContext, User};
use crate::location::{normalize_postal_code, LocationResolver};
use crate::notify::{Notifier, APP_NAME};
use crate::ports::{ItemStore, PortError, PortResult, UserStore};
use crate::query::{FieldValue, ItemField, ItemQuery, Predicate, SortOrder};

pub const MIN_DESCRIPTION_CHARS: usize = 10;

/// The user-editable fields of an item. Used for both upload and edit; an
/// edit replaces all of them.
#[derive(Debug, Clone, Default)]
pub struct ItemDraft {
    pub name: String,
    pub description: String,
    pub images: Vec<String>,
    pub categories: Vec<String>,
    pub postal_code: String,
    pub pickup_address: Option<String>,
}

impl ItemDraft {
    fn validate(&self) -> PortResult<()> {
        if self.name.trim().is_empty() {
            return Err(PortError::InvalidInput("Name is required.".to_string()));
        }
        if self.description.trim().chars().count() < MIN_DESCRIPTION_CHARS {
            return Err(PortError::InvalidInput(format!(
                "Description must be at least {} characters.",
                MIN_DESCRIPTION_CHARS
            )));
        }
        Ok(())
    }
}

pub struct ItemService {
    items: Arc<dyn ItemStore>,
    users: Arc<dyn UserStore>,
    locations: Arc<LocationResolver>,
    notifier: Notifier,
}

impl ItemService {
    pub fn new(
        items: Arc<dyn ItemStore>,
        users: Arc<dyn UserStore>,
        locations: Arc<LocationResolver>,
        notifier: Notifier,
    ) -> Self {
        Self {
            items,
            users,
            locations,
            notifier,
        }
    }

    #[instrument(skip_all, fields(user_id = ?session.user_id()))]
    pub async fn create_item(&self, session: &SessionContext, draft: ItemDraft) -> PortResult<Item> {
        let user = session.require_user()?;
        draft.validate()?;
        let country = home_country(user)?;
        let location = self.locations.resolve(&draft.postal_code, &country).await?;

        let now = stored_now();
        let item = Item {
            id: Uuid::new_v4(),
            owner_id: user.id,
            name: draft.name.trim().to_string(),
            description: draft.description.trim().to_string(),
            images: draft.images,
            categories: draft.categories,
            status: ItemStatus::Available,
            saves: 1,
            location,
            pickup_address: draft.pickup_address.filter(|a| !a.trim().is_empty()),
            is_deleted: false,
            is_approved: user.is_admin,
            approved_by: user.is_admin.then(|| user.name.clone()),
            created_at: now,
            edited_at: now,
        };
        self.items.insert_item(&item).await?;
        info!(item_id = %item.id, approved = item.is_approved, "Item created");

        if !item.is_approved {
            self.notify_admins().await;
        }
        Ok(item)
    }

    #[instrument(skip(self, session, draft), fields(user_id = ?session.user_id()))]
    pub async fn edit_item(
        &self,
        session: &SessionContext,
        item_id: Uuid,
        draft: ItemDraft,
    ) -> PortResult<Item> {
        let user = session.require_user()?;
        draft.validate()?;
        let mut item = self.live_item(item_id).await?;
        if item.owner_id != user.id {
            return Err(PortError::Forbidden("only the owner can edit an item".to_string()));
        }

        let postal_code = normalize_postal_code(&draft.postal_code);
        if postal_code != item.location.postal_code {
            let country = home_country(user).unwrap_or_else(|_| item.location.country.clone());
            item.location = self.locations.resolve(&postal_code, &country).await?;
        }

        item.name = draft.name.trim().to_string();
        item.description = draft.description.trim().to_string();
        item.images = draft.images;
        item.categories = draft.categories;
        item.pickup_address = draft.pickup_address.filter(|a| !a.trim().is_empty());
        item.status = ItemStatus::Available;
        item.is_approved = user.is_admin;
        item.approved_by = user.is_admin.then(|| user.name.clone());
        item.edited_at = stored_now();

        self.items.update_item(&item).await?;
        if !item.is_approved {
            self.notify_admins().await;
        }
        Ok(item)
    }

    /// Fetches an item the requester is allowed to see.
    pub async fn get_item(&self, session: &SessionContext, item_id: Uuid) -> PortResult<Item> {
        let item = self.items.get_item(item_id).await?;
        if !session.can_see(&item) {
            return Err(PortError::NotFound(format!("item {}", item_id)));
        }
        Ok(item)
    }

    pub async fn approve_item(&self, session: &SessionContext, item_id: Uuid) -> PortResult<Item> {
        let admin = session.require_admin()?;
        let mut item = self.live_item(item_id).await?;
        item.is_approved = true;
        item.approved_by = Some(admin.name.clone());
        item.edited_at = stored_now();
        self.items.update_item(&item).await?;
        info!(item_id = %item.id, admin_id = %admin.id, "Item approved");
        Ok(item)
    }

    /// Rejects an item: it is marked rejected, unapproved and soft-deleted,
    /// and the owner is told if they accept push notifications.
    pub async fn reject_item(&self, session: &SessionContext, item_id: Uuid) -> PortResult<Item> {
        let admin = session.require_admin()?;
        let mut item = self.live_item(item_id).await?;
        item.status = ItemStatus::Rejected;
        item.is_approved = false;
        item.approved_by = Some(admin.name.clone());
        item.is_deleted = true;
        item.edited_at = stored_now();
        self.items.update_item(&item).await?;
        info!(item_id = %item.id, admin_id = %admin.id, "Item rejected");

        match self.users.get_user(item.owner_id).await {
            Ok(owner) => {
                self.notifier
                    .notify(
                        &owner,
                        &format!("{}: Oh no! Your item ({}) has been rejected.", APP_NAME, item.name),
                        &format!(
                            "Unfortunately, your item, {}, has been rejected. Please contact {} for more details.",
                            item.name, APP_NAME
                        ),
                        json!({ "itemID": item.id }),
                    )
                    .await;
            }
            Err(e) => warn!(owner_id = %item.owner_id, error = %e, "Could not load item owner"),
        }
        Ok(item)
    }

    /// Soft-deletes an item. Owners and admins only.
    pub async fn delete_item(&self, session: &SessionContext, item_id: Uuid) -> PortResult<()> {
        let user = session.require_user()?;
        let mut item = self.live_item(item_id).await?;
        if item.owner_id != user.id && !user.is_admin {
            return Err(PortError::Forbidden("only the owner can delete an item".to_string()));
        }
        item.is_deleted = true;
        item.edited_at = stored_now();
        self.items.update_item(&item).await
    }

    /// The owner marks the item as given away.
    pub async fn complete_item(&self, session: &SessionContext, item_id: Uuid) -> PortResult<Item> {
        let user = session.require_user()?;
        let mut item = self.live_item(item_id).await?;
        if item.owner_id != user.id {
            return Err(PortError::Forbidden("only the owner can complete an item".to_string()));
        }
        item.status = ItemStatus::Given;
        item.edited_at = stored_now();
        self.items.update_item(&item).await?;
        Ok(item)
    }

    // --- Saves ---

    /// Saves an item for the requester. Saving twice counts once.
    pub async fn save_item(&self, session: &SessionContext, item_id: Uuid) -> PortResult<u32> {
        let user = session.require_user()?;
        let item = self.get_item(session, item_id).await?;
        if self.items.record_save(user.id, item.id).await? {
            self.items.adjust_saves(item.id, 1).await
        } else {
            Ok(item.saves)
        }
    }

    pub async fn unsave_item(&self, session: &SessionContext, item_id: Uuid) -> PortResult<u32> {
        let user = session.require_user()?;
        let item = self.items.get_item(item_id).await?;
        if self.items.remove_save(user.id, item.id).await? {
            self.items.adjust_saves(item.id, -1).await
        } else {
            Ok(item.saves)
        }
    }

    /// The requester's own items that are not deleted, newest first.
    pub async fn user_items(&self, session: &SessionContext) -> PortResult<Vec<Item>> {
        let user = session.require_user()?;
        let query = ItemQuery::new()
            .filter(Predicate::eq(ItemField::OwnerId, FieldValue::Id(user.id)))
            .filter(Predicate::eq(ItemField::IsDeleted, FieldValue::Bool(false)))
            .order_by(SortOrder::Newest);
        self.items.query_items(&query).await
    }

    /// Items the requester saved that are still visible to them, newest first.
    pub async fn saved_items(&self, session: &SessionContext) -> PortResult<Vec<Item>> {
        let user = session.require_user()?;
        let ids = self.items.saved_item_ids(user.id).await?;
        let lookups = ids.into_iter().map(|id| self.items.get_item(id));

        let mut saved = Vec::new();
        for result in join_all(lookups).await {
            match result {
                Ok(item) if session.can_see(&item) => saved.push(item),
                Ok(_) | Err(PortError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        saved.sort_by(|a, b| SortOrder::Newest.compare(a, b));
        Ok(saved)
    }

    /// Reports an item and blocks its owner for the reporter.
    pub async fn report_item(&self, session: &SessionContext, item_id: Uuid) -> PortResult<()> {
        let user = session.require_user()?;
        let item = self.items.get_item(item_id).await?;
        if item.owner_id == user.id {
            return Err(PortError::InvalidInput("you cannot report your own item".to_string()));
        }
        self.items.record_report(item.id, user.id).await?;
        self.users.block_user(user.id, item.owner_id).await?;
        info!(item_id = %item.id, reported_by = %user.id, "Item reported and owner blocked");
        Ok(())
    }

    async fn live_item(&self, item_id: Uuid) -> PortResult<Item> {
        let item = self.items.get_item(item_id).await?;
        if item.is_deleted {
            return Err(PortError::NotFound(format!("item {}", item_id)));
        }
        Ok(item)
    }

    async fn notify_admins(&self) {
        let admins = match self.users.admins_accepting_push().await {
            Ok(admins) => admins,
            Err(e) => {
                warn!(error = %e, "Could not load admins to notify");
                return;
            }
        };
        self.notifier
            .notify_all(
                &admins,
                &format!("New item on {}!", APP_NAME),
                "A user has posted a new item waiting for your approval!",
                json!({ "itemID": null }),
            )
            .await;
    }
}

/// Stored timestamps keep microseconds; values must compare equal after a
/// round trip through the store.
fn stored_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn home_country(user: &User) -> PortResult<String> {
    user.location
        .as_ref()
        .map(|l| l.country.clone())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| PortError::InvalidInput("set your location before listing items".to_string()))
}
