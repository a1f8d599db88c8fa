//! crates/lemontree_core/src/query.rs
//!
//! The backend-neutral item query model: predicates, ordering, limits and
//! keyset cursors. `ItemQuery::apply` is the reference evaluation that every
//! storage adapter has to agree with.

use std::cmp::Ordering;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Item, ItemStatus};
use crate::geo::GeohashRange;

/// Upper sentinel appended to a prefix to turn it into a closed string range.
pub const PREFIX_SENTINEL: char = '\u{f8ff}';

//=========================================================================================
// Predicates
//=========================================================================================

/// Item fields that queries may filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemField {
    Name,
    Status,
    IsDeleted,
    IsApproved,
    Categories,
    Geohash,
    OwnerId,
    DateCreated,
    Saves,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Text(String),
    Int(i64),
    Id(Uuid),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Bool(a), FieldValue::Bool(b)) => Some(a.cmp(b)),
            (FieldValue::Text(a), FieldValue::Text(b)) => Some(a.as_str().cmp(b.as_str())),
            (FieldValue::Int(a), FieldValue::Int(b)) => Some(a.cmp(b)),
            (FieldValue::Id(a), FieldValue::Id(b)) => Some(a.cmp(b)),
            (FieldValue::Timestamp(a), FieldValue::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gte,
    Lte,
    ArrayContains,
}

/// A single `field op value` constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: ItemField,
    pub op: Op,
    pub value: FieldValue,
}

impl Predicate {
    pub fn eq(field: ItemField, value: FieldValue) -> Self {
        Self { field, op: Op::Eq, value }
    }

    pub fn gte(field: ItemField, value: FieldValue) -> Self {
        Self { field, op: Op::Gte, value }
    }

    pub fn lte(field: ItemField, value: FieldValue) -> Self {
        Self { field, op: Op::Lte, value }
    }

    pub fn status(status: ItemStatus) -> Self {
        Self::eq(ItemField::Status, FieldValue::Text(status.label().to_string()))
    }

    pub fn category(category: &str) -> Self {
        Self {
            field: ItemField::Categories,
            op: Op::ArrayContains,
            value: FieldValue::Text(category.to_string()),
        }
    }

    /// Prefix search on the item name, expressed as a closed string range.
    pub fn name_prefix(prefix: &str) -> [Self; 2] {
        [
            Self::gte(ItemField::Name, FieldValue::Text(prefix.to_string())),
            Self::lte(
                ItemField::Name,
                FieldValue::Text(format!("{}{}", prefix, PREFIX_SENTINEL)),
            ),
        ]
    }

    pub fn geohash_range(range: &GeohashRange) -> [Self; 2] {
        [
            Self::gte(ItemField::Geohash, FieldValue::Text(range.start.clone())),
            Self::lte(ItemField::Geohash, FieldValue::Text(range.end.clone())),
        ]
    }

    pub fn matches(&self, item: &Item) -> bool {
        if self.op == Op::ArrayContains {
            return match (&self.field, &self.value) {
                (ItemField::Categories, FieldValue::Text(wanted)) => {
                    item.categories.iter().any(|c| c == wanted)
                }
                _ => false,
            };
        }

        let Some(actual) = scalar_value(item, self.field) else {
            return false;
        };
        let Some(ordering) = actual.compare(&self.value) else {
            return false;
        };
        match self.op {
            Op::Eq => ordering == Ordering::Equal,
            Op::Gte => ordering != Ordering::Less,
            Op::Lte => ordering != Ordering::Greater,
            Op::ArrayContains => false,
        }
    }
}

fn scalar_value(item: &Item, field: ItemField) -> Option<FieldValue> {
    Some(match field {
        ItemField::Name => FieldValue::Text(item.name.clone()),
        ItemField::Status => FieldValue::Text(item.status.label().to_string()),
        ItemField::IsDeleted => FieldValue::Bool(item.is_deleted),
        ItemField::IsApproved => FieldValue::Bool(item.is_approved),
        ItemField::Geohash => FieldValue::Text(item.location.geohash().to_string()),
        ItemField::OwnerId => FieldValue::Id(item.owner_id),
        ItemField::DateCreated => FieldValue::Timestamp(item.created_at),
        ItemField::Saves => FieldValue::Int(i64::from(item.saves)),
        ItemField::Categories => return None,
    })
}

//=========================================================================================
// Ordering and cursors
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Creation time descending, id descending.
    #[default]
    Newest,
    /// Save count descending, then newest first.
    MostSaved,
}

impl SortOrder {
    pub fn compare(&self, a: &Item, b: &Item) -> Ordering {
        let newest = || {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        };
        match self {
            SortOrder::Newest => newest(),
            SortOrder::MostSaved => b.saves.cmp(&a.saves).then_with(newest),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("cursor is not valid base64")]
    Encoding(#[from] base64::DecodeError),
    #[error("cursor has the wrong length")]
    Length,
    #[error("cursor timestamp is out of range")]
    Timestamp,
}

/// Opaque keyset position in `SortOrder::Newest`: the creation time and id
/// of the last record a page ended on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn from_item(item: &Item) -> Self {
        Self {
            created_at: item.created_at,
            id: item.id,
        }
    }

    /// Compares positions in newest-first order: `Less` means `self` is
    /// newer (comes earlier in a page).
    pub fn position_cmp(&self, other: &Cursor) -> Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| other.id.cmp(&self.id))
    }

    /// True when `item` comes strictly after this position.
    pub fn precedes(&self, item: &Item) -> bool {
        self.position_cmp(&Cursor::from_item(item)) == Ordering::Less
    }

    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(24);
        let nanos = self.created_at.timestamp_nanos_opt().unwrap_or(i64::MAX);
        bytes.extend_from_slice(&nanos.to_be_bytes());
        bytes.extend_from_slice(self.id.as_bytes());
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn decode(s: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        if bytes.len() != 24 {
            return Err(CursorError::Length);
        }
        let mut nanos = [0u8; 8];
        nanos.copy_from_slice(&bytes[..8]);
        let nanos = i64::from_be_bytes(nanos);
        let created_at = DateTime::<Utc>::from_timestamp(
            nanos.div_euclid(1_000_000_000),
            nanos.rem_euclid(1_000_000_000) as u32,
        )
        .ok_or(CursorError::Timestamp)?;
        let id = Uuid::from_slice(&bytes[8..]).map_err(|_| CursorError::Length)?;
        Ok(Self { created_at, id })
    }
}

//=========================================================================================
// Queries
//=========================================================================================

/// A complete item query: all predicates must hold.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItemQuery {
    pub predicates: Vec<Predicate>,
    pub order: SortOrder,
    pub limit: Option<usize>,
    /// Only honoured for `SortOrder::Newest`.
    pub start_after: Option<Cursor>,
}

impl ItemQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn filters(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    pub fn order_by(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Option<Cursor>) -> Self {
        self.start_after = cursor;
        self
    }

    pub fn matches(&self, item: &Item) -> bool {
        if !self.predicates.iter().all(|p| p.matches(item)) {
            return false;
        }
        match (&self.order, &self.start_after) {
            (SortOrder::Newest, Some(cursor)) => cursor.precedes(item),
            _ => true,
        }
    }

    /// Evaluates the query over an in-memory collection.
    pub fn apply<'a>(&self, items: impl IntoIterator<Item = &'a Item>) -> Vec<Item> {
        let mut hits: Vec<Item> = items
            .into_iter()
            .filter(|item| self.matches(item))
            .cloned()
            .collect();
        hits.sort_by(|a, b| self.order.compare(a, b));
        if let Some(limit) = self.limit {
            hits.truncate(limit);
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GeoLocation;
    use crate::geo::GeoPoint;
    use chrono::{Duration, TimeZone};

    fn item(name: &str, minutes_ago: i64, saves: u32) -> Item {
        let created = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() - Duration::minutes(minutes_ago);
        Item {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: name.to_string(),
            description: "A perfectly fine thing".to_string(),
            images: vec![],
            categories: vec!["Toys & Games".to_string()],
            status: ItemStatus::Available,
            saves,
            location: GeoLocation::new(GeoPoint::new(44.98, -93.27), "United States", "55401"),
            pickup_address: None,
            is_deleted: false,
            is_approved: true,
            approved_by: None,
            created_at: created,
            edited_at: created,
        }
    }

    #[test]
    fn name_prefix_matches_only_the_prefix() {
        let query = ItemQuery::new().filters(Predicate::name_prefix("Lamp"));
        assert!(query.matches(&item("Lamp", 0, 0)));
        assert!(query.matches(&item("Lampshade", 0, 0)));
        assert!(!query.matches(&item("Desk lamp", 0, 0)));
        assert!(!query.matches(&item("Lan cable", 0, 0)));
    }

    #[test]
    fn category_membership_and_status() {
        let mut given = item("Puzzle", 0, 0);
        given.status = ItemStatus::Given;
        let query = ItemQuery::new()
            .filter(Predicate::category("Toys & Games"))
            .filter(Predicate::status(ItemStatus::Available));

        assert!(query.matches(&item("Kite", 0, 0)));
        assert!(!query.matches(&given));
        assert!(!ItemQuery::new()
            .filter(Predicate::category("Pet Supplies"))
            .matches(&item("Kite", 0, 0)));
    }

    #[test]
    fn mismatched_value_kinds_never_match() {
        let query = ItemQuery::new().filter(Predicate::eq(ItemField::IsDeleted, FieldValue::Text("false".into())));
        assert!(!query.matches(&item("Kite", 0, 0)));
    }

    #[test]
    fn apply_sorts_limits_and_resumes_after_a_cursor() {
        let items = vec![item("a", 30, 1), item("b", 10, 9), item("c", 20, 5), item("d", 40, 3)];

        let first = ItemQuery::new().limit(2).apply(&items);
        assert_eq!(first.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(), ["b", "c"]);

        let cursor = Cursor::from_item(first.last().unwrap());
        let second = ItemQuery::new().limit(2).start_after(Some(cursor)).apply(&items);
        assert_eq!(second.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(), ["a", "d"]);

        let popular = ItemQuery::new().order_by(SortOrder::MostSaved).apply(&items);
        assert_eq!(popular.iter().map(|i| i.saves).collect::<Vec<_>>(), [9, 5, 3, 1]);
    }

    #[test]
    fn cursor_survives_encoding() {
        let cursor = Cursor::from_item(&item("a", 5, 0));
        assert_eq!(Cursor::decode(&cursor.encode()).unwrap(), cursor);
    }

    #[test]
    fn garbage_cursors_are_rejected() {
        assert!(matches!(Cursor::decode("!!!"), Err(CursorError::Encoding(_))));
        assert!(matches!(Cursor::decode("AAAA"), Err(CursorError::Length)));
    }
}
