//! crates/lemontree_core/src/document.rs
//!
//! Schema validation at the storage boundary. Backends hand over raw JSON
//! documents (field names as written by the mobile client); this module turns
//! them into typed entities or reports exactly what is wrong with them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{GeoLocation, Item, ItemStatus, User};
use crate::geo::GeoPoint;

/// Why a raw document could not be turned into an entity.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("malformed document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct LocationDocument {
    #[serde(default)]
    zipcode: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    geohash: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemDocument {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    categories: Vec<String>,
    status: ItemStatus,
    #[serde(default)]
    approved_by: String,
    #[serde(default)]
    is_approved: bool,
    #[serde(default)]
    is_deleted: bool,
    date_created: DateTime<Utc>,
    #[serde(default)]
    date_edited: Option<DateTime<Utc>>,
    #[serde(rename = "userID")]
    user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pickup_address: Option<String>,
    #[serde(default)]
    saves: i64,
    location: LocationDocument,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDocument {
    name: String,
    email: String,
    #[serde(default)]
    is_admin: bool,
    #[serde(default)]
    is_verified: bool,
    #[serde(default)]
    expo_push_token: String,
    #[serde(default = "default_true")]
    allow_push_notifications: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<LocationDocument>,
    #[serde(default)]
    is_deleted: bool,
}

fn default_true() -> bool {
    true
}

fn parse_location(doc: LocationDocument) -> Result<GeoLocation, SchemaError> {
    let point = GeoPoint::new(doc.latitude, doc.longitude);
    if !point.is_valid() {
        return Err(SchemaError::InvalidValue {
            field: "location",
            reason: format!("({}, {}) is not a valid coordinate", doc.latitude, doc.longitude),
        });
    }
    let location = GeoLocation::new(point, doc.country, doc.zipcode);

    // The stored hash is what range queries match against, so it has to agree
    // with the coordinates at whatever precision it was written.
    if let Some(stored) = doc.geohash.filter(|h| !h.is_empty()) {
        let computed = location.geohash();
        if !(computed.starts_with(&stored) || stored.starts_with(computed)) {
            return Err(SchemaError::InvalidValue {
                field: "location.geohash",
                reason: format!("'{}' does not match the coordinates ('{}')", stored, computed),
            });
        }
    }
    Ok(location)
}

fn location_document(location: &GeoLocation) -> LocationDocument {
    LocationDocument {
        zipcode: location.postal_code.clone(),
        latitude: location.latitude(),
        longitude: location.longitude(),
        country: location.country.clone(),
        geohash: Some(location.geohash().to_string()),
    }
}

/// The `location` sub-document for a resolved location.
pub fn location_value(location: &GeoLocation) -> Value {
    serde_json::to_value(location_document(location)).unwrap_or(Value::Null)
}

/// Parses a raw item document into an [`Item`].
pub fn parse_item(id: Uuid, raw: &Value) -> Result<Item, SchemaError> {
    let doc: ItemDocument = serde_json::from_value(raw.clone())?;
    if doc.name.trim().is_empty() {
        return Err(SchemaError::InvalidValue {
            field: "name",
            reason: "must not be empty".to_string(),
        });
    }
    if doc.saves < 0 {
        return Err(SchemaError::InvalidValue {
            field: "saves",
            reason: format!("{} is negative", doc.saves),
        });
    }

    Ok(Item {
        id,
        owner_id: doc.user_id,
        name: doc.name,
        description: doc.description,
        images: doc.images,
        categories: doc.categories,
        status: doc.status,
        saves: u32::try_from(doc.saves).unwrap_or(u32::MAX),
        location: parse_location(doc.location)?,
        pickup_address: doc.pickup_address.filter(|a| !a.is_empty()),
        is_deleted: doc.is_deleted,
        is_approved: doc.is_approved,
        approved_by: Some(doc.approved_by).filter(|a| !a.is_empty()),
        created_at: doc.date_created,
        edited_at: doc.date_edited.unwrap_or(doc.date_created),
    })
}

/// Serializes an [`Item`] into the document layout [`parse_item`] reads.
pub fn item_document(item: &Item) -> Value {
    let doc = ItemDocument {
        name: item.name.clone(),
        description: item.description.clone(),
        images: item.images.clone(),
        categories: item.categories.clone(),
        status: item.status,
        approved_by: item.approved_by.clone().unwrap_or_default(),
        is_approved: item.is_approved,
        is_deleted: item.is_deleted,
        date_created: item.created_at,
        date_edited: Some(item.edited_at),
        user_id: item.owner_id,
        pickup_address: item.pickup_address.clone(),
        saves: i64::from(item.saves),
        location: location_document(&item.location),
    };
    serde_json::to_value(doc).unwrap_or(Value::Null)
}

/// Parses a raw user document into a [`User`].
///
/// Users who never resolved a postal code carry an empty placeholder
/// location; that is read back as "no location".
pub fn parse_user(id: Uuid, raw: &Value) -> Result<User, SchemaError> {
    let doc: UserDocument = serde_json::from_value(raw.clone())?;
    let location = match doc.location {
        Some(loc) if loc.zipcode.is_empty() && loc.geohash.as_deref().unwrap_or("").is_empty() => {
            None
        }
        Some(loc) => Some(parse_location(loc)?),
        None => None,
    };

    Ok(User {
        id,
        name: doc.name,
        email: doc.email,
        is_admin: doc.is_admin,
        is_verified: doc.is_verified,
        push_token: Some(doc.expo_push_token).filter(|t| !t.is_empty()),
        allow_push_notifications: doc.allow_push_notifications,
        location,
        is_deleted: doc.is_deleted,
    })
}

/// Serializes a [`User`] into the document layout [`parse_user`] reads.
pub fn user_document(user: &User) -> Value {
    let doc = UserDocument {
        name: user.name.clone(),
        email: user.email.clone(),
        is_admin: user.is_admin,
        is_verified: user.is_verified,
        expo_push_token: user.push_token.clone().unwrap_or_default(),
        allow_push_notifications: user.allow_push_notifications,
        location: user.location.as_ref().map(location_document),
        is_deleted: user.is_deleted,
    };
    serde_json::to_value(doc).unwrap_or(Value::Null)
}

/// Parses a batch of item documents, logging and dropping malformed ones.
pub fn parse_items<'a, I>(docs: I) -> Vec<Item>
where
    I: IntoIterator<Item = (Uuid, &'a Value)>,
{
    docs.into_iter()
        .filter_map(|(id, raw)| match parse_item(id, raw) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(item_id = %id, error = %e, "Skipping malformed item document");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::encode_geohash;
    use serde_json::json;

    fn raw_item() -> Value {
        let geohash = encode_geohash(GeoPoint::new(44.98, -93.27), 5);
        json!({
            "name": "Oak bookshelf",
            "description": "Five shelves, a little scuffed",
            "images": ["https://img.example/1.jpg"],
            "categories": ["Furniture & Home"],
            "status": "Up for Grabs",
            "approvedBy": "",
            "isApproved": true,
            "isDeleted": false,
            "dateCreated": "2024-05-01T10:00:00Z",
            "dateEdited": "2024-05-02T10:00:00Z",
            "userID": "6d5f4c8e-3b0a-4a53-9a43-2a6b8d3f1c11",
            "saves": 4,
            "location": {
                "zipcode": "55401",
                "latitude": 44.98,
                "longitude": -93.27,
                "country": "United States",
                "geohash": geohash
            }
        })
    }

    #[test]
    fn parses_a_client_written_item() {
        let id = Uuid::new_v4();
        let item = parse_item(id, &raw_item()).unwrap();
        assert_eq!(item.id, id);
        assert_eq!(item.status, ItemStatus::Available);
        assert_eq!(item.saves, 4);
        assert_eq!(item.approved_by, None);
        assert_eq!(item.location.postal_code, "55401");
        assert!(item
            .location
            .geohash()
            .starts_with(&encode_geohash(GeoPoint::new(44.98, -93.27), 5)));
    }

    #[test]
    fn rejects_unknown_status_labels() {
        let mut raw = raw_item();
        raw["status"] = json!("Gone Fishing");
        assert!(matches!(parse_item(Uuid::new_v4(), &raw), Err(SchemaError::Malformed(_))));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let mut raw = raw_item();
        raw["location"]["latitude"] = json!(123.0);
        let err = parse_item(Uuid::new_v4(), &raw).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidValue { field: "location", .. }));
    }

    #[test]
    fn rejects_a_geohash_that_disagrees_with_the_coordinates() {
        let mut raw = raw_item();
        raw["location"]["geohash"] = json!("u4pru");
        let err = parse_item(Uuid::new_v4(), &raw).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidValue { field: "location.geohash", .. }));
    }

    #[test]
    fn rejects_negative_save_counts() {
        let mut raw = raw_item();
        raw["saves"] = json!(-2);
        assert!(parse_item(Uuid::new_v4(), &raw).is_err());
    }

    #[test]
    fn item_documents_read_back_unchanged() {
        let id = Uuid::new_v4();
        let item = parse_item(id, &raw_item()).unwrap();
        let again = parse_item(id, &item_document(&item)).unwrap();
        assert_eq!(item, again);
    }

    #[test]
    fn batch_parsing_drops_malformed_documents() {
        let good = raw_item();
        let bad = json!({"name": "no status"});
        let items = parse_items(vec![(Uuid::new_v4(), &good), (Uuid::new_v4(), &bad)]);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn placeholder_user_location_reads_as_none() {
        let raw = json!({
            "name": "Ana",
            "email": "ana@example.com",
            "isAdmin": false,
            "isVerified": true,
            "expoPushToken": "",
            "allowPushNotifications": true,
            "location": {"latitude": 0, "longitude": 0, "zipcode": "", "country": "", "geohash": ""}
        });
        let user = parse_user(Uuid::new_v4(), &raw).unwrap();
        assert_eq!(user.location, None);
        assert_eq!(user.push_token, None);
    }
}
