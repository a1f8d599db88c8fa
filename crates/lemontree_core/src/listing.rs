//! crates/lemontree_core/src/listing.rs
//!
//! Proximity listing retrieval: composes visibility predicates, fans a query
//! out over the geohash ranges covering the search circle, rechecks the exact
//! distance of every hit and pages through the result with keyset cursors.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::{try_join, try_join_all};
use tracing::{debug, error, instrument};

use crate::domain::{Item, ItemStatus, SessionContext};
use crate::geo::{distance_km, query_bounds, GeoPoint, GeohashRange};
use crate::ports::{ItemStore, PortError, PortResult};
use crate::query::{Cursor, FieldValue, ItemField, ItemQuery, Predicate, SortOrder};

pub const DEFAULT_RADIUS_KM: f64 = 100.0;
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const POPULAR_LIMIT: usize = 10;

/// What to fetch. `filters` only narrow the regular listing; `category`
/// narrows both collections.
#[derive(Debug, Clone)]
pub struct ListingRequest {
    pub filters: Vec<Predicate>,
    pub category: Option<String>,
    pub cursor: Option<Cursor>,
    pub page_size: usize,
    pub radius_km: f64,
}

impl Default for ListingRequest {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            category: None,
            cursor: None,
            page_size: DEFAULT_PAGE_SIZE,
            radius_km: DEFAULT_RADIUS_KM,
        }
    }
}

impl ListingRequest {
    /// Adds a name-prefix search.
    pub fn search(mut self, text: &str) -> Self {
        let text = text.trim();
        if !text.is_empty() {
            self.filters.extend(Predicate::name_prefix(text));
        }
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn after(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    fn validate(&self) -> PortResult<()> {
        if self.page_size == 0 {
            return Err(PortError::InvalidInput("page size must be at least 1".to_string()));
        }
        if !self.radius_km.is_finite() || self.radius_km <= 0.0 {
            return Err(PortError::InvalidInput(format!(
                "radius {} km is not a positive distance",
                self.radius_km
            )));
        }
        Ok(())
    }
}

/// An item as listed to a requester. The distance is only known when the
/// requester has a location.
#[derive(Debug, Clone)]
pub struct Listing {
    pub item: Item,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ListingPage {
    pub regular: Vec<Listing>,
    /// Only present on fetches without a cursor.
    pub popular: Option<Vec<Listing>>,
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
}

//=========================================================================================
// The Listing Service
//=========================================================================================

pub struct ListingService {
    items: Arc<dyn ItemStore>,
}

impl ListingService {
    pub fn new(items: Arc<dyn ItemStore>) -> Self {
        Self { items }
    }

    #[instrument(
        skip_all,
        fields(category = ?request.category, paging = request.cursor.is_some(), admin = session.is_admin())
    )]
    pub async fn fetch_listings(
        &self,
        session: &SessionContext,
        request: &ListingRequest,
    ) -> PortResult<ListingPage> {
        request.validate()?;

        let center = session.requester_location();
        if let Some(c) = center.filter(|c| !c.is_valid()) {
            return Err(PortError::InvalidInput(format!(
                "requester location ({}, {}) is not a valid coordinate",
                c.latitude, c.longitude
            )));
        }
        let ranges: Vec<Option<GeohashRange>> = match center {
            Some(c) => query_bounds(c, request.radius_km * 1000.0)
                .into_iter()
                .map(Some)
                .collect(),
            None => vec![None],
        };
        debug!(sub_queries = ranges.len(), "Fanning out listing query");

        let visible = visibility_predicates(session, request.category.as_deref());

        let regular_query = ItemQuery::new()
            .filters(visible.iter().cloned())
            .filters(request.filters.iter().cloned())
            .order_by(SortOrder::Newest)
            .limit(request.page_size + 1)
            .start_after(request.cursor);
        let regular = self.fan_out(&regular_query, &ranges);

        let popular = async {
            if request.cursor.is_some() {
                return Ok(None);
            }
            let query = ItemQuery::new()
                .filters(visible.iter().cloned())
                .order_by(SortOrder::MostSaved)
                .limit(POPULAR_LIMIT);
            self.fan_out(&query, &ranges).await.map(Some)
        };

        let (regular, popular) = try_join(regular, popular).await?;

        let (regular, next_cursor, has_more) =
            assemble_regular(regular, request.page_size, center, request.radius_km);
        let popular = popular.map(|batches| assemble_popular(batches, center, request.radius_km));

        debug!(regular = regular.len(), has_more, "Listing page assembled");
        Ok(ListingPage {
            regular,
            popular,
            next_cursor,
            has_more,
        })
    }

    /// One backend query per range, all in flight at once. Any failure fails
    /// the whole fetch.
    async fn fan_out(
        &self,
        query: &ItemQuery,
        ranges: &[Option<GeohashRange>],
    ) -> PortResult<Vec<Vec<Item>>> {
        let queries = ranges.iter().map(|range| {
            let query = match range {
                Some(r) => query.clone().filters(Predicate::geohash_range(r)),
                None => query.clone(),
            };
            async move {
                self.items.query_items(&query).await.map_err(|e| {
                    error!(range = ?range, error = %e, "Listing sub-query failed");
                    e
                })
            }
        });
        try_join_all(queries).await
    }
}

fn visibility_predicates(session: &SessionContext, category: Option<&str>) -> Vec<Predicate> {
    let mut predicates = vec![
        Predicate::eq(ItemField::IsDeleted, FieldValue::Bool(false)),
        Predicate::status(ItemStatus::Available),
    ];
    if !session.is_admin() {
        predicates.push(Predicate::eq(ItemField::IsApproved, FieldValue::Bool(true)));
    }
    if let Some(category) = category.filter(|c| !c.is_empty()) {
        predicates.push(Predicate::category(category));
    }
    predicates
}

fn within_radius(item: Item, center: Option<GeoPoint>, radius_km: f64) -> Option<Listing> {
    if !item.is_available() {
        return None;
    }
    match center {
        None => Some(Listing {
            item,
            distance_km: None,
        }),
        Some(center) => {
            let distance = distance_km(center, item.location.point());
            (distance <= radius_km).then_some(Listing {
                item,
                distance_km: Some(distance),
            })
        }
    }
}

fn merge(
    batches: Vec<Vec<Item>>,
    center: Option<GeoPoint>,
    radius_km: f64,
    keep: impl Fn(&Item) -> bool,
) -> Vec<Listing> {
    let mut seen = HashSet::new();
    batches
        .into_iter()
        .flatten()
        .filter(|item| seen.insert(item.id))
        .filter(|item| keep(item))
        .filter_map(|item| within_radius(item, center, radius_km))
        .collect()
}

/// Builds the regular page from the per-range batches.
///
/// Every sub-query asked for `page_size + 1` rows. A saturated batch only
/// vouches for rows up to its last one, so the page stops at the newest of
/// those last rows (the horizon); anything older is fetched again next time.
fn assemble_regular(
    batches: Vec<Vec<Item>>,
    page_size: usize,
    center: Option<GeoPoint>,
    radius_km: f64,
) -> (Vec<Listing>, Option<Cursor>, bool) {
    let horizon = batches
        .iter()
        .filter(|batch| batch.len() > page_size)
        .filter_map(|batch| batch.last())
        .map(Cursor::from_item)
        .min_by(|a, b| a.position_cmp(b));

    let mut listings = merge(batches, center, radius_km, |item| {
        horizon.map_or(true, |h| !h.precedes(item))
    });
    listings.sort_by(|a, b| SortOrder::Newest.compare(&a.item, &b.item));

    let overflow = listings.len() > page_size;
    listings.truncate(page_size);

    let has_more = overflow || horizon.is_some();
    let next_cursor = match horizon {
        Some(h) if !overflow => Some(h),
        _ => listings.last().map(|l| Cursor::from_item(&l.item)),
    };
    (listings, next_cursor, has_more)
}

fn assemble_popular(batches: Vec<Vec<Item>>, center: Option<GeoPoint>, radius_km: f64) -> Vec<Listing> {
    let mut listings = merge(batches, center, radius_km, |_| true);
    listings.sort_by(|a, b| SortOrder::MostSaved.compare(&a.item, &b.item));
    listings.truncate(POPULAR_LIMIT);
    listings
}

//=========================================================================================
// Caller-owned accumulation
//=========================================================================================

/// Accumulates regular pages for one caller. Fetches take `&mut self`, so a
/// feed can never have two fetches racing on its list.
pub struct ListingFeed {
    service: Arc<ListingService>,
    request: ListingRequest,
    regular: Vec<Listing>,
    popular: Vec<Listing>,
    cursor: Option<Cursor>,
    has_more: bool,
    error: Option<String>,
}

impl ListingFeed {
    pub fn new(service: Arc<ListingService>, request: ListingRequest) -> Self {
        Self {
            service,
            request: request.after(None),
            regular: Vec::new(),
            popular: Vec::new(),
            cursor: None,
            has_more: false,
            error: None,
        }
    }

    /// Changes filters or category; the next `refresh` uses them.
    pub fn set_request(&mut self, request: ListingRequest) {
        self.request = request.after(None);
    }

    /// Fetches the first page and replaces everything accumulated so far.
    pub async fn refresh(&mut self, session: &SessionContext) {
        let request = self.request.clone();
        match self.service.fetch_listings(session, &request).await {
            Ok(page) => {
                self.regular = page.regular;
                self.popular = page.popular.unwrap_or_default();
                self.cursor = page.next_cursor;
                self.has_more = page.has_more;
                self.error = None;
            }
            Err(e) => self.error = Some(e.to_string()),
        }
    }

    /// Appends the next page. Does nothing when there is nothing more.
    pub async fn fetch_more(&mut self, session: &SessionContext) {
        let Some(cursor) = self.cursor.filter(|_| self.has_more) else {
            return;
        };
        let request = self.request.clone().after(Some(cursor));
        match self.service.fetch_listings(session, &request).await {
            Ok(page) => {
                let known: HashSet<_> = self.regular.iter().map(|l| l.item.id).collect();
                self.regular
                    .extend(page.regular.into_iter().filter(|l| !known.contains(&l.item.id)));
                self.cursor = page.next_cursor.or(self.cursor);
                self.has_more = page.has_more;
                self.error = None;
            }
            Err(e) => self.error = Some(e.to_string()),
        }
    }

    pub fn regular(&self) -> &[Listing] {
        &self.regular
    }

    pub fn popular(&self) -> &[Listing] {
        &self.popular
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{item_at, offset_km, user, InMemoryStore};
    use crate::geo::{encode_geohash, DEFAULT_GEOHASH_PRECISION};

    const CENTER: GeoPoint = GeoPoint {
        latitude: 44.98,
        longitude: -93.27,
    };

    fn session_at(center: GeoPoint, admin: bool) -> SessionContext {
        SessionContext::signed_in(user("Riley", admin, Some(center)))
    }

    fn ids(listings: &[Listing]) -> Vec<uuid::Uuid> {
        listings.iter().map(|l| l.item.id).collect()
    }

    #[tokio::test]
    async fn returns_only_items_inside_the_radius() {
        let store = InMemoryStore::new();
        let owner = uuid::Uuid::new_v4();
        let mut near = item_at(owner, offset_km(CENTER, 5.0, 0.0), 30);
        near.saves = 20;
        let mut mid = item_at(owner, offset_km(CENTER, 50.0, 0.0), 20);
        mid.saves = 3;
        let far = item_at(owner, offset_km(CENTER, 150.0, 0.0), 10);
        store.put_items([near.clone(), mid.clone(), far.clone()]);

        let service = ListingService::new(store.clone());
        let page = service
            .fetch_listings(&session_at(CENTER, false), &ListingRequest::default())
            .await
            .unwrap();

        assert_eq!(ids(&page.regular), vec![mid.id, near.id]);
        assert_eq!(ids(&page.popular.unwrap()), vec![near.id, mid.id]);
        assert!(!page.has_more);
        for listing in &page.regular {
            assert!(listing.distance_km.unwrap() <= DEFAULT_RADIUS_KM);
        }
    }

    #[tokio::test]
    async fn bounding_box_corners_are_rechecked() {
        let store = InMemoryStore::new();
        let corner = item_at(uuid::Uuid::new_v4(), GeoPoint::new(45.78, -92.17), 5);
        store.put_items([corner.clone()]);

        let hash = encode_geohash(corner.location.point(), DEFAULT_GEOHASH_PRECISION);
        let ranges = query_bounds(CENTER, DEFAULT_RADIUS_KM * 1000.0);
        assert!(ranges.iter().any(|r| r.contains(&hash)), "corner should pass the coarse stage");
        assert!(distance_km(CENTER, corner.location.point()) > DEFAULT_RADIUS_KM);

        let service = ListingService::new(store);
        let page = service
            .fetch_listings(&session_at(CENTER, false), &ListingRequest::default())
            .await
            .unwrap();
        assert!(page.regular.is_empty());
        assert!(page.popular.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hides_deleted_unavailable_and_unapproved_items() {
        let store = InMemoryStore::new();
        let owner = uuid::Uuid::new_v4();
        let visible = item_at(owner, CENTER, 1);
        let mut deleted = item_at(owner, CENTER, 2);
        deleted.is_deleted = true;
        let mut given = item_at(owner, CENTER, 3);
        given.status = ItemStatus::Given;
        let mut pending = item_at(owner, CENTER, 4);
        pending.is_approved = false;
        store.put_items([visible.clone(), deleted, given, pending.clone()]);
        let service = ListingService::new(store);

        let page = service
            .fetch_listings(&session_at(CENTER, false), &ListingRequest::default())
            .await
            .unwrap();
        assert_eq!(ids(&page.regular), vec![visible.id]);
        assert_eq!(ids(&page.popular.unwrap()), vec![visible.id]);

        let page = service
            .fetch_listings(&session_at(CENTER, true), &ListingRequest::default())
            .await
            .unwrap();
        assert_eq!(ids(&page.regular), vec![visible.id, pending.id]);
    }

    #[tokio::test]
    async fn anonymous_requesters_get_an_unbounded_listing() {
        let store = InMemoryStore::new();
        let far = item_at(uuid::Uuid::new_v4(), GeoPoint::new(-33.86, 151.21), 1);
        store.put_items([far.clone()]);
        let service = ListingService::new(store);

        let page = service
            .fetch_listings(&SessionContext::anonymous(), &ListingRequest::default())
            .await
            .unwrap();
        assert_eq!(ids(&page.regular), vec![far.id]);
        assert_eq!(page.regular[0].distance_km, None);
    }

    #[tokio::test]
    async fn pages_cover_everything_once_in_recency_order() {
        let store = InMemoryStore::new();
        let owner = uuid::Uuid::new_v4();
        let mut all = Vec::new();
        for i in 0..37 {
            let angle = (i as f64) * 0.9;
            let point = offset_km(CENTER, 80.0 * angle.sin(), 80.0 * angle.cos());
            all.push(item_at(owner, point, i * 7 % 37));
        }
        store.put_items(all.clone());
        let service = ListingService::new(store);
        let session = session_at(CENTER, false);

        let mut seen = Vec::new();
        let mut request = ListingRequest::default();
        loop {
            let page = service.fetch_listings(&session, &request).await.unwrap();
            assert!(page.regular.len() <= request.page_size);
            seen.extend(ids(&page.regular));
            if !page.has_more {
                break;
            }
            request = request.after(page.next_cursor);
        }

        let mut expected = all;
        expected.sort_by(|a, b| SortOrder::Newest.compare(a, b));
        assert_eq!(seen, expected.iter().map(|i| i.id).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn has_more_uses_a_sentinel_row() {
        let store = InMemoryStore::new();
        let owner = uuid::Uuid::new_v4();
        store.put_items((0..4).map(|i| item_at(owner, CENTER, i)));
        let service = ListingService::new(store.clone());
        let session = session_at(CENTER, false);
        let request = ListingRequest {
            page_size: 4,
            ..ListingRequest::default()
        };

        let page = service.fetch_listings(&session, &request).await.unwrap();
        assert_eq!(page.regular.len(), 4);
        assert!(!page.has_more);

        store.put_items([item_at(owner, CENTER, 10)]);
        let page = service.fetch_listings(&session, &request).await.unwrap();
        assert_eq!(page.regular.len(), 4);
        assert!(page.has_more);

        let last = service
            .fetch_listings(&session, &request.clone().after(page.next_cursor))
            .await
            .unwrap();
        assert_eq!(last.regular.len(), 1);
        assert!(!last.has_more);
        assert!(last.popular.is_none());
    }

    #[tokio::test]
    async fn popular_is_capped_and_ranked_by_saves() {
        let store = InMemoryStore::new();
        let owner = uuid::Uuid::new_v4();
        store.put_items((0..15).map(|i| {
            let mut item = item_at(owner, offset_km(CENTER, i as f64, 0.0), i);
            item.saves = (i as u32 * 13) % 17;
            item
        }));
        let service = ListingService::new(store);

        let page = service
            .fetch_listings(&session_at(CENTER, false), &ListingRequest::default())
            .await
            .unwrap();
        let popular = page.popular.unwrap();
        assert_eq!(popular.len(), POPULAR_LIMIT);
        assert!(popular.windows(2).all(|w| w[0].item.saves >= w[1].item.saves));
    }

    #[tokio::test]
    async fn identical_category_queries_are_idempotent() {
        let store = InMemoryStore::new();
        let owner = uuid::Uuid::new_v4();
        store.put_items((0..8).map(|i| {
            let mut item = item_at(owner, offset_km(CENTER, 0.0, i as f64 * 3.0), i);
            if i % 2 == 0 {
                item.categories = vec!["Books & Media".to_string()];
            }
            item
        }));
        let service = ListingService::new(store);
        let session = session_at(CENTER, false);
        let request = ListingRequest::default().category("Books & Media");

        let first = service.fetch_listings(&session, &request).await.unwrap();
        let second = service.fetch_listings(&session, &request).await.unwrap();
        assert_eq!(first.regular.len(), 4);
        assert_eq!(ids(&first.regular), ids(&second.regular));
        assert_eq!(ids(&first.popular.unwrap()), ids(&second.popular.unwrap()));
    }

    #[tokio::test]
    async fn search_narrows_regular_but_not_popular() {
        let store = InMemoryStore::new();
        let owner = uuid::Uuid::new_v4();
        let mut lamp = item_at(owner, CENTER, 1);
        lamp.name = "Lamp".to_string();
        let mut desk = item_at(owner, CENTER, 2);
        desk.name = "Desk".to_string();
        store.put_items([lamp.clone(), desk]);
        let service = ListingService::new(store);

        let page = service
            .fetch_listings(&session_at(CENTER, false), &ListingRequest::default().search("La"))
            .await
            .unwrap();
        assert_eq!(ids(&page.regular), vec![lamp.id]);
        assert_eq!(page.popular.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn one_failing_range_fails_the_fetch_and_keeps_prior_data() {
        let store = InMemoryStore::new();
        store.put_items([item_at(uuid::Uuid::new_v4(), CENTER, 1)]);
        let service = Arc::new(ListingService::new(store.clone()));
        let session = session_at(CENTER, false);

        let mut feed = ListingFeed::new(service, ListingRequest::default());
        feed.refresh(&session).await;
        assert_eq!(feed.regular().len(), 1);
        assert_eq!(feed.error(), None);

        store.fail_query_number(2);
        feed.refresh(&session).await;
        assert_eq!(feed.regular().len(), 1);
        assert!(feed.error().unwrap().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn feed_appends_pages_without_duplicates() {
        let store = InMemoryStore::new();
        let owner = uuid::Uuid::new_v4();
        store.put_items((0..25).map(|i| item_at(owner, offset_km(CENTER, -(i as f64), 0.0), i)));
        let service = Arc::new(ListingService::new(store));
        let session = session_at(CENTER, false);

        let mut feed = ListingFeed::new(service, ListingRequest::default());
        feed.refresh(&session).await;
        assert_eq!(feed.regular().len(), 10);
        while feed.has_more() {
            feed.fetch_more(&session).await;
        }
        let unique: HashSet<_> = ids(feed.regular()).into_iter().collect();
        assert_eq!(feed.regular().len(), 25);
        assert_eq!(unique.len(), 25);

        feed.refresh(&session).await;
        assert_eq!(feed.regular().len(), 10);
    }

    #[tokio::test]
    async fn rejects_a_zero_page_size() {
        let service = ListingService::new(InMemoryStore::new());
        let request = ListingRequest {
            page_size: 0,
            ..ListingRequest::default()
        };
        let err = service
            .fetch_listings(&SessionContext::anonymous(), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::InvalidInput(_)));
    }
}
