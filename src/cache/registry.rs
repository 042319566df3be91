//! Static routes from entity families to the query keys that embed them.
//!
//! Every feed that can hold a denormalized copy of an entity is declared
//! here once, together with the projection that tells how an item of that
//! feed relates to the canonical entity shape.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use shelfsync_types::{ActivityEntry, EntityKind, EntityRef, EntityRefError, Item};

use super::keys::{QueryKey, family};

/// Pure rewrite of the canonical copy of an entity.
pub type FieldDelta = Arc<dyn Fn(&Item) -> Item + Send + Sync>;

/// Wrap a closure as a [`FieldDelta`].
pub fn delta<F>(f: F) -> FieldDelta
where
    F: Fn(&Item) -> Item + Send + Sync + 'static,
{
    Arc::new(f)
}

/// How items stored under a feed represent an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// The item is the entity itself.
    Direct,
    /// The item is an activity entry embedding a review. Plain review items
    /// in the same feed are matched directly.
    EmbeddedReview,
}

impl Projection {
    /// Whether `item` is a copy of `entity` under this projection.
    pub fn holds(self, item: &Item, entity: &EntityRef) -> bool {
        match (self, item) {
            (Projection::EmbeddedReview, Item::Activity(activity)) => {
                entity.kind == EntityKind::Review && activity.review.id == entity.id
            }
            _ => item.entity_ref() == *entity,
        }
    }

    /// Apply `delta` to the canonical copy inside `item`. Returns `None` when
    /// `item` is not a copy of `entity`.
    pub fn apply(self, item: &Item, entity: &EntityRef, delta: &FieldDelta) -> Option<Item> {
        if !self.holds(item, entity) {
            return None;
        }
        match (self, item) {
            (Projection::EmbeddedReview, Item::Activity(activity)) => {
                match delta(&Item::Review(activity.review.clone())) {
                    Item::Review(review) => Some(Item::Activity(ActivityEntry {
                        review,
                        ..activity.clone()
                    })),
                    _ => None,
                }
            }
            _ => Some(delta(item)),
        }
    }
}

/// Shape of a key family known to embed an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShape {
    pub family: String,
    /// Fixed segment count including the family name, when the family has one.
    pub arity: Option<usize>,
    pub projection: Projection,
}

impl KeyShape {
    pub fn direct(family: &str) -> Self {
        Self {
            family: family.to_string(),
            arity: None,
            projection: Projection::Direct,
        }
    }

    pub fn embedded_review(family: &str) -> Self {
        Self {
            projection: Projection::EmbeddedReview,
            ..Self::direct(family)
        }
    }

    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        key.family_name() == Some(self.family.as_str())
            && self.arity.is_none_or(|arity| key.len() == arity)
    }
}

/// `review:*` or `review:42`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPattern {
    pub kind: EntityKind,
    pub id: Option<String>,
}

impl EntityPattern {
    pub fn any(kind: EntityKind) -> Self {
        Self { kind, id: None }
    }

    pub fn matches(&self, entity: &EntityRef) -> bool {
        self.kind == entity.kind && self.id.as_deref().is_none_or(|id| id == entity.id)
    }
}

impl fmt::Display for EntityPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id.as_deref().unwrap_or("*"))
    }
}

impl FromStr for EntityPattern {
    type Err = EntityRefError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, id) = value
            .split_once(':')
            .ok_or_else(|| EntityRefError::Malformed(value.to_string()))?;
        let kind = kind.parse()?;
        match id {
            "" => Err(EntityRefError::Malformed(value.to_string())),
            "*" => Ok(Self::any(kind)),
            id => Ok(Self {
                kind,
                id: Some(id.to_string()),
            }),
        }
    }
}

/// Entity pattern → key shapes.
#[derive(Debug, Clone, Default)]
pub struct PropagationRegistry {
    routes: Vec<(EntityPattern, Vec<KeyShape>)>,
}

impl PropagationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that keys of `shapes` may hold copies of entities matching `pattern`.
    pub fn route(mut self, pattern: EntityPattern, shapes: Vec<KeyShape>) -> Self {
        self.routes.push((pattern, shapes));
        self
    }

    /// Feeds of the reading app.
    pub fn bookshelf() -> Self {
        Self::new()
            .route(
                EntityPattern::any(EntityKind::Review),
                vec![
                    KeyShape::embedded_review(family::HOME_FEED),
                    KeyShape::direct(family::COMMUNITY_REVIEWS),
                    KeyShape::direct(family::BOOK_REVIEWS),
                    KeyShape::direct(family::USER_REVIEWS),
                    KeyShape::direct(family::REVIEW).with_arity(2),
                ],
            )
            .route(
                EntityPattern::any(EntityKind::Comment),
                vec![KeyShape::direct(family::REVIEW_COMMENTS).with_arity(2)],
            )
            .route(
                EntityPattern::any(EntityKind::Library),
                vec![
                    KeyShape::direct(family::LIBRARIES),
                    KeyShape::direct(family::LIBRARY).with_arity(2),
                ],
            )
            .route(
                EntityPattern::any(EntityKind::Book),
                vec![
                    KeyShape::direct(family::BOOK_SEARCH),
                    KeyShape::direct(family::BOOK).with_arity(2),
                ],
            )
    }

    /// First shape routed for `entity` that `key` matches.
    pub fn shape_for(&self, entity: &EntityRef, key: &QueryKey) -> Option<&KeyShape> {
        self.routes
            .iter()
            .filter(|(pattern, _)| pattern.matches(entity))
            .flat_map(|(_, shapes)| shapes)
            .find(|shape| shape.matches(key))
    }

    pub fn shapes_for<'a>(&'a self, entity: &'a EntityRef) -> impl Iterator<Item = &'a KeyShape> {
        self.routes
            .iter()
            .filter(move |(pattern, _)| pattern.matches(entity))
            .flat_map(|(_, shapes)| shapes)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}
