//! Sample entity and the conformance suite every backend runs.

use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use fake::faker::name::en::Name;
use fake::Fake;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cleanarch_domain::{
    unknown_field, DomainError, Entity, EntityKey, FieldDef, FieldKind, FieldValue, Filter,
    Lang, LimitOffset, IDENTITY_FIELDS,
};

use crate::repository::{Repository, RepositorySession};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Item {
    pub id: Option<i64>,
    pub uuid: Uuid,
    pub name: String,
    pub rank: i64,
    pub active: bool,
    pub note: Option<String>,
    pub lang: Lang,
    pub created_at: DateTime<Utc>,
}

impl Default for Item {
    fn default() -> Self {
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            name: String::new(),
            rank: 0,
            active: true,
            note: None,
            lang: Lang::En,
            created_at: Utc::now().trunc_subsecs(6),
        }
    }
}

impl Item {
    pub(crate) fn named(name: &str, rank: i64) -> Self {
        Self {
            name: name.to_string(),
            rank,
            ..Self::default()
        }
    }

    pub(crate) fn fake(rank: i64) -> Self {
        Self::named(&Name().fake::<String>(), rank)
    }
}

static ITEM_SCHEMA: [FieldDef; 8] = [
    IDENTITY_FIELDS[0],
    IDENTITY_FIELDS[1],
    FieldDef::new("name", FieldKind::Text),
    FieldDef::new("rank", FieldKind::Int),
    FieldDef::new("active", FieldKind::Bool),
    FieldDef::new("note", FieldKind::Text).nullable(),
    FieldDef::new("lang", FieldKind::Text),
    FieldDef::new("created_at", FieldKind::Timestamp),
];

impl Entity for Item {
    const NAME: &'static str = "Item";
    const COLLECTION: &'static str = "items";

    fn schema() -> &'static [FieldDef] {
        &ITEM_SCHEMA
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "id" => self.id.into(),
            "uuid" => self.uuid.into(),
            "name" => self.name.clone().into(),
            "rank" => self.rank.into(),
            "active" => self.active.into(),
            "note" => self.note.clone().into(),
            "lang" => self.lang.into(),
            "created_at" => self.created_at.into(),
            _ => return None,
        })
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> cleanarch_domain::DomainResult<()> {
        match name {
            "id" => self.id = value.into_opt_int(Self::NAME, name)?,
            "uuid" => self.uuid = value.into_uuid(Self::NAME, name)?,
            "name" => self.name = value.into_text(Self::NAME, name)?,
            "rank" => self.rank = value.into_int(Self::NAME, name)?,
            "active" => self.active = value.into_bool(Self::NAME, name)?,
            "note" => self.note = value.into_opt_text(Self::NAME, name)?,
            "lang" => {
                self.lang = value
                    .into_text(Self::NAME, name)?
                    .parse()
                    .map_err(|err: String| DomainError::invalid_field(Self::NAME, name, err))?;
            }
            "created_at" => self.created_at = value.into_timestamp(Self::NAME, name)?,
            _ => return Err(unknown_field(Self::NAME, name)),
        }
        Ok(())
    }
}

// =============================================================================
// CONFORMANCE SUITE
// =============================================================================

async fn seed<R: Repository<Item>>(repo: &R, items: Vec<Item>) -> Vec<Item> {
    let mut session = repo.begin().await.unwrap();
    let mut stored = Vec::with_capacity(items.len());
    for item in items {
        stored.push(session.add(item).await.unwrap());
    }
    session.commit().await.unwrap();
    stored
}

fn names(items: &[Item]) -> Vec<&str> {
    items.iter().map(|item| item.name.as_str()).collect()
}

pub(crate) async fn round_trip<R: Repository<Item>>(repo: &R) {
    let mut session = repo.begin().await.unwrap();
    let mut item = Item::fake(3);
    item.note = Some("fragile".into());
    item.lang = Lang::De;
    let added = session.add(item.clone()).await.unwrap();
    assert!(added.id.is_some());
    assert_eq!(added.uuid, item.uuid);
    session.commit().await.unwrap();
    drop(session);

    let session = repo.begin().await.unwrap();
    let by_uuid = session.get(added.uuid.into()).await.unwrap();
    assert_eq!(by_uuid.as_ref(), Some(&added));
    let id = added.id.unwrap();
    assert_eq!(session.get(id.into()).await.unwrap().as_ref(), Some(&added));
    let by_key = session.get(added.uuid.to_string().into()).await.unwrap();
    assert_eq!(by_key.as_ref(), Some(&added));
    assert!(session.get(Uuid::new_v4().into()).await.unwrap().is_none());
    assert!(session.get(EntityKey::Id(id + 1000)).await.unwrap().is_none());
    assert!(matches!(
        session.get_required(EntityKey::Id(id + 1000)).await,
        Err(DomainError::NotFound { entity_type: "Item", .. })
    ));
    assert!(session.exists(added.uuid.into()).await.unwrap());
    assert!(matches!(
        session.get("not-a-uuid".into()).await,
        Err(DomainError::Validation { .. })
    ));
}

pub(crate) async fn identities_increase<R: Repository<Item>>(repo: &R) {
    let stored = seed(repo, vec![Item::fake(1), Item::fake(2), Item::fake(3)]).await;
    let ids: Vec<i64> = stored.iter().map(|item| item.id.unwrap()).collect();
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]), "{ids:?}");
}

pub(crate) async fn count_agrees_with_list<R: Repository<Item>>(repo: &R) {
    let mut items: Vec<Item> = (0..7).map(|rank| Item::named(["a", "b", "c"][rank % 3], 0)).collect();
    items[0].note = Some("x".into());
    items[1].active = false;
    items[4].active = false;
    seed(repo, items).await;

    let session = repo.begin().await.unwrap();
    let filters = [
        None,
        Some(Filter::new().eq("name", "a")),
        Some(Filter::new().eq("active", false)),
        Some(Filter::new().eq("note", None::<String>)),
        Some(Filter::new().eq("name", "b").eq("active", true)),
        Some(Filter::new().eq("name", "zzz")),
    ];
    for filter in &filters {
        let listed = session
            .list(LimitOffset::unbounded(), filter.as_ref())
            .await
            .unwrap();
        let counted = session.count(filter.as_ref()).await.unwrap();
        assert_eq!(counted, listed.len() as u64, "filter {filter:?}");
    }
    assert_eq!(session.count(None).await.unwrap(), 7);
    assert_eq!(session.count(Some(&Filter::new().eq("active", false))).await.unwrap(), 2);
    assert_eq!(session.count(Some(&Filter::new().eq("note", None::<String>))).await.unwrap(), 6);
}

pub(crate) async fn remove_nothing_is_noop<R: Repository<Item>>(repo: &R) {
    seed(repo, vec![Item::fake(1), Item::fake(2)]).await;
    let mut session = repo.begin().await.unwrap();
    let removed = session
        .remove(&Filter::new().eq("name", "no such name"))
        .await
        .unwrap();
    assert_eq!(removed, 0);
    session.commit().await.unwrap();
    assert_eq!(session.count(None).await.unwrap(), 2);
}

pub(crate) async fn discarded_session_leaves_store_untouched<R: Repository<Item>>(repo: &R) {
    let stored = seed(repo, vec![Item::named("kept", 1)]).await;

    {
        let mut session = repo.begin().await.unwrap();
        session.add(Item::named("ghost", 2)).await.unwrap();
        let mut renamed = stored[0].clone();
        renamed.name = "renamed".into();
        assert_eq!(session.update(&renamed, None, None).await.unwrap(), 1);
        assert_eq!(session.count(None).await.unwrap(), 2);
        assert_eq!(
            session
                .count(Some(&Filter::new().eq("name", "renamed")))
                .await
                .unwrap(),
            1
        );
        // dropped without commit
    }

    let mut session = repo.begin().await.unwrap();
    assert_eq!(session.count(None).await.unwrap(), 1);
    let kept = session.get(stored[0].uuid.into()).await.unwrap().unwrap();
    assert_eq!(kept.name, "kept");
    assert!(session
        .list(LimitOffset::unbounded(), Some(&Filter::new().eq("name", "ghost")))
        .await
        .unwrap()
        .is_empty());

    session.remove(&Filter::new()).await.unwrap();
    drop(session);
    let session = repo.begin().await.unwrap();
    assert_eq!(session.count(None).await.unwrap(), 1);
}

pub(crate) async fn commit_keeps_session_usable<R: Repository<Item>>(repo: &R) {
    let mut session = repo.begin().await.unwrap();
    session.add(Item::named("first", 1)).await.unwrap();
    session.commit().await.unwrap();
    session.add(Item::named("second", 2)).await.unwrap();
    assert_eq!(session.count(None).await.unwrap(), 2);
    drop(session);

    let session = repo.begin().await.unwrap();
    let listed = session.list(LimitOffset::unbounded(), None).await.unwrap();
    assert_eq!(names(&listed), vec!["first"]);
}

pub(crate) async fn ordering_with_mixed_directions<R: Repository<Item>>(repo: &R) {
    let base = Utc::now().trunc_subsecs(6);
    let rows = [("beta", 0), ("alpha", 1), ("beta", 2), ("alpha", 0), ("gamma", 5)];
    let items = rows
        .iter()
        .map(|(name, minutes)| {
            let mut item = Item::named(name, *minutes);
            item.created_at = base + TimeDelta::minutes(*minutes);
            item
        })
        .collect();
    seed(repo, items).await;

    let session = repo.begin().await.unwrap();
    let filter = Filter::new().order_by("name,-created_at");
    let listed = session
        .list(LimitOffset::unbounded(), Some(&filter))
        .await
        .unwrap();
    let got: Vec<(&str, i64)> = listed
        .iter()
        .map(|item| (item.name.as_str(), item.rank))
        .collect();
    assert_eq!(
        got,
        vec![("alpha", 1), ("alpha", 0), ("beta", 2), ("beta", 0), ("gamma", 5)]
    );

    let filter = Filter::new().eq("name", "beta").order_by("-rank");
    let listed = session.list(LimitOffset::default(), Some(&filter)).await.unwrap();
    assert_eq!(listed.iter().map(|i| i.rank).collect::<Vec<_>>(), vec![2, 0]);
}

pub(crate) async fn pagination_returns_ordered_tail<R: Repository<Item>>(repo: &R) {
    let items = (0..25).map(|rank| Item::named(&format!("item-{rank:02}"), rank)).collect();
    seed(repo, items).await;

    let session = repo.begin().await.unwrap();
    let filter = Filter::new().order_by("-rank");
    let full = session
        .list(LimitOffset::unbounded(), Some(&filter))
        .await
        .unwrap();
    assert_eq!(full.len(), 25);
    let page = session
        .list(LimitOffset::new(10, 20), Some(&filter))
        .await
        .unwrap();
    assert_eq!(page.len(), 5);
    assert_eq!(page, full[20..].to_vec());
    assert_eq!(page.last().map(|i| i.rank), Some(0));

    let first = session.list(LimitOffset::new(10, 0), None).await.unwrap();
    let again = session.list(LimitOffset::new(10, 0), None).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(first[0].rank, 0);
    assert!(session.list(LimitOffset::new(0, 0), None).await.unwrap().is_empty());
}

pub(crate) async fn second_session_is_rejected<R: Repository<Item>>(repo: &R) {
    let first = repo.begin().await.unwrap();
    assert!(matches!(
        repo.begin().await,
        Err(DomainError::ConcurrencyViolation { entity_type: "Item", .. })
    ));
    assert!(matches!(
        repo.begin_timeout(Duration::from_millis(20)).await,
        Err(DomainError::ResourceBusy { .. })
    ));
    drop(first);
    let second = repo.begin().await.unwrap();
    drop(second);
    assert!(repo.begin_timeout(Duration::from_millis(20)).await.is_ok());
}

pub(crate) async fn duplicate_uuid_is_rejected<R: Repository<Item>>(repo: &R) {
    let item = Item::fake(1);
    let mut session = repo.begin().await.unwrap();
    session.add(item.clone()).await.unwrap();
    assert!(matches!(
        session.add(item.clone()).await,
        Err(DomainError::AlreadyExists { entity_type: "Item", .. })
    ));
    session.commit().await.unwrap();
    drop(session);

    let mut session = repo.begin().await.unwrap();
    let err = session.add(item.clone()).await.unwrap_err();
    assert!(matches!(err, DomainError::AlreadyExists { ref key, .. } if *key == item.uuid.to_string()));
    assert_eq!(session.count(None).await.unwrap(), 1);
}

pub(crate) async fn update_single_entity<R: Repository<Item>>(repo: &R) {
    let stored = seed(repo, vec![Item::named("a", 1), Item::named("b", 2)]).await;
    let mut session = repo.begin().await.unwrap();

    let mut changed = stored[0].clone();
    changed.name = "a2".into();
    changed.rank = 10;
    assert_eq!(
        session
            .update(&changed, None, Some(&["name"][..]))
            .await
            .unwrap(),
        1
    );
    let current = session.get(changed.uuid.into()).await.unwrap().unwrap();
    assert_eq!((current.name.as_str(), current.rank), ("a2", 1));
    assert_eq!(current.id, stored[0].id);

    let not_matching = Filter::new().eq("rank", 99);
    assert_eq!(session.update(&changed, Some(&not_matching), None).await.unwrap(), 0);
    let matching = Filter::new().eq("rank", 1);
    assert_eq!(session.update(&changed, Some(&matching), None).await.unwrap(), 1);
    assert_eq!(
        session.get(changed.uuid.into()).await.unwrap().unwrap().rank,
        10
    );

    assert_eq!(session.update(&Item::fake(0), None, None).await.unwrap(), 0);
    assert!(matches!(
        session.update(&changed, None, Some(&["uuid"][..])).await,
        Err(DomainError::Validation { .. })
    ));
    session.commit().await.unwrap();
    drop(session);

    let session = repo.begin().await.unwrap();
    let current = session.get(changed.uuid.into()).await.unwrap().unwrap();
    assert_eq!((current.name.as_str(), current.rank), ("a2", 10));
    let other = session.get(stored[1].uuid.into()).await.unwrap().unwrap();
    assert_eq!(other, stored[1]);
}

pub(crate) async fn update_filter_naming_other_entity_matches_nothing<R: Repository<Item>>(repo: &R) {
    let stored = seed(repo, vec![Item::named("a", 1), Item::named("b", 2)]).await;
    let mut session = repo.begin().await.unwrap();

    let mut renamed = stored[0].clone();
    renamed.name = "hijacked".into();
    let elsewhere = Filter::by_uuid(stored[1].uuid);
    assert_eq!(session.update(&renamed, Some(&elsewhere), None).await.unwrap(), 0);
    assert_eq!(
        session.get(stored[0].uuid.into()).await.unwrap().as_ref(),
        Some(&stored[0])
    );
    assert_eq!(
        session.get(stored[1].uuid.into()).await.unwrap().as_ref(),
        Some(&stored[1])
    );

    let own = Filter::by_uuid(stored[0].uuid);
    assert_eq!(session.update(&renamed, Some(&own), None).await.unwrap(), 1);
    let current = session.get(stored[0].uuid.into()).await.unwrap().unwrap();
    assert_eq!(current.name, "hijacked");
}

pub(crate) async fn update_without_fields_counts_match<R: Repository<Item>>(repo: &R) {
    let stored = seed(repo, vec![Item::named("a", 1)]).await;
    let mut session = repo.begin().await.unwrap();
    let no_fields: &[&str] = &[];

    let mut changed = stored[0].clone();
    changed.name = "ignored".into();
    assert_eq!(session.update(&changed, None, Some(no_fields)).await.unwrap(), 1);
    let missed = Filter::new().eq("rank", 99);
    assert_eq!(
        session.update(&changed, Some(&missed), Some(no_fields)).await.unwrap(),
        0
    );
    assert_eq!(session.update(&Item::fake(0), None, Some(no_fields)).await.unwrap(), 0);
    let current = session.get(stored[0].uuid.into()).await.unwrap().unwrap();
    assert_eq!(current, stored[0]);
}

pub(crate) async fn update_by_filter_sets_values<R: Repository<Item>>(repo: &R) {
    seed(
        repo,
        vec![Item::named("x", 1), Item::named("y", 1), Item::named("z", 2)],
    )
    .await;
    let mut session = repo.begin().await.unwrap();
    let updated = session
        .update_by_filter(
            &Filter::new().eq("rank", 1),
            &[("active", false.into()), ("note", "archived".into())],
        )
        .await
        .unwrap();
    assert_eq!(updated, 2);
    assert!(matches!(
        session
            .update_by_filter(&Filter::new(), &[("id", FieldValue::Int(5))])
            .await,
        Err(DomainError::Validation { .. })
    ));
    assert!(matches!(
        session
            .update_by_filter(&Filter::new(), &[("rank", "high".into())])
            .await,
        Err(DomainError::Validation { .. })
    ));
    session.commit().await.unwrap();
    drop(session);

    let session = repo.begin().await.unwrap();
    let archived = Filter::new().eq("active", false).order_by("name");
    let listed = session.list(LimitOffset::unbounded(), Some(&archived)).await.unwrap();
    assert_eq!(names(&listed), vec!["x", "y"]);
    assert!(listed.iter().all(|item| item.note.as_deref() == Some("archived")));
    assert_eq!(
        session
            .count(Some(&Filter::new().eq("active", true)))
            .await
            .unwrap(),
        1
    );
}

pub(crate) async fn remove_deletes_matches<R: Repository<Item>>(repo: &R) {
    let stored = seed(
        repo,
        vec![Item::named("keep", 1), Item::named("drop", 2), Item::named("drop", 3)],
    )
    .await;
    let mut session = repo.begin().await.unwrap();
    assert_eq!(session.remove(&Filter::new().eq("name", "drop")).await.unwrap(), 2);
    assert_eq!(session.count(None).await.unwrap(), 1);
    assert!(session.get(stored[1].id.unwrap().into()).await.unwrap().is_none());
    session.commit().await.unwrap();
    drop(session);

    let mut session = repo.begin().await.unwrap();
    assert_eq!(session.count(None).await.unwrap(), 1);
    assert!(session.get(stored[2].uuid.into()).await.unwrap().is_none());
    assert!(session.get(stored[2].id.unwrap().into()).await.unwrap().is_none());

    // a removed identifier can be added again
    let mut revived = stored[1].clone();
    revived.id = None;
    let revived = session.add(revived).await.unwrap();
    assert_ne!(revived.id, stored[1].id);
    session.commit().await.unwrap();
    assert_eq!(session.count(None).await.unwrap(), 2);
}

pub(crate) async fn invalid_filter_is_rejected<R: Repository<Item>>(repo: &R) {
    let mut session = repo.begin().await.unwrap();
    let unknown = Filter::new().eq("colour", "red");
    assert!(matches!(
        session.list(LimitOffset::default(), Some(&unknown)).await,
        Err(DomainError::Validation { .. })
    ));
    assert!(matches!(
        session.count(Some(&unknown)).await,
        Err(DomainError::Validation { .. })
    ));
    assert!(matches!(
        session.remove(&unknown).await,
        Err(DomainError::Validation { .. })
    ));
    let bad_order = Filter::new().order_by("name,-colour");
    let err = session
        .list(LimitOffset::default(), Some(&bad_order))
        .await
        .unwrap_err();
    assert_eq!(err.field_errors()[0].field, "colour");
}

/// Generate one `#[tokio::test]` per conformance check against the
/// repository returned by the async factory `$make`.
macro_rules! conformance_suite {
    ($make:path) => {
        mod conformance {
            use super::*;
            use $crate::test_support as suite;

            #[tokio::test]
            async fn round_trip() {
                suite::round_trip(&$make().await).await;
            }

            #[tokio::test]
            async fn identities_increase() {
                suite::identities_increase(&$make().await).await;
            }

            #[tokio::test]
            async fn count_agrees_with_list() {
                suite::count_agrees_with_list(&$make().await).await;
            }

            #[tokio::test]
            async fn remove_nothing_is_noop() {
                suite::remove_nothing_is_noop(&$make().await).await;
            }

            #[tokio::test]
            async fn discarded_session_leaves_store_untouched() {
                suite::discarded_session_leaves_store_untouched(&$make().await).await;
            }

            #[tokio::test]
            async fn commit_keeps_session_usable() {
                suite::commit_keeps_session_usable(&$make().await).await;
            }

            #[tokio::test]
            async fn ordering_with_mixed_directions() {
                suite::ordering_with_mixed_directions(&$make().await).await;
            }

            #[tokio::test]
            async fn pagination_returns_ordered_tail() {
                suite::pagination_returns_ordered_tail(&$make().await).await;
            }

            #[tokio::test]
            async fn second_session_is_rejected() {
                suite::second_session_is_rejected(&$make().await).await;
            }

            #[tokio::test]
            async fn duplicate_uuid_is_rejected() {
                suite::duplicate_uuid_is_rejected(&$make().await).await;
            }

            #[tokio::test]
            async fn update_single_entity() {
                suite::update_single_entity(&$make().await).await;
            }

            #[tokio::test]
            async fn update_filter_naming_other_entity_matches_nothing() {
                suite::update_filter_naming_other_entity_matches_nothing(&$make().await).await;
            }

            #[tokio::test]
            async fn update_without_fields_counts_match() {
                suite::update_without_fields_counts_match(&$make().await).await;
            }

            #[tokio::test]
            async fn update_by_filter_sets_values() {
                suite::update_by_filter_sets_values(&$make().await).await;
            }

            #[tokio::test]
            async fn remove_deletes_matches() {
                suite::remove_deletes_matches(&$make().await).await;
            }

            #[tokio::test]
            async fn invalid_filter_is_rejected() {
                suite::invalid_filter_is_rejected(&$make().await).await;
            }
        }
    };
}

pub(crate) use conformance_suite;
