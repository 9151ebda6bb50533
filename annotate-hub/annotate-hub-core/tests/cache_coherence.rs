mod common;

use annotate_hub_core::cache::{self, CacheStore};
use annotate_hub_core::error::{AccessError, AccessResult};
use annotate_hub_core::model::{MemberStatus, SortOrder};
use annotate_hub_core::Role;
use async_trait::async_trait;
use common::Harness;
use std::sync::Arc;
use std::time::Duration;

/// Cache backend that is permanently down.
struct UnreachableCache;

#[async_trait]
impl CacheStore for UnreachableCache {
    async fn get(&self, _key: &str) -> AccessResult<Option<String>> {
        Err(AccessError::transient("connection refused"))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> AccessResult<()> {
        Err(AccessError::transient("connection refused"))
    }

    async fn delete(&self, _key: &str) -> AccessResult<()> {
        Err(AccessError::transient("connection refused"))
    }
}

#[tokio::test]
async fn cached_role_follows_change_role() {
    let h = Harness::new().await;
    let member = h.register("member@x.com").await;
    let roles = &h.service.roles;
    roles
        .change_role(h.document.id, &h.owner, "member@x.com", Role::Viewer)
        .await
        .unwrap();

    assert_eq!(roles.my_role(h.document.id, &member).await.unwrap(), Role::Viewer);
    let key = cache::role_key(h.document.id, "member@x.com");
    assert!(h.cache_store.contains(&key));

    roles
        .change_role(h.document.id, &h.owner, "member@x.com", Role::Editor)
        .await
        .unwrap();
    assert!(!h.cache_store.contains(&key));
    assert_eq!(roles.my_role(h.document.id, &member).await.unwrap(), Role::Editor);

    roles
        .change_role(h.document.id, &h.owner, "member@x.com", Role::None)
        .await
        .unwrap();
    assert_eq!(roles.my_role(h.document.id, &member).await.unwrap(), Role::None);
}

#[tokio::test]
async fn user_list_reflects_invites_and_role_changes() {
    let h = Harness::new().await;
    h.register("known@x.com").await;
    let files = &h.service.files;

    let users = files.list_users(h.document.id, &h.owner).await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].role, Role::Owner);
    assert!(h.cache_store.contains(&cache::users_key(h.document.id)));

    h.service
        .invites
        .invite(
            h.document.id,
            &h.owner,
            &["known@x.com".to_string(), "pending@x.com".to_string()],
            Role::Editor,
        )
        .await
        .unwrap();
    let users = files.list_users(h.document.id, &h.owner).await.unwrap();
    let statuses: Vec<(&str, Role, MemberStatus)> = users
        .iter()
        .map(|u| (u.email.as_str(), u.role, u.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("owner@x.com", Role::Owner, MemberStatus::Active),
            ("known@x.com", Role::Editor, MemberStatus::Active),
            ("pending@x.com", Role::Editor, MemberStatus::Pending),
        ]
    );

    h.service
        .roles
        .change_role(h.document.id, &h.owner, "known@x.com", Role::None)
        .await
        .unwrap();
    let users = files.list_users(h.document.id, &h.owner).await.unwrap();
    assert!(users.iter().all(|u| u.email != "known@x.com"));
}

#[tokio::test]
async fn listings_follow_membership() {
    let h = Harness::new().await;
    let member = h.register("member@x.com").await;
    let files = &h.service.files;

    let empty = files.list_files(&member, 1, SortOrder::Newest).await.unwrap();
    assert_eq!(empty.total, 0);
    assert!(h
        .cache_store
        .contains(&cache::listing_key(member.id, 1, SortOrder::Newest)));

    h.service
        .invites
        .invite(h.document.id, &h.owner, &["member@x.com".to_string()], Role::Viewer)
        .await
        .unwrap();
    let page = files.list_files(&member, 1, SortOrder::Newest).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].role, Role::Viewer);

    h.service
        .files
        .rename_document(h.document.id, &h.owner, "signed.pdf")
        .await
        .unwrap();
    let page = files.list_files(&member, 1, SortOrder::Oldest).await.unwrap();
    assert_eq!(page.items[0].name, "signed.pdf");
    let page = files.list_files(&member, 1, SortOrder::Newest).await.unwrap();
    assert_eq!(page.items[0].name, "signed.pdf");
}

#[tokio::test]
async fn listing_pages_are_sorted_and_bounded() {
    let config = annotate_hub_core::config::HubConfig {
        page_size: 2,
        ..Default::default()
    };
    let h = Harness::with_config(config).await;
    for name in ["b.pdf", "c.pdf", "d.pdf"] {
        // distinct update times
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.service
            .files
            .create_document(&h.owner, name, b"x")
            .await
            .unwrap();
    }
    let files = &h.service.files;

    let first = files.list_files(&h.owner, 1, SortOrder::Oldest).await.unwrap();
    assert_eq!(first.total, 4);
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].name, "contract.pdf");
    assert!(first.items.iter().all(|i| i.role == Role::Owner));

    let newest = files.list_files(&h.owner, 1, SortOrder::Newest).await.unwrap();
    assert_eq!(newest.items[0].name, "d.pdf");

    let past_cache = files.list_files(&h.owner, 6, SortOrder::Newest).await.unwrap();
    assert!(past_cache.items.is_empty());
    assert!(!h
        .cache_store
        .contains(&cache::listing_key(h.owner.id, 6, SortOrder::Newest)));

    assert!(matches!(
        files.list_files(&h.owner, 0, SortOrder::Newest).await,
        Err(AccessError::Validation(_))
    ));
}

#[tokio::test]
async fn link_list_is_invalidated_by_every_link_mutation() {
    let h = Harness::new().await;
    let links = &h.service.links;
    assert!(links.list_links(h.document.id, &h.owner).await.unwrap().is_empty());

    let link = links
        .create_or_get_link(h.document.id, &h.owner, Role::Viewer, None)
        .await
        .unwrap();
    assert_eq!(links.list_links(h.document.id, &h.owner).await.unwrap(), vec![link.clone()]);

    links.toggle_feature(h.document.id, &h.owner, false).await.unwrap();
    let listed = links.list_links(h.document.id, &h.owner).await.unwrap();
    assert!(!listed[0].enabled);

    links.delete_link(link.id, &h.owner).await.unwrap();
    assert!(links.list_links(h.document.id, &h.owner).await.unwrap().is_empty());
}

#[tokio::test]
async fn annotation_cache_never_serves_a_stale_version() {
    let h = Harness::new().await;
    let annotations = &h.service.annotations;
    annotations.read(h.document.id, &h.owner).await.unwrap();
    assert!(h.cache_store.contains(&cache::annotations_key(h.document.id)));

    annotations.write(h.document.id, &h.owner, "v1", 0).await.unwrap();
    assert!(!h.cache_store.contains(&cache::annotations_key(h.document.id)));
    assert_eq!(annotations.read(h.document.id, &h.owner).await.unwrap().version, 1);
}

#[tokio::test]
async fn everything_works_without_a_cache() {
    let h = Harness::with_cache_store(Arc::new(UnreachableCache)).await;
    let member = h.register("member@x.com").await;

    h.service
        .invites
        .invite(h.document.id, &h.owner, &["member@x.com".to_string()], Role::Editor)
        .await
        .unwrap();
    assert_eq!(
        h.service.resolve_role(h.document.id, &member).await.unwrap(),
        Role::Editor
    );
    assert_eq!(
        h.service
            .files
            .list_files(&member, 1, SortOrder::Newest)
            .await
            .unwrap()
            .total,
        1
    );
    h.service
        .roles
        .change_role(h.document.id, &h.owner, "member@x.com", Role::Viewer)
        .await
        .unwrap();
    assert_eq!(
        h.service.resolve_role(h.document.id, &member).await.unwrap(),
        Role::Viewer
    );

    let link = h
        .service
        .links
        .create_or_get_link(h.document.id, &h.owner, Role::Viewer, None)
        .await
        .unwrap();
    assert!(h.service.links.resolve_by_token(&link.token).await.is_ok());
    assert_eq!(
        h.service
            .annotations
            .write(h.document.id, &h.owner, "x", 0)
            .await
            .unwrap(),
        1
    );
    assert!(h.service.cache().metrics().errors() > 0);
}
