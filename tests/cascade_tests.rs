mod common;

use common::seed_post;
use fluent_admin::{
    AppError, Coordinator, IdBatch, MemoryStore, ResourceKind,
    cascade::{CascadeStore, CascadeTx},
    memory::row,
};
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

fn coordinator(store: &MemoryStore) -> Coordinator {
    Coordinator::new(Arc::new(store.clone()), None)
}

fn batch(ids: &[Uuid]) -> IdBatch {
    IdBatch::new(ids.to_vec()).unwrap()
}

#[tokio::test]
async fn test_post_cascade_removes_exactly_the_aggregate() {
    let store = MemoryStore::new();
    let target = seed_post(&store, 1).await;
    let bystander = seed_post(&store, 2).await;

    let report = coordinator(&store)
        .delete_with_dependents(ResourceKind::Post, &batch(&[target.post]))
        .await
        .unwrap();

    assert_eq!(report.rows_for("posts"), 1);
    assert_eq!(report.rows_for("comments"), 2);
    assert_eq!(report.rows_for("comment_likes"), 2);
    assert_eq!(report.rows_for("post_likes"), 1);
    assert_eq!(report.rows_for("post_collections"), 1);

    // Only the other aggregate is left, with no orphans.
    for table in ["posts", "post_likes", "post_collections"] {
        let rows = store.rows(table).await;
        assert_eq!(rows.len(), 1, "{table}");
    }
    let comments = store.rows("comments").await;
    assert_eq!(comments.len(), 2);
    assert!(comments.iter().all(|c| c["post_id"] == bystander.post));
    let comment_likes = store.rows("comment_likes").await;
    assert!(
        comment_likes
            .iter()
            .all(|l| bystander.comments.contains(&l["comment_id"]))
    );
}

#[tokio::test]
async fn test_redelete_is_a_successful_no_op() {
    let store = MemoryStore::new();
    let target = seed_post(&store, 1).await;
    let coordinator = coordinator(&store);
    let ids = batch(&[target.post]);

    coordinator
        .delete_with_dependents(ResourceKind::Post, &ids)
        .await
        .unwrap();
    let after_first = store.snapshot().await;

    let again = coordinator
        .delete_with_dependents(ResourceKind::Post, &ids)
        .await
        .unwrap();

    assert!(again.steps.iter().all(|s| s.rows == 0));
    assert_eq!(store.snapshot().await, after_first);
}

#[tokio::test]
async fn test_fault_mid_cascade_rolls_back_everything() {
    let store = MemoryStore::new();
    let target = seed_post(&store, 1).await;
    seed_post(&store, 2).await;
    let before = store.snapshot().await;

    // comment_likes and post_likes succeed inside the transaction before this fails.
    store.fail_on_step("comments");
    let err = coordinator(&store)
        .delete_with_dependents(ResourceKind::Post, &batch(&[target.post]))
        .await
        .unwrap_err();

    match err {
        AppError::Transaction { step, .. } => assert_eq!(step, "comments"),
        other => panic!("expected a transaction error, got {other:?}"),
    }
    assert_eq!(store.snapshot().await, before);
}

#[tokio::test]
async fn test_deadline_aborts_and_rolls_back() {
    let store = MemoryStore::new();
    let target = seed_post(&store, 1).await;
    let before = store.snapshot().await;

    store.delay_steps(Duration::from_millis(50));
    let coordinator = Coordinator::new(Arc::new(store.clone()), Some(Duration::from_millis(120)));
    let err = coordinator
        .delete_with_dependents(ResourceKind::Post, &batch(&[target.post]))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Transaction { .. }));
    store.clear_faults();
    assert_eq!(store.snapshot().await, before);
}

#[tokio::test]
async fn test_room_cascade_removes_members_first() {
    let store = MemoryStore::new();
    let room = Uuid::from_u128(10);
    let other_room = Uuid::from_u128(11);
    store.insert("practice_rooms", row(&[("id", room)])).await;
    store.insert("practice_rooms", row(&[("id", other_room)])).await;
    for (n, r) in [(20, room), (21, room), (22, other_room)] {
        store
            .insert(
                "practice_room_members",
                row(&[("id", Uuid::from_u128(n)), ("room_id", r)]),
            )
            .await;
    }

    let report = coordinator(&store)
        .delete_with_dependents(ResourceKind::Room, &batch(&[room]))
        .await
        .unwrap();

    let names: Vec<_> = report.steps.iter().map(|s| s.step.as_str()).collect();
    assert_eq!(names, ["practice_room_members", "practice_rooms"]);
    assert_eq!(report.rows_for("practice_room_members"), 2);
    assert_eq!(store.count("practice_room_members").await, 1);
    assert_eq!(store.count("practice_rooms").await, 1);
}

#[tokio::test]
async fn test_comment_cascade_keeps_the_post() {
    let store = MemoryStore::new();
    let fixture = seed_post(&store, 1).await;

    coordinator(&store)
        .delete_with_dependents(ResourceKind::Comment, &batch(&[fixture.comments[0]]))
        .await
        .unwrap();

    assert_eq!(store.count("posts").await, 1);
    assert_eq!(store.count("comments").await, 1);
    let likes = store.rows("comment_likes").await;
    assert_eq!(likes.len(), 1);
    assert_eq!(likes[0]["comment_id"], fixture.comments[1]);
}

#[tokio::test]
async fn test_multi_id_batch_is_one_transaction() {
    let store = MemoryStore::new();
    let a = seed_post(&store, 1).await;
    let b = seed_post(&store, 2).await;

    coordinator(&store)
        .delete_with_dependents(ResourceKind::Post, &batch(&[a.post, b.post]))
        .await
        .unwrap();

    assert_eq!(store.transactions_begun(), 1);
    assert!(store.snapshot().await.values().all(Vec::is_empty));
}

#[tokio::test]
async fn test_leaf_resources_delete_by_id() {
    let store = MemoryStore::new();
    let fixture = seed_post(&store, 1).await;

    coordinator(&store)
        .delete_with_dependents(ResourceKind::PostLike, &batch(&[fixture.post_like]))
        .await
        .unwrap();
    coordinator(&store)
        .delete_with_dependents(ResourceKind::PostCollection, &batch(&[fixture.collection]))
        .await
        .unwrap();

    assert_eq!(store.count("post_likes").await, 0);
    assert_eq!(store.count("post_collections").await, 0);
    assert_eq!(store.count("posts").await, 1);
}

#[tokio::test]
async fn test_parent_before_child_order_is_refused() {
    let store = MemoryStore::new();
    let target = seed_post(&store, 1).await;
    let before = store.snapshot().await;

    let mut tx = store.begin().await.unwrap();
    let mut failed_at = None;
    for step in ResourceKind::Post.plan().iter().rev() {
        if let Err(e) = tx.delete(step, &[target.post]).await {
            assert!(matches!(e, AppError::Conflict(_)));
            failed_at = Some(step.name);
            break;
        }
    }
    tx.rollback().await.unwrap();

    assert_eq!(failed_at, Some("posts"));
    assert_eq!(store.snapshot().await, before);
}
