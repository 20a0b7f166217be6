mod common;

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use common::{acquire_db_lock, postgres_store, start_time};
use hotdog_pipeline::clock::{Clock, ManualClock};
use hotdog_pipeline::error::StoreError;
use hotdog_pipeline::hashing::{content_hash, similarity_key, HashInput};
use hotdog_pipeline::models::{
    AlertType, AlertWrite, ContentType, NewContent, NewPostedContent, NewSlot, Platform, Severity,
};
use hotdog_pipeline::store::{AlertStore, ContentFilter, ContentStore, ScheduleStore};
use serde_json::json;

fn new_content(text: &str, url: &str, approved: bool) -> NewContent {
    let input = HashInput {
        platform: Platform::Reddit,
        text: Some(text),
        image_url: None,
        video_url: None,
        original_url: url,
        author: None,
    };
    NewContent {
        content_hash: content_hash(&input),
        similarity_key: similarity_key(&input),
        text: Some(text.to_string()),
        image_url: None,
        video_url: None,
        content_type: ContentType::Text,
        source_platform: Platform::Reddit,
        original_url: url.to_string(),
        original_author: None,
        scraped_at: start_time(),
        is_approved: approved,
        is_rejected: false,
        confidence_score: 0.9,
        rejection_reason: None,
        admin_notes: None,
        flagged_patterns: vec!["no_keyword".to_string()],
        engagement: Some(12.0),
    }
}

#[tokio::test]
async fn postgres_store_enforces_content_invariants() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let clock = ManualClock::new(start_time());
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let Some((store, _pool)) = postgres_store(shared).await? else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return Ok(());
    };

    let item = store
        .create(new_content("Classic hotdog", "https://reddit.com/a", true))
        .await?;
    assert_eq!(item.flagged_patterns, vec!["no_keyword"]);

    let err = store
        .create(new_content("Classic hotdog", "https://reddit.com/a", true))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { .. }));

    let prefixed = store.find_by_text_prefix("classic", 5).await?;
    assert_eq!(prefixed.len(), 1);
    assert_eq!(
        store.find_by_url("https://reddit.com/a").await?.map(|found| found.id),
        Some(item.id)
    );

    store.mark_posted(item.id, start_time()).await?;
    store
        .record_post(NewPostedContent {
            content_queue_id: item.id,
            scheduled_time: "lunch".into(),
            posted_at: start_time(),
        })
        .await?;
    let err = store
        .record_post(NewPostedContent {
            content_queue_id: item.id,
            scheduled_time: "dinner".into(),
            posted_at: start_time(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(
        store.delete(item.id).await.unwrap_err(),
        StoreError::PostedImmutable(item.id)
    );
    assert!(store
        .list_approved_unposted(&ContentFilter::default(), 10)
        .await?
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn postgres_slots_and_alerts_are_idempotent() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let clock = ManualClock::new(start_time());
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let Some((store, _pool)) = postgres_store(shared).await? else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return Ok(());
    };

    let first = store
        .create(new_content("First hotdog", "https://reddit.com/1", true))
        .await?;
    let second = store
        .create(new_content("Second hotdog", "https://reddit.com/2", true))
        .await?;

    let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
    let slot = |content_id: Option<i64>| NewSlot {
        slot_index: 0,
        meal: "breakfast".into(),
        scheduled_post_time: start_time(),
        content_id,
        reasoning: None,
    };

    let created = store.upsert_slots(day, &[slot(None)]).await?;
    assert_eq!(created.created, vec![0]);
    assert!(created.filled.is_empty());

    let filled = store.upsert_slots(day, &[slot(Some(first.id))]).await?;
    assert!(filled.created.is_empty());
    assert_eq!(filled.filled, vec![(0, first.id)]);

    let untouched = store.upsert_slots(day, &[slot(Some(second.id))]).await?;
    assert!(untouched.filled.is_empty());
    let slots = store.get_slots(day).await?;
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].content_id, Some(first.id));

    // Posting records whatever actually went out, even over a reservation.
    store
        .mark_slot_posted(day, 0, second.id, start_time(), Some("replaced".into()))
        .await?;
    let slots = store.get_slots(day).await?;
    assert_eq!(slots[0].content_id, Some(second.id));
    assert_eq!(slots[0].actual_posted_at, Some(start_time()));
    assert_eq!(slots[0].reasoning.as_deref(), Some("replaced"));

    let (alert, write) = store
        .upsert(
            AlertType::EmptyQueue,
            "No approved content left to post",
            Severity::Critical,
            json!({ "total_approved": 0 }),
            start_time(),
        )
        .await?;
    assert_eq!(write, AlertWrite::Created);

    let later = start_time() + Duration::minutes(30);
    let (refreshed, write) = store
        .upsert(
            AlertType::EmptyQueue,
            "No approved content left to post",
            Severity::Critical,
            json!({ "total_approved": 0 }),
            later,
        )
        .await?;
    assert_eq!(write, AlertWrite::Refreshed);
    assert_eq!(refreshed.id, alert.id);
    assert_eq!(refreshed.created_at, later);
    assert_eq!(store.list_unacknowledged().await?.len(), 1);
    Ok(())
}
