mod common;

use anyhow::Result;
use chrono::Duration;
use common::{raw, start_time, test_config, TestPipeline};
use hotdog_pipeline::config::PipelineConfig;
use hotdog_pipeline::models::{AlertType, AlertWrite, ContentStatus, Platform, Severity};
use hotdog_pipeline::store::{AlertStore, ContentStore};

#[tokio::test]
async fn tiers_approve_by_confidence_then_by_age() -> Result<()> {
    let app = TestPipeline::new();
    let strong = app
        .seed(Platform::Reddit, "Chili dog with onions", None, 0.85, false)
        .await?;
    let weak = app
        .seed(Platform::Reddit, "Maybe a hotdog", None, 0.55, false)
        .await?;

    app.advance_hours(1);
    let report = app.pipeline.approver.run().await?;
    assert!(!report.skipped);
    assert_eq!(report.tiers[0].approved, 1);
    assert_eq!(report.total_approved, 1);

    let strong = app.store.get(strong.id).await?.expect("item exists");
    assert!(strong.is_approved);
    assert!(strong
        .admin_notes
        .as_deref()
        .is_some_and(|notes| notes.starts_with("Progressive approval tier 1")));
    assert!(!app.store.get(weak.id).await?.expect("item exists").is_approved);

    app.advance_hours(47);
    let report = app.pipeline.approver.run().await?;
    assert_eq!(report.tiers[2].approved, 1);
    assert_eq!(report.total_approved, 1);
    assert!(app.store.get(weak.id).await?.expect("item exists").is_approved);
    Ok(())
}

#[tokio::test]
async fn full_buffer_skips_approval() -> Result<()> {
    let config = PipelineConfig {
        target_buffer_days: 0.1,
        ..test_config()
    };
    let app = TestPipeline::with_config(config);
    app.seed(Platform::Reddit, "Approved hotdog", None, 0.9, true)
        .await?;
    let pending = app
        .seed(Platform::Reddit, "Pending chili dog", None, 0.95, false)
        .await?;

    let report = app.pipeline.approver.run().await?;
    assert!(report.skipped);
    assert_eq!(report.total_approved, 0);
    assert!(!app.store.get(pending.id).await?.expect("item exists").is_approved);
    Ok(())
}

#[tokio::test]
async fn platform_balance_is_capped_per_platform() -> Result<()> {
    let mut config = test_config();
    config.approval_tiers.clear();
    config.platform_balance.per_platform_cap = 2;
    let app = TestPipeline::with_config(config);
    for text in ["Frank one", "Frank two", "Frank three"] {
        app.seed(Platform::Reddit, text, None, 0.55, false).await?;
    }
    app.seed(Platform::Imgur, "Frank four", None, 0.55, false)
        .await?;

    app.advance_hours(49);
    let report = app.pipeline.approver.run().await?;
    assert_eq!(report.platform_balance, 3);

    let pending = app
        .store
        .list_by_status(ContentStatus::Pending, 10, 0)
        .await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].source_platform, Platform::Reddit);
    Ok(())
}

#[tokio::test]
async fn repeated_alerts_within_an_hour_are_refreshed() -> Result<()> {
    let app = TestPipeline::new();

    let first = app.pipeline.monitor.check().await?;
    assert!(!first.is_healthy);
    assert!(first.fired(AlertType::EmptyQueue));
    assert_eq!(first.alerts[0].write, AlertWrite::Created);
    assert_eq!(first.alerts[0].alert.severity, Severity::Critical);

    app.clock.advance(Duration::minutes(10));
    let second = app.pipeline.monitor.check().await?;
    assert_eq!(second.alerts[0].write, AlertWrite::Refreshed);

    let alerts = app.store.list_unacknowledged().await?;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].created_at, start_time() + Duration::minutes(10));

    app.store
        .acknowledge(alerts[0].id, start_time() + Duration::minutes(11))
        .await?;
    let third = app.pipeline.monitor.check().await?;
    assert_eq!(third.alerts[0].write, AlertWrite::Created);
    assert_eq!(app.store.alert_count().await, 2);
    Ok(())
}

#[tokio::test]
async fn alert_severity_follows_queue_depth() -> Result<()> {
    let app = TestPipeline::new();
    for index in 0..2 {
        app.seed(Platform::Reddit, &format!("Approved hotdog {index}"), None, 0.9, true)
            .await?;
    }
    let health = app.pipeline.monitor.check().await?;
    assert!(health.fired(AlertType::LowQueue));
    assert_eq!(health.alerts[0].alert.severity, Severity::Critical);

    for index in 2..5 {
        app.seed(Platform::Reddit, &format!("Approved hotdog {index}"), None, 0.9, true)
            .await?;
    }
    for index in 0..51 {
        app.seed(Platform::Lemmy, &format!("Pending hotdog {index}"), None, 0.6, false)
            .await?;
    }
    let health = app.pipeline.monitor.check().await?;
    assert_eq!(health.total_approved, 5);
    assert_eq!(health.total_pending, 51);
    assert_eq!(health.alerts.len(), 2);
    assert_eq!(health.alerts[0].alert.alert_type, AlertType::LowQueue);
    assert_eq!(health.alerts[0].alert.severity, Severity::Medium);
    assert_eq!(health.alerts[1].alert.alert_type, AlertType::HighPending);
    assert_eq!(health.alerts[1].alert.severity, Severity::Low);
    assert!(!health.is_healthy);
    Ok(())
}

#[tokio::test]
async fn daily_tick_recovers_an_empty_queue() -> Result<()> {
    let app = TestPipeline::new();
    let today = app.pipeline.today();
    let bare = app.pipeline.materializer.materialize_day(today).await?;
    assert_eq!(bare.rows_empty, 6);

    app.scanner(Platform::Reddit)
        .respond(
            "hotdog",
            vec![
                raw(
                    "Two hotdogs with mustard at the game tonight, plus a chili dog",
                    Some("https://i.redd.it/game.jpg"),
                    "https://reddit.com/r/hotdogs/game",
                ),
                raw(
                    "Classic frankfurter with sauerkraut and a bratwurst on the side",
                    Some("https://i.redd.it/brat.jpg"),
                    "https://reddit.com/r/hotdogs/brat",
                ),
            ],
        )
        .await;

    let report = app.pipeline.run_daily().await?;

    assert!(report.health.fired(AlertType::EmptyQueue));
    let scanned: Vec<Platform> = report
        .emergency_scans
        .iter()
        .map(|scan| scan.platform)
        .collect();
    assert_eq!(scanned, vec![Platform::Reddit, Platform::Instagram]);
    let reddit = report.emergency_scans[0]
        .result
        .as_ref()
        .expect("reddit scan succeeded");
    assert_eq!(reddit.posts_found, 2);
    assert_eq!(reddit.posts_approved, 0);

    assert_eq!(report.approval.tiers[0].approved, 2);

    let today_schedule = &report.schedules[0];
    assert_eq!(today_schedule.day, today);
    assert_eq!(today_schedule.rows_created, 0);
    assert_eq!(today_schedule.rows_filled, 2);
    assert_eq!(today_schedule.rows_empty, 4);

    let tomorrow = &report.schedules[1];
    assert_eq!(tomorrow.rows_created, 6);
    assert_eq!(tomorrow.rows_empty, 6);

    assert_eq!(report.queue_after.total_approved, 2);
    Ok(())
}
