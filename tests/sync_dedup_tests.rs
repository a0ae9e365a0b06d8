//! Bulk synchronization from the calendar provider and the recurring-event dedup sweep.

mod test_utils;

use chrono::{DateTime, Duration, Utc};
use notetaker::models::event::{self, ParticipantList};
use notetaker::models::recording::RecordingStatus;
use notetaker::models::{Event, Recording};
use notetaker::repositories::RecordingRepository;
use notetaker::sync::SyncWindow;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use test_utils::*;
use uuid::Uuid;

fn at(hours: i64) -> DateTime<Utc> {
    DateTime::from_timestamp((Utc::now() + Duration::hours(hours)).timestamp(), 0).unwrap()
}

#[tokio::test]
async fn sync_upserts_valid_events_and_counts_rejects() {
    let mut missing_uid = provider_event("evt-bad", at(4), 1_000);
    missing_uid.as_object_mut().unwrap().remove("ical_uid");

    let engine = TestEngine::with_config(
        Default::default(),
        vec![
            provider_event("evt-1", at(2), 1_000),
            series_master("standup", at(1), 1_000),
            series_instance("standup_1", "standup", at(25), 1_000),
            series_instance("standup_2", "standup", at(49), 1_000),
            missing_uid,
        ],
    )
    .await
    .unwrap();
    let grant = seed_grant(engine.db(), "grant-1").await.unwrap();
    let window = SyncWindow::from_today(Utc::now(), 14);

    let report = engine.state.synchronizer.sync(grant.user_id, window).await.unwrap();
    assert_eq!(report.upserted, 4);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.errors, 1);

    let instances = Event::find()
        .filter(event::Column::MasterEventId.eq("standup"))
        .all(engine.db())
        .await
        .unwrap();
    assert_eq!(instances.len(), 2);
    assert!(instances.iter().all(|e| e.calendar_uid.starts_with("standup@calendar#")));

    let rerun = engine.state.synchronizer.sync(grant.user_id, window).await.unwrap();
    assert_eq!(rerun.upserted, 0);
    assert_eq!(rerun.skipped, 4);

    assert_eq!(engine.notetaker.create_calls(), 0, "bulk sync never dispatches");
    assert_eq!(engine.calendar.lookup_calls(), 0, "listed masters are not fetched again");
}

#[tokio::test]
async fn sync_fetches_masters_left_out_of_expanded_listings() {
    let engine = TestEngine::with_config(
        Default::default(),
        vec![
            series_instance("standup_1", "standup", at(25), 1_000),
            series_instance("standup_2", "standup", at(49), 1_000),
        ],
    )
    .await
    .unwrap();
    engine.calendar.add_upstream(series_master("standup", at(1), 1_000));
    let grant = seed_grant(engine.db(), "grant-1").await.unwrap();
    let window = SyncWindow::from_today(Utc::now(), 14);

    let report = engine.state.synchronizer.sync(grant.user_id, window).await.unwrap();
    assert_eq!(report.upserted, 3);
    assert_eq!(report.errors, 0);
    assert_eq!(engine.calendar.lookup_calls(), 1);

    let occurrence = Event::find()
        .filter(event::Column::ProviderEventId.eq("standup_1"))
        .one(engine.db())
        .await
        .unwrap()
        .unwrap();
    let rec = RecordingRepository::new(engine.db().clone())
        .insert_waiting(grant.user_id, occurrence.id, "nt-standup", None)
        .await
        .unwrap();

    let report = engine.state.dedup_sweeper().sweep(None).await.unwrap();
    assert_eq!(report.orphans_removed, 0);
    assert_eq!(report.errors, 0);
    assert_eq!(Event::find().all(engine.db()).await.unwrap().len(), 3);

    let rec = Recording::find_by_id(rec.id).one(engine.db()).await.unwrap().unwrap();
    assert_eq!(rec.status, RecordingStatus::Waiting);
    assert_eq!(engine.notetaker.cancel_calls(), 0);

    let rerun = engine.state.synchronizer.sync(grant.user_id, window).await.unwrap();
    assert_eq!(rerun.skipped, 2);
    assert_eq!(rerun.upserted, 0);
    assert_eq!(engine.calendar.lookup_calls(), 1, "stored masters are not fetched again");
}

#[tokio::test]
async fn sync_requires_an_active_grant() {
    let engine = TestEngine::new().await.unwrap();
    let window = SyncWindow::from_today(Utc::now(), 7);

    let result = engine.state.synchronizer.sync(Uuid::new_v4(), window).await;
    assert!(result.is_err());
    assert_eq!(
        engine.calendar.calls.load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

async fn insert_event(
    engine: &TestEngine,
    user_id: Uuid,
    provider_id: &str,
    uid: &str,
    master: Option<&str>,
    last_updated: i64,
) -> event::Model {
    let now = Utc::now().fixed_offset();
    event::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        provider_event_id: Set(provider_id.to_string()),
        calendar_uid: Set(uid.to_string()),
        title: Set("Planning".to_string()),
        description: Set(None),
        location: Set(None),
        start_time: Set(at(3).fixed_offset()),
        end_time: Set(at(4).fixed_offset()),
        conference_url: Set(Some("https://meet.example.com/abc".to_string())),
        organizer: Set(None),
        participants: Set(ParticipantList::default()),
        master_event_id: Set(master.map(str::to_string)),
        original_start_time: Set(None),
        recurrence: Set(None),
        last_updated: Set(last_updated),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(engine.db())
    .await
    .unwrap()
}

#[tokio::test]
async fn dedup_keeps_the_greater_watermark() {
    let engine = TestEngine::new().await.unwrap();
    let grant = seed_grant(engine.db(), "grant-1").await.unwrap();
    let older = insert_event(&engine, grant.user_id, "evt-old", "shared@cal", None, 100).await;
    let newer = insert_event(&engine, grant.user_id, "evt-new", "shared@cal", None, 200).await;

    let recordings = RecordingRepository::new(engine.db().clone());
    let moved = recordings
        .insert_waiting(grant.user_id, older.id, "nt-old", None)
        .await
        .unwrap();

    let report = engine.state.dedup_sweeper().sweep(Some(grant.user_id)).await.unwrap();
    assert_eq!(report.duplicates_removed, 1);
    assert_eq!(report.errors, 0);

    let remaining = Event::find().all(engine.db()).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, newer.id);
    assert_eq!(remaining[0].last_updated, 200);

    let moved = Recording::find_by_id(moved.id).one(engine.db()).await.unwrap().unwrap();
    assert_eq!(moved.event_id, Some(newer.id));
    assert_eq!(moved.status, RecordingStatus::Waiting);

    let rerun = engine.state.dedup_sweeper().sweep(Some(grant.user_id)).await.unwrap();
    assert_eq!(rerun.duplicates_removed, 0);
}

#[tokio::test]
async fn dedup_removes_orphaned_instances() {
    let engine = TestEngine::new().await.unwrap();
    let grant = seed_grant(engine.db(), "grant-1").await.unwrap();
    let orphan = insert_event(&engine, grant.user_id, "gone_1", "gone@cal#1", Some("gone"), 100).await;
    let standalone = insert_event(&engine, grant.user_id, "solo", "solo@cal", None, 100).await;
    let rec = RecordingRepository::new(engine.db().clone())
        .insert_waiting(grant.user_id, orphan.id, "nt-orphan", None)
        .await
        .unwrap();

    let report = engine.state.dedup_sweeper().sweep(None).await.unwrap();
    assert_eq!(report.orphans_removed, 1);

    let remaining = Event::find().all(engine.db()).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, standalone.id);

    let rec = Recording::find_by_id(rec.id).one(engine.db()).await.unwrap().unwrap();
    assert_eq!(rec.status, RecordingStatus::Cancelled);
    assert_eq!(engine.notetaker.cancelled.lock().unwrap().as_slice(), ["nt-orphan"]);
}

#[tokio::test]
async fn dedup_restores_masters_that_still_exist_upstream() {
    let engine = TestEngine::new().await.unwrap();
    let grant = seed_grant(engine.db(), "grant-1").await.unwrap();
    engine.calendar.add_upstream(series_master("weekly", at(1), 1_000));
    let instance = insert_event(&engine, grant.user_id, "weekly_1", "weekly@cal#1", Some("weekly"), 100).await;

    let report = engine.state.dedup_sweeper().sweep(None).await.unwrap();
    assert_eq!(report.orphans_removed, 0);
    assert_eq!(report.masters_restored, 1);

    let master = Event::find()
        .filter(event::Column::ProviderEventId.eq("weekly"))
        .one(engine.db())
        .await
        .unwrap()
        .unwrap();
    assert!(master.is_master());
    assert!(Event::find_by_id(instance.id).one(engine.db()).await.unwrap().is_some());

    let rerun = engine.state.dedup_sweeper().sweep(None).await.unwrap();
    assert_eq!(rerun, Default::default());
    assert_eq!(engine.calendar.lookup_calls(), 1);
}

#[tokio::test]
async fn dedup_keeps_instances_it_cannot_confirm() {
    let engine = TestEngine::new().await.unwrap();
    // No grant, so the provider cannot be asked about the series.
    let user_id = Uuid::new_v4();
    let first = insert_event(&engine, user_id, "daily_1", "daily@cal#1", Some("daily"), 100).await;
    insert_event(&engine, user_id, "daily_2", "daily@cal#2", Some("daily"), 100).await;

    let report = engine.state.dedup_sweeper().sweep(Some(user_id)).await.unwrap();
    assert_eq!(report.orphans_removed, 0);
    assert_eq!(report.errors, 1);
    assert!(Event::find_by_id(first.id).one(engine.db()).await.unwrap().is_some());
    assert_eq!(engine.calendar.lookup_calls(), 0);
}
