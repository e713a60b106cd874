//! `PostgresTaskStore` against a live database.

use super::helpers::{test_pool, unique};
use chrono::{Duration as ChronoDuration, Utc};
use eyre::{OptionExt, Result};
use futures::TryStreamExt;
use mockable::DefaultClock;
use pixelflow::task::adapters::postgres::PostgresTaskStore;
use pixelflow::task::domain::{
    OwnerId, PersistedTaskData, ResultUri, SourceUri, Task, TaskId, TaskStatus,
};
use pixelflow::task::ports::{TaskStore, TaskStoreError, TransitionOutcome};
use rstest::rstest;

fn new_task(owner: &str) -> Result<Task> {
    Ok(Task::new(
        OwnerId::new(owner)?,
        SourceUri::new("s3://bucket/a.png")?,
        &DefaultClock,
    ))
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn insert_find_and_conflict() -> Result<()> {
    let Some(pool) = test_pool()? else {
        return Ok(());
    };
    let store = PostgresTaskStore::new(pool);
    let task = new_task(&unique("owner"))?;

    store.insert(&task).await?;
    let found = store.find_by_id(task.id()).await?.ok_or_eyre("task missing")?;

    assert_eq!(found.id(), task.id());
    assert_eq!(found.status(), TaskStatus::Pending);
    assert!(matches!(
        store.insert(&task).await,
        Err(TaskStoreError::Conflict(id)) if id == task.id()
    ));
    assert!(store.find_by_id(TaskId::new()).await?.is_none());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn conditional_transition_applies_once() -> Result<()> {
    let Some(pool) = test_pool()? else {
        return Ok(());
    };
    let store = PostgresTaskStore::new(pool);
    let task = new_task(&unique("owner"))?;
    store.insert(&task).await?;

    let mut claimed = task.clone();
    claimed.begin_processing(&DefaultClock)?;
    let first = store.transition(&claimed, TaskStatus::Pending).await?;
    let second = store.transition(&claimed, TaskStatus::Pending).await?;

    assert!(matches!(first, TransitionOutcome::Applied(_)));
    let TransitionOutcome::Stale(current) = second else {
        eyre::bail!("second claim must be stale");
    };
    assert_eq!(current.status(), TaskStatus::Processing);

    let mut done = current;
    done.complete(ResultUri::new("https://cdn.test/a.jpg")?, &DefaultClock)?;
    store.transition(&done, TaskStatus::Processing).await?;
    let stored = store.find_by_id(task.id()).await?.ok_or_eyre("task missing")?;
    assert_eq!(stored.status(), TaskStatus::Completed);
    assert_eq!(
        stored.result_uri().map(ResultUri::as_str),
        Some("https://cdn.test/a.jpg")
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn update_of_unknown_task_is_not_found() -> Result<()> {
    let Some(pool) = test_pool()? else {
        return Ok(());
    };
    let store = PostgresTaskStore::new(pool);
    let ghost = new_task(&unique("owner"))?;

    assert!(matches!(
        store.update(&ghost).await,
        Err(TaskStoreError::NotFound(_))
    ));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn owner_query_returns_only_owned_tasks() -> Result<()> {
    let Some(pool) = test_pool()? else {
        return Ok(());
    };
    let store = PostgresTaskStore::new(pool);
    let owner = unique("owner");
    let other = unique("other");
    for name in [&owner, &other, &owner] {
        store.insert(&new_task(name)?).await?;
    }

    let owned: Vec<Task> = store
        .query_by_owner(&OwnerId::new(owner.clone())?)
        .try_collect()
        .await?;

    assert_eq!(owned.len(), 2);
    assert!(owned.iter().all(|task| task.owner_id().as_str() == owner));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stale_pending_tasks_are_found() -> Result<()> {
    let Some(pool) = test_pool()? else {
        return Ok(());
    };
    let store = PostgresTaskStore::new(pool);
    let stamp = Utc::now() - ChronoDuration::hours(1);
    let stranded = Task::from_persisted(PersistedTaskData {
        id: TaskId::new(),
        owner_id: OwnerId::new(unique("owner"))?,
        source_uri: SourceUri::new("s3://bucket/a.png")?,
        result_uri: None,
        status: TaskStatus::Pending,
        created_at: stamp,
        updated_at: stamp,
    });
    store.insert(&stranded).await?;

    let cutoff = Utc::now() - ChronoDuration::minutes(30);
    let found = store.find_stale_pending(cutoff, 10_000).await?;

    assert!(found.iter().any(|task| task.id() == stranded.id()));
    Ok(())
}
