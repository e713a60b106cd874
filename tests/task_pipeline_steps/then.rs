//! Then steps for task pipeline BDD scenarios.

use super::world::{PipelineWorld, eventually, run_async};
use crate::pipeline::{TOKEN_U1, TOKEN_U2, TOPIC, get};
use pixelflow::task::domain::TaskStatus;
use pixelflow::task::ports::TaskStore;
use rstest_bdd_macros::then;
use serde_json::Value;

#[then("the response status is {status:u16}")]
fn response_status_is(world: &PipelineWorld, status: u16) -> Result<(), eyre::Report> {
    let reply = world.reply()?;
    eyre::ensure!(
        reply.status.as_u16() == status,
        "expected status {status}, got {} with body {}",
        reply.status,
        reply.body
    );
    Ok(())
}

#[then(r#"the returned task is "{status}""#)]
fn returned_task_is(world: &PipelineWorld, status: String) -> Result<(), eyre::Report> {
    let reply = world.reply()?;
    eyre::ensure!(
        reply.body.get("status").and_then(Value::as_str) == Some(status.as_str()),
        "expected returned status {status}, got {}",
        reply.body
    );
    Ok(())
}

#[then(r#"listing for user "{user}" eventually shows the task "{status}" with a result"#)]
fn listing_eventually_shows(
    world: &PipelineWorld,
    user: String,
    status: String,
) -> Result<(), eyre::Report> {
    let token = match user.as_str() {
        "u1" => TOKEN_U1,
        "u2" => TOKEN_U2,
        other => return Err(eyre::eyre!("no token configured for user {other}")),
    };
    let task_id = world
        .submitted
        .last()
        .ok_or_else(|| eyre::eyre!("no task submitted in scenario"))?
        .to_string();
    eventually(|| {
        let reply = run_async(world.gateway.send(get("/api/tasks", Some(token))?))?;
        let tasks = reply.body.as_array().cloned().unwrap_or_default();
        Ok(tasks.iter().any(|task| {
            task.get("id").and_then(Value::as_str) == Some(task_id.as_str())
                && task.get("status").and_then(Value::as_str) == Some(status.as_str())
                && task
                    .get("result_uri")
                    .and_then(Value::as_str)
                    .is_some_and(|uri| !uri.is_empty())
        }))
    })
}

#[then("no task is stored")]
fn no_task_is_stored(world: &PipelineWorld) -> Result<(), eyre::Report> {
    eyre::ensure!(world.gateway.store.is_empty()?, "a task was stored");
    Ok(())
}

#[then("no event is published")]
fn no_event_is_published(world: &PipelineWorld) -> Result<(), eyre::Report> {
    eyre::ensure!(
        world.gateway.broker.published_events(TOPIC)?.is_empty(),
        "an event was published"
    );
    Ok(())
}

#[then("the unknown task was not created")]
fn unknown_task_not_created(world: &PipelineWorld) -> Result<(), eyre::Report> {
    let orphan = world
        .orphan
        .ok_or_else(|| eyre::eyre!("no unknown event published in scenario"))?;
    let found = run_async(world.gateway.store.find_by_id(orphan))?;
    eyre::ensure!(found.is_none(), "unknown task appeared in the store");
    Ok(())
}

#[then("the worker eventually reports {count:u64} skipped delivery")]
fn worker_reports_skipped(world: &PipelineWorld, count: u64) -> Result<(), eyre::Report> {
    eventually(|| Ok(world.gateway.metrics.snapshot().processed_skipped == count))
}

#[then(r#"every submitted task eventually reaches "{status}""#)]
fn every_task_reaches(world: &PipelineWorld, status: String) -> Result<(), eyre::Report> {
    let expected = TaskStatus::try_from(status.as_str())
        .map_err(|err| eyre::eyre!("invalid expected status in scenario: {err}"))?;
    eyre::ensure!(!world.submitted.is_empty(), "no task submitted in scenario");
    eventually(|| {
        for task_id in &world.submitted {
            let stored = run_async(world.gateway.store.find_by_id(*task_id))?;
            if stored.map(|task| task.status()) != Some(expected) {
                return Ok(false);
            }
        }
        Ok(true)
    })
}

#[then("each task was processed exactly once")]
fn each_task_processed_once(world: &PipelineWorld) -> Result<(), eyre::Report> {
    let calls = world.processor.calls();
    for task_id in &world.submitted {
        let count = calls.get(task_id).copied().unwrap_or_default();
        eyre::ensure!(count == 1, "task {task_id} processed {count} times");
    }
    let submitted = u64::try_from(world.submitted.len())?;
    eyre::ensure!(
        world.gateway.metrics.snapshot().processed_completed == submitted,
        "completion count does not match submissions"
    );
    Ok(())
}
