//! When steps for task pipeline BDD scenarios.

use super::world::{PipelineWorld, run_async};
use crate::pipeline::{PARTITIONS, TOKEN_U1, TOKEN_U2, TOPIC, upload};
use eyre::WrapErr;
use mockable::DefaultClock;
use pixelflow::broker::domain::partition_for;
use pixelflow::broker::ports::EventPublisher;
use pixelflow::task::domain::{OwnerId, SourceUri, Task, TaskEvent, TaskId, TraceContext};
use rstest_bdd_macros::when;

fn token_for(user: &str) -> eyre::Result<&'static str> {
    match user {
        "u1" => Ok(TOKEN_U1),
        "u2" => Ok(TOKEN_U2),
        other => Err(eyre::eyre!("no token configured for user {other}")),
    }
}

fn submit(world: &mut PipelineWorld, token: &str, body: &str) -> eyre::Result<()> {
    let reply = run_async(world.gateway.send(upload(Some(token), body)?))
        .wrap_err("send upload request")?;
    if let Some(id) = reply.body.get("id").and_then(serde_json::Value::as_str) {
        world.submitted.push(TaskId::try_from(id)?);
    }
    world.last_reply = Some(reply);
    Ok(())
}

#[when(r#"user "{user}" submits source "{source}""#)]
fn user_submits_source(
    world: &mut PipelineWorld,
    user: String,
    source: String,
) -> Result<(), eyre::Report> {
    let body = serde_json::json!({ "source_uri": source }).to_string();
    submit(world, token_for(&user)?, &body)
}

#[when(r#"user "{user}" submits a body without source_uri"#)]
fn user_submits_without_source(world: &mut PipelineWorld, user: String) -> Result<(), eyre::Report> {
    submit(world, token_for(&user)?, r#"{"filename": "a.jpg"}"#)
}

#[when(r#"a caller with token "{token}" submits source "{source}""#)]
fn caller_with_token_submits(
    world: &mut PipelineWorld,
    token: String,
    source: String,
) -> Result<(), eyre::Report> {
    let body = serde_json::json!({ "source_uri": source }).to_string();
    submit(world, &token, &body)
}

#[when(r#"user "{user}" submits {count:usize} tasks"#)]
fn user_submits_many(
    world: &mut PipelineWorld,
    user: String,
    count: usize,
) -> Result<(), eyre::Report> {
    let token = token_for(&user)?;
    for n in 0..count {
        let body = serde_json::json!({ "source_uri": format!("http://x/{n}.jpg") }).to_string();
        submit(world, token, &body)?;
    }
    Ok(())
}

#[when("an event for an unknown task is published")]
fn unknown_task_event_published(world: &mut PipelineWorld) -> Result<(), eyre::Report> {
    let ghost = Task::new(
        OwnerId::new("u1")?,
        SourceUri::new("http://x/ghost.jpg")?,
        &DefaultClock,
    );
    let event = TaskEvent::for_task(&ghost, TraceContext::empty());
    let receipt = run_async(world.gateway.broker.publisher(TOPIC).publish(&event))?;
    eyre::ensure!(
        receipt.partition == partition_for(ghost.id(), PARTITIONS),
        "event routed to an unexpected partition"
    );
    world.orphan = Some(ghost.id());
    Ok(())
}
