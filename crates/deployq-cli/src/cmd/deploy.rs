use deployq_core::coordinator::{Delivery, Release};
use deployq_core::deploy::Deploy;
use deployq_core::DeployError;

use super::{internal, Context};
use crate::messages;
use crate::output::Outcome;

pub async fn start(ctx: &Context, subject: &[String]) -> anyhow::Result<()> {
    let actor = ctx.actor()?;
    let subject = subject.join(" ");
    let coordinator = ctx.coordinator()?;

    match coordinator.start(&ctx.channel, Deploy::new(actor, subject)) {
        Ok((deploy, delivery)) => {
            Outcome::new("started", messages::announcement(&deploy))
                .deploy(&deploy)
                .print(ctx.json)?;
            delivery.wait().await;
        }
        Err(DeployError::InProgress(active)) => {
            Outcome::new("queued", messages::in_progress(&active))
                .deploy(&active)
                .print(ctx.json)?;
        }
        Err(DeployError::AlreadyQueued(existing)) => {
            Outcome::new("already_queued", messages::already_queued(&existing))
                .deploy(&existing)
                .print(ctx.json)?;
        }
        Err(e) => return Err(internal("start", e)),
    }
    Ok(())
}

pub async fn done(ctx: &Context) -> anyhow::Result<()> {
    let actor = ctx.actor()?;
    let coordinator = ctx.coordinator()?;
    let result = coordinator.finish_by(&ctx.channel, &actor);
    release(ctx, "done", result).await
}

pub async fn abort(ctx: &Context, reason: &[String]) -> anyhow::Result<()> {
    let actor = ctx.actor()?;
    let reason = reason.join(" ");
    let coordinator = ctx.coordinator()?;
    let result = coordinator.abort_by(&ctx.channel, &actor, &reason);
    release(ctx, "abort", result).await
}

pub async fn leave(ctx: &Context) -> anyhow::Result<()> {
    let actor = ctx.actor()?;
    let coordinator = ctx.coordinator()?;
    let result = coordinator.leave(&ctx.channel, &actor);
    release(ctx, "leave", result).await
}

async fn release(
    ctx: &Context,
    op: &str,
    result: deployq_core::Result<(Release, Delivery)>,
) -> anyhow::Result<()> {
    let (release, delivery) = match result {
        Ok(r) => r,
        Err(DeployError::NothingActive) => {
            return Outcome::new("nothing_active", messages::NOTHING_ACTIVE.to_string())
                .print(ctx.json);
        }
        Err(e) => return Err(internal(op, e)),
    };

    match &release {
        Release::Finished { deploy, next } => {
            let mut message = messages::done(&deploy.user);
            if let Some(next) = next {
                message = format!("{message}\n{}", messages::announcement(next));
            }
            Outcome::new("finished", message)
                .deploy(deploy)
                .next(next.as_ref())
                .print(ctx.json)?;
        }
        Release::Aborted { deploy, next } => {
            let mut message = messages::aborted(&deploy.user, &deploy.abort_reason);
            if let Some(next) = next {
                message = format!("{message}\n{}", messages::announcement(next));
            }
            Outcome::new("aborted", message)
                .deploy(deploy)
                .next(next.as_ref())
                .print(ctx.json)?;
        }
        Release::LeftQueue => {
            Outcome::new("left_queue", messages::LEFT_QUEUE.to_string()).print(ctx.json)?
        }
        Release::NotInQueue => {
            Outcome::new("not_in_queue", messages::NOT_IN_QUEUE.to_string()).print(ctx.json)?
        }
    }

    delivery.wait().await;
    Ok(())
}
