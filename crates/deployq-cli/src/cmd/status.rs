use chrono::{DateTime, Utc};
use deployq_core::deploy::Deploy;

use super::{internal, Context};
use crate::messages;
use crate::output::{print_json, print_table};

pub fn status(ctx: &Context) -> anyhow::Result<()> {
    let coordinator = ctx.coordinator()?;
    let deploys = coordinator
        .all(&ctx.channel)
        .map_err(|e| internal("status", e))?;

    if ctx.json {
        return print_json(&deploys);
    }

    let Some((active, waiting)) = deploys.split_first() else {
        println!("{}", messages::NOTHING_ACTIVE);
        return Ok(());
    };
    println!("{}", messages::status(active));
    for (i, d) in waiting.iter().enumerate() {
        println!("{}", messages::waiting(i + 1, d));
    }
    Ok(())
}

pub fn history(ctx: &Context, since: Option<DateTime<Utc>>) -> anyhow::Result<()> {
    let coordinator = ctx.coordinator()?;
    let deploys = coordinator
        .history(&ctx.channel, since)
        .map_err(|e| internal("history", e))?;

    if ctx.json {
        return print_json(&deploys);
    }
    if deploys.is_empty() {
        println!("No deploys recorded in this channel");
        return Ok(());
    }

    let rows = deploys.iter().map(row).collect();
    print_table(&["USER", "SUBJECT", "STARTED", "FINISHED", "STATE", "REASON"], rows);
    Ok(())
}

fn row(d: &Deploy) -> Vec<String> {
    vec![
        d.user.name.clone(),
        d.subject.clone(),
        messages::timestamp(d.started_at),
        messages::timestamp(d.finished_at),
        d.state().to_string(),
        d.abort_reason.clone(),
    ]
}
