//! `roles` subcommands: list, add, remove, set, show.

use super::{storage_error, CommandContext};
use doorbell_store::Data;
use tracing::info;

const USAGE: &str = "Usage: roles | roles add <role...> | roles remove <role...> | \
     roles set <@user> <role...> | roles show [<@user>]";

pub(super) async fn handle(ctx: &CommandContext<'_>, args: &[&str]) -> String {
    let Some(sub) = args.first() else {
        return match ctx.store.read().await {
            Ok(data) => list(&data),
            Err(e) => storage_error(e),
        };
    };
    let rest = &args[1..];

    match sub.to_lowercase().as_str() {
        "add" => add(ctx, rest).await,
        "remove" => remove(ctx, rest).await,
        "set" => set(ctx, rest).await,
        "show" => show(ctx, rest).await,
        _ => USAGE.to_string(),
    }
}

fn list(data: &Data) -> String {
    if data.roles.is_empty() {
        return "No roles yet. Add some with `roles add <role...>`.".to_string();
    }
    let mut out = String::from("Roles:");
    for role in &data.roles {
        let holders: Vec<String> = data.holders_of(role).iter().map(|u| mention(u)).collect();
        if holders.is_empty() {
            out.push_str(&format!("\n{role}: (none)"));
        } else {
            out.push_str(&format!("\n{role}: {}", holders.join(", ")));
        }
    }
    out
}

async fn add(ctx: &CommandContext<'_>, roles: &[&str]) -> String {
    if roles.is_empty() {
        return "Must provide roles to add.".to_string();
    }
    let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
    match ctx.store.update(move |data| data.add_roles(roles)).await {
        Ok(added) if added.is_empty() => "Those roles already exist.".to_string(),
        Ok(added) => {
            info!("{} added roles {added:?}", ctx.sender_name);
            format!("Added roles: {}.", added.join(", "))
        }
        Err(e) => storage_error(e),
    }
}

async fn remove(ctx: &CommandContext<'_>, roles: &[&str]) -> String {
    if roles.is_empty() {
        return "Must provide roles to remove.".to_string();
    }
    let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
    let result = ctx
        .store
        .update(move |data| {
            roles
                .into_iter()
                .partition::<Vec<String>, _>(|r| data.remove_role(r))
        })
        .await;

    match result {
        Ok((removed, unknown)) => {
            if !removed.is_empty() {
                info!("{} removed roles {removed:?}", ctx.sender_name);
            }
            let mut parts = Vec::new();
            if !removed.is_empty() {
                parts.push(format!("Removed roles: {}.", removed.join(", ")));
            }
            if !unknown.is_empty() {
                parts.push(format!("Unknown roles: {}.", unknown.join(", ")));
            }
            parts.join(" ")
        }
        Err(e) => storage_error(e),
    }
}

async fn set(ctx: &CommandContext<'_>, args: &[&str]) -> String {
    let Some(user) = args.first().and_then(|a| parse_user(a)) else {
        return "Must mention a user, e.g. `roles set @someone CAD Leads`.".to_string();
    };
    let roles: Vec<String> = args[1..].iter().map(|r| r.to_string()).collect();
    let target = user.clone();
    let assigned = roles.clone();

    match ctx
        .store
        .update(move |data| data.set_user_roles(&target, assigned))
        .await
    {
        Ok(Ok(())) if roles.is_empty() => format!("Cleared roles for {}.", mention(&user)),
        Ok(Ok(())) => {
            info!("{} set roles for {user} to {roles:?}", ctx.sender_name);
            format!("Set roles for {} to {}.", mention(&user), roles.join(", "))
        }
        Ok(Err(unknown)) => format!(
            "Unknown roles: {}. Add them first with `roles add`.",
            unknown.join(", ")
        ),
        Err(e) => storage_error(e),
    }
}

async fn show(ctx: &CommandContext<'_>, args: &[&str]) -> String {
    let user = match args.first() {
        Some(a) => match parse_user(a) {
            Some(u) => u,
            None => return "Must mention a user, e.g. `roles show @someone`.".to_string(),
        },
        None => ctx.sender_id.to_string(),
    };
    match ctx.store.read().await {
        Ok(data) => {
            let roles = data.roles_for_user(&user);
            if roles.is_empty() {
                format!("{} has no roles.", mention(&user))
            } else {
                format!("{} has roles: {}.", mention(&user), roles.join(", "))
            }
        }
        Err(e) => storage_error(e),
    }
}

/// Slack user mention (`<@U123>` or `<@U123|name>`) to a user ID.
pub(super) fn parse_user(token: &str) -> Option<String> {
    let inner = token.strip_prefix("<@")?.strip_suffix('>')?;
    let id = inner.split('|').next()?;
    (!id.is_empty()).then(|| id.to_string())
}

fn mention(user: &str) -> String {
    format!("<@{user}>")
}
