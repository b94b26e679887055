use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::all::{GuildId, Permissions};
use std::sync::Arc;
use tracing::info;

use crate::{
    bot::context::CommandContext,
    error::BotError,
    gate::CommandPolicy,
    router::{ArgSchema, ArgSpec, CommandHandler, CommandRequest, CommandRouter, TypedArgs},
    storage::DocumentStore,
    ui::{embeds::truncate, Reply},
};

const COLLECTION: &str = "tags";
const MAX_CONTENT: usize = 2000;
const PREVIEW_CHARS: usize = 200;
const MIN_NAME: usize = 2;
const MAX_NAME: usize = 32;

/// A server-specific canned response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub content: String,
    pub author_id: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub uses: u64,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edited_by: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagCommand {
    Create,
    Show,
    Edit,
    Delete,
    Info,
}

pub fn register(router: &mut CommandRouter<CommandContext>) {
    let name = || {
        ArgSpec::string("name", "Name of the tag")
            .required()
            .length(MIN_NAME, MAX_NAME)
    };
    let content = || {
        ArgSpec::string("content", "Content of the tag")
            .required()
            .length(1, MAX_CONTENT)
    };
    let policy = CommandPolicy::new().guild_only();

    router.register(
        "tag create",
        "🏷️ Create a custom tag",
        ArgSchema::new().arg(name()).arg(content()),
        policy.clone().permissions(Permissions::MANAGE_MESSAGES),
        Arc::new(TagCommand::Create),
    );
    router.register(
        "tag show",
        "🏷️ Use a custom tag",
        ArgSchema::new().arg(name()),
        policy.clone(),
        Arc::new(TagCommand::Show),
    );
    router.register(
        "tag edit",
        "✏️ Edit a custom tag",
        ArgSchema::new().arg(name()).arg(content()),
        policy.clone(),
        Arc::new(TagCommand::Edit),
    );
    router.register(
        "tag delete",
        "🗑️ Delete a custom tag",
        ArgSchema::new().arg(name()),
        policy.clone(),
        Arc::new(TagCommand::Delete),
    );
    router.register(
        "tag info",
        "ℹ️ Get information about a tag",
        ArgSchema::new().arg(name()),
        policy,
        Arc::new(TagCommand::Info),
    );
}

#[async_trait]
impl CommandHandler<CommandContext> for TagCommand {
    async fn handle(
        &self,
        ctx: &CommandContext,
        request: &CommandRequest,
        args: TypedArgs,
    ) -> Result<Reply> {
        let guild_id = request.guild_id.ok_or(BotError::GuildOnly)?;
        let name = tag_name(args.required_str("name")?)?;
        let key = CommandContext::guild_key(guild_id, &name);
        let store = ctx.storage.as_ref();

        match self {
            Self::Create => {
                if store.get(COLLECTION, &key).await?.is_some() {
                    return Err(BotError::invalid_argument(
                        "name",
                        format!("tag `{}` already exists", name),
                    )
                    .into());
                }

                let tag = Tag {
                    name: name.clone(),
                    content: args.required_str("content")?.to_string(),
                    author_id: request.user_id.get(),
                    created_at: Utc::now(),
                    uses: 0,
                    edited_at: None,
                    edited_by: None,
                };
                store.save(COLLECTION, &key, &tag).await?;
                info!("🏷️ Tag {} created in guild {} by {}", name, guild_id, request.user_id);

                Ok(Reply::success("Tag created", format!("Tag `{}` created successfully!", name))
                    .field("Usage", format!("`/tag show name:{}`", name), false))
            }
            Self::Show => {
                let mut tag = load(store, guild_id, &name).await?;
                tag.uses += 1;
                store.save(COLLECTION, &key, &tag).await?;
                Ok(Reply::text(tag.content))
            }
            Self::Edit => {
                let mut tag = load(store, guild_id, &name).await?;
                ensure_can_modify(request, &tag)?;

                tag.content = args.required_str("content")?.to_string();
                tag.edited_at = Some(Utc::now());
                tag.edited_by = Some(request.user_id.get());
                store.save(COLLECTION, &key, &tag).await?;

                Ok(Reply::success("Tag updated", format!("Tag `{}` updated successfully!", name)))
            }
            Self::Delete => {
                let tag = load(store, guild_id, &name).await?;
                ensure_can_modify(request, &tag)?;

                store.delete(COLLECTION, &key).await?;
                info!("🗑️ Tag {} deleted in guild {} by {}", name, guild_id, request.user_id);
                Ok(Reply::success("Tag deleted", format!("Tag `{}` deleted successfully!", name)))
            }
            Self::Info => {
                let tag = load(store, guild_id, &name).await?;
                let mut reply = Reply::info(format!("Tag: {}", tag.name), "")
                    .field("Author", format!("<@{}>", tag.author_id), true)
                    .field("Uses", tag.uses.to_string(), true)
                    .field("Created", format!("<t:{}:R>", tag.created_at.timestamp()), true);

                if let Some(edited_at) = tag.edited_at {
                    let editor = tag
                        .edited_by
                        .map(|id| format!("<@{}>", id))
                        .unwrap_or_else(|| "unknown".to_string());
                    reply = reply.field(
                        "Last Edited",
                        format!("<t:{}:R> by {}", edited_at.timestamp(), editor),
                        false,
                    );
                }

                Ok(reply.field(
                    "Content Preview",
                    format!("```{}```", truncate(&tag.content, PREVIEW_CHARS)),
                    false,
                ))
            }
        }
    }
}

/// Tag names are case-insensitive and limited to letters, digits, `-` and `_`.
fn tag_name(raw: &str) -> Result<String, BotError> {
    let name = raw.trim().to_lowercase();
    let len = name.chars().count();
    if len < MIN_NAME {
        return Err(BotError::invalid_argument(
            "name",
            format!("must be at least {} characters", MIN_NAME),
        ));
    }
    if len > MAX_NAME {
        return Err(BotError::invalid_argument(
            "name",
            format!("must be at most {} characters", MAX_NAME),
        ));
    }
    if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(BotError::invalid_argument(
            "name",
            "can only contain letters, numbers, hyphens, and underscores",
        ));
    }
    Ok(name)
}

async fn load(store: &dyn DocumentStore, guild_id: GuildId, name: &str) -> Result<Tag> {
    store
        .load::<Tag>(COLLECTION, &CommandContext::guild_key(guild_id, name))
        .await?
        .ok_or_else(|| BotError::invalid_argument("name", format!("tag `{}` not found", name)).into())
}

/// Authors may change their own tags; moderators may change any.
fn ensure_can_modify(request: &CommandRequest, tag: &Tag) -> Result<(), BotError> {
    let is_author = request.user_id.get() == tag.author_id;
    let is_moderator = request
        .permissions
        .intersects(Permissions::MANAGE_MESSAGES | Permissions::ADMINISTRATOR);

    if is_author || is_moderator {
        Ok(())
    } else {
        Err(BotError::InsufficientPermission {
            missing: Permissions::MANAGE_MESSAGES,
        })
    }
}
