use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::all::{GuildId, Permissions, UserId};
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::{
    ai::{Persona, MAX_CHAT_CHARS, MAX_QUESTION_CHARS},
    bot::context::CommandContext,
    error::BotError,
    gate::{CommandPolicy, Cooldown},
    router::{ArgSchema, ArgSpec, CommandHandler, CommandRequest, CommandRouter, TypedArgs},
    storage::DocumentStore,
    ui::{embeds::STANDARD_FOOTER, Reply},
};

const SETTINGS: &str = "server_settings";
const ASK_COOLDOWN: Duration = Duration::from_secs(10);

/// Per-guild switches stored under `server_settings/<guild>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default)]
    pub ai_chat_enabled: bool,
}

pub async fn server_settings(store: &dyn DocumentStore, guild_id: GuildId) -> Result<ServerSettings> {
    Ok(store
        .load(SETTINGS, &guild_id.to_string())
        .await?
        .unwrap_or_default())
}

/// What mention chat should answer, if anything.
///
/// Triggers on a mention of the bot or a message starting with "nova".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTrigger {
    Prompt(String),
    TooLong,
}

pub fn chat_trigger(content: &str, bot_id: UserId) -> Option<ChatTrigger> {
    let mentions = [format!("<@{}>", bot_id), format!("<@!{}>", bot_id)];
    let mentioned = mentions.iter().any(|m| content.contains(m.as_str()));
    let prefixed = content
        .get(..4)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("nova"));

    if !mentioned && !prefixed {
        return None;
    }

    let mut prompt = content.to_string();
    for mention in &mentions {
        prompt = prompt.replace(mention.as_str(), "");
    }
    let mut prompt = prompt.trim();
    if prefixed {
        if let Some(rest) = prompt
            .get(..4)
            .filter(|prefix| prefix.eq_ignore_ascii_case("nova"))
            .and_then(|_| prompt.get(4..))
        {
            prompt = rest.trim();
        }
    }

    if prompt.is_empty() {
        None
    } else if prompt.chars().count() > MAX_CHAT_CHARS {
        Some(ChatTrigger::TooLong)
    } else {
        Some(ChatTrigger::Prompt(prompt.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiCommand {
    Ask,
    Chat,
    Info,
}

pub fn register(router: &mut CommandRouter<CommandContext>) {
    router
        .register(
            "ask",
            "🤖 Ask Nova a question using AI",
            ArgSchema::new().arg(
                ArgSpec::string("question", "Your question for Nova")
                    .required()
                    .length(1, MAX_QUESTION_CHARS),
            ),
            CommandPolicy::new().cooldown(Cooldown::per_user(ASK_COOLDOWN)),
            Arc::new(AiCommand::Ask),
        )
        .defer();
    router.register(
        "chat",
        "💬 Toggle AI chat responses in this server",
        ArgSchema::new(),
        CommandPolicy::new()
            .guild_only()
            .permissions(Permissions::MANAGE_GUILD),
        Arc::new(AiCommand::Chat),
    );
    router.register(
        "ai_info",
        "ℹ️ Information about Nova's AI features",
        ArgSchema::new(),
        CommandPolicy::new(),
        Arc::new(AiCommand::Info),
    );
}

#[async_trait]
impl CommandHandler<CommandContext> for AiCommand {
    async fn handle(
        &self,
        ctx: &CommandContext,
        request: &CommandRequest,
        args: TypedArgs,
    ) -> Result<Reply> {
        match self {
            Self::Ask => {
                let question = args.required_str("question")?;
                let answer = ctx.ai.complete(Persona::Assistant, question).await?;

                Ok(Reply::primary("🤖 Nova AI Response", answer)
                    .field("Question", question, false)
                    .footer(format!("Asked by {} | {}", request.user_name, STANDARD_FOOTER)))
            }
            Self::Chat => {
                let guild_id = request.guild_id.ok_or(BotError::GuildOnly)?;
                if !ctx.ai.is_available() {
                    return Err(BotError::Unavailable("AI chat").into());
                }

                let store = ctx.storage.as_ref();
                let mut settings = server_settings(store, guild_id).await?;
                settings.ai_chat_enabled = !settings.ai_chat_enabled;
                store.save(SETTINGS, &guild_id.to_string(), &settings).await?;

                let status = if settings.ai_chat_enabled { "enabled" } else { "disabled" };
                info!("💬 AI chat {} in guild {} by {}", status, guild_id, request.user_id);

                let mut reply = Reply::success(
                    "AI chat",
                    format!("AI chat responses have been **{}** for this server!", status),
                );
                if settings.ai_chat_enabled {
                    reply = reply.field(
                        "How it works",
                        "I'll respond to messages that mention me or start with 'nova'",
                        false,
                    );
                }
                Ok(reply)
            }
            Self::Info => {
                let reply = Reply::primary("🤖 Nova AI Features", "Learn about my AI-powered capabilities!")
                    .field(
                        "📝 /ask Command",
                        "Ask me any question and I'll respond using AI! Perfect for getting help, information, or just having a conversation.",
                        false,
                    )
                    .field(
                        "💬 AI Chat (Server Feature)",
                        "Admins can enable AI chat responses. When enabled, I'll respond to messages that mention me or start with 'nova'.",
                        false,
                    )
                    .field(
                        "🌸 Personality",
                        "I have a cute, kawaii personality and love helping people! I try to be friendly and encouraging in all my responses.",
                        false,
                    );

                Ok(if ctx.ai.is_available() {
                    reply.field("✅ Status", "AI features are active and ready to help!", false)
                } else {
                    reply.field(
                        "⚠️ Status",
                        "AI features are currently unavailable (missing API key)",
                        false,
                    )
                })
            }
        }
    }
}
