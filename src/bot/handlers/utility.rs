use anyhow::Result;
use async_trait::async_trait;
use serenity::all::{Permissions, UserId};
use std::{sync::Arc, time::Duration};
use url::Url;

use crate::{
    bot::{context::CommandContext, directory::MemberProfile},
    error::BotError,
    gate::CommandPolicy,
    router::{
        ArgSchema, ArgSpec, CommandHandler, CommandRequest, CommandRouter, Route, TypedArgs,
    },
    ui::Reply,
};

const HELP_DESCRIPTION: &str = "❓ Get help with Nova's commands";
// Discord rejects embed field values over this many characters.
const FIELD_LIMIT: usize = 1024;
const SHOWN_ROLES: usize = 10;
const AVATAR_CDN: &str = "https://cdn.discordapp.com/avatars";
const AUTHORIZE_URL: &str = "https://discord.com/oauth2/authorize";

/// Permissions the invite link asks for: chat, embeds and voice.
const INVITE_PERMISSIONS: Permissions = Permissions::VIEW_CHANNEL
    .union(Permissions::SEND_MESSAGES)
    .union(Permissions::EMBED_LINKS)
    .union(Permissions::ATTACH_FILES)
    .union(Permissions::READ_MESSAGE_HISTORY)
    .union(Permissions::USE_EXTERNAL_EMOJIS)
    .union(Permissions::ADD_REACTIONS)
    .union(Permissions::CONNECT)
    .union(Permissions::SPEAK)
    .union(Permissions::USE_APPLICATION_COMMANDS);

const KEY_PERMISSIONS: [(Permissions, &str); 5] = [
    (Permissions::MANAGE_GUILD, "Manage Server"),
    (Permissions::MANAGE_CHANNELS, "Manage Channels"),
    (Permissions::MANAGE_MESSAGES, "Manage Messages"),
    (Permissions::KICK_MEMBERS, "Kick Members"),
    (Permissions::BAN_MEMBERS, "Ban Members"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtilityCommand {
    Ping,
    Support,
    Stats,
    ServerInfo,
    UserInfo,
    Avatar,
    Invite,
}

pub fn register(router: &mut CommandRouter<CommandContext>) {
    router.register(
        "ping",
        "🏓 Check Nova's latency",
        ArgSchema::new(),
        CommandPolicy::new(),
        Arc::new(UtilityCommand::Ping),
    );
    router.register(
        "support",
        "💖 Get support and join Nova's community",
        ArgSchema::new(),
        CommandPolicy::new(),
        Arc::new(UtilityCommand::Support),
    );
    router.register(
        "stats",
        "📈 View Nova's statistics",
        ArgSchema::new(),
        CommandPolicy::new(),
        Arc::new(UtilityCommand::Stats),
    );
    router.register(
        "serverinfo",
        "📊 Get information about this server",
        ArgSchema::new(),
        CommandPolicy::new().guild_only(),
        Arc::new(UtilityCommand::ServerInfo),
    );
    router.register(
        "userinfo",
        "👤 Get information about a user",
        ArgSchema::new().arg(ArgSpec::user(
            "user",
            "The user to get information about (defaults to you)",
        )),
        CommandPolicy::new().guild_only(),
        Arc::new(UtilityCommand::UserInfo),
    );
    router.register(
        "avatar",
        "🖼️ Get someone's avatar",
        ArgSchema::new().arg(ArgSpec::user(
            "user",
            "The user whose avatar to display (defaults to you)",
        )),
        CommandPolicy::new().guild_only(),
        Arc::new(UtilityCommand::Avatar),
    );
    router.register(
        "invite",
        "🔗 Get Nova's invite link",
        ArgSchema::new(),
        CommandPolicy::new(),
        Arc::new(UtilityCommand::Invite),
    );

    let help_schema = ArgSchema::new().arg(
        ArgSpec::string("command", "Show details for one command").length(1, 64),
    );
    let mut entries: Vec<HelpEntry> = router.routes().map(HelpEntry::from_route).collect();
    entries.push(HelpEntry {
        path: "help".to_string(),
        description: HELP_DESCRIPTION,
        usage: "/help [command]".to_string(),
        options: vec!["`command` Show details for one command".to_string()],
    });

    router.register(
        "help",
        HELP_DESCRIPTION,
        help_schema,
        CommandPolicy::new(),
        Arc::new(Help { entries }),
    );
}

#[async_trait]
impl CommandHandler<CommandContext> for UtilityCommand {
    async fn handle(
        &self,
        ctx: &CommandContext,
        request: &CommandRequest,
        args: TypedArgs,
    ) -> Result<Reply> {
        match self {
            Self::Ping => {
                let latency = ctx.status.latency();
                Ok(Reply::primary("🏓 Pong!", "")
                    .field("WebSocket Latency", format_latency(latency), true)
                    .field("Status", latency_status(latency), true))
            }
            Self::Support => Ok(Reply::primary(
                "💖 Nova Support",
                "Need help or want to join our community? We're here for you!",
            )
            .field(
                "🎫 Get Help",
                "Join our support server for assistance with commands, setup, or troubleshooting.",
                false,
            )
            .field(
                "💬 Community",
                "Chat with other Nova users, share feedback, and stay updated on new features!",
                false,
            )
            .field(
                "🌟 Feature Requests",
                "Have an idea for Nova? We'd love to hear it in our support server!",
                false,
            )
            .field(
                "💖 Join",
                format!("[Support Server]({})", ctx.config.support_server),
                false,
            )
            .url(ctx.config.support_server.clone())),
            Self::Stats => {
                // Whole seconds, "3h 2m 1s" rather than nanosecond noise.
                let uptime = Duration::from_secs(ctx.status.uptime().as_secs());
                Ok(Reply::primary("📈 Nova Statistics", "")
                    .field("Servers", ctx.status.guild_count().to_string(), true)
                    .field("Music Sessions", ctx.music.active_sessions().to_string(), true)
                    .field("Uptime", humantime::format_duration(uptime).to_string(), true)
                    .field("Latency", format_latency(ctx.status.latency()), true)
                    .field("Version", env!("CARGO_PKG_VERSION"), true))
            }
            Self::ServerInfo => server_info(ctx, request).await,
            Self::UserInfo => {
                let member = target_member(ctx, request, &args).await?;
                Ok(user_info(&member))
            }
            Self::Avatar => {
                let member = target_member(ctx, request, &args).await?;
                Ok(avatar(&member))
            }
            Self::Invite => {
                let link = invite_url(ctx.config.application_id)?;
                Ok(Reply::primary(
                    "🔗 Invite Nova to Your Server!",
                    "Use the link below to add me with everything I need to run.",
                )
                .field(
                    "What I can do:",
                    "🎵 Music playback\n🤖 AI conversations\n🏷️ Server tags\n⚙️ Utility commands",
                    false,
                )
                .field("🌸 Add Nova", format!("[Add Nova to Server]({})", link), false)
                .field(
                    "💖 Support",
                    format!("[Support Server]({})", ctx.config.support_server),
                    false,
                )
                .url(link.to_string()))
            }
        }
    }
}

async fn server_info(ctx: &CommandContext, request: &CommandRequest) -> Result<Reply> {
    let guild_id = request.guild_id.ok_or(BotError::GuildOnly)?;
    let guild = ctx
        .directory
        .guild(guild_id)
        .await
        .ok_or(BotError::GuildNotCached)?;
    let humans = guild.member_count.saturating_sub(guild.bot_count);

    Ok(Reply::info(format!("📊 {}", guild.name), "")
        .thumbnail(guild.icon_url.clone())
        .field("Owner", format!("<@{}>", guild.owner_id), true)
        .field("Created", relative_time(guild.created_at), true)
        .field("ID", guild.id.to_string(), true)
        .field("Total Members", guild.member_count.to_string(), true)
        .field("Humans", humans.to_string(), true)
        .field("Bots", guild.bot_count.to_string(), true)
        .field("Text Channels", guild.text_channels.to_string(), true)
        .field("Voice Channels", guild.voice_channels.to_string(), true)
        .field("Roles", guild.roles.to_string(), true)
        .field("Boost Level", guild.boost_tier.to_string(), true)
        .field("Boosts", guild.boosts.to_string(), true)
        .field("Verification", guild.verification.clone(), true))
}

/// The `user` argument, or the invoker when it's omitted.
async fn target_member(
    ctx: &CommandContext,
    request: &CommandRequest,
    args: &TypedArgs,
) -> Result<MemberProfile, BotError> {
    let guild_id = request.guild_id.ok_or(BotError::GuildOnly)?;
    let user_id = args.user("user").unwrap_or(request.user_id);

    ctx.directory
        .member(guild_id, user_id)
        .await
        .ok_or_else(|| BotError::invalid_argument("user", "is not a member of this server"))
}

fn user_info(member: &MemberProfile) -> Reply {
    let mut reply = Reply::info(format!("👤 {}", member.display_name), "")
        .thumbnail(
            member
                .avatar
                .as_deref()
                .map(|hash| avatar_url(member.user_id, hash, default_format(hash))),
        )
        .field("Username", member.username.clone(), true)
        .field("ID", member.user_id.to_string(), true)
        .field("Bot", if member.bot { "Yes" } else { "No" }, true)
        .field(
            "Account Created",
            relative_time(member.user_id.created_at().unix_timestamp()),
            true,
        )
        .field(
            "Joined Server",
            member.joined_at.map_or("Unknown".to_string(), relative_time),
            true,
        );

    if let Some(since) = member.premium_since {
        reply = reply.field("Boosting Since", relative_time(since), true);
    }

    if !member.roles.is_empty() {
        let mut shown = member
            .roles
            .iter()
            .take(SHOWN_ROLES)
            .map(|role| format!("<@&{}>", role))
            .collect::<Vec<_>>()
            .join(", ");
        if member.roles.len() > SHOWN_ROLES {
            shown.push_str(&format!(" (+{} more)", member.roles.len() - SHOWN_ROLES));
        }
        reply = reply.field(format!("Roles ({})", member.roles.len()), shown, false);
    }

    if let Some(permissions) = key_permissions(member.permissions) {
        reply = reply.field("Key Permissions", permissions, false);
    }

    reply
}

fn key_permissions(permissions: Permissions) -> Option<String> {
    if permissions.administrator() {
        return Some("Administrator".to_string());
    }

    let held: Vec<_> = KEY_PERMISSIONS
        .iter()
        .filter(|(permission, _)| permissions.contains(*permission))
        .map(|(_, name)| *name)
        .collect();
    (!held.is_empty()).then(|| held.join(", "))
}

fn avatar(member: &MemberProfile) -> Reply {
    let title = format!("🖼️ {}'s Avatar", member.display_name);

    match member.avatar.as_deref() {
        Some(hash) => Reply::info(title, "")
            .image(avatar_url(member.user_id, hash, default_format(hash)))
            .field(
                "Links",
                format!(
                    "[PNG]({}) | [JPEG]({}) | [WEBP]({})",
                    avatar_url(member.user_id, hash, "png"),
                    avatar_url(member.user_id, hash, "jpg"),
                    avatar_url(member.user_id, hash, "webp"),
                ),
                false,
            ),
        None => Reply::info(title, "This user has no custom avatar.")
            .image(member.default_avatar_url.clone()),
    }
}

fn avatar_url(user_id: UserId, hash: &str, format: &str) -> String {
    format!("{}/{}/{}.{}?size=1024", AVATAR_CDN, user_id, hash, format)
}

/// Animated avatars keep their animation.
fn default_format(hash: &str) -> &'static str {
    if hash.starts_with("a_") {
        "gif"
    } else {
        "png"
    }
}

fn invite_url(application_id: u64) -> Result<Url> {
    Ok(Url::parse_with_params(
        AUTHORIZE_URL,
        [
            ("client_id", application_id.to_string()),
            ("permissions", INVITE_PERMISSIONS.bits().to_string()),
            ("scope", "bot applications.commands".to_string()),
        ],
    )?)
}

fn relative_time(unix: i64) -> String {
    format!("<t:{}:R>", unix)
}

/// One line of `/help`, captured when the router is built.
#[derive(Debug, Clone)]
struct HelpEntry {
    path: String,
    description: &'static str,
    usage: String,
    options: Vec<String>,
}

impl HelpEntry {
    fn from_route<C>(route: &Route<C>) -> Self {
        let mut usage = format!("/{}", route.path);
        let mut options = Vec::new();

        for spec in route.schema.specs() {
            if spec.required {
                usage.push_str(&format!(" <{}>", spec.name));
            } else {
                usage.push_str(&format!(" [{}]", spec.name));
            }
            options.push(format!("`{}` {}", spec.name, spec.description));
        }

        Self {
            path: route.path.clone(),
            description: route.description,
            usage,
            options,
        }
    }
}

struct Help {
    entries: Vec<HelpEntry>,
}

impl Help {
    fn overview(&self) -> Reply {
        let mut reply = Reply::primary(
            "❓ Nova Help",
            "Use `/help command:<name>` for details on a single command.",
        );

        let mut chunk = String::new();
        let mut first = true;
        for entry in &self.entries {
            let line = format!("`{}` {}\n", entry.usage, entry.description);
            if chunk.len() + line.len() > FIELD_LIMIT {
                reply = reply.field(commands_title(first), std::mem::take(&mut chunk), false);
                first = false;
            }
            chunk.push_str(&line);
        }
        if !chunk.is_empty() {
            reply = reply.field(commands_title(first), chunk, false);
        }

        reply
    }

    fn detail(&self, name: &str) -> Result<Reply, BotError> {
        let wanted = name
            .trim()
            .trim_start_matches('/')
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        let entry = self
            .entries
            .iter()
            .find(|entry| entry.path == wanted)
            .ok_or_else(|| {
                BotError::invalid_argument("command", format!("no command named `/{}`", wanted))
            })?;

        let mut reply = Reply::primary(format!("❓ /{}", entry.path), entry.description)
            .field("Usage", format!("`{}`", entry.usage), false);
        if !entry.options.is_empty() {
            reply = reply.field("Options", entry.options.join("\n"), false);
        }
        Ok(reply)
    }
}

#[async_trait]
impl CommandHandler<CommandContext> for Help {
    async fn handle(
        &self,
        _ctx: &CommandContext,
        _request: &CommandRequest,
        args: TypedArgs,
    ) -> Result<Reply> {
        match args.str("command") {
            Some(name) => Ok(self.detail(name)?),
            None => Ok(self.overview()),
        }
    }
}

fn commands_title(first: bool) -> &'static str {
    if first {
        "📜 Commands"
    } else {
        "📜 More Commands"
    }
}

fn format_latency(latency: Option<Duration>) -> String {
    match latency {
        Some(latency) => format!("{}ms", latency.as_millis()),
        None => "measuring...".to_string(),
    }
}

fn latency_status(latency: Option<Duration>) -> &'static str {
    match latency.map(|l| l.as_millis()) {
        None => "⚪ Unknown",
        Some(ms) if ms < 100 => "🟢 Excellent",
        Some(ms) if ms < 200 => "🟡 Good",
        Some(ms) if ms < 500 => "🟠 Poor",
        Some(_) => "🔴 Very Poor",
    }
}
