use async_trait::async_trait;
use parking_lot::RwLock;
use serenity::{
    all::{ChannelType, Guild, GuildId, Http, Member, Permissions, RoleId, UserId},
    cache::Cache,
};
use std::sync::Arc;
use tracing::debug;

/// Server facts shown by `/serverinfo`.
#[derive(Debug, Clone, PartialEq)]
pub struct GuildProfile {
    pub id: GuildId,
    pub name: String,
    pub icon_url: Option<String>,
    pub owner_id: UserId,
    /// Unix seconds.
    pub created_at: i64,
    pub member_count: u64,
    pub bot_count: u64,
    pub text_channels: usize,
    pub voice_channels: usize,
    pub roles: usize,
    pub boost_tier: u8,
    pub boosts: u64,
    pub verification: String,
}

/// A guild member as `/userinfo` and `/avatar` see them.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberProfile {
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
    pub bot: bool,
    /// Avatar hash; `None` when the user never uploaded one.
    pub avatar: Option<String>,
    pub default_avatar_url: String,
    pub joined_at: Option<i64>,
    pub premium_since: Option<i64>,
    /// Highest role first, `@everyone` excluded.
    pub roles: Vec<RoleId>,
    pub permissions: Permissions,
}

/// Read access to guilds and their members.
#[async_trait]
pub trait GuildDirectory: Send + Sync {
    async fn guild(&self, guild_id: GuildId) -> Option<GuildProfile>;
    async fn member(&self, guild_id: GuildId, user_id: UserId) -> Option<MemberProfile>;
}

/// Reads from serenity's cache, fetching members it hasn't seen over HTTP.
///
/// Empty until [`attach`](Self::attach) runs, which happens once the client
/// is built.
#[derive(Default)]
pub struct CacheDirectory {
    gateway: RwLock<Option<(Arc<Cache>, Arc<Http>)>>,
}

impl CacheDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, cache: Arc<Cache>, http: Arc<Http>) {
        *self.gateway.write() = Some((cache, http));
    }

    fn gateway(&self) -> Option<(Arc<Cache>, Arc<Http>)> {
        self.gateway.read().clone()
    }
}

#[async_trait]
impl GuildDirectory for CacheDirectory {
    async fn guild(&self, guild_id: GuildId) -> Option<GuildProfile> {
        let (cache, _) = self.gateway()?;
        let guild = cache.guild(guild_id)?;
        Some(guild_profile(&guild))
    }

    async fn member(&self, guild_id: GuildId, user_id: UserId) -> Option<MemberProfile> {
        let (cache, http) = self.gateway()?;

        let member = match guild_id.member((&cache, http.as_ref()), user_id).await {
            Ok(member) => member,
            Err(e) => {
                debug!("Member {} not found in guild {}: {:?}", user_id, guild_id, e);
                return None;
            }
        };

        let guild = cache.guild(guild_id)?;
        Some(member_profile(&guild, &member))
    }
}

fn guild_profile(guild: &Guild) -> GuildProfile {
    let count_channels =
        |kind: ChannelType| guild.channels.values().filter(|c| c.kind == kind).count();

    GuildProfile {
        id: guild.id,
        name: guild.name.clone(),
        icon_url: guild.icon_url(),
        owner_id: guild.owner_id,
        created_at: guild.id.created_at().unix_timestamp(),
        member_count: guild.member_count,
        bot_count: guild.members.values().filter(|m| m.user.bot).count() as u64,
        text_channels: count_channels(ChannelType::Text),
        voice_channels: count_channels(ChannelType::Voice),
        roles: guild.roles.len(),
        boost_tier: u8::from(guild.premium_tier),
        boosts: guild.premium_subscription_count.unwrap_or(0),
        verification: format!("{:?}", guild.verification_level),
    }
}

fn member_profile(guild: &Guild, member: &Member) -> MemberProfile {
    let mut roles: Vec<_> = member
        .roles
        .iter()
        .filter(|id| id.get() != guild.id.get())
        .filter_map(|id| guild.roles.get(id))
        .collect();
    roles.sort_by(|a, b| b.position.cmp(&a.position));

    #[allow(deprecated)]
    let permissions = guild.member_permissions(member);

    MemberProfile {
        user_id: member.user.id,
        username: member.user.name.clone(),
        display_name: member.display_name().to_string(),
        bot: member.user.bot,
        avatar: member.user.avatar.map(|hash| hash.to_string()),
        default_avatar_url: member.user.default_avatar_url(),
        joined_at: member.joined_at.map(|at| at.unix_timestamp()),
        premium_since: member.premium_since.map(|at| at.unix_timestamp()),
        roles: roles.into_iter().map(|role| role.id).collect(),
        permissions,
    }
}
