use serenity::all::{ChannelId, GuildId, Permissions, RoleId, UserId};

use super::schema::ArgValue;

/// One slash-command invocation, as handed over by the gateway adapter.
///
/// Immutable once dispatched. `path` is the full command path with
/// subcommands joined by single spaces (`"tag create"`).
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub id: u64,
    pub user_id: UserId,
    pub user_name: String,
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub path: String,
    pub args: Vec<(String, ArgValue)>,
    /// Invoker's resolved permissions in the channel.
    pub permissions: Permissions,
    pub roles: Vec<RoleId>,
    /// Voice channel the invoker currently sits in, if any.
    pub voice_channel: Option<ChannelId>,
}

impl CommandRequest {
    pub fn builder(path: impl Into<String>, user_id: UserId) -> CommandRequestBuilder {
        CommandRequestBuilder {
            inner: CommandRequest {
                id: 0,
                user_id,
                user_name: String::new(),
                guild_id: None,
                channel_id: ChannelId::new(1),
                path: path.into(),
                args: Vec::new(),
                permissions: Permissions::empty(),
                roles: Vec::new(),
                voice_channel: None,
            },
        }
    }
}

pub struct CommandRequestBuilder {
    inner: CommandRequest,
}

impl CommandRequestBuilder {
    pub fn id(mut self, id: u64) -> Self {
        self.inner.id = id;
        self
    }

    pub fn user_name(mut self, name: impl Into<String>) -> Self {
        self.inner.user_name = name.into();
        self
    }

    pub fn guild(mut self, guild_id: GuildId) -> Self {
        self.inner.guild_id = Some(guild_id);
        self
    }

    pub fn channel(mut self, channel_id: ChannelId) -> Self {
        self.inner.channel_id = channel_id;
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: ArgValue) -> Self {
        self.inner.args.push((name.into(), value));
        self
    }

    pub fn permissions(mut self, permissions: Permissions) -> Self {
        self.inner.permissions = permissions;
        self
    }

    pub fn roles(mut self, roles: Vec<RoleId>) -> Self {
        self.inner.roles = roles;
        self
    }

    pub fn voice_channel(mut self, channel_id: Option<ChannelId>) -> Self {
        self.inner.voice_channel = channel_id;
        self
    }

    pub fn build(self) -> CommandRequest {
        self.inner
    }
}
