//! Slash command definitions derived from the router, and the reverse trip
//! from an incoming interaction back to a [`CommandRequest`].

use anyhow::Result;
use serenity::{
    all::{CommandDataOption, CommandDataOptionValue, CommandInteraction},
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};
use tracing::warn;

use crate::router::{ArgKind, ArgSpec, ArgValue, CommandRequest, CommandRouter, Route};

/// One `CreateCommand` per root path, with subcommand routes folded in as
/// `SubCommand` options. Order follows registration.
pub fn build_commands<C: Send + Sync>(router: &CommandRouter<C>) -> Vec<CreateCommand> {
    let mut roots: Vec<(&str, CreateCommand)> = Vec::new();

    for route in router.routes() {
        let root = route.root();
        let index = match roots.iter().position(|(name, _)| *name == root) {
            Some(index) => index,
            None => {
                let description = if route.subcommand().is_some() {
                    format!("/{} commands", root)
                } else {
                    route.description.to_string()
                };
                roots.push((root, CreateCommand::new(root).description(description)));
                roots.len() - 1
            }
        };

        let (_, command) = roots.remove(index);
        let command = match route.subcommand() {
            Some(sub) => command.add_option(subcommand_option(sub, route)),
            None => route
                .schema
                .specs()
                .iter()
                .fold(command, |command, spec| command.add_option(arg_option(spec))),
        };
        roots.insert(index, (root, command));
    }

    roots.into_iter().map(|(_, command)| command).collect()
}

fn subcommand_option<C>(name: &str, route: &Route<C>) -> CreateCommandOption {
    route.schema.specs().iter().fold(
        CreateCommandOption::new(CommandOptionType::SubCommand, name, route.description),
        |option, spec| option.add_sub_option(arg_option(spec)),
    )
}

fn arg_option(spec: &ArgSpec) -> CreateCommandOption {
    let kind = match spec.kind {
        ArgKind::String { .. } | ArgKind::Choice(_) => CommandOptionType::String,
        ArgKind::Integer { .. } => CommandOptionType::Integer,
        ArgKind::Number { .. } => CommandOptionType::Number,
        ArgKind::Boolean => CommandOptionType::Boolean,
        ArgKind::User => CommandOptionType::User,
        ArgKind::Channel => CommandOptionType::Channel,
        ArgKind::Role => CommandOptionType::Role,
    };
    let mut option =
        CreateCommandOption::new(kind, spec.name, spec.description).required(spec.required);

    match &spec.kind {
        ArgKind::String { min_len, max_len } => {
            if let Some(min) = min_len {
                option = option.min_length(clamp_u16(*min));
            }
            if let Some(max) = max_len {
                option = option.max_length(clamp_u16(*max));
            }
        }
        ArgKind::Integer { min, max } => {
            // Discord's builder only takes non-negative integer bounds.
            if let Some(min) = min.and_then(|m| u64::try_from(m).ok()) {
                option = option.min_int_value(min);
            }
            if let Some(max) = max.and_then(|m| u64::try_from(m).ok()) {
                option = option.max_int_value(max);
            }
        }
        ArgKind::Number { min, max } => {
            if let Some(min) = min {
                option = option.min_number_value(*min);
            }
            if let Some(max) = max {
                option = option.max_number_value(*max);
            }
        }
        ArgKind::Choice(values) => {
            for value in values.iter() {
                option = option.add_string_choice(*value, *value);
            }
        }
        ArgKind::Boolean | ArgKind::User | ArgKind::Channel | ArgKind::Role => {}
    }

    option
}

fn clamp_u16(value: usize) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

pub async fn register_global_commands<C: Send + Sync>(
    ctx: &Context,
    router: &CommandRouter<C>,
) -> Result<usize> {
    let commands = build_commands(router);
    let count = commands.len();
    serenity::all::Command::set_global_commands(&ctx.http, commands).await?;
    Ok(count)
}

/// Guild commands show up immediately, global ones can take up to an hour.
pub async fn register_guild_commands<C: Send + Sync>(
    ctx: &Context,
    router: &CommandRouter<C>,
    guild_id: GuildId,
) -> Result<usize> {
    let commands = build_commands(router);
    let count = commands.len();
    guild_id.set_commands(&ctx.http, commands).await?;
    Ok(count)
}

/// Builds the platform-neutral request for an interaction.
///
/// Member permissions and roles come from the interaction payload; the
/// invoker's voice channel from the gateway cache.
pub fn to_request(ctx: &Context, interaction: &CommandInteraction) -> CommandRequest {
    let (path, args) = flatten_options(&interaction.data.name, &interaction.data.options);

    let mut builder = CommandRequest::builder(path, interaction.user.id)
        .id(interaction.id.get())
        .user_name(
            interaction
                .user
                .global_name
                .clone()
                .unwrap_or_else(|| interaction.user.name.clone()),
        )
        .channel(interaction.channel_id);

    for (name, value) in args {
        builder = builder.arg(name, value);
    }

    if let Some(guild_id) = interaction.guild_id {
        builder = builder.guild(guild_id);

        if let Some(member) = &interaction.member {
            builder = builder
                .permissions(member.permissions.unwrap_or_default())
                .roles(member.roles.clone());
        }

        let voice_channel = ctx.cache.guild(guild_id).and_then(|guild| {
            guild
                .voice_states
                .get(&interaction.user.id)
                .and_then(|state| state.channel_id)
        });
        builder = builder.voice_channel(voice_channel);
    }

    builder.build()
}

/// Walks nested `SubCommand`/`SubCommandGroup` options, appending their names
/// to the path, and returns the leaf arguments.
pub fn flatten_options(
    name: &str,
    options: &[CommandDataOption],
) -> (String, Vec<(String, ArgValue)>) {
    let mut path = name.to_string();
    let mut options = options;

    loop {
        match options.first().map(|option| (&option.name, &option.value)) {
            Some((sub, CommandDataOptionValue::SubCommand(inner)))
            | Some((sub, CommandDataOptionValue::SubCommandGroup(inner))) => {
                path.push(' ');
                path.push_str(sub);
                options = inner;
            }
            _ => break,
        }
    }

    let args = options
        .iter()
        .filter_map(|option| {
            let value = match &option.value {
                CommandDataOptionValue::String(text) => ArgValue::String(text.clone()),
                CommandDataOptionValue::Integer(n) => ArgValue::Integer(*n),
                CommandDataOptionValue::Number(n) => ArgValue::Number(*n),
                CommandDataOptionValue::Boolean(b) => ArgValue::Boolean(*b),
                CommandDataOptionValue::User(id) => ArgValue::User(*id),
                CommandDataOptionValue::Channel(id) => ArgValue::Channel(*id),
                CommandDataOptionValue::Role(id) => ArgValue::Role(*id),
                other => {
                    warn!("Ignoring unsupported option `{}`: {:?}", option.name, other);
                    return None;
                }
            };
            Some((option.name.clone(), value))
        })
        .collect();

    (path, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::handlers::build_router;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use serenity::all::UserId;
    use std::time::Duration;

    fn commands() -> Vec<Value> {
        build_commands(&build_router(Duration::from_secs(3)))
            .iter()
            .map(|command| serde_json::to_value(command).unwrap())
            .collect()
    }

    fn find<'a>(commands: &'a [Value], name: &str) -> &'a Value {
        commands
            .iter()
            .find(|command| command["name"] == name)
            .unwrap_or_else(|| panic!("/{} not registered", name))
    }

    #[test]
    fn test_subcommands_grouped_under_root() {
        let commands = commands();
        let tag = find(&commands, "tag");
        let subcommands: Vec<&str> = tag["options"]
            .as_array()
            .unwrap()
            .iter()
            .map(|option| option["name"].as_str().unwrap())
            .collect();

        assert_eq!(subcommands, vec!["create", "show", "edit", "delete", "info"]);
        assert_eq!(tag["options"][0]["type"], 1);
        assert_eq!(tag["options"][0]["options"][0]["name"], "name");
        assert_eq!(
            commands.iter().filter(|command| command["name"] == "tag").count(),
            1
        );
    }

    #[test]
    fn test_argument_constraints() {
        let commands = commands();

        let volume = &find(&commands, "volume")["options"][0];
        assert_eq!(volume["type"], 4);
        assert_eq!(volume["required"], true);
        assert_eq!(volume["min_value"], 0);
        assert_eq!(volume["max_value"], 200);

        let mode = &find(&commands, "loop")["options"][0];
        assert_eq!(mode["choices"][1]["name"], "track");
        assert_eq!(mode["choices"][1]["value"], "track");

        let query = &find(&commands, "play")["options"][0];
        assert_eq!(query["max_length"], 500);
    }

    #[test]
    fn test_flatten_subcommand_options() {
        let options: Vec<CommandDataOption> = serde_json::from_value(json!([{
            "name": "create",
            "type": 1,
            "options": [
                {"name": "name", "type": 3, "value": "faq"},
                {"name": "content", "type": 3, "value": "Read the rules"}
            ]
        }]))
        .unwrap();

        let (path, args) = flatten_options("tag", &options);
        assert_eq!(path, "tag create");
        assert_eq!(
            args,
            vec![
                ("name".to_string(), ArgValue::String("faq".into())),
                ("content".to_string(), ArgValue::String("Read the rules".into())),
            ]
        );
    }

    #[test]
    fn test_flatten_top_level_options() {
        let options: Vec<CommandDataOption> = serde_json::from_value(json!([
            {"name": "level", "type": 4, "value": 80},
            {"name": "who", "type": 6, "value": "1234"}
        ]))
        .unwrap();

        let (path, args) = flatten_options("volume", &options);
        assert_eq!(path, "volume");
        assert_eq!(args[0], ("level".to_string(), ArgValue::Integer(80)));
        assert_eq!(args[1], ("who".to_string(), ArgValue::User(UserId::new(1234))));
    }
}
