//! # Command Router
//!
//! Maps a full command path (`"play"`, `"tag create"`) to its handler. Paths
//! are declared up front and matched exactly; there is no prefix or fuzzy
//! matching.
//!
//! Before a handler runs its arguments are checked against the route's
//! [`ArgSchema`]. Whatever happens inside the handler (an error, a
//! [`BotError`], a panic) is turned into a [`Reply`] here, so one bad
//! handler never takes the event loop down with it.
//!
//! [`Dispatcher`] puts the [`CommandGate`] in front of the router and is what
//! the gateway adapter calls.

pub mod request;
pub mod schema;

use async_trait::async_trait;
use futures::FutureExt;
use std::{
    any::Any,
    collections::{hash_map::Entry, HashMap},
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Duration,
};
use tracing::{debug, error, info, warn};

pub use request::CommandRequest;
pub use schema::{ArgKind, ArgSchema, ArgSpec, ArgValue, TypedArgs};

use crate::{
    error::BotError,
    gate::{Admission, CommandGate, CommandPolicy, Cooldown},
    ui::Reply,
};

/// A slash command implementation. `C` is the shared state handlers get.
#[async_trait]
pub trait CommandHandler<C>: Send + Sync {
    async fn handle(&self, ctx: &C, request: &CommandRequest, args: TypedArgs)
        -> anyhow::Result<Reply>;
}

pub struct Route<C> {
    pub path: String,
    pub description: &'static str,
    pub schema: ArgSchema,
    pub policy: CommandPolicy,
    /// The handler may take longer than the platform's initial reply window,
    /// so the adapter acknowledges first and edits the reply in later.
    pub deferred: bool,
    handler: Arc<dyn CommandHandler<C>>,
}

impl<C> Route<C> {
    pub fn defer(&mut self) -> &mut Self {
        self.deferred = true;
        self
    }

    /// First word of the path, the top-level slash command.
    pub fn root(&self) -> &str {
        self.path.split(' ').next().unwrap_or(&self.path)
    }

    /// Remaining words of the path, `None` for a top-level command.
    pub fn subcommand(&self) -> Option<&str> {
        self.path.split_once(' ').map(|(_, rest)| rest)
    }
}

pub struct CommandRouter<C> {
    routes: HashMap<String, Route<C>>,
    order: Vec<String>,
    default_cooldown: Option<Duration>,
}

impl<C> Default for CommandRouter<C> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            order: Vec::new(),
            default_cooldown: None,
        }
    }
}

impl<C: Send + Sync> CommandRouter<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-user cooldown given to every route registered afterwards that does
    /// not declare its own.
    pub fn with_default_cooldown(mut self, window: Duration) -> Self {
        self.default_cooldown = Some(window);
        self
    }

    pub fn register(
        &mut self,
        path: &str,
        description: &'static str,
        schema: ArgSchema,
        mut policy: CommandPolicy,
        handler: Arc<dyn CommandHandler<C>>,
    ) -> &mut Route<C> {
        if policy.cooldown.is_none() {
            if let Some(window) = self.default_cooldown {
                policy.cooldown = Some(Cooldown::per_user(window));
            }
        }

        let path = normalize(path);
        if self.routes.contains_key(&path) {
            warn!("⚠️ Route /{} registered twice, keeping the last one", path);
        } else {
            self.order.push(path.clone());
        }

        debug!("📝 Registered /{}", path);
        let route = Route {
            path: path.clone(),
            description,
            schema,
            policy,
            deferred: false,
            handler,
        };
        match self.routes.entry(path) {
            Entry::Occupied(mut slot) => {
                slot.insert(route);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(route),
        }
    }

    pub fn resolve(&self, path: &str) -> Option<&Route<C>> {
        self.routes.get(path)
    }

    /// Routes in registration order.
    pub fn routes(&self) -> impl Iterator<Item = &Route<C>> {
        self.order.iter().filter_map(|path| self.routes.get(path))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Validates the arguments and runs the handler. Never fails: every
    /// outcome is a reply.
    pub async fn dispatch(&self, ctx: &C, request: &CommandRequest) -> Reply {
        let Some(route) = self.resolve(&request.path) else {
            return BotError::UnknownCommand(request.path.clone()).into();
        };

        let args = match route.schema.validate(&request.args) {
            Ok(args) => args,
            Err(e) => {
                debug!("/{} rejected: {}", request.path, e);
                return e.into();
            }
        };

        let outcome = AssertUnwindSafe(route.handler.handle(ctx, request, args))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => match e.downcast::<BotError>() {
                Ok(user_error) => {
                    debug!("/{} ended with {:?}", request.path, user_error);
                    user_error.into()
                }
                Err(e) => {
                    error!("❌ /{} failed for {}: {:?}", request.path, request.user_id, e);
                    BotError::HandlerFailure.into()
                }
            },
            Err(panic) => {
                error!(
                    "💥 /{} panicked for {}: {}",
                    request.path,
                    request.user_id,
                    panic_message(panic.as_ref())
                );
                BotError::HandlerFailure.into()
            }
        }
    }
}

/// Gate, then router.
pub struct Dispatcher<C> {
    gate: Arc<CommandGate>,
    router: CommandRouter<C>,
}

impl<C: Send + Sync> Dispatcher<C> {
    pub fn new(gate: Arc<CommandGate>, router: CommandRouter<C>) -> Self {
        Self { gate, router }
    }

    pub fn router(&self) -> &CommandRouter<C> {
        &self.router
    }

    pub fn gate(&self) -> &CommandGate {
        &self.gate
    }

    pub async fn dispatch(&self, ctx: &C, request: &CommandRequest) -> Reply {
        info!(
            "⚡ /{} by {} ({}) in {:?}",
            request.path, request.user_name, request.user_id, request.guild_id
        );

        let Some(route) = self.router.resolve(&request.path) else {
            warn!("❓ Unknown command /{}", request.path);
            return BotError::UnknownCommand(request.path.clone()).into();
        };

        match self.gate.admit(request, &route.policy) {
            Admission::Allow => self.router.dispatch(ctx, request).await,
            Admission::Deny(reason) => reason.into(),
        }
    }
}

fn normalize(path: &str) -> String {
    path.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
