//! Gateway event handlers.
//!
//! `ready` registers the slash commands and starts the presence rotator once;
//! `interaction_create` turns each slash command into a core invocation.

use std::sync::{atomic::Ordering, Arc};

use serenity::{
    all::{Command, CommandInteraction, Interaction, Ready},
    async_trait,
    prelude::*,
};
use tracing::{error, info, warn};

use ctfbot_core::presence::PresenceRotator;

use crate::{router::AppState, DiscordPresence, DiscordResponder};

mod ask;
pub mod commands;

use commands::ParsedCommand;

const BANNER: &str = r"
  ____ _____ _____ ____   ___ _____
 / ___|_   _|  ___| __ ) / _ \_   _|
| |     | | | |_  |  _ \| | | || |
| |___  | | |  _| | |_) | |_| || |
 \____| |_| |_|   |____/ \___/ |_|
";

pub struct Handler {
    state: Arc<AppState>,
}

impl Handler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    fn start_rotator(&self, ctx: &Context) {
        if self.state.rotator_started.swap(true, Ordering::SeqCst) {
            return; // reconnects fire `ready` again
        }

        let cfg = &self.state.cfg;
        let port = Arc::new(DiscordPresence::new(
            ctx.shard.clone(),
            ctx.cache.clone(),
            &cfg.discord_token,
        ));
        let rotator = PresenceRotator::new(cfg.statuses.clone(), cfg.presence_interval);
        info!(
            statuses = cfg.statuses.len(),
            interval_secs = rotator.interval().as_secs(),
            "starting presence rotator"
        );
        tokio::spawn(rotator.run(port, self.state.cancel.child_token()));
    }

    async fn dispatch(&self, ctx: &Context, command: CommandInteraction) {
        let args = commands::collect_args(&command);
        let Some(parsed) = commands::parse(&command.data.name, &args) else {
            warn!(command = %command.data.name, "unknown command");
            return;
        };

        match parsed {
            ParsedCommand::Attachment(invocation) => {
                info!(
                    id = %invocation.id,
                    command = invocation.command.name(),
                    user = %command.user.name,
                    "command received"
                );
                let responder = DiscordResponder::new(ctx.http.clone(), command);
                let done = self.state.pipeline.run(invocation, &responder).await;
                info!(
                    id = %done.id,
                    command = done.command.name(),
                    state = ?done.state,
                    "invocation finished"
                );
            }
            ParsedCommand::Ask { model_id, question } => {
                ask::handle(&self.state, ctx, command, &model_id, &question).await;
            }
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{BANNER}");
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "logged in");

        let definitions = commands::definitions(self.state.ask.models());
        match Command::set_global_commands(&ctx.http, definitions).await {
            Ok(registered) => info!(count = registered.len(), "slash commands registered"),
            Err(e) => error!(error = %e, "failed to register slash commands"),
        }

        self.start_rotator(&ctx);
        info!("ready");
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            self.dispatch(&ctx, command).await;
        }
    }
}
