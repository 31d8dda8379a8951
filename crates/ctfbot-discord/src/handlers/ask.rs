use serenity::{all::CommandInteraction, prelude::*};

use crate::{router::AppState, DiscordResponder};

pub async fn handle(
    state: &AppState,
    ctx: &Context,
    command: CommandInteraction,
    model_id: &str,
    question: &str,
) {
    tracing::info!(model = model_id, user = %command.user.name, "ask received");
    let responder = DiscordResponder::new(ctx.http.clone(), command).with_ephemeral_errors();
    let outcome = state.ask.run(model_id, question, &responder).await;
    tracing::debug!(model = model_id, state = ?outcome, "ask finished");
}
