//! Periodic rotation of the bot's displayed status.

use std::{sync::Arc, time::Duration};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{ports::PresencePort, Result};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Playing,
    Watching,
    Listening,
    Competing,
}

/// One entry of the status table.
///
/// Tables come from configuration, so tags this build does not know about
/// deserialize into `Unrecognized` instead of failing the whole file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusDescriptor {
    Static {
        kind: ActivityKind,
        text: String,
    },
    #[serde(rename = "guild_count")]
    LiveGuildCount {
        kind: ActivityKind,
        #[serde(default = "default_guild_template")]
        template: String,
    },
    #[serde(rename = "user_count")]
    LiveUserCount {
        kind: ActivityKind,
        #[serde(default = "default_user_template")]
        template: String,
    },
    Custom {
        state: String,
    },
    Streaming {
        text: String,
        url: String,
    },
    #[serde(other)]
    Unrecognized,
}

fn default_guild_template() -> String {
    "{} guilds bombed".to_string()
}

fn default_user_template() -> String {
    "{} victims ratted".to_string()
}

/// A concrete presence update for the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Presence {
    Activity { kind: ActivityKind, name: String },
    Custom { state: String },
    Streaming { name: String, url: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Applied(Presence),
    Skipped,
}

fn fill(template: &str, count: impl std::fmt::Display) -> String {
    template.replacen("{}", &count.to_string(), 1)
}

pub fn default_table() -> Vec<StatusDescriptor> {
    use ActivityKind::*;

    let fixed = |kind: ActivityKind, text: &str| StatusDescriptor::Static {
        kind,
        text: text.to_string(),
    };
    let streaming = |text: &str| StatusDescriptor::Streaming {
        text: text.to_string(),
        url: "http://127.0.0.1/".to_string(),
    };

    vec![
        fixed(Playing, "DDoS Attack on various targets"),
        fixed(Watching, "the feds trace your VPN exit node"),
        fixed(Watching, "your ISP sell your browsing history"),
        fixed(Listening, "the sound of a dying hard drive"),
        fixed(Listening, "someone type 'rm -rf /' by accident"),
        fixed(Listening, "a sysadmin scream in the distance"),
        fixed(Listening, "NSA agents breathe into their microphones"),
        fixed(Listening, "your keystrokes with 99% accuracy"),
        fixed(Competing, "for the best phishing email of the year"),
        fixed(Competing, "to stay off a watchlist"),
        StatusDescriptor::Custom {
            state: "dHJ5IGhhcmRlcg==".to_string(),
        },
        StatusDescriptor::Custom {
            state: "U2VjdXJpdHkgdGhyb3VnaCBvYnNjdXJpdHk=".to_string(),
        },
        streaming("leaked government documents"),
        streaming("a ransomware negotiation"),
        streaming("NSA's internal emails"),
        StatusDescriptor::LiveGuildCount {
            kind: Watching,
            template: default_guild_template(),
        },
        StatusDescriptor::LiveUserCount {
            kind: Playing,
            template: default_user_template(),
        },
    ]
}

/// Build the presence for a descriptor, reading live counters only when the
/// descriptor needs them. `None` means the shape is not understood.
pub async fn resolve(
    descriptor: &StatusDescriptor,
    port: &dyn PresencePort,
) -> Result<Option<Presence>> {
    let presence = match descriptor {
        StatusDescriptor::Static { kind, text } => Presence::Activity {
            kind: *kind,
            name: text.clone(),
        },
        StatusDescriptor::LiveGuildCount { kind, template } => Presence::Activity {
            kind: *kind,
            name: fill(template, port.guild_count()),
        },
        StatusDescriptor::LiveUserCount { kind, template } => Presence::Activity {
            kind: *kind,
            name: fill(template, port.approximate_user_count().await?),
        },
        StatusDescriptor::Custom { state } => Presence::Custom {
            state: state.clone(),
        },
        StatusDescriptor::Streaming { text, url } => Presence::Streaming {
            name: text.clone(),
            url: url.clone(),
        },
        StatusDescriptor::Unrecognized => return Ok(None),
    };
    Ok(Some(presence))
}

pub struct PresenceRotator {
    table: Vec<StatusDescriptor>,
    interval: Duration,
}

impl PresenceRotator {
    pub fn new(table: Vec<StatusDescriptor>, interval: Duration) -> Self {
        Self { table, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn pick(&self) -> Option<StatusDescriptor> {
        self.table.choose(&mut rand::thread_rng()).cloned()
    }

    /// Pick one descriptor uniformly and apply it.
    pub async fn tick(&self, port: &dyn PresencePort) -> Result<TickOutcome> {
        let Some(descriptor) = self.pick() else {
            return Ok(TickOutcome::Skipped);
        };

        let Some(presence) = resolve(&descriptor, port).await? else {
            tracing::warn!(?descriptor, "unknown status format, skipping");
            return Ok(TickOutcome::Skipped);
        };

        port.set_presence(presence.clone()).await?;
        Ok(TickOutcome::Applied(presence))
    }

    /// Tick until `cancel` fires. A failed tick is logged and the loop goes on.
    pub async fn run(self, port: Arc<dyn PresencePort>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.tick(port.as_ref()).await {
                        Ok(TickOutcome::Applied(presence)) => {
                            tracing::debug!(?presence, "presence updated");
                        }
                        Ok(TickOutcome::Skipped) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "presence rotation failed");
                        }
                    }
                }
            }
        }

        tracing::info!("presence rotator stopped");
    }
}
