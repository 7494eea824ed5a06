// ABOUTME: Idle chatter: occasionally nudges a quiet channel during evening hours
// ABOUTME: Feeds a synthesized system message through the normal turn pipeline

use crate::config::Config;
use crate::coordinator::TurnCoordinator;
use crate::metrics;
use crate::traits::{Channel, ChatMessage};
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Author of synthesized chatter messages
pub const SYSTEM_AUTHOR: &str = "system";

/// When idle chatter is allowed to fire
#[derive(Debug, Clone)]
pub struct ChatterPolicy {
    pub poll: Duration,
    pub probability: f64,
    pub window_start_hour: u32,
    pub window_end_hour: u32,
    pub quiet: chrono::Duration,
    pub timezone: Tz,
    pub prompt: String,
}

impl ChatterPolicy {
    pub fn from_config(config: &Config) -> Self {
        let chatter = &config.chatter;
        Self {
            poll: Duration::from_secs(chatter.poll_secs),
            probability: chatter.probability,
            window_start_hour: chatter.window_start_hour,
            window_end_hour: chatter.window_end_hour,
            quiet: chrono::Duration::hours(chatter.quiet_hours),
            timezone: config.chatter_timezone(),
            prompt: chatter.prompt.clone(),
        }
    }

    /// Whether `hour` falls in `[start, end)`, wrapping past midnight when end < start
    pub fn in_window(&self, hour: u32) -> bool {
        let (start, end) = (self.window_start_hour, self.window_end_hour);
        if start <= end {
            start <= hour && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    /// Decide whether to chatter in a channel.
    ///
    /// `roll` is a uniform sample in `[0, 1)`. A channel the persona never
    /// spoke in does not qualify.
    pub fn should_chatter(
        &self,
        roll: f64,
        now: DateTime<Utc>,
        last_dispatch: Option<DateTime<Utc>>,
    ) -> bool {
        if roll >= self.probability {
            return false;
        }
        let local_hour = now.with_timezone(&self.timezone).hour();
        if !self.in_window(local_hour) {
            return false;
        }
        match last_dispatch {
            Some(last) => now - last >= self.quiet,
            None => false,
        }
    }
}

/// Background trigger bound to a coordinator
pub struct IdleChatter {
    coordinator: TurnCoordinator,
    policy: ChatterPolicy,
}

impl IdleChatter {
    pub fn new(coordinator: TurnCoordinator, policy: ChatterPolicy) -> Self {
        Self {
            coordinator,
            policy,
        }
    }

    pub fn policy(&self) -> &ChatterPolicy {
        &self.policy
    }

    /// One poll: roll the dice, pick a random known channel and maybe chatter
    pub async fn tick(&self) -> Option<String> {
        let roll: f64 = rand::thread_rng().gen();
        let channels = self.coordinator.surface().channels().await;
        let channel = channels.choose(&mut rand::thread_rng())?.clone();

        self.tick_with(roll, &channel, Utc::now())
            .then(|| channel.channel_id)
    }

    /// Deterministic poll used by [`IdleChatter::tick`]; returns whether a turn was scheduled
    pub fn tick_with(&self, roll: f64, channel: &Channel, now: DateTime<Utc>) -> bool {
        let last = self.coordinator.last_dispatch(&channel.channel_id);
        if !self.policy.should_chatter(roll, now, last) {
            return false;
        }

        tracing::info!(channel_id = %channel.channel_id, "Generating idle chatter");
        metrics::record_idle_chatter();

        let mut message =
            ChatMessage::new(&channel.channel_id, SYSTEM_AUTHOR, &self.policy.prompt).at(now);
        if channel.is_direct {
            message = message.direct();
        }
        self.coordinator.handle_message(message)
    }

    /// Poll forever on a fixed interval
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.policy.poll;
            let mut interval = tokio::time::interval_at(start, self.policy.poll);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }
}
