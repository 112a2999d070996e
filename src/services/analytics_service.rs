use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::database::store::{MessageStore, TimeWindow};
use crate::error::Result;
use crate::models::conversation::{Channel, Conversation};
use crate::models::message::{Direction, Message};

/// How inbound messages are paired with replies when measuring response
/// time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PairingPolicy {
    /// Every inbound pairs with the earliest later outbound; one reply may
    /// answer several inbound messages.
    #[default]
    AnyReply,
    /// A reply is consumed by the first inbound that claims it.
    OneToOne,
}

impl PairingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairingPolicy::AnyReply => "any_reply",
            PairingPolicy::OneToOne => "one_to_one",
        }
    }
}

impl fmt::Display for PairingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PairingPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any_reply" => Ok(PairingPolicy::AnyReply),
            "one_to_one" => Ok(PairingPolicy::OneToOne),
            other => Err(format!("unknown pairing policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ChannelMetrics {
    pub channel: Channel,
    #[serde(flatten)]
    pub counts: MetricsTotals,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct MetricsTotals {
    pub total_conversations: u64,
    pub total_messages: u64,
    pub inbound_messages: u64,
    pub outbound_messages: u64,
    pub automated_replies: u64,
    pub unread_total: u64,
    /// Mean seconds from an inbound message to its reply. `None` when no
    /// inbound message in the window was answered.
    pub avg_response_secs: Option<f64>,
    pub response_samples: u64,
    #[serde(skip)]
    response_secs_sum: f64,
}

impl MetricsTotals {
    fn add_sample(&mut self, secs: f64) {
        self.response_samples += 1;
        self.response_secs_sum += secs;
    }

    fn absorb(&mut self, other: &MetricsTotals) {
        self.total_conversations += other.total_conversations;
        self.total_messages += other.total_messages;
        self.inbound_messages += other.inbound_messages;
        self.outbound_messages += other.outbound_messages;
        self.automated_replies += other.automated_replies;
        self.unread_total += other.unread_total;
        self.response_samples += other.response_samples;
        self.response_secs_sum += other.response_secs_sum;
    }

    fn finish(mut self) -> Self {
        self.avg_response_secs = if self.response_samples == 0 {
            None
        } else {
            Some(self.response_secs_sum / self.response_samples as f64)
        };
        self
    }

    fn is_empty(&self) -> bool {
        self.total_conversations == 0 && self.total_messages == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Metrics {
    pub account_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub pairing: PairingPolicy,
    /// Channels with neither conversations nor messages are left out.
    pub channels: Vec<ChannelMetrics>,
    pub totals: MetricsTotals,
}

#[derive(Clone)]
pub struct AnalyticsService {
    store: Arc<dyn MessageStore>,
    pairing: PairingPolicy,
}

impl AnalyticsService {
    pub fn new(store: Arc<dyn MessageStore>, pairing: PairingPolicy) -> Self {
        Self { store, pairing }
    }

    /// Read-only snapshot over `window`, optionally limited to one channel.
    pub async fn compute_metrics(
        &self,
        account_id: Uuid,
        channel: Option<Channel>,
        window: TimeWindow,
    ) -> Result<Metrics> {
        let conversations = self
            .store
            .conversations_in_window(account_id, channel, &window)
            .await?;
        let messages = self
            .store
            .messages_in_window(account_id, channel, &window)
            .await?;
        debug!(
            %account_id,
            conversations = conversations.len(),
            messages = messages.len(),
            "Computing metrics"
        );

        let (channels, totals) = aggregate(&conversations, &messages, self.pairing);
        Ok(Metrics {
            account_id,
            start: window.start,
            end: window.end,
            pairing: self.pairing,
            channels,
            totals,
        })
    }
}

/// Response-time samples in seconds for one conversation's messages.
pub fn response_samples(messages: &[&Message], policy: PairingPolicy) -> Vec<f64> {
    let mut inbound: Vec<DateTime<Utc>> = Vec::new();
    let mut outbound: Vec<DateTime<Utc>> = Vec::new();
    for message in messages {
        match message.direction {
            Direction::FromContact => inbound.push(message.created_at),
            Direction::FromAccount => outbound.push(message.created_at),
        }
    }
    inbound.sort();
    outbound.sort();

    let secs =
        |from: DateTime<Utc>, to: DateTime<Utc>| (to - from).num_milliseconds() as f64 / 1000.0;
    let mut samples = Vec::new();
    match policy {
        PairingPolicy::AnyReply => {
            for at in inbound {
                let next = outbound.partition_point(|out| *out <= at);
                if let Some(reply) = outbound.get(next) {
                    samples.push(secs(at, *reply));
                }
            }
        }
        PairingPolicy::OneToOne => {
            let mut cursor = 0;
            for at in inbound {
                while cursor < outbound.len() && outbound[cursor] <= at {
                    cursor += 1;
                }
                let Some(reply) = outbound.get(cursor) else {
                    break;
                };
                samples.push(secs(at, *reply));
                cursor += 1;
            }
        }
    }
    samples
}

/// Per-channel breakdown plus overall totals. The overall average is the
/// mean over every sample, not a mean of channel averages.
pub fn aggregate(
    conversations: &[Conversation],
    messages: &[Message],
    policy: PairingPolicy,
) -> (Vec<ChannelMetrics>, MetricsTotals) {
    let mut per_channel: BTreeMap<Channel, MetricsTotals> = BTreeMap::new();

    for conversation in conversations {
        let entry = per_channel.entry(conversation.channel).or_default();
        entry.total_conversations += 1;
        entry.unread_total += conversation.unread_count.max(0) as u64;
    }

    let mut by_conversation: HashMap<Uuid, Vec<&Message>> = HashMap::new();
    for message in messages {
        let entry = per_channel.entry(message.channel).or_default();
        entry.total_messages += 1;
        match message.direction {
            Direction::FromContact => entry.inbound_messages += 1,
            Direction::FromAccount => {
                entry.outbound_messages += 1;
                if message.is_automated_reply {
                    entry.automated_replies += 1;
                }
            }
        }
        by_conversation
            .entry(message.conversation_id)
            .or_default()
            .push(message);
    }

    for thread in by_conversation.values() {
        let channel = thread[0].channel;
        let entry = per_channel.entry(channel).or_default();
        for secs in response_samples(thread, policy) {
            entry.add_sample(secs);
        }
    }

    let mut totals = MetricsTotals::default();
    let channels = per_channel
        .into_iter()
        .filter(|(_, counts)| !counts.is_empty())
        .map(|(channel, counts)| {
            totals.absorb(&counts);
            ChannelMetrics {
                channel,
                counts: counts.finish(),
            }
        })
        .collect();
    (channels, totals.finish())
}
