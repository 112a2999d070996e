use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::store::MessageStore;
use crate::error::Result;
use crate::models::conversation::{Channel, Conversation, IdentityBackfill, NewConversation};
use crate::models::inbound_event::SenderIdentity;
use crate::services::transport::{bounded, ProfileSource};
use crate::utils::phone::is_phone_shaped;

/// Lowest heuristic score that may attach an event to an existing
/// conversation.
pub const MIN_MATCH_SCORE: u32 = 2;
/// Display name equal to the hint, ignoring case.
pub const SCORE_EXACT_NAME: u32 = 3;
/// Name or legacy id contains the display-name hint.
pub const SCORE_CONTAINS_HINT: u32 = 2;
/// Name, username or legacy id contains the sender's handle.
pub const SCORE_CONTAINS_HANDLE: u32 = 2;
/// Shorter hints match too much to be trusted.
pub const MIN_HINT_LEN: usize = 3;

/// Which step of the resolution found the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPath {
    NativeId,
    SubscriberId,
    LegacyId,
    Heuristic,
    SoleCandidate,
    Created,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub conversation: Conversation,
    pub matched_by: MatchPath,
}

/// Finds or creates the conversation an inbound sender belongs to.
///
/// Lookup order, first hit wins: channel-native id, subscriber-platform id,
/// legacy display id, heuristic scoring over conversations that still lack
/// a native id, then creation. Any match found without the native id gets
/// the missing identifiers written back so the next event takes the first
/// path.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn MessageStore>,
    profiles: Option<Arc<dyn ProfileSource>>,
    profile_timeout: Duration,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            profiles: None,
            profile_timeout: Duration::from_secs(5),
        }
    }

    /// Looks up public profiles for senders that arrive with a bare native
    /// id, so the heuristic step has a name to work with.
    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileSource>, timeout: Duration) -> Self {
        self.profiles = Some(profiles);
        self.profile_timeout = timeout;
        self
    }

    pub async fn resolve(
        &self,
        account_id: Uuid,
        channel: Channel,
        sender: &SenderIdentity,
    ) -> Result<Resolution> {
        if let Some(native_id) = sender.channel_native_id.as_deref() {
            if let Some(found) = self
                .store
                .find_by_native_id(account_id, channel, native_id)
                .await?
            {
                return self.settle(found, sender, MatchPath::NativeId).await;
            }
        }

        if let Some(subscriber_id) = sender.subscriber_platform_id.as_deref() {
            if let Some(found) = self
                .store
                .find_by_subscriber_id(account_id, subscriber_id)
                .await?
                .filter(|c| c.channel == channel && !conflicts(c, sender))
            {
                return self.settle(found, sender, MatchPath::SubscriberId).await;
            }
        }

        for legacy_id in legacy_candidates(channel, sender) {
            if let Some(found) = self
                .store
                .find_by_legacy_id(account_id, &legacy_id)
                .await?
                .filter(|c| c.channel == channel && !conflicts(c, sender))
            {
                return self.settle(found, sender, MatchPath::LegacyId).await;
            }
        }

        let sender = self.enrich(channel, sender).await;

        let candidates: Vec<Conversation> = self
            .store
            .unidentified_conversations(account_id, channel)
            .await?
            .into_iter()
            .filter(|c| !conflicts(c, &sender))
            .collect();

        if let Some(best) = best_candidate(&candidates, &sender) {
            debug!(conversation_id = %best.id, "Heuristic identity match");
            return self
                .settle(best.clone(), &sender, MatchPath::Heuristic)
                .await;
        }
        if let [only] = candidates.as_slice() {
            if only.has_no_identity() {
                debug!(conversation_id = %only.id, "Attaching to sole unidentified conversation");
                return self
                    .settle(only.clone(), &sender, MatchPath::SoleCandidate)
                    .await;
            }
        }

        self.create(account_id, channel, &sender).await
    }

    async fn create(
        &self,
        account_id: Uuid,
        channel: Channel,
        sender: &SenderIdentity,
    ) -> Result<Resolution> {
        let synthesized = synthesized_legacy_id(channel, sender);
        let legacy_display_id = match sender.legacy_display_id.clone() {
            // A legacy id held by another channel stays with that channel.
            Some(legacy) => match self.store.find_by_legacy_id(account_id, &legacy).await? {
                Some(other) if other.channel != channel => synthesized,
                _ => legacy,
            },
            None => synthesized,
        };
        let display_name = sender
            .display_name
            .clone()
            .or_else(|| sender.username.clone())
            .unwrap_or_else(|| legacy_display_id.clone());

        let conversation = self
            .store
            .insert_conversation(NewConversation {
                account_id,
                channel,
                channel_native_id: sender.channel_native_id.clone(),
                legacy_display_id,
                subscriber_platform_id: sender.subscriber_platform_id.clone(),
                display_name,
                username: sender.username.clone(),
                profile_image_url: sender.profile_image_url.clone(),
            })
            .await?;
        info!(
            conversation_id = %conversation.id,
            %channel,
            "Conversation created"
        );
        // A concurrent insert may have won; its row can still lack our ids.
        self.settle(conversation, sender, MatchPath::Created).await
    }

    /// Writes identifiers the matched row is missing. When the native id
    /// turns out to belong to another row already, that row wins.
    async fn settle(
        &self,
        conversation: Conversation,
        sender: &SenderIdentity,
        matched_by: MatchPath,
    ) -> Result<Resolution> {
        let backfill = IdentityBackfill {
            channel_native_id: sender.channel_native_id.clone(),
            subscriber_platform_id: sender.subscriber_platform_id.clone(),
            username: sender.username.clone(),
            profile_image_url: sender.profile_image_url.clone(),
        }
        .missing_from(&conversation);

        if backfill.is_empty() {
            return Ok(Resolution {
                conversation,
                matched_by,
            });
        }

        match self.store.backfill_identity(conversation.id, &backfill).await? {
            Some(updated) => {
                if backfill.channel_native_id.is_some() {
                    info!(
                        conversation_id = %updated.id,
                        matched_by = ?matched_by,
                        "Backfilled channel-native id"
                    );
                }
                Ok(Resolution {
                    conversation: updated,
                    matched_by,
                })
            }
            None => {
                let native_id = backfill.channel_native_id.as_deref().unwrap_or_default();
                warn!(
                    conversation_id = %conversation.id,
                    "Native id already owned by another conversation"
                );
                let owner = self
                    .store
                    .find_by_native_id(conversation.account_id, conversation.channel, native_id)
                    .await?
                    .unwrap_or(conversation);
                Ok(Resolution {
                    conversation: owner,
                    matched_by: MatchPath::NativeId,
                })
            }
        }
    }

    async fn enrich(&self, channel: Channel, sender: &SenderIdentity) -> SenderIdentity {
        let mut enriched = sender.clone();
        let (Some(profiles), Some(native_id)) =
            (&self.profiles, sender.channel_native_id.as_deref())
        else {
            return enriched;
        };
        if sender.display_name.is_some() && sender.username.is_some() {
            return enriched;
        }

        match bounded(
            self.profile_timeout,
            profiles.fetch_profile(channel, native_id),
        )
        .await
        {
            Ok(Some(profile)) => {
                enriched.display_name = enriched.display_name.or(profile.name);
                enriched.username = enriched.username.or(profile.username);
                enriched.profile_image_url =
                    enriched.profile_image_url.or(profile.profile_image_url);
            }
            Ok(None) => {}
            Err(e) => warn!(%channel, error = %e.detail, "Profile lookup failed"),
        }
        enriched
    }
}

/// True when the conversation already carries an identifier that disagrees
/// with the sender's. Two different phone numbers always disagree.
fn conflicts(conversation: &Conversation, sender: &SenderIdentity) -> bool {
    let differs = |stored: &Option<String>, incoming: &Option<String>| {
        matches!((stored, incoming), (Some(a), Some(b)) if a != b)
    };
    differs(&conversation.channel_native_id, &sender.channel_native_id)
        || differs(
            &conversation.subscriber_platform_id,
            &sender.subscriber_platform_id,
        )
        || sender
            .legacy_display_id
            .as_deref()
            .is_some_and(|legacy| different_numbers(&conversation.legacy_display_id, legacy))
}

fn different_numbers(a: &str, b: &str) -> bool {
    let digits = |s: &str| -> String { s.chars().filter(|c| c.is_ascii_digit()).collect() };
    is_phone_shaped(a) && is_phone_shaped(b) && digits(a) != digits(b)
}

/// `{prefix}:{id}` from the most stable identifier available.
pub fn synthesized_legacy_id(channel: Channel, sender: &SenderIdentity) -> String {
    let key = sender
        .channel_native_id
        .as_deref()
        .or(sender.subscriber_platform_id.as_deref())
        .or(sender.username.as_deref())
        .or(sender.display_name.as_deref())
        .unwrap_or("unknown");
    format!("{}:{}", channel.legacy_prefix(), key)
}

fn legacy_candidates(channel: Channel, sender: &SenderIdentity) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let mut push = |id: String| {
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    };
    if let Some(legacy) = &sender.legacy_display_id {
        push(legacy.clone());
    }
    for key in [
        &sender.channel_native_id,
        &sender.subscriber_platform_id,
        &sender.username,
    ]
    .into_iter()
    .flatten()
    {
        push(format!("{}:{}", channel.legacy_prefix(), key));
    }
    ids
}

fn usable(hint: Option<&str>) -> Option<String> {
    hint.map(|h| h.trim().trim_start_matches('@').to_lowercase())
        .filter(|h| h.chars().count() >= MIN_HINT_LEN)
}

/// Bounded score of how well a conversation's text fields match the
/// sender's name and handle.
pub fn match_score(conversation: &Conversation, sender: &SenderIdentity) -> u32 {
    let name = conversation.display_name.trim().to_lowercase();
    let legacy = conversation.legacy_display_id.to_lowercase();
    let username = conversation
        .username
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();

    let mut score = 0;
    if let Some(hint) = usable(sender.display_name.as_deref()) {
        if name == hint {
            score += SCORE_EXACT_NAME;
        } else if name.contains(&hint) || legacy.contains(&hint) {
            score += SCORE_CONTAINS_HINT;
        }
    }
    if let Some(handle) = usable(sender.username.as_deref()) {
        if name.contains(&handle) || username.contains(&handle) || legacy.contains(&handle) {
            score += SCORE_CONTAINS_HANDLE;
        }
    }
    score
}

/// Highest score at or above [`MIN_MATCH_SCORE`]; ties go to the most recent
/// activity, then the lowest id.
pub fn best_candidate<'a>(
    candidates: &'a [Conversation],
    sender: &SenderIdentity,
) -> Option<&'a Conversation> {
    candidates
        .iter()
        .map(|c| (match_score(c, sender), c))
        .filter(|(score, _)| *score >= MIN_MATCH_SCORE)
        .max_by(|(sa, a), (sb, b)| {
            sa.cmp(sb)
                .then(a.last_message_at.cmp(&b.last_message_at))
                .then(b.id.cmp(&a.id))
        })
        .map(|(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryMessageStore;
    use crate::error::TransportError;
    use crate::services::transport::{ContactProfile, MockProfileSource};
    use chrono::{TimeZone, Utc};

    fn resolver(store: &Arc<MemoryMessageStore>) -> IdentityResolver {
        IdentityResolver::new(store.clone())
    }

    fn legacy_conversation(account_id: Uuid, legacy: &str, name: &str) -> NewConversation {
        NewConversation {
            account_id,
            channel: Channel::Instagram,
            channel_native_id: None,
            legacy_display_id: legacy.to_string(),
            subscriber_platform_id: None,
            display_name: name.to_string(),
            username: None,
            profile_image_url: None,
        }
    }

    fn native(id: &str) -> SenderIdentity {
        SenderIdentity {
            channel_native_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn creates_then_hits_native_id() {
        let store = Arc::new(MemoryMessageStore::new());
        let account = Uuid::new_v4();
        let sender = SenderIdentity {
            display_name: Some("Ana".into()),
            ..native("9001")
        };

        let first = resolver(&store)
            .resolve(account, Channel::Instagram, &sender)
            .await
            .unwrap();
        assert_eq!(first.matched_by, MatchPath::Created);
        assert_eq!(first.conversation.legacy_display_id, "ig:9001");

        let second = resolver(&store)
            .resolve(account, Channel::Instagram, &sender)
            .await
            .unwrap();
        assert_eq!(second.matched_by, MatchPath::NativeId);
        assert_eq!(second.conversation.id, first.conversation.id);
    }

    #[tokio::test]
    async fn legacy_match_backfills_native_id_once() {
        let store = Arc::new(MemoryMessageStore::new());
        let account = Uuid::new_v4();
        let existing = store
            .insert_conversation(NewConversation {
                channel: Channel::WhatsApp,
                ..legacy_conversation(account, "5511987654321", "Carlos")
            })
            .await
            .unwrap();

        let sender = SenderIdentity {
            channel_native_id: Some("5511987654321".into()),
            legacy_display_id: Some("5511987654321".into()),
            ..Default::default()
        };
        let by_legacy = resolver(&store)
            .resolve(account, Channel::WhatsApp, &sender)
            .await
            .unwrap();
        assert_eq!(by_legacy.matched_by, MatchPath::LegacyId);
        assert_eq!(by_legacy.conversation.id, existing.id);
        assert_eq!(
            by_legacy.conversation.channel_native_id.as_deref(),
            Some("5511987654321")
        );

        let by_native = resolver(&store)
            .resolve(account, Channel::WhatsApp, &sender)
            .await
            .unwrap();
        assert_eq!(by_native.matched_by, MatchPath::NativeId);
        assert_eq!(by_native.conversation.id, existing.id);
    }

    #[tokio::test]
    async fn subscriber_id_match_backfills_native_id() {
        let store = Arc::new(MemoryMessageStore::new());
        let account = Uuid::new_v4();
        let existing = store
            .insert_conversation(NewConversation {
                subscriber_platform_id: Some("555".into()),
                ..legacy_conversation(account, "ig:555", "Ana")
            })
            .await
            .unwrap();

        let sender = SenderIdentity {
            subscriber_platform_id: Some("555".into()),
            ..native("9001")
        };
        let resolved = resolver(&store)
            .resolve(account, Channel::Instagram, &sender)
            .await
            .unwrap();
        assert_eq!(resolved.matched_by, MatchPath::SubscriberId);
        assert_eq!(resolved.conversation.id, existing.id);
        assert_eq!(resolved.conversation.channel_native_id.as_deref(), Some("9001"));
    }

    #[tokio::test]
    async fn ambiguous_candidates_are_not_merged() {
        let store = Arc::new(MemoryMessageStore::new());
        let account = Uuid::new_v4();
        let a = store
            .insert_conversation(legacy_conversation(account, "ig:old-1", "Maria Clara"))
            .await
            .unwrap();
        let b = store
            .insert_conversation(legacy_conversation(account, "ig:old-2", "João"))
            .await
            .unwrap();

        let sender = SenderIdentity {
            display_name: Some("Pedro".into()),
            ..native("7007")
        };
        let resolved = resolver(&store)
            .resolve(account, Channel::Instagram, &sender)
            .await
            .unwrap();
        assert_eq!(resolved.matched_by, MatchPath::Created);
        assert_ne!(resolved.conversation.id, a.id);
        assert_ne!(resolved.conversation.id, b.id);
    }

    #[tokio::test]
    async fn heuristic_picks_scoring_candidate() {
        let store = Arc::new(MemoryMessageStore::new());
        let account = Uuid::new_v4();
        store
            .insert_conversation(legacy_conversation(account, "ig:old-1", "Maria Clara"))
            .await
            .unwrap();
        let joao = store
            .insert_conversation(legacy_conversation(account, "ig:old-2", "joao.silva"))
            .await
            .unwrap();

        let sender = SenderIdentity {
            username: Some("joao.silva".into()),
            ..native("7007")
        };
        let resolved = resolver(&store)
            .resolve(account, Channel::Instagram, &sender)
            .await
            .unwrap();
        assert_eq!(resolved.matched_by, MatchPath::Heuristic);
        assert_eq!(resolved.conversation.id, joao.id);
        assert_eq!(resolved.conversation.channel_native_id.as_deref(), Some("7007"));
    }

    #[tokio::test]
    async fn sole_identityless_candidate_is_used() {
        let store = Arc::new(MemoryMessageStore::new());
        let account = Uuid::new_v4();
        let only = store
            .insert_conversation(legacy_conversation(account, "ig:old-1", "Cliente"))
            .await
            .unwrap();

        let resolved = resolver(&store)
            .resolve(account, Channel::Instagram, &native("8008"))
            .await
            .unwrap();
        assert_eq!(resolved.matched_by, MatchPath::SoleCandidate);
        assert_eq!(resolved.conversation.id, only.id);
    }

    #[tokio::test]
    async fn new_number_never_joins_another_numbers_conversation() {
        let store = Arc::new(MemoryMessageStore::new());
        let account = Uuid::new_v4();
        let old = store
            .insert_conversation(NewConversation {
                channel: Channel::WhatsApp,
                ..legacy_conversation(account, "5511911111111", "Beatriz")
            })
            .await
            .unwrap();

        let sender = SenderIdentity {
            channel_native_id: Some("5511922222222".into()),
            legacy_display_id: Some("5511922222222".into()),
            display_name: Some("Beatriz".into()),
            ..Default::default()
        };
        let resolved = resolver(&store)
            .resolve(account, Channel::WhatsApp, &sender)
            .await
            .unwrap();
        assert_eq!(resolved.matched_by, MatchPath::Created);
        assert_ne!(resolved.conversation.id, old.id);
        assert_eq!(resolved.conversation.legacy_display_id, "5511922222222");

        let untouched = store.get_conversation(old.id).await.unwrap().unwrap();
        assert_eq!(untouched.channel_native_id, None);
    }

    #[test]
    fn phone_legacy_ids_conflict_only_when_numbers_differ() {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            channel: Channel::WhatsApp,
            channel_native_id: None,
            legacy_display_id: "+55 (11) 91111-1111".into(),
            subscriber_platform_id: None,
            display_name: "Beatriz".into(),
            username: None,
            profile_image_url: None,
            last_message_at: None,
            unread_count: 0,
            created_at: Utc::now(),
        };
        let with_legacy = |legacy: &str| SenderIdentity {
            legacy_display_id: Some(legacy.to_string()),
            ..Default::default()
        };
        assert!(!conflicts(&conversation, &with_legacy("5511911111111")));
        assert!(conflicts(&conversation, &with_legacy("5511922222222")));
        assert!(!conflicts(&conversation, &with_legacy("ig:beatriz")));
    }

    #[tokio::test]
    async fn profile_lookup_feeds_heuristic() {
        let store = Arc::new(MemoryMessageStore::new());
        let account = Uuid::new_v4();
        store
            .insert_conversation(legacy_conversation(account, "ig:old-1", "Maria Clara"))
            .await
            .unwrap();
        let bia = store
            .insert_conversation(legacy_conversation(account, "ig:old-2", "Beatriz Lima"))
            .await
            .unwrap();

        let mut profiles = MockProfileSource::new();
        profiles
            .expect_fetch_profile()
            .times(1)
            .returning(|_, _| {
                Ok(Some(ContactProfile {
                    name: Some("Beatriz Lima".into()),
                    username: Some("bia.lima".into()),
                    profile_image_url: None,
                }))
            });
        let resolver = IdentityResolver::new(store.clone())
            .with_profiles(Arc::new(profiles), Duration::from_secs(1));

        let resolved = resolver
            .resolve(account, Channel::Instagram, &native("4242"))
            .await
            .unwrap();
        assert_eq!(resolved.matched_by, MatchPath::Heuristic);
        assert_eq!(resolved.conversation.id, bia.id);
        assert_eq!(resolved.conversation.username.as_deref(), Some("bia.lima"));
    }

    #[tokio::test]
    async fn failed_profile_lookup_is_not_fatal() {
        let store = Arc::new(MemoryMessageStore::new());
        let mut profiles = MockProfileSource::new();
        profiles
            .expect_fetch_profile()
            .returning(|_, _| Err(TransportError::new("boom")));
        let resolver = IdentityResolver::new(store.clone())
            .with_profiles(Arc::new(profiles), Duration::from_secs(1));

        let resolved = resolver
            .resolve(Uuid::new_v4(), Channel::Messenger, &native("1"))
            .await
            .unwrap();
        assert_eq!(resolved.matched_by, MatchPath::Created);
        assert_eq!(resolved.conversation.display_name, "fb:1");
    }

    #[test]
    fn scoring_is_bounded_and_tie_break_is_deterministic() {
        let at = |secs| Some(Utc.timestamp_opt(secs, 0).unwrap());
        let base = Conversation {
            id: Uuid::nil(),
            account_id: Uuid::nil(),
            channel: Channel::Instagram,
            channel_native_id: None,
            legacy_display_id: "ig:ana".into(),
            subscriber_platform_id: None,
            display_name: "Ana".into(),
            username: Some("ana".into()),
            profile_image_url: None,
            last_message_at: at(10),
            unread_count: 0,
            created_at: Utc::now(),
        };
        let sender = SenderIdentity {
            display_name: Some("ana".into()),
            username: Some("@ana".into()),
            ..Default::default()
        };
        assert_eq!(
            match_score(&base, &sender),
            SCORE_EXACT_NAME + SCORE_CONTAINS_HANDLE
        );

        let newer = Conversation {
            id: Uuid::from_u128(2),
            last_message_at: at(20),
            ..base.clone()
        };
        let candidates = vec![base.clone(), newer.clone()];
        assert_eq!(best_candidate(&candidates, &sender).unwrap().id, newer.id);

        let short = SenderIdentity {
            display_name: Some("An".into()),
            ..Default::default()
        };
        assert_eq!(match_score(&base, &short), 0);
    }
}
