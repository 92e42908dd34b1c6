//! Party and guild state shared between field hosts.
//!
//! Every channel process hosts its own fields, so party/guild records live
//! in a shared cache and changes are fanned out over a message bus. The
//! field engine only talks to that substrate through `SocialSync`.
//! `LocalSocialRegistry` is the in-process implementation used when all
//! channels run in one process, and by tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

pub type PartyId = u32;
pub type GuildId = u32;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("party not found: {0}")]
    PartyNotFound(PartyId),

    #[error("guild not found: {0}")]
    GuildNotFound(GuildId),

    #[error("character {character_id} is not a member of {group}")]
    NotAMember { group: String, character_id: u32 },

    #[error("social sync unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartyMember {
    pub character_id: u32,
    pub name: String,
    /// `-1` while the member is offline.
    pub channel_id: i32,
    pub field_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartySnapshot {
    pub id: PartyId,
    pub boss_id: u32,
    pub members: Vec<PartyMember>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildMember {
    pub character_id: u32,
    pub name: String,
    pub level: u8,
    pub job: i16,
    pub online: bool,
    /// Set when the member's level/job on record may be stale.
    pub inactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSnapshot {
    pub id: GuildId,
    pub name: String,
    pub members: Vec<GuildMember>,
}

impl GuildSnapshot {
    pub fn member(&self, character_id: u32) -> Option<&GuildMember> {
        self.members.iter().find(|m| m.character_id == character_id)
    }
}

/// Change notifications published on the bus after the shared record is
/// updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocialEvent {
    PartyLocation { party: PartyId, character_id: u32, channel_id: i32, field_id: u32 },
    GuildPresence { guild: GuildId, character_id: u32, online: bool },
    GuildAttributes { guild: GuildId, character_id: u32, level: u8, job: i16 },
}

/// Distributed sync collaborator. Every call is awaited to completion by
/// the field entry protocol and must be safe to repeat.
#[async_trait]
pub trait SocialSync: Send + Sync {
    async fn update_membership_location(
        &self,
        party: PartyId,
        character_id: u32,
        channel_id: i32,
        field_id: u32,
    ) -> Result<(), SyncError>;

    async fn bootstrap_party_view(&self, party: PartyId) -> Result<PartySnapshot, SyncError>;

    async fn bootstrap_guild_view(&self, guild: GuildId) -> Result<GuildSnapshot, SyncError>;

    async fn notify_presence(
        &self,
        guild: GuildId,
        character_id: u32,
        online: bool,
    ) -> Result<(), SyncError>;

    async fn notify_attribute_change(
        &self,
        guild: GuildId,
        character_id: u32,
        level: u8,
        job: i16,
    ) -> Result<(), SyncError>;
}

pub struct LocalSocialRegistry {
    parties: RwLock<HashMap<PartyId, PartySnapshot>>,
    guilds: RwLock<HashMap<GuildId, GuildSnapshot>>,
    events: broadcast::Sender<SocialEvent>,
}

impl LocalSocialRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            parties: RwLock::new(HashMap::new()),
            guilds: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SocialEvent> {
        self.events.subscribe()
    }

    pub async fn insert_party(&self, party: PartySnapshot) {
        self.parties.write().await.insert(party.id, party);
    }

    pub async fn insert_guild(&self, guild: GuildSnapshot) {
        self.guilds.write().await.insert(guild.id, guild);
    }

    pub async fn party(&self, id: PartyId) -> Option<PartySnapshot> {
        self.parties.read().await.get(&id).cloned()
    }

    pub async fn guild(&self, id: GuildId) -> Option<GuildSnapshot> {
        self.guilds.read().await.get(&id).cloned()
    }

    fn publish(&self, event: SocialEvent) {
        // No subscribers is fine; the record is already updated.
        let _ = self.events.send(event);
    }
}

impl Default for LocalSocialRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SocialSync for LocalSocialRegistry {
    async fn update_membership_location(
        &self,
        party: PartyId,
        character_id: u32,
        channel_id: i32,
        field_id: u32,
    ) -> Result<(), SyncError> {
        {
            let mut parties = self.parties.write().await;
            let record = parties.get_mut(&party).ok_or(SyncError::PartyNotFound(party))?;
            let member = record
                .members
                .iter_mut()
                .find(|m| m.character_id == character_id)
                .ok_or_else(|| SyncError::NotAMember { group: format!("party {party}"), character_id })?;
            member.channel_id = channel_id;
            member.field_id = field_id;
        }
        tracing::debug!(
            "[social] [party_location] party={} char={} channel={} field={}",
            party, character_id, channel_id, field_id
        );
        self.publish(SocialEvent::PartyLocation { party, character_id, channel_id, field_id });
        Ok(())
    }

    async fn bootstrap_party_view(&self, party: PartyId) -> Result<PartySnapshot, SyncError> {
        self.party(party).await.ok_or(SyncError::PartyNotFound(party))
    }

    async fn bootstrap_guild_view(&self, guild: GuildId) -> Result<GuildSnapshot, SyncError> {
        self.guild(guild).await.ok_or(SyncError::GuildNotFound(guild))
    }

    async fn notify_presence(
        &self,
        guild: GuildId,
        character_id: u32,
        online: bool,
    ) -> Result<(), SyncError> {
        {
            let mut guilds = self.guilds.write().await;
            let record = guilds.get_mut(&guild).ok_or(SyncError::GuildNotFound(guild))?;
            let member = record
                .members
                .iter_mut()
                .find(|m| m.character_id == character_id)
                .ok_or_else(|| SyncError::NotAMember { group: format!("guild {guild}"), character_id })?;
            member.online = online;
        }
        self.publish(SocialEvent::GuildPresence { guild, character_id, online });
        Ok(())
    }

    async fn notify_attribute_change(
        &self,
        guild: GuildId,
        character_id: u32,
        level: u8,
        job: i16,
    ) -> Result<(), SyncError> {
        {
            let mut guilds = self.guilds.write().await;
            let record = guilds.get_mut(&guild).ok_or(SyncError::GuildNotFound(guild))?;
            let member = record
                .members
                .iter_mut()
                .find(|m| m.character_id == character_id)
                .ok_or_else(|| SyncError::NotAMember { group: format!("guild {guild}"), character_id })?;
            member.level = level;
            member.job = job;
            member.inactive = false;
        }
        self.publish(SocialEvent::GuildAttributes { guild, character_id, level, job });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn party() -> PartySnapshot {
        PartySnapshot {
            id: 7,
            boss_id: 1,
            members: vec![
                PartyMember { character_id: 1, name: "Alpha".into(), channel_id: -1, field_id: 0 },
                PartyMember { character_id: 2, name: "Beta".into(), channel_id: 3, field_id: 100 },
            ],
        }
    }

    #[tokio::test]
    async fn test_location_update_is_idempotent() {
        let registry = LocalSocialRegistry::new();
        registry.insert_party(party()).await;
        let mut events = registry.subscribe();

        for _ in 0..2 {
            registry.update_membership_location(7, 1, 2, 100000000).await.unwrap();
        }

        let record = registry.party(7).await.unwrap();
        assert_eq!(record.members[0].channel_id, 2);
        assert_eq!(record.members[0].field_id, 100000000);
        assert_eq!(
            events.recv().await.unwrap(),
            SocialEvent::PartyLocation { party: 7, character_id: 1, channel_id: 2, field_id: 100000000 }
        );
    }

    #[tokio::test]
    async fn test_unknown_party_and_member() {
        let registry = LocalSocialRegistry::new();
        assert!(matches!(
            registry.update_membership_location(9, 1, 0, 0).await,
            Err(SyncError::PartyNotFound(9))
        ));

        registry.insert_party(party()).await;
        assert!(matches!(
            registry.update_membership_location(7, 99, 0, 0).await,
            Err(SyncError::NotAMember { character_id: 99, .. })
        ));
    }

    #[tokio::test]
    async fn test_attribute_change_clears_inactive() {
        let registry = LocalSocialRegistry::new();
        registry
            .insert_guild(GuildSnapshot {
                id: 3,
                name: "Crew".into(),
                members: vec![GuildMember {
                    character_id: 1,
                    name: "Alpha".into(),
                    level: 10,
                    job: 0,
                    online: false,
                    inactive: true,
                }],
            })
            .await;

        registry.notify_presence(3, 1, true).await.unwrap();
        registry.notify_attribute_change(3, 1, 30, 100).await.unwrap();

        let guild = registry.guild(3).await.unwrap();
        let member = guild.member(1).unwrap();
        assert!(member.online);
        assert!(!member.inactive);
        assert_eq!((member.level, member.job), (30, 100));
    }
}
