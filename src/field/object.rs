//! Field objects: users, mobs, NPCs and reactors.
//!
//! Pools and splits only care about identity, kind and position; the
//! kind-specific parts live in `ObjectBody`. The back-reference to the
//! owning field is weak and is only used for lookup.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::generator::FieldGenerator;
use super::split::SplitPos;
use super::Field;
use crate::conversation::ConversationSession;
use crate::network::{OutPacket, PacketSink, PacketWriter, SendError, SendOp};
use crate::social::{GuildId, PartyId};
use crate::template::{MobTemplate, NpcTemplate, Point, ReactorTemplate};

pub type ObjectId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    User,
    Mob,
    Npc,
    Reactor,
}

/// Where an object currently sits. `field` is dangling while unplaced.
struct Placement {
    position: Point,
    foothold: i16,
    field: Weak<Field>,
    split: Option<SplitPos>,
    controller: Option<ObjectId>,
}

pub struct FieldObj {
    id: AtomicU32,
    body: ObjectBody,
    placement: Mutex<Placement>,
    generator: Option<Weak<FieldGenerator>>,
}

pub enum ObjectBody {
    User(FieldUser),
    Mob(FieldMob),
    Npc(FieldNpc),
    Reactor(FieldReactor),
}

impl FieldObj {
    fn new(id: ObjectId, body: ObjectBody, position: Point, foothold: i16) -> Self {
        Self {
            id: AtomicU32::new(id),
            body,
            placement: Mutex::new(Placement {
                position,
                foothold,
                field: Weak::new(),
                split: None,
                controller: None,
            }),
            generator: None,
        }
    }

    /// A connected character. Its object id is the character id.
    pub fn user(user: FieldUser) -> Arc<Self> {
        let id = user.character_id;
        Arc::new(Self::new(id, ObjectBody::User(user), Point::default(), 0))
    }

    pub fn npc(npc: FieldNpc, position: Point, foothold: i16) -> Arc<Self> {
        Arc::new(Self::new(0, ObjectBody::Npc(npc), position, foothold))
    }

    pub fn mob(mob: FieldMob, position: Point, foothold: i16) -> Arc<Self> {
        Arc::new(Self::new(0, ObjectBody::Mob(mob), position, foothold))
    }

    pub fn reactor(reactor: FieldReactor, position: Point) -> Arc<Self> {
        Arc::new(Self::new(0, ObjectBody::Reactor(reactor), position, 0))
    }

    /// Same as the constructors above, but remembers the generator that
    /// produced the object so it can be told when the object leaves.
    pub(crate) fn generated(
        body: ObjectBody,
        position: Point,
        foothold: i16,
        generator: Weak<FieldGenerator>,
    ) -> Arc<Self> {
        let mut obj = Self::new(0, body, position, foothold);
        obj.generator = Some(generator);
        Arc::new(obj)
    }

    pub fn id(&self) -> ObjectId {
        self.id.load(Ordering::Acquire)
    }

    pub(crate) fn set_id(&self, id: ObjectId) {
        self.id.store(id, Ordering::Release);
    }

    pub fn kind(&self) -> ObjectKind {
        match self.body {
            ObjectBody::User(_) => ObjectKind::User,
            ObjectBody::Mob(_) => ObjectKind::Mob,
            ObjectBody::Npc(_) => ObjectKind::Npc,
            ObjectBody::Reactor(_) => ObjectKind::Reactor,
        }
    }

    pub fn body(&self) -> &ObjectBody {
        &self.body
    }

    pub fn as_user(&self) -> Option<&FieldUser> {
        match &self.body {
            ObjectBody::User(user) => Some(user),
            _ => None,
        }
    }

    pub fn as_mob(&self) -> Option<&FieldMob> {
        match &self.body {
            ObjectBody::Mob(mob) => Some(mob),
            _ => None,
        }
    }

    /// Mobs and NPCs are driven by a controlling client.
    pub fn is_controllable(&self) -> bool {
        matches!(self.body, ObjectBody::Mob(_) | ObjectBody::Npc(_))
    }

    pub fn position(&self) -> Point {
        self.placement.lock().position
    }

    pub fn foothold(&self) -> i16 {
        self.placement.lock().foothold
    }

    pub(crate) fn set_position(&self, position: Point, foothold: i16) {
        let mut placement = self.placement.lock();
        placement.position = position;
        placement.foothold = foothold;
    }

    /// The field this object is placed in, if any.
    pub fn field(&self) -> Option<Arc<Field>> {
        self.placement.lock().field.upgrade()
    }

    pub(crate) fn set_field(&self, field: Weak<Field>) {
        self.placement.lock().field = field;
    }

    pub fn split(&self) -> Option<SplitPos> {
        self.placement.lock().split
    }

    pub(crate) fn set_split(&self, split: Option<SplitPos>) {
        self.placement.lock().split = split;
    }

    pub fn controller(&self) -> Option<ObjectId> {
        self.placement.lock().controller
    }

    pub(crate) fn set_controller(&self, controller: Option<ObjectId>) {
        self.placement.lock().controller = controller;
    }

    pub fn generator(&self) -> Option<Arc<FieldGenerator>> {
        self.generator.as_ref().and_then(Weak::upgrade)
    }

    /// Only users have a connection; sending to anything else is a no-op.
    pub async fn send_packet(&self, packet: OutPacket) -> Result<(), SendError> {
        match &self.body {
            ObjectBody::User(user) => user.send_packet(packet).await,
            _ => Ok(()),
        }
    }

    /// Default spawn notification shown to watchers.
    pub fn enter_packet(&self) -> OutPacket {
        let (position, foothold) = {
            let p = self.placement.lock();
            (p.position, p.foothold)
        };
        match &self.body {
            ObjectBody::User(user) => {
                let state = user.state.lock();
                PacketWriter::new(SendOp::UserEnterField)
                    .u32(self.id())
                    .u8(state.level)
                    .str(&user.name)
                    .i16(state.job)
                    .point(position)
                    .i16(foothold)
                    .build()
            }
            ObjectBody::Mob(mob) => PacketWriter::new(SendOp::MobEnterField)
                .u32(self.id())
                .u32(mob.template.id)
                .point(position)
                .i16(foothold)
                .bool(mob.facing_left)
                .build(),
            ObjectBody::Npc(npc) => PacketWriter::new(SendOp::NpcEnterField)
                .u32(self.id())
                .u32(npc.template.id)
                .point(position)
                .bool(npc.facing_left)
                .i16(foothold)
                .i32(npc.rx0)
                .i32(npc.rx1)
                .build(),
            ObjectBody::Reactor(reactor) => PacketWriter::new(SendOp::ReactorEnterField)
                .u32(self.id())
                .u32(reactor.template.id)
                .u8(reactor.state())
                .point(position)
                .bool(reactor.facing_left)
                .str(&reactor.name)
                .build(),
        }
    }

    /// Default despawn notification shown to watchers.
    pub fn leave_packet(&self) -> OutPacket {
        let op = match self.kind() {
            ObjectKind::User => SendOp::UserLeaveField,
            ObjectKind::Mob => SendOp::MobLeaveField,
            ObjectKind::Npc => SendOp::NpcLeaveField,
            ObjectKind::Reactor => SendOp::ReactorLeaveField,
        };
        PacketWriter::new(op).u32(self.id()).build()
    }
}

impl std::fmt::Debug for FieldObj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldObj")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("position", &self.position())
            .finish()
    }
}

/// Character data the field engine reads or updates.
#[derive(Debug, Clone)]
pub struct CharacterState {
    pub level: u8,
    pub job: i16,
    pub field_id: u32,
    /// Last-known portal, used as the entry point on the next field change.
    pub field_portal: u8,
    pub party: Option<PartyId>,
    pub guild: Option<GuildId>,
}

impl Default for CharacterState {
    fn default() -> Self {
        Self { level: 1, job: 0, field_id: 0, field_portal: 0, party: None, guild: None }
    }
}

pub struct FieldUser {
    character_id: u32,
    name: String,
    socket: Arc<dyn PacketSink>,
    state: Mutex<CharacterState>,
    instantiated: AtomicBool,
    watching: Mutex<[Option<SplitPos>; 9]>,
    conversation: Mutex<Option<Arc<ConversationSession>>>,
}

impl FieldUser {
    pub fn new(
        character_id: u32,
        name: impl Into<String>,
        socket: Arc<dyn PacketSink>,
        state: CharacterState,
    ) -> Self {
        Self {
            character_id,
            name: name.into(),
            socket,
            state: Mutex::new(state),
            instantiated: AtomicBool::new(false),
            watching: Mutex::new([None; 9]),
            conversation: Mutex::new(None),
        }
    }

    pub fn character_id(&self) -> u32 {
        self.character_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn socket(&self) -> &Arc<dyn PacketSink> {
        &self.socket
    }

    pub async fn send_packet(&self, packet: OutPacket) -> Result<(), SendError> {
        self.socket.send_packet(packet).await
    }

    pub fn state(&self) -> CharacterState {
        self.state.lock().clone()
    }

    pub fn update_state(&self, f: impl FnOnce(&mut CharacterState)) {
        f(&mut self.state.lock());
    }

    pub fn party(&self) -> Option<PartyId> {
        self.state.lock().party
    }

    pub fn guild(&self) -> Option<GuildId> {
        self.state.lock().guild
    }

    /// Whether first-entry membership bootstrap has run this session.
    pub fn is_instantiated(&self) -> bool {
        self.instantiated.load(Ordering::Acquire)
    }

    pub(crate) fn set_instantiated(&self) {
        self.instantiated.store(true, Ordering::Release);
    }

    pub fn watching(&self) -> [Option<SplitPos>; 9] {
        *self.watching.lock()
    }

    /// Swap in a new watched neighbourhood, returning the old one.
    pub(crate) fn replace_watching(&self, next: [Option<SplitPos>; 9]) -> [Option<SplitPos>; 9] {
        std::mem::replace(&mut *self.watching.lock(), next)
    }

    /// Start a dialogue, disposing any previous one.
    pub fn begin_conversation(&self) -> Arc<ConversationSession> {
        let conversation = Arc::new(ConversationSession::new(Arc::clone(&self.socket)));
        if let Some(old) = self.conversation.lock().replace(Arc::clone(&conversation)) {
            old.dispose();
        }
        conversation
    }

    pub fn conversation(&self) -> Option<Arc<ConversationSession>> {
        self.conversation.lock().clone()
    }

    /// Dispose and drop the active dialogue, if any.
    pub fn end_conversation(&self) {
        if let Some(conversation) = self.conversation.lock().take() {
            conversation.dispose();
        }
    }
}

pub struct FieldMob {
    template: Arc<MobTemplate>,
    hp: AtomicU32,
    facing_left: bool,
}

impl FieldMob {
    pub fn new(template: Arc<MobTemplate>, facing_left: bool) -> Self {
        let hp = AtomicU32::new(template.max_hp);
        Self { template, hp, facing_left }
    }

    pub fn template(&self) -> &MobTemplate {
        &self.template
    }

    pub fn hp(&self) -> u32 {
        self.hp.load(Ordering::Acquire)
    }

    /// Apply damage, returning the remaining hp.
    pub fn damage(&self, amount: u32) -> u32 {
        let prev = self
            .hp
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |hp| Some(hp.saturating_sub(amount)))
            .unwrap_or(0);
        prev.saturating_sub(amount)
    }
}

pub struct FieldNpc {
    template: Arc<NpcTemplate>,
    facing_left: bool,
    rx0: i32,
    rx1: i32,
}

impl FieldNpc {
    pub fn new(template: Arc<NpcTemplate>, facing_left: bool, rx0: i32, rx1: i32) -> Self {
        Self { template, facing_left, rx0, rx1 }
    }

    pub fn template(&self) -> &NpcTemplate {
        &self.template
    }
}

pub struct FieldReactor {
    template: Arc<ReactorTemplate>,
    name: String,
    facing_left: bool,
    state: AtomicU8,
}

impl FieldReactor {
    pub fn new(template: Arc<ReactorTemplate>, name: impl Into<String>, facing_left: bool) -> Self {
        Self {
            template,
            name: name.into(),
            facing_left,
            state: AtomicU8::new(0),
        }
    }

    pub fn template(&self) -> &ReactorTemplate {
        &self.template
    }

    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ChannelSink;

    fn mob_template() -> Arc<MobTemplate> {
        Arc::new(MobTemplate { id: 100100, name: "Snail".into(), level: 1, max_hp: 15 })
    }

    #[test]
    fn test_user_id_is_character_id() {
        let (sink, _rx) = ChannelSink::pair(1);
        let obj = FieldObj::user(FieldUser::new(42, "Alpha", Arc::new(sink), CharacterState::default()));
        assert_eq!(obj.id(), 42);
        assert_eq!(obj.kind(), ObjectKind::User);
        assert!(obj.field().is_none());
        assert!(!obj.is_controllable());
    }

    #[test]
    fn test_mob_damage_saturates() {
        let mob = FieldMob::new(mob_template(), false);
        assert_eq!(mob.damage(10), 5);
        assert_eq!(mob.damage(10), 0);
        assert_eq!(mob.hp(), 0);
    }

    #[test]
    fn test_leave_packet_carries_id() {
        let obj = FieldObj::mob(FieldMob::new(mob_template(), true), Point::new(1, 2), 3);
        obj.set_id(1000);
        let packet = obj.leave_packet();
        assert_eq!(packet.op, SendOp::MobLeaveField);
        assert_eq!(&packet.payload[..], &1000u32.to_le_bytes());
        assert_eq!(obj.enter_packet().op, SendOp::MobEnterField);
    }

    #[test]
    fn test_begin_conversation_disposes_previous() {
        let (sink, _rx) = ChannelSink::pair(1);
        let user = FieldUser::new(1, "Alpha", Arc::new(sink), CharacterState::default());
        let first = user.begin_conversation();
        let second = user.begin_conversation();
        assert!(first.token().is_cancelled());
        assert!(!second.token().is_cancelled());
        user.end_conversation();
        assert!(second.token().is_cancelled());
        assert!(user.conversation().is_none());
    }
}
