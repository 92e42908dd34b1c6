//! Field engine: one live map instance.
//!
//! A `Field` owns the object pools, the split grid, the portal table and
//! the spawn generators for one map. Mutating calls (`enter`, `leave`,
//! `update_position`, `try_tick`) are expected to be serialized per field
//! by the caller, e.g. one worker task per field. The only structure that
//! guards itself against concurrent first use is the pool table.

pub mod generator;
pub mod object;
pub mod pool;
pub mod portal;
pub mod split;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

pub use generator::{mob_capacity, mob_deficit, FieldGenerator, GeneratorKind, GeneratorState};
pub use object::{
    CharacterState, FieldMob, FieldNpc, FieldObj, FieldReactor, FieldUser, ObjectBody, ObjectId,
    ObjectKind,
};
pub use pool::{FieldPool, IdAllocator};
pub use portal::FieldPortal;
pub use split::{FieldSplit, SplitGrid, SplitPos};

use crate::network::{OutPacket, PacketWriter, SendError, SendOp};
use crate::social::{GuildSnapshot, PartySnapshot, SocialSync, SyncError};
use crate::template::{FieldTemplate, LifeKind, Point, TemplateCatalog};

/// Minimum time between two generator evaluations of one field.
pub const GEN_INTERVAL: Duration = Duration::from_secs(7);

/// `PartyResult` sub-operation carrying the full party view.
const PARTY_LOAD_DONE: u8 = 0x07;
/// `GuildResult` sub-operation carrying the full guild view.
const GUILD_LOAD_DONE: u8 = 0x1A;
/// Field id shown for party members on another channel.
const FIELD_ELSEWHERE: u32 = 999_999_999;

#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("field {field}: unknown life type at template {template_id}")]
    UnknownLifeType { field: u32, template_id: u32 },

    #[error("missing {kind} template {id}")]
    MissingTemplate { kind: &'static str, id: u32 },

    #[error("field {0} has no start point")]
    NoStartPoint(u32),

    #[error("portal not found: {0}")]
    PortalNotFound(String),

    #[error("portal index not found: {0}")]
    PortalIndexNotFound(u8),

    #[error("duplicate {kind:?} object id {id}")]
    DuplicateObject { kind: ObjectKind, id: ObjectId },

    #[error("object {id} is not in field {field}")]
    NotInField { id: ObjectId, field: u32 },

    #[error("send failed: {0}")]
    Send(#[from] SendError),

    #[error("social sync failed: {0}")]
    Sync(#[from] SyncError),
}

/// Settings the hosting node hands to every field it creates.
#[derive(Clone)]
pub struct FieldContext {
    pub channel_id: i32,
    pub social: Arc<dyn SocialSync>,
    pub gen_interval: Duration,
    /// Fixed seed for generator selection; random when unset.
    pub rng_seed: Option<u64>,
}

impl FieldContext {
    pub fn new(channel_id: i32, social: Arc<dyn SocialSync>) -> Self {
        Self { channel_id, social, gen_interval: GEN_INTERVAL, rng_seed: None }
    }
}

/// What one `try_tick` call did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub evaluated: bool,
    pub mobs_spawned: usize,
    pub others_spawned: usize,
    pub send_failures: usize,
}

pub struct Field {
    template: Arc<FieldTemplate>,
    self_ref: Weak<Field>,
    context: FieldContext,
    pools: Mutex<HashMap<ObjectKind, Arc<FieldPool>>>,
    ids: IdAllocator,
    portals: BTreeMap<u8, FieldPortal>,
    portal_names: HashMap<String, u8>,
    start_point: FieldPortal,
    splits: SplitGrid,
    generators: Vec<Arc<FieldGenerator>>,
    last_gen: Mutex<Option<Instant>>,
    last_tick: Mutex<Option<Instant>>,
    rng: Mutex<StdRng>,
}

impl Field {
    /// Build a field from its template. NPCs are placed immediately, mob
    /// and reactor placements become generators.
    pub fn new(
        template: Arc<FieldTemplate>,
        catalog: &TemplateCatalog,
        context: FieldContext,
    ) -> Result<Arc<Self>, FieldError> {
        let portals: BTreeMap<u8, FieldPortal> =
            template.portals.iter().map(|p| (p.id, FieldPortal::from(p))).collect();
        let portal_names = portals
            .values()
            .filter(|p| p.is_named())
            .map(|p| (p.name.clone(), p.index))
            .collect();
        let start_point = template
            .start_point()
            .map(FieldPortal::from)
            .ok_or(FieldError::NoStartPoint(template.id))?;

        let mut generators = Vec::new();
        let mut npcs = Vec::new();
        for life in &template.life {
            match life.kind {
                LifeKind::Npc => {
                    let npc = catalog
                        .npc(life.template_id)
                        .ok_or(FieldError::MissingTemplate { kind: "npc", id: life.template_id })?;
                    npcs.push(FieldObj::npc(
                        FieldNpc::new(npc, life.facing_left, life.rx0, life.rx1),
                        life.position,
                        life.foothold,
                    ));
                }
                LifeKind::Mob => {
                    let mob = catalog
                        .mob(life.template_id)
                        .ok_or(FieldError::MissingTemplate { kind: "mob", id: life.template_id })?;
                    generators.push(FieldGenerator::mob(life.clone(), mob));
                }
                LifeKind::Unknown => {
                    return Err(FieldError::UnknownLifeType {
                        field: template.id,
                        template_id: life.template_id,
                    });
                }
            }
        }
        for spawn in &template.reactors {
            let reactor = catalog
                .reactor(spawn.template_id)
                .ok_or(FieldError::MissingTemplate { kind: "reactor", id: spawn.template_id })?;
            generators.push(FieldGenerator::reactor(spawn.clone(), reactor));
        }

        let rng = StdRng::seed_from_u64(context.rng_seed.unwrap_or_else(rand::random));
        let splits = SplitGrid::new(template.bounds);

        let field = Arc::new_cyclic(|self_ref| Field {
            template,
            self_ref: self_ref.clone(),
            context,
            pools: Mutex::new(HashMap::new()),
            ids: IdAllocator::new(),
            portals,
            portal_names,
            start_point,
            splits,
            generators,
            last_gen: Mutex::new(None),
            last_tick: Mutex::new(None),
            rng: Mutex::new(rng),
        });

        // Nobody is watching yet, so placing is all there is to do.
        for npc in &npcs {
            field.place(npc)?;
        }

        tracing::info!(
            "[field] [init] id={} portals={} generators={} npcs={} splits={}x{}",
            field.id(),
            field.portals.len(),
            field.generators.len(),
            npcs.len(),
            field.splits.cols(),
            field.splits.rows(),
        );
        Ok(field)
    }

    pub fn id(&self) -> u32 {
        self.template.id
    }

    pub fn template(&self) -> &FieldTemplate {
        &self.template
    }

    pub fn channel_id(&self) -> i32 {
        self.context.channel_id
    }

    pub fn splits(&self) -> &SplitGrid {
        &self.splits
    }

    pub fn generators(&self) -> &[Arc<FieldGenerator>] {
        &self.generators
    }

    // ============================================
    // Pools
    // ============================================

    /// The pool for `kind`, created on first use. Concurrent first callers
    /// all get the same pool.
    pub fn pool(&self, kind: ObjectKind) -> Arc<FieldPool> {
        let mut pools = self.pools.lock();
        Arc::clone(pools.entry(kind).or_insert_with(|| Arc::new(FieldPool::new(kind))))
    }

    fn existing_pools(&self) -> Vec<Arc<FieldPool>> {
        let mut pools: Vec<Arc<FieldPool>> = self.pools.lock().values().cloned().collect();
        pools.sort_by_key(|p| p.kind());
        pools
    }

    /// Snapshot of every object in the field.
    pub fn get_objects(&self) -> Vec<Arc<FieldObj>> {
        self.existing_pools().iter().flat_map(|p| p.snapshot()).collect()
    }

    /// Snapshot of the objects of one kind.
    pub fn get_objects_of(&self, kind: ObjectKind) -> Vec<Arc<FieldObj>> {
        let pool = self.pools.lock().get(&kind).cloned();
        pool.map(|p| p.snapshot()).unwrap_or_default()
    }

    pub fn get_object(&self, id: ObjectId) -> Option<Arc<FieldObj>> {
        self.existing_pools().iter().find_map(|p| p.get(id))
    }

    pub fn get_object_of(&self, kind: ObjectKind, id: ObjectId) -> Option<Arc<FieldObj>> {
        let pool = self.pools.lock().get(&kind).cloned();
        pool.and_then(|p| p.get(id))
    }

    pub fn count_of(&self, kind: ObjectKind) -> usize {
        let pool = self.pools.lock().get(&kind).cloned();
        pool.map_or(0, |p| p.len())
    }

    pub fn contains(&self, obj: &FieldObj) -> bool {
        let pool = self.pools.lock().get(&obj.kind()).cloned();
        pool.is_some_and(|p| p.contains(obj))
    }

    /// Mobs and NPCs currently driven by `controller`.
    pub fn controlled_objects(&self, controller: ObjectId) -> Vec<Arc<FieldObj>> {
        self.get_objects()
            .into_iter()
            .filter(|o| o.is_controllable() && o.controller() == Some(controller))
            .collect()
    }

    pub fn controlled_object(&self, controller: ObjectId, id: ObjectId) -> Option<Arc<FieldObj>> {
        self.controlled_objects(controller).into_iter().find(|o| o.id() == id)
    }

    /// Hand control of `obj` to `controller` (a user in this field), or
    /// release it with `None`.
    pub fn set_controller(
        &self,
        obj: &Arc<FieldObj>,
        controller: Option<&Arc<FieldObj>>,
    ) -> Result<(), FieldError> {
        if !obj.is_controllable() || !self.contains(obj) {
            return Err(FieldError::NotInField { id: obj.id(), field: self.id() });
        }
        if let Some(user) = controller {
            if user.as_user().is_none() || !self.contains(user) {
                return Err(FieldError::NotInField { id: user.id(), field: self.id() });
            }
        }
        obj.set_controller(controller.map(|u| u.id()));
        Ok(())
    }

    // ============================================
    // Splits and portals
    // ============================================

    pub fn get_split(&self, position: Point) -> Option<&FieldSplit> {
        self.splits.get_split(position)
    }

    pub fn get_enclosing_splits(&self, position: Point) -> [Option<&FieldSplit>; 9] {
        self.splits.enclosing_splits(position)
    }

    pub fn get_portal(&self, index: u8) -> Result<&FieldPortal, FieldError> {
        self.portals.get(&index).ok_or(FieldError::PortalIndexNotFound(index))
    }

    /// Named portals only; start points (`sp`) and `tp` are not listed.
    pub fn get_portal_by_name(&self, name: &str) -> Result<&FieldPortal, FieldError> {
        self.portal_names
            .get(name)
            .and_then(|index| self.portals.get(index))
            .ok_or_else(|| FieldError::PortalNotFound(name.to_string()))
    }

    pub fn start_point(&self) -> &FieldPortal {
        &self.start_point
    }

    // ============================================
    // Entry / exit
    // ============================================

    pub async fn enter(&self, obj: &Arc<FieldObj>) -> Result<(), FieldError> {
        self.enter_with(obj, None).await
    }

    /// Enter a user through portal `portal`, which becomes its last-known
    /// portal.
    pub async fn enter_user_at(
        &self,
        obj: &Arc<FieldObj>,
        portal: u8,
        enter_packet: Option<OutPacket>,
    ) -> Result<(), FieldError> {
        if let Some(user) = obj.as_user() {
            user.update_state(|s| s.field_portal = portal);
        }
        self.enter_with(obj, enter_packet).await
    }

    /// Enter a user through the portal called `portal`.
    pub async fn enter_user_by_name(
        &self,
        obj: &Arc<FieldObj>,
        portal: &str,
        enter_packet: Option<OutPacket>,
    ) -> Result<(), FieldError> {
        let index = self
            .portals
            .values()
            .find(|p| p.name == portal)
            .map(|p| p.index)
            .ok_or_else(|| FieldError::PortalNotFound(portal.to_string()))?;
        self.enter_user_at(obj, index, enter_packet).await
    }

    /// Place `obj` in this field, leaving its current field first.
    /// `enter_packet` replaces the default spawn notification.
    pub async fn enter_with(
        &self,
        obj: &Arc<FieldObj>,
        enter_packet: Option<OutPacket>,
    ) -> Result<(), FieldError> {
        if let Some(previous) = obj.field() {
            if let Err(e) = previous.leave(obj).await {
                tracing::warn!(
                    "[field] [enter] leaving field={} id={} reported: {}",
                    previous.id(),
                    obj.id(),
                    e
                );
            }
        }

        let mut sent = Ok(());
        if let Some(user) = obj.as_user() {
            sent = self.prepare_user(obj, user).await?;
        }

        let gained = self.place(obj)?;
        tracing::debug!(
            "[field] [enter] field={} kind={:?} id={} pos=({}, {})",
            self.id(),
            obj.kind(),
            obj.id(),
            obj.position().x,
            obj.position().y
        );

        let packet = enter_packet.unwrap_or_else(|| obj.enter_packet());
        let watchers = self.watchers_of(obj);
        let mut result = sent.and(fan_out(&watchers, &packet).await);

        if obj.as_user().is_some() {
            let visible = self.objects_in(&gained, obj);
            if let Err(e) = show_objects(obj, &visible, FieldObj::enter_packet).await {
                result = result.and(Err(e));
            }
        }
        result.map_err(FieldError::from)
    }

    /// Resolve the user's entry portal, send it the field, and run the
    /// membership sync. Nothing is placed yet. A failed sync leaves the user
    /// outside every field; a failed send does not stop the entry and is
    /// handed back in the `Ok` value.
    async fn prepare_user(
        &self,
        obj: &FieldObj,
        user: &FieldUser,
    ) -> Result<Result<(), SendError>, FieldError> {
        let state = user.state();
        let portal = self.portals.get(&state.field_portal).unwrap_or(&self.start_point);
        let foothold = if portal.is_start_point() {
            0
        } else {
            self.template.foothold_below(portal.position).unwrap_or(0)
        };

        obj.set_position(portal.position, foothold);
        user.update_state(|s| s.field_id = self.id());

        let set_field = PacketWriter::new(SendOp::SetField)
            .i32(self.channel_id())
            .u32(self.id())
            .u8(portal.index)
            .point(portal.position)
            .i16(foothold)
            .bool(!user.is_instantiated())
            .build();
        let sent = user.send_packet(set_field).await;

        let synced = self.sync_membership(user).await.inspect_err(|e| {
            tracing::warn!(
                "[field] [enter] membership sync failed field={} char={}: {}",
                self.id(),
                user.character_id(),
                e
            )
        })?;
        user.set_instantiated();
        Ok(sent.and(synced))
    }

    /// Push the user's location to its party and, on the first placement
    /// this session, load its party/guild views and announce it online.
    async fn sync_membership(&self, user: &FieldUser) -> Result<Result<(), SendError>, SyncError> {
        let social = &self.context.social;
        let mut sent = Ok(());
        let state = user.state();
        let first = !user.is_instantiated();
        let character_id = user.character_id();

        if let Some(party) = state.party {
            social
                .update_membership_location(party, character_id, self.channel_id(), self.id())
                .await?;
            if first {
                let view = social.bootstrap_party_view(party).await?;
                sent = sent.and(user.send_packet(party_loaded_packet(&view, self.channel_id())).await);
            }
        }

        if let Some(guild) = state.guild.filter(|_| first) {
            let view = social.bootstrap_guild_view(guild).await?;
            let inactive = view.member(character_id).is_some_and(|m| m.inactive);
            social.notify_presence(guild, character_id, true).await?;
            sent = sent.and(user.send_packet(guild_loaded_packet(&view)).await);
            if inactive {
                social
                    .notify_attribute_change(guild, character_id, state.level, state.job)
                    .await?;
            }
        }
        Ok(sent)
    }

    /// Insert `obj` into its pool and split and point it at this field.
    /// Returns the splits a user newly watches.
    fn place(&self, obj: &Arc<FieldObj>) -> Result<Vec<SplitPos>, FieldError> {
        self.pool(obj.kind()).enter(obj, &self.ids)?;
        obj.set_field(self.self_ref.clone());

        let split = self.splits.get_split(obj.position());
        obj.set_split(split.map(FieldSplit::pos));
        if let Some(split) = split {
            split.insert(obj);
        }

        let gained = match obj.as_user() {
            Some(user) => self.rewatch(obj, user, split.map(FieldSplit::pos)).0,
            None => Vec::new(),
        };
        Ok(gained)
    }

    pub async fn leave(&self, obj: &Arc<FieldObj>) -> Result<(), FieldError> {
        self.leave_with(obj, None).await
    }

    /// Take `obj` out of this field. `leave_packet` replaces the default
    /// despawn notification.
    pub async fn leave_with(
        &self,
        obj: &Arc<FieldObj>,
        leave_packet: Option<OutPacket>,
    ) -> Result<(), FieldError> {
        let watchers = self.remove(obj)?;
        tracing::debug!("[field] [leave] field={} kind={:?} id={}", self.id(), obj.kind(), obj.id());

        let packet = leave_packet.unwrap_or_else(|| obj.leave_packet());
        fan_out(&watchers, &packet).await?;
        Ok(())
    }

    /// Undo `place` and release everything the object held here. Returns
    /// the users that could see it.
    fn remove(&self, obj: &Arc<FieldObj>) -> Result<Vec<Arc<FieldObj>>, FieldError> {
        let pool = self.pool(obj.kind());
        if !pool.contains(obj) {
            return Err(FieldError::NotInField { id: obj.id(), field: self.id() });
        }

        obj.set_field(Weak::new());
        if let Some(user) = obj.as_user() {
            user.end_conversation();
            self.rewatch(obj, user, None);
            for controlled in self.controlled_objects(obj.id()) {
                controlled.set_controller(None);
            }
        }
        if let Some(generator) = obj.generator() {
            generator.reset(self.now());
        }

        pool.leave(obj);
        let split = obj.split().and_then(|pos| self.splits.split_at(pos));
        obj.set_split(None);
        let watchers = match split {
            Some(split) => {
                split.remove(obj);
                split.watchers().into_iter().filter(|w| !Arc::ptr_eq(w, obj)).collect()
            }
            None => Vec::new(),
        };
        Ok(watchers)
    }

    /// Move `obj` within this field, re-homing it in the split of its new
    /// position and updating who can see what.
    pub async fn update_position(
        &self,
        obj: &Arc<FieldObj>,
        position: Point,
        foothold: i16,
    ) -> Result<(), FieldError> {
        if !self.contains(obj) {
            return Err(FieldError::NotInField { id: obj.id(), field: self.id() });
        }
        obj.set_position(position, foothold);

        let old = obj.split().and_then(|pos| self.splits.split_at(pos));
        let new = self.splits.get_split(position);
        if old.map(FieldSplit::pos) == new.map(FieldSplit::pos) {
            return Ok(());
        }

        let old_watchers = old.map(FieldSplit::watchers).unwrap_or_default();
        if let Some(split) = old {
            split.remove(obj);
        }
        if let Some(split) = new {
            split.insert(obj);
        }
        obj.set_split(new.map(FieldSplit::pos));

        let (gained, lost) = match obj.as_user() {
            Some(user) => self.rewatch(obj, user, new.map(FieldSplit::pos)),
            None => (Vec::new(), Vec::new()),
        };
        let new_watchers = new.map(FieldSplit::watchers).unwrap_or_default();

        let lost_sight: Vec<_> = old_watchers
            .iter()
            .filter(|w| !Arc::ptr_eq(w, obj) && !new_watchers.iter().any(|n| Arc::ptr_eq(n, w)))
            .cloned()
            .collect();
        let gained_sight: Vec<_> = new_watchers
            .iter()
            .filter(|w| !Arc::ptr_eq(w, obj) && !old_watchers.iter().any(|o| Arc::ptr_eq(o, w)))
            .cloned()
            .collect();

        let mut result = fan_out(&lost_sight, &obj.leave_packet()).await;
        result = result.and(fan_out(&gained_sight, &obj.enter_packet()).await);
        if obj.as_user().is_some() {
            let hidden = self.objects_in(&lost, obj);
            result = result.and(show_objects(obj, &hidden, FieldObj::leave_packet).await);
            let visible = self.objects_in(&gained, obj);
            result = result.and(show_objects(obj, &visible, FieldObj::enter_packet).await);
        }
        result.map_err(FieldError::from)
    }

    /// Point a user's watched neighbourhood at `center` (or nowhere) and
    /// fix up split watcher sets. Returns `(gained, lost)` splits.
    fn rewatch(
        &self,
        obj: &Arc<FieldObj>,
        user: &FieldUser,
        center: Option<SplitPos>,
    ) -> (Vec<SplitPos>, Vec<SplitPos>) {
        let next = self.splits.enclosing_positions(center);
        let prev = user.replace_watching(next);

        let lost: Vec<SplitPos> = prev.iter().flatten().filter(|p| !next.contains(&Some(**p))).copied().collect();
        let gained: Vec<SplitPos> = next.iter().flatten().filter(|p| !prev.contains(&Some(**p))).copied().collect();

        for split in lost.iter().filter_map(|p| self.splits.split_at(*p)) {
            split.remove_watcher(obj);
        }
        for split in gained.iter().filter_map(|p| self.splits.split_at(*p)) {
            split.add_watcher(obj);
        }
        (gained, lost)
    }

    /// Objects in `splits`, other than `except`.
    fn objects_in(&self, splits: &[SplitPos], except: &Arc<FieldObj>) -> Vec<Arc<FieldObj>> {
        splits
            .iter()
            .filter_map(|p| self.splits.split_at(*p))
            .flat_map(FieldSplit::objects)
            .filter(|o| !Arc::ptr_eq(o, except))
            .collect()
    }

    /// Users that can see `obj`, other than `obj` itself.
    fn watchers_of(&self, obj: &Arc<FieldObj>) -> Vec<Arc<FieldObj>> {
        obj.split()
            .and_then(|pos| self.splits.split_at(pos))
            .map(FieldSplit::watchers)
            .unwrap_or_default()
            .into_iter()
            .filter(|w| !Arc::ptr_eq(w, obj))
            .collect()
    }

    // ============================================
    // Broadcast
    // ============================================

    /// Send to every user in the field.
    pub async fn broadcast(&self, packet: OutPacket) -> Result<(), FieldError> {
        let users = self.get_objects_of(ObjectKind::User);
        Ok(fan_out(&users, &packet).await?)
    }

    /// Send to every user that can see `source`.
    pub async fn broadcast_from(&self, source: &Arc<FieldObj>, packet: OutPacket) -> Result<(), FieldError> {
        let watchers = self.watchers_of(source);
        Ok(fan_out(&watchers, &packet).await?)
    }

    /// Send to the users in `party` that can see `source`.
    pub async fn broadcast_to_party(
        &self,
        source: &Arc<FieldObj>,
        party: u32,
        packet: OutPacket,
    ) -> Result<(), FieldError> {
        let watchers: Vec<_> = self
            .watchers_of(source)
            .into_iter()
            .filter(|w| w.as_user().and_then(FieldUser::party) == Some(party))
            .collect();
        Ok(fan_out(&watchers, &packet).await?)
    }

    /// Send to the users in `guild` that can see `source`.
    pub async fn broadcast_to_guild(
        &self,
        source: &Arc<FieldObj>,
        guild: u32,
        packet: OutPacket,
    ) -> Result<(), FieldError> {
        let watchers: Vec<_> = self
            .watchers_of(source)
            .into_iter()
            .filter(|w| w.as_user().and_then(FieldUser::guild) == Some(guild))
            .collect();
        Ok(fan_out(&watchers, &packet).await?)
    }

    // ============================================
    // Tick
    // ============================================

    /// Field time: the latest tick time seen, or the wall clock if it is
    /// further along. Generator cooldowns are measured against it.
    pub fn now(&self) -> Instant {
        let now = Instant::now();
        self.last_tick.lock().map_or(now, |t| t.max(now))
    }

    pub async fn try_tick(&self) -> TickReport {
        self.try_tick_at(Instant::now()).await
    }

    /// Evaluate the generators if the field has users and `gen_interval`
    /// has passed since the last evaluation.
    pub async fn try_tick_at(&self, now: Instant) -> TickReport {
        {
            let mut last = self.last_tick.lock();
            *last = Some(last.map_or(now, |t| t.max(now)));
        }
        let user_count = self.count_of(ObjectKind::User);
        if user_count == 0 {
            return TickReport::default();
        }
        {
            let mut last = self.last_gen.lock();
            if let Some(prev) = *last {
                if now.saturating_duration_since(prev) < self.context.gen_interval {
                    return TickReport::default();
                }
            }
            *last = Some(now);
        }

        let (mut mob_gens, other_gens): (Vec<_>, Vec<_>) = self
            .generators
            .iter()
            .filter(|g| g.available(now))
            .cloned()
            .partition(|g| g.is_mob());

        let (min, max) = self.template.mob_capacity();
        let capacity = mob_capacity(min, max, user_count as i32);
        let mob_count = self.count_of(ObjectKind::Mob);
        let deficit = mob_deficit(capacity, mob_count);

        mob_gens.shuffle(&mut *self.rng.lock());
        mob_gens.truncate(deficit);

        tracing::debug!(
            "[field] [tick] field={} users={} mobs={} capacity={} spawning={} others={}",
            self.id(),
            user_count,
            mob_count,
            capacity,
            mob_gens.len(),
            other_gens.len()
        );

        let mut report = TickReport { evaluated: true, ..TickReport::default() };
        for generator in &mob_gens {
            report.mobs_spawned += self.run_generator(generator, &mut report).await;
        }
        for generator in &other_gens {
            report.others_spawned += self.run_generator(generator, &mut report).await;
        }
        report
    }

    /// Returns 1 if the generator's object ended up in the field.
    async fn run_generator(&self, generator: &Arc<FieldGenerator>, report: &mut TickReport) -> usize {
        match generator.generate(self).await {
            Ok(_) => 1,
            Err(e) => {
                tracing::warn!("[field] [tick] spawn in field={} reported: {}", self.id(), e);
                if let FieldError::Send(_) = e {
                    report.send_failures += 1;
                }
                matches!(generator.state(), GeneratorState::Occupied(_)) as usize
            }
        }
    }
}

/// Send `packet` to every recipient concurrently. Every send is attempted;
/// the first failure is returned.
async fn fan_out(recipients: &[Arc<FieldObj>], packet: &OutPacket) -> Result<(), SendError> {
    let results = join_all(recipients.iter().map(|r| r.send_packet(packet.clone()))).await;
    let mut first_err = None;
    for (recipient, result) in recipients.iter().zip(results) {
        if let Err(e) = result {
            tracing::warn!("[field] [broadcast] send to id={} failed: {}", recipient.id(), e);
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}

/// Show (or hide) `objects` to the user `viewer`, in order.
async fn show_objects(
    viewer: &FieldObj,
    objects: &[Arc<FieldObj>],
    packet: fn(&FieldObj) -> OutPacket,
) -> Result<(), SendError> {
    for obj in objects {
        viewer.send_packet(packet(obj)).await?;
    }
    Ok(())
}

/// Member lists carry a one-byte count; anything past it is left out.
const MAX_LISTED: usize = u8::MAX as usize;

fn list_len(len: usize) -> u8 {
    u8::try_from(len).unwrap_or(u8::MAX)
}

fn party_loaded_packet(party: &PartySnapshot, channel_id: i32) -> OutPacket {
    let mut w = PacketWriter::new(SendOp::PartyResult)
        .u8(PARTY_LOAD_DONE)
        .u32(party.id)
        .u32(party.boss_id)
        .u8(list_len(party.members.len()));
    for member in party.members.iter().take(MAX_LISTED) {
        let field = if member.channel_id == channel_id { member.field_id } else { FIELD_ELSEWHERE };
        w = w.u32(member.character_id).str(&member.name).i32(member.channel_id).u32(field);
    }
    w.build()
}

fn guild_loaded_packet(guild: &GuildSnapshot) -> OutPacket {
    let mut w = PacketWriter::new(SendOp::GuildResult)
        .u8(GUILD_LOAD_DONE)
        .bool(true)
        .u32(guild.id)
        .str(&guild.name)
        .u8(list_len(guild.members.len()));
    for member in guild.members.iter().take(MAX_LISTED) {
        w = w
            .u32(member.character_id)
            .str(&member.name)
            .u8(member.level)
            .i16(member.job)
            .bool(member.online);
    }
    w.build()
}
