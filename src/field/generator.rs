//! Spawn points and the population formula that drives them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::object::{FieldMob, FieldObj, FieldReactor, ObjectBody, ObjectId};
use super::{Field, FieldError};
use crate::template::{LifeSpawn, MobTemplate, ReactorSpawn, ReactorTemplate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Ready,
    /// The object it produced is still in the field.
    Occupied(ObjectId),
    /// Waiting out the respawn delay.
    Cooling { until: Instant },
}

pub enum GeneratorKind {
    Mob { spawn: LifeSpawn, template: Arc<MobTemplate> },
    Reactor { spawn: ReactorSpawn, template: Arc<ReactorTemplate> },
}

pub struct FieldGenerator {
    kind: GeneratorKind,
    state: Mutex<GeneratorState>,
}

impl FieldGenerator {
    pub fn mob(spawn: LifeSpawn, template: Arc<MobTemplate>) -> Arc<Self> {
        Arc::new(Self {
            kind: GeneratorKind::Mob { spawn, template },
            state: Mutex::new(GeneratorState::Ready),
        })
    }

    pub fn reactor(spawn: ReactorSpawn, template: Arc<ReactorTemplate>) -> Arc<Self> {
        Arc::new(Self {
            kind: GeneratorKind::Reactor { spawn, template },
            state: Mutex::new(GeneratorState::Ready),
        })
    }

    pub fn kind(&self) -> &GeneratorKind {
        &self.kind
    }

    pub fn is_mob(&self) -> bool {
        matches!(self.kind, GeneratorKind::Mob { .. })
    }

    pub fn state(&self) -> GeneratorState {
        *self.state.lock()
    }

    fn cooldown(&self) -> Duration {
        let secs = match &self.kind {
            GeneratorKind::Mob { spawn, .. } => spawn.mob_time,
            GeneratorKind::Reactor { spawn, .. } => spawn.reactor_time,
        };
        Duration::from_secs(secs as u64)
    }

    /// Whether the generator may spawn at `now`. A finished cooldown turns
    /// back into `Ready` here.
    pub fn available(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        match *state {
            GeneratorState::Ready => true,
            GeneratorState::Occupied(_) => false,
            GeneratorState::Cooling { until } if now >= until => {
                *state = GeneratorState::Ready;
                true
            }
            GeneratorState::Cooling { .. } => false,
        }
    }

    /// Called when the object this generator produced leaves its field.
    pub fn reset(&self, now: Instant) {
        let mut state = self.state.lock();
        if let GeneratorState::Occupied(_) = *state {
            *state = GeneratorState::Cooling { until: now + self.cooldown() };
        }
    }

    fn build_object(self: &Arc<Self>) -> Arc<FieldObj> {
        let weak = Arc::downgrade(self);
        match &self.kind {
            GeneratorKind::Mob { spawn, template } => FieldObj::generated(
                ObjectBody::Mob(FieldMob::new(Arc::clone(template), spawn.facing_left)),
                spawn.position,
                spawn.foothold,
                weak,
            ),
            GeneratorKind::Reactor { spawn, template } => FieldObj::generated(
                ObjectBody::Reactor(FieldReactor::new(
                    Arc::clone(template),
                    spawn.name.clone(),
                    spawn.facing_left,
                )),
                spawn.position,
                0,
                weak,
            ),
        }
    }

    /// Spawn this generator's object into `field`.
    pub async fn generate(self: &Arc<Self>, field: &Field) -> Result<Arc<FieldObj>, FieldError> {
        let obj = self.build_object();
        // Occupy before entering so a leave racing the enter finds us occupied.
        *self.state.lock() = GeneratorState::Occupied(0);
        let result = field.enter(&obj).await;
        if obj.field().is_some() {
            *self.state.lock() = GeneratorState::Occupied(obj.id());
        } else {
            *self.state.lock() = GeneratorState::Ready;
        }
        result.map(|_| obj)
    }
}

/// How many mobs a field should hold for `user_count` users.
///
/// Starts at `min` and grows linearly once more than `min / 2` users are
/// present, never exceeding `max`.
pub fn mob_capacity(min: i32, max: i32, user_count: i32) -> i32 {
    let mut capacity = min;
    if min > 0 && user_count > min / 2 {
        capacity += (max - min) * (2 * user_count - min) / (3 * min);
    }
    capacity.min(max)
}

/// Mob generators still allowed to fire this tick; never negative.
pub fn mob_deficit(capacity: i32, mob_count: usize) -> usize {
    (capacity as i64 - mob_count as i64).max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{LifeKind, Point};

    fn spawn(mob_time: u32) -> LifeSpawn {
        LifeSpawn {
            kind: LifeKind::Mob,
            template_id: 100100,
            position: Point::new(0, 0),
            foothold: 0,
            rx0: 0,
            rx1: 0,
            facing_left: false,
            mob_time,
        }
    }

    fn template() -> Arc<MobTemplate> {
        Arc::new(MobTemplate { id: 100100, name: "Snail".into(), level: 1, max_hp: 8 })
    }

    #[test]
    fn test_capacity_idle_population() {
        assert_eq!(mob_capacity(10, 40, 0), 10);
        assert_eq!(mob_capacity(10, 40, 5), 10);
    }

    #[test]
    fn test_capacity_scales_with_users() {
        // 10 + 30 * (12 - 10) / 30 = 12
        assert_eq!(mob_capacity(10, 40, 6), 12);
        // 10 + 30 * (40 - 10) / 30 = 40
        assert_eq!(mob_capacity(10, 40, 20), 40);
        // 10 + 30 * (60 - 10) / 30 = 60, capped at 40
        assert_eq!(mob_capacity(10, 40, 30), 40);
    }

    #[test]
    fn test_capacity_zero_min() {
        assert_eq!(mob_capacity(0, 0, 5), 0);
    }

    #[test]
    fn test_deficit_never_negative() {
        assert_eq!(mob_deficit(10, 4), 6);
        assert_eq!(mob_deficit(10, 10), 0);
        assert_eq!(mob_deficit(10, 25), 0);
    }

    #[test]
    fn test_state_machine() {
        let generator = FieldGenerator::mob(spawn(5), template());
        let now = Instant::now();
        assert!(generator.available(now));

        *generator.state.lock() = GeneratorState::Occupied(10_000);
        assert!(!generator.available(now));

        generator.reset(now);
        assert_eq!(generator.state(), GeneratorState::Cooling { until: now + Duration::from_secs(5) });
        assert!(!generator.available(now + Duration::from_secs(4)));
        assert!(generator.available(now + Duration::from_secs(5)));
        assert_eq!(generator.state(), GeneratorState::Ready);
    }

    #[test]
    fn test_reset_only_from_occupied() {
        let generator = FieldGenerator::mob(spawn(5), template());
        generator.reset(Instant::now());
        assert_eq!(generator.state(), GeneratorState::Ready);
    }
}
