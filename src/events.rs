use bevy_ecs::prelude::{Entity, Resource};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactPhase {
    Enter,
    Stay,
    Exit,
}

impl ContactPhase {
    pub fn label(self) -> &'static str {
        match self {
            ContactPhase::Enter => "Enter",
            ContactPhase::Stay => "Stay",
            ContactPhase::Exit => "Exit",
        }
    }
}

/// A collision or trigger contact between two entities, as reported by the physics collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactEvent {
    pub a: Entity,
    pub b: Entity,
    pub phase: ContactPhase,
    pub time: f32,
}

impl ContactEvent {
    pub fn new(a: Entity, b: Entity, phase: ContactPhase, time: f32) -> Self {
        let (a, b) = Self::ordered_pair(a, b);
        Self { a, b, phase, time }
    }

    fn ordered_pair(a: Entity, b: Entity) -> (Entity, Entity) {
        if a.index() <= b.index() {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn involves(&self, entity: Entity) -> bool {
        self.a == entity || self.b == entity
    }

    pub fn other(&self, entity: Entity) -> Option<Entity> {
        if self.a == entity {
            Some(self.b)
        } else if self.b == entity {
            Some(self.a)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogicEvent {
    Collision(ContactEvent),
    Trigger(ContactEvent),
    EntityCreated { entity: Entity },
    EntityDestroyed { entity: Entity },
    EntityRuntimeChanged { entity: Entity },
    ActiveChanged { entity: Entity, active: bool },
    AppQuit,
}

impl LogicEvent {
    pub fn collision(a: Entity, b: Entity, phase: ContactPhase, time: f32) -> Self {
        LogicEvent::Collision(ContactEvent::new(a, b, phase, time))
    }

    pub fn trigger(a: Entity, b: Entity, phase: ContactPhase, time: f32) -> Self {
        LogicEvent::Trigger(ContactEvent::new(a, b, phase, time))
    }
}

impl fmt::Display for LogicEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicEvent::Collision(contact) => write!(
                f,
                "Collision{} a={} b={} t={:.3}",
                contact.phase.label(),
                contact.a.index(),
                contact.b.index(),
                contact.time
            ),
            LogicEvent::Trigger(contact) => write!(
                f,
                "Trigger{} a={} b={} t={:.3}",
                contact.phase.label(),
                contact.a.index(),
                contact.b.index(),
                contact.time
            ),
            LogicEvent::EntityCreated { entity } => write!(f, "EntityCreated entity={}", entity.index()),
            LogicEvent::EntityDestroyed { entity } => write!(f, "EntityDestroyed entity={}", entity.index()),
            LogicEvent::EntityRuntimeChanged { entity } => {
                write!(f, "EntityRuntimeChanged entity={}", entity.index())
            }
            LogicEvent::ActiveChanged { entity, active } => {
                write!(f, "ActiveChanged entity={} active={active}", entity.index())
            }
            LogicEvent::AppQuit => write!(f, "AppQuit"),
        }
    }
}

#[derive(Default, Resource)]
pub struct EventBus {
    events: Vec<LogicEvent>,
}

impl EventBus {
    pub fn push(&mut self, event: LogicEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<LogicEvent> {
        self.events.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
