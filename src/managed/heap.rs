use super::assembly::ClassInfo;
use rhai::{Dynamic, Map, INT};
use std::fmt;
use std::rc::Rc;

/// Key under which every managed object carries its own id.
pub(crate) const OBJECT_ID_KEY: &str = "ObjectId";

/// Generation-checked slot index into the object heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    index: u32,
    generation: u32,
}

impl ObjectId {
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self { index: bits as u32, generation: (bits >> 32) as u32 }
    }

    pub(crate) fn to_script(self) -> INT {
        self.to_bits() as INT
    }

    pub(crate) fn from_script(value: INT) -> Self {
        Self::from_bits(value as u64)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

pub(crate) struct HeapObject {
    pub class: Rc<ClassInfo>,
    pub state: Dynamic,
    pub finalized: bool,
}

struct Slot {
    generation: u32,
    object: Option<HeapObject>,
}

/// Slab of managed objects owned by one script domain.
#[derive(Default)]
pub(crate) struct ObjectHeap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl ObjectHeap {
    pub fn alloc(&mut self, class: Rc<ClassInfo>, mut fields: Map) -> ObjectId {
        let id = match self.free.pop() {
            Some(index) => ObjectId { index, generation: self.slots[index as usize].generation },
            None => {
                self.slots.push(Slot { generation: 0, object: None });
                ObjectId { index: (self.slots.len() - 1) as u32, generation: 0 }
            }
        };
        fields.insert(OBJECT_ID_KEY.into(), Dynamic::from(id.to_script()));
        self.slots[id.index as usize].object = Some(HeapObject { class, state: Dynamic::from_map(fields), finalized: false });
        self.live += 1;
        id
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: ObjectId) -> Option<&HeapObject> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.object.as_ref()
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut HeapObject> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.object.as_mut()
    }

    pub fn free(&mut self, id: ObjectId) -> Option<HeapObject> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let object = slot.object.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(object)
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.object.is_some())
            .map(|(index, slot)| ObjectId { index: index as u32, generation: slot.generation })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
