use bevy_ecs::prelude::Entity;
use serde::{Deserialize, Serialize};

/// An entity reference stored as the entity's integer id. Nothing guarantees the entity is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRef(pub u64);

impl EntityRef {
    pub fn from_entity(entity: Entity) -> Self {
        Self(entity.to_bits())
    }

    pub fn entity(self) -> Option<Entity> {
        crate::commands::entity_from_bits(self.0)
    }
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        Self::from_entity(entity)
    }
}

/// Ordered `(name, value)` pairs with names unique inside the bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for Bucket<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> Bucket<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites. An existing name keeps its position; the previous value is returned.
    pub fn set(&mut self, name: impl Into<String>, value: T) -> Option<T> {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.iter().find(|(existing, _)| existing == name).map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.entries.iter_mut().find(|(existing, _)| existing == name).map(|(_, value)| value)
    }

    pub fn remove(&mut self, name: &str) -> Option<T> {
        let index = self.entries.iter().position(|(existing, _)| existing == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn entries(&self) -> &[(String, T)] {
        &self.entries
    }
}

impl<T> FromIterator<(String, T)> for Bucket<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut bucket = Bucket::new();
        for (name, value) in iter {
            bucket.set(name, value);
        }
        bucket
    }
}

/// Native-side snapshot of a script's exposed variables, partitioned by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableRecord {
    pub bools: Bucket<bool>,
    pub ints: Bucket<i32>,
    pub floats: Bucket<f32>,
    pub doubles: Bucket<f64>,
    pub chars: Bucket<char>,
    pub strings: Bucket<String>,
    pub entities: Bucket<EntityRef>,
    pub bool_lists: Bucket<Vec<bool>>,
    pub int_lists: Bucket<Vec<i32>>,
    pub float_lists: Bucket<Vec<f32>>,
    pub double_lists: Bucket<Vec<f64>>,
    pub char_lists: Bucket<Vec<char>>,
    pub string_lists: Bucket<Vec<String>>,
    pub entity_lists: Bucket<Vec<EntityRef>>,
    // Reserved kinds: carried through serialization and cloning, never marshalled.
    pub prefabs: Bucket<String>,
    pub components: Bucket<String>,
}

/// Maps a scalar variable kind onto its scalar and list buckets.
pub trait RecordScalar: Clone + Sized + 'static {
    const BUCKET: &'static str;
    const LIST_BUCKET: &'static str;

    fn bucket(record: &VariableRecord) -> &Bucket<Self>;
    fn bucket_mut(record: &mut VariableRecord) -> &mut Bucket<Self>;
    fn list_bucket(record: &VariableRecord) -> &Bucket<Vec<Self>>;
    fn list_bucket_mut(record: &mut VariableRecord) -> &mut Bucket<Vec<Self>>;
}

macro_rules! record_scalar {
    ($ty:ty, $field:ident, $list:ident) => {
        impl RecordScalar for $ty {
            const BUCKET: &'static str = stringify!($field);
            const LIST_BUCKET: &'static str = stringify!($list);

            fn bucket(record: &VariableRecord) -> &Bucket<Self> {
                &record.$field
            }

            fn bucket_mut(record: &mut VariableRecord) -> &mut Bucket<Self> {
                &mut record.$field
            }

            fn list_bucket(record: &VariableRecord) -> &Bucket<Vec<Self>> {
                &record.$list
            }

            fn list_bucket_mut(record: &mut VariableRecord) -> &mut Bucket<Vec<Self>> {
                &mut record.$list
            }
        }
    };
}

record_scalar!(bool, bools, bool_lists);
record_scalar!(i32, ints, int_lists);
record_scalar!(f32, floats, float_lists);
record_scalar!(f64, doubles, double_lists);
record_scalar!(char, chars, char_lists);
record_scalar!(String, strings, string_lists);
record_scalar!(EntityRef, entities, entity_lists);

impl VariableRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: RecordScalar>(&mut self, name: impl Into<String>, value: T) -> Option<T> {
        T::bucket_mut(self).set(name, value)
    }

    pub fn get<T: RecordScalar>(&self, name: &str) -> Option<&T> {
        T::bucket(self).get(name)
    }

    pub fn set_list<T: RecordScalar>(&mut self, name: impl Into<String>, values: Vec<T>) -> Option<Vec<T>> {
        T::list_bucket_mut(self).set(name, values)
    }

    pub fn get_list<T: RecordScalar>(&self, name: &str) -> Option<&[T]> {
        T::list_bucket(self).get(name).map(Vec::as_slice)
    }

    pub fn with<T: RecordScalar>(mut self, name: impl Into<String>, value: T) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_list<T: RecordScalar>(mut self, name: impl Into<String>, values: Vec<T>) -> Self {
        self.set_list(name, values);
        self
    }

    /// Total number of entries across every bucket, reserved ones included.
    pub fn len(&self) -> usize {
        self.bools.len()
            + self.ints.len()
            + self.floats.len()
            + self.doubles.len()
            + self.chars.len()
            + self.strings.len()
            + self.entities.len()
            + self.bool_lists.len()
            + self.int_lists.len()
            + self.float_lists.len()
            + self.double_lists.len()
            + self.char_lists.len()
            + self.string_lists.len()
            + self.entity_lists.len()
            + self.prefabs.len()
            + self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
