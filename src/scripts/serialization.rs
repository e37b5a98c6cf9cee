use super::variables::{Bucket, EntityRef, VariableRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue<T> {
    pub name: String,
    pub value: T,
}

type BucketData<T> = Option<Vec<NamedValue<T>>>;

/// Document form of a [`VariableRecord`]. Every bucket is optional on input so stale documents still
/// load; output always carries every bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableRecordData {
    #[serde(default)]
    pub bools: BucketData<bool>,
    #[serde(default)]
    pub ints: BucketData<i32>,
    #[serde(default)]
    pub floats: BucketData<f32>,
    #[serde(default)]
    pub doubles: BucketData<f64>,
    #[serde(default)]
    pub chars: BucketData<char>,
    #[serde(default)]
    pub strings: BucketData<String>,
    #[serde(default)]
    pub entities: BucketData<EntityRef>,
    #[serde(default)]
    pub bool_lists: BucketData<Vec<bool>>,
    #[serde(default)]
    pub int_lists: BucketData<Vec<i32>>,
    #[serde(default)]
    pub float_lists: BucketData<Vec<f32>>,
    #[serde(default)]
    pub double_lists: BucketData<Vec<f64>>,
    #[serde(default)]
    pub char_lists: BucketData<Vec<char>>,
    #[serde(default)]
    pub string_lists: BucketData<Vec<String>>,
    #[serde(default)]
    pub entity_lists: BucketData<Vec<EntityRef>>,
    #[serde(default)]
    pub prefabs: BucketData<String>,
    #[serde(default)]
    pub components: BucketData<String>,
}

/// Result of loading a record document: the record plus what had to be patched over.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordLoad {
    pub record: VariableRecord,
    pub missing_buckets: Vec<&'static str>,
    pub duplicates: Vec<String>,
}

impl VariableRecordData {
    pub fn is_absent(&self) -> bool {
        *self == VariableRecordData::default()
    }
}

fn load_bucket<T: Clone>(name: &'static str, source: &BucketData<T>, target: &mut Bucket<T>, load: &mut RecordLoad) {
    let Some(entries) = source else {
        log::warn!("[scripts] variable bucket '{name}' missing from document; using an empty set");
        load.missing_buckets.push(name);
        return;
    };
    for entry in entries {
        if target.set(entry.name.clone(), entry.value.clone()).is_some() {
            log::warn!("[scripts] duplicate variable '{}' in bucket '{name}'; last value wins", entry.name);
            load.duplicates.push(format!("{name}.{}", entry.name));
        }
    }
}

fn dump_bucket<T: Clone>(bucket: &Bucket<T>) -> BucketData<T> {
    Some(bucket.iter().map(|(name, value)| NamedValue { name: name.to_string(), value: value.clone() }).collect())
}

impl VariableRecord {
    /// Builds a record from a document. Missing buckets become empty with one warning each; a document
    /// with no buckets at all is a script without variables and loads silently.
    pub fn from_data(data: &VariableRecordData) -> RecordLoad {
        let mut load = RecordLoad::default();
        if data.is_absent() {
            return load;
        }
        let mut record = VariableRecord::default();
        load_bucket("bools", &data.bools, &mut record.bools, &mut load);
        load_bucket("ints", &data.ints, &mut record.ints, &mut load);
        load_bucket("floats", &data.floats, &mut record.floats, &mut load);
        load_bucket("doubles", &data.doubles, &mut record.doubles, &mut load);
        load_bucket("chars", &data.chars, &mut record.chars, &mut load);
        load_bucket("strings", &data.strings, &mut record.strings, &mut load);
        load_bucket("entities", &data.entities, &mut record.entities, &mut load);
        load_bucket("bool_lists", &data.bool_lists, &mut record.bool_lists, &mut load);
        load_bucket("int_lists", &data.int_lists, &mut record.int_lists, &mut load);
        load_bucket("float_lists", &data.float_lists, &mut record.float_lists, &mut load);
        load_bucket("double_lists", &data.double_lists, &mut record.double_lists, &mut load);
        load_bucket("char_lists", &data.char_lists, &mut record.char_lists, &mut load);
        load_bucket("string_lists", &data.string_lists, &mut record.string_lists, &mut load);
        load_bucket("entity_lists", &data.entity_lists, &mut record.entity_lists, &mut load);
        load_bucket("prefabs", &data.prefabs, &mut record.prefabs, &mut load);
        load_bucket("components", &data.components, &mut record.components, &mut load);
        load.record = record;
        load
    }

    pub fn to_data(&self) -> VariableRecordData {
        VariableRecordData {
            bools: dump_bucket(&self.bools),
            ints: dump_bucket(&self.ints),
            floats: dump_bucket(&self.floats),
            doubles: dump_bucket(&self.doubles),
            chars: dump_bucket(&self.chars),
            strings: dump_bucket(&self.strings),
            entities: dump_bucket(&self.entities),
            bool_lists: dump_bucket(&self.bool_lists),
            int_lists: dump_bucket(&self.int_lists),
            float_lists: dump_bucket(&self.float_lists),
            double_lists: dump_bucket(&self.double_lists),
            char_lists: dump_bucket(&self.char_lists),
            string_lists: dump_bucket(&self.string_lists),
            entity_lists: dump_bucket(&self.entity_lists),
            prefabs: dump_bucket(&self.prefabs),
            components: dump_bucket(&self.components),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VariableRecord {
        VariableRecord::new()
            .with("alive", true)
            .with("health", 100_i32)
            .with("speed", 2.5_f32)
            .with("mass", 80.25_f64)
            .with("grade", 'A')
            .with("title", "boss".to_string())
            .with("target", EntityRef(7))
            .with_list("flags", vec![true, false, true])
            .with_list("waypoints", vec![3_i32, 1, 2])
            .with_list("weights", vec![0.5_f32, 1.5])
            .with_list("ratios", vec![0.125_f64])
            .with_list("keys", vec!['x', 'y'])
            .with_list("lines", vec!["a".to_string(), "b".to_string()])
            .with_list("squad", vec![EntityRef(3), EntityRef(9)])
    }

    #[test]
    fn record_survives_json_round_trip() {
        let record = sample();
        let json = serde_json::to_string(&record.to_data()).expect("serialize");
        let data: VariableRecordData = serde_json::from_str(&json).expect("deserialize");
        let load = VariableRecord::from_data(&data);
        assert!(load.missing_buckets.is_empty());
        assert_eq!(load.record, record);
        assert_eq!(load.record.get_list::<i32>("waypoints"), Some(&[3, 1, 2][..]));
    }

    #[test]
    fn empty_buckets_are_always_emitted() {
        let value = serde_json::to_value(VariableRecord::new().to_data()).expect("serialize");
        let object = value.as_object().expect("object");
        for bucket in ["bools", "floats", "entity_lists", "prefabs", "components"] {
            assert_eq!(object.get(bucket), Some(&serde_json::json!([])), "bucket {bucket}");
        }
    }

    #[test]
    fn missing_floats_bucket_loads_empty() {
        let mut data = sample().to_data();
        data.floats = None;
        let load = VariableRecord::from_data(&data);
        assert_eq!(load.missing_buckets, vec!["floats"]);
        assert!(load.record.floats.is_empty());
        assert_eq!(load.record.get::<i32>("health"), Some(&100));
        assert_eq!(load.record.get::<EntityRef>("target"), Some(&EntityRef(7)));
        assert_eq!(load.record.get_list::<f32>("weights"), Some(&[0.5, 1.5][..]));
    }

    #[test]
    fn duplicate_names_overwrite_in_place() {
        let json = r#"{
            "ints": [
                { "name": "a", "value": 1 },
                { "name": "b", "value": 2 },
                { "name": "a", "value": 3 }
            ]
        }"#;
        let data: VariableRecordData = serde_json::from_str(json).expect("deserialize");
        let load = VariableRecord::from_data(&data);
        assert_eq!(load.duplicates, vec!["ints.a".to_string()]);
        let ints: Vec<(&str, i32)> = load.record.ints.iter().map(|(name, value)| (name, *value)).collect();
        assert_eq!(ints, vec![("a", 3), ("b", 2)]);
    }

    #[test]
    fn absent_document_loads_silently() {
        let load = VariableRecord::from_data(&VariableRecordData::default());
        assert!(load.missing_buckets.is_empty());
        assert!(load.record.is_empty());
    }
}
