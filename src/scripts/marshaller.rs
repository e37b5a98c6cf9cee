use super::variables::{Bucket, EntityRef, VariableRecord};
use crate::managed::{ClassInfo, FieldType, ManagedHandle, ManagedRuntimeHost, Marshal, ScriptError};
use log::{debug, warn};

/// Outcome of pushing one record into a managed object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarshalReport {
    pub written: usize,
    /// Record entries with no field of that name on the class.
    pub missing: Vec<String>,
    /// Entries whose field exists with a different declared type.
    pub mismatched: Vec<String>,
    /// Entries that failed for any other reason (unsupported element kinds, script errors).
    pub failed: Vec<String>,
}

impl MarshalReport {
    pub fn skipped(&self) -> usize {
        self.missing.len() + self.mismatched.len() + self.failed.len()
    }

    fn record(&mut self, class: &ClassInfo, bucket: &str, name: &str, result: Result<(), ScriptError>) {
        match result {
            Ok(()) => self.written += 1,
            Err(ScriptError::FieldNotFound { .. }) => {
                warn!("[scripts] {}: field '{name}' not found; skipping {bucket} entry", class.qualified_name());
                self.missing.push(name.to_string());
            }
            Err(err @ ScriptError::TypeMismatch { .. }) => {
                warn!("[scripts] {bucket} entry '{name}' skipped: {err}");
                self.mismatched.push(name.to_string());
            }
            Err(err) => {
                warn!("[scripts] {}: {bucket} entry '{name}' not marshalled: {err}", class.qualified_name());
                self.failed.push(name.to_string());
            }
        }
    }
}

fn push_scalars<T: Marshal>(
    host: &mut ManagedRuntimeHost,
    handle: ManagedHandle,
    class: &ClassInfo,
    bucket_name: &str,
    bucket: &Bucket<T>,
    report: &mut MarshalReport,
) {
    for (name, value) in bucket.iter() {
        let result = host.set_field(handle, name, value);
        report.record(class, bucket_name, name, result);
    }
}

fn push_sequences<T: Marshal>(
    host: &mut ManagedRuntimeHost,
    handle: ManagedHandle,
    class: &ClassInfo,
    bucket_name: &str,
    bucket: &Bucket<Vec<T>>,
    report: &mut MarshalReport,
) {
    for (name, values) in bucket.iter() {
        let result = host.set_sequence_field(handle, name, values);
        report.record(class, bucket_name, name, result);
    }
}

/// Writes every scalar and list bucket of `record` into the object's fields. The shape of each list
/// (array or `List`) follows the field's declaration on the class. Reserved buckets are left alone.
pub fn marshal_record(host: &mut ManagedRuntimeHost, handle: ManagedHandle, record: &VariableRecord) -> MarshalReport {
    let mut report = MarshalReport::default();
    let Some(class) = host.class_of(handle) else {
        warn!("[scripts] cannot marshal variables into {handle}: no live object");
        return report;
    };
    let class = class.as_ref();
    push_scalars(host, handle, class, "bools", &record.bools, &mut report);
    push_scalars(host, handle, class, "ints", &record.ints, &mut report);
    push_scalars(host, handle, class, "floats", &record.floats, &mut report);
    push_scalars(host, handle, class, "doubles", &record.doubles, &mut report);
    push_scalars(host, handle, class, "chars", &record.chars, &mut report);
    push_scalars(host, handle, class, "strings", &record.strings, &mut report);
    push_scalars(host, handle, class, "entities", &record.entities, &mut report);
    push_sequences(host, handle, class, "bool_lists", &record.bool_lists, &mut report);
    push_sequences(host, handle, class, "int_lists", &record.int_lists, &mut report);
    push_sequences(host, handle, class, "float_lists", &record.float_lists, &mut report);
    push_sequences(host, handle, class, "double_lists", &record.double_lists, &mut report);
    push_sequences(host, handle, class, "char_lists", &record.char_lists, &mut report);
    push_sequences(host, handle, class, "string_lists", &record.string_lists, &mut report);
    push_sequences(host, handle, class, "entity_lists", &record.entity_lists, &mut report);
    if report.skipped() > 0 {
        debug!(
            "[scripts] {}: marshalled {} variable(s), skipped {}",
            class.qualified_name(),
            report.written,
            report.skipped()
        );
    }
    report
}

/// Copies user-declared entity fields (scalar, array or list) from the object back into `record`.
/// Unset entity fields are left out. Returns how many entries were written.
pub fn read_entity_fields(host: &mut ManagedRuntimeHost, handle: ManagedHandle, record: &mut VariableRecord) -> usize {
    let Some(class) = host.class_of(handle) else {
        return 0;
    };
    let mut written = 0;
    for (name, declared) in class.fields() {
        if !class.is_user_field(name) {
            continue;
        }
        match declared {
            FieldType::Scalar(kind) if *kind == EntityRef::KIND => match host.get_field::<EntityRef>(handle, name) {
                Ok(entity) => {
                    record.entities.set(name.clone(), entity);
                    written += 1;
                }
                Err(err) => debug!("[scripts] {}.{name} not read back: {err}", class.qualified_name()),
            },
            FieldType::Array(element) | FieldType::List(element) if element == EntityRef::KIND.name() => {
                match host.get_sequence_field::<EntityRef>(handle, name) {
                    Ok(entities) => {
                        record.entity_lists.set(name.clone(), entities);
                        written += 1;
                    }
                    Err(err) => debug!("[scripts] {}.{name} not read back: {err}", class.qualified_name()),
                }
            }
            _ => {}
        }
    }
    written
}
