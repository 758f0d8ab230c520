//! Physical column buffers.
//!
//! A [`PhysicalColumn`] is one named, single-typed, fixed-capacity buffer of
//! nullable values. Its on-disk name starts out mutable and freezes the first
//! time its schema descriptor is materialized; the `Mutable -> Frozen`
//! transition is explicit so the freeze point is testable.

use std::sync::Arc;

use arrow::datatypes::{Field, FieldRef};

use crate::value::{Value, ValueKind};

enum NameState {
    /// Schema descriptor not yet materialized; the name may change once.
    Mutable(String),
    /// Descriptor handed out; the name is part of a committed schema.
    Frozen(FieldRef),
}

pub(crate) struct PhysicalColumn {
    logical_name: String,
    source_kind: ValueKind,
    storage_kind: ValueKind,
    renamed: bool,
    name: NameState,
    buffer: Vec<Option<Value>>,
    capacity: usize,
}

impl PhysicalColumn {
    /// Create a column whose buffer starts at `fill` already-processed rows.
    ///
    /// A column introduced mid-block starts "behind": its first `fill` slots
    /// are nulls standing in for the rows absorbed before it existed.
    pub(crate) fn new(
        logical_name: &str,
        source_kind: ValueKind,
        disk_name: String,
        capacity: usize,
        fill: usize,
    ) -> Self {
        let renamed = disk_name != logical_name;
        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize(fill, None);
        Self {
            logical_name: logical_name.to_string(),
            source_kind,
            storage_kind: source_kind.storage(),
            renamed,
            name: NameState::Mutable(disk_name),
            buffer,
            capacity,
        }
    }

    pub(crate) fn logical_name(&self) -> &str {
        &self.logical_name
    }

    pub(crate) fn source_kind(&self) -> ValueKind {
        self.source_kind
    }

    pub(crate) fn storage_kind(&self) -> ValueKind {
        self.storage_kind
    }

    pub(crate) fn disk_name(&self) -> &str {
        match &self.name {
            NameState::Mutable(name) => name,
            NameState::Frozen(field) => field.name(),
        }
    }

    pub(crate) fn is_renamed(&self) -> bool {
        self.renamed
    }

    /// Rename the on-disk name. Succeeds only while the descriptor has not
    /// been materialized; once frozen the name is part of a written schema.
    pub(crate) fn try_set_disk_name(&mut self, new_name: String) -> bool {
        match &mut self.name {
            NameState::Mutable(name) => {
                *name = new_name;
                self.renamed = true;
                true
            }
            NameState::Frozen(_) => false,
        }
    }

    /// Materialize (and freeze) the schema descriptor for this column.
    pub(crate) fn descriptor(&mut self) -> FieldRef {
        match &self.name {
            NameState::Mutable(name) => {
                let field: FieldRef =
                    Arc::new(Field::new(name.clone(), self.storage_kind.arrow_type(), true));
                self.name = NameState::Frozen(Arc::clone(&field));
                field
            }
            NameState::Frozen(field) => Arc::clone(field),
        }
    }

    /// Number of buffer slots holding data for the current block.
    #[cfg(test)]
    pub(crate) fn filled(&self) -> usize {
        self.buffer.len()
    }

    /// Convert an incoming value to this column's storage kind.
    ///
    /// A value of the column's own source kind is stored, normalized. A
    /// mismatched kind is stringified only when storage is Utf8 and the
    /// column was never renamed (the first-seen type still owns the plain
    /// name); otherwise the value is dropped to null. Deliberate policy:
    /// keep the row, drop the unexpected value.
    fn convert(&self, value: &Value) -> Option<Value> {
        if value.kind() == self.source_kind {
            Some(value.normalize())
        } else if self.storage_kind == ValueKind::Utf8 && !self.renamed {
            Some(Value::Utf8(value.to_string()))
        } else {
            None
        }
    }

    /// Repeat one scalar (or null) across `count` rows.
    pub(crate) fn push_scalar(&mut self, value: Option<&Value>, count: usize) {
        let converted = value.and_then(|v| self.convert(v));
        for _ in 0..count {
            self.buffer.push(converted.clone());
        }
    }

    /// Copy `count` array elements starting at `start`, null-padding past the
    /// end of the array.
    pub(crate) fn push_array(&mut self, values: &[Value], start: usize, count: usize) {
        for i in 0..count {
            self.buffer
                .push(values.get(start + i).and_then(|v| self.convert(v)));
        }
    }

    pub(crate) fn push_nulls(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len() + count, None);
    }

    /// Drain the buffered block, leaving an empty buffer at full capacity.
    pub(crate) fn take_block(&mut self) -> Vec<Option<Value>> {
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(kind: ValueKind, fill: usize) -> PhysicalColumn {
        PhysicalColumn::new("X", kind, "X".to_string(), 16, fill)
    }

    #[test]
    fn late_column_starts_backfilled() {
        let col = column(ValueKind::Int32, 3);
        assert_eq!(col.filled(), 3);
    }

    #[test]
    fn rename_fails_after_descriptor_is_frozen() {
        let mut col = column(ValueKind::Int32, 0);
        assert!(col.try_set_disk_name("X/Int32".to_string()));
        assert_eq!(col.disk_name(), "X/Int32");

        let field = col.descriptor();
        assert_eq!(field.name(), "X/Int32");
        assert!(!col.try_set_disk_name("X/other".to_string()));
        assert_eq!(col.disk_name(), "X/Int32");
    }

    #[test]
    fn mismatched_kind_is_stringified_into_unrenamed_utf8_column() {
        let mut col = column(ValueKind::Enum, 0);
        assert_eq!(col.storage_kind(), ValueKind::Utf8);
        col.push_scalar(Some(&Value::Enum("Pass".into())), 1);
        col.push_scalar(Some(&Value::Int32(42)), 1);
        let block = col.take_block();
        assert_eq!(block[0], Some(Value::Utf8("Pass".into())));
        assert_eq!(block[1], Some(Value::Utf8("42".into())));
    }

    #[test]
    fn enum_values_survive_a_rename() {
        let mut col = column(ValueKind::Enum, 0);
        assert!(col.try_set_disk_name("X/Enum".to_string()));
        col.push_scalar(Some(&Value::Enum("Pass".into())), 1);
        col.push_scalar(Some(&Value::Int32(42)), 1);
        let block = col.take_block();
        assert_eq!(block[0], Some(Value::Utf8("Pass".into())));
        assert_eq!(block[1], None);
    }

    #[test]
    fn mismatched_kind_becomes_null_after_rename() {
        let mut col = column(ValueKind::Utf8, 0);
        assert!(col.try_set_disk_name("X/Utf8".to_string()));
        col.push_scalar(Some(&Value::Int32(42)), 1);
        col.push_scalar(Some(&Value::Utf8("ok".into())), 1);
        let block = col.take_block();
        assert_eq!(block[0], None);
        assert_eq!(block[1], Some(Value::Utf8("ok".into())));
    }

    #[test]
    fn array_push_null_pads_the_tail() {
        let mut col = column(ValueKind::Int32, 0);
        let values = vec![Value::Int32(1), Value::Int32(2)];
        col.push_array(&values, 0, 4);
        let block = col.take_block();
        assert_eq!(
            block,
            vec![Some(Value::Int32(1)), Some(Value::Int32(2)), None, None]
        );
    }
}
