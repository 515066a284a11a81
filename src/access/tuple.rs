use crate::access::value::{DataType, Value};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use std::cmp::Ordering;

/// Location of a tuple: the page that holds it and its slot on that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: usize,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: usize) -> Self {
        Self { page_id, slot }
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.page_id.cmp(&other.page_id) {
            Ordering::Equal => self.slot.cmp(&other.slot),
            other => other,
        }
    }
}

/// One named column of a [`TupleDesc`].
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

/// Schema of a table. Two descriptors are equal when their column types
/// match position by position; names are informational.
#[derive(Debug, Clone)]
pub struct TupleDesc {
    fields: Vec<Field>,
}

impl TupleDesc {
    pub fn new<S: Into<String>>(fields: Vec<(S, DataType)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, data_type)| Field {
                    name: name.into(),
                    data_type,
                })
                .collect(),
        }
    }

    /// Descriptor with generated column names `c0`, `c1`, ...
    pub fn from_types(types: &[DataType]) -> Self {
        Self::new(
            types
                .iter()
                .enumerate()
                .map(|(i, ty)| (format!("c{}", i), *ty))
                .collect(),
        )
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_type(&self, index: usize) -> Option<DataType> {
        self.fields.get(index).map(|f| f.data_type)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Bytes one tuple occupies in a page slot.
    pub fn tuple_size(&self) -> usize {
        self.fields.iter().map(|f| f.data_type.width()).sum()
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.data_type == b.data_type)
    }
}

impl Eq for TupleDesc {}

/// A row. `record_id` is set once the tuple has been stored on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    values: Vec<Value>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            record_id: None,
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    /// Check that every value fits the corresponding column of `desc`.
    pub fn conforms_to(&self, desc: &TupleDesc) -> StorageResult<()> {
        if self.values.len() != desc.num_fields() {
            return Err(StorageError::SchemaMismatch(format!(
                "tuple has {} values, schema has {} fields",
                self.values.len(),
                desc.num_fields()
            )));
        }
        for (i, (value, field)) in self.values.iter().zip(desc.fields()).enumerate() {
            if !value.is_compatible_with(field.data_type) {
                return Err(StorageError::SchemaMismatch(format!(
                    "field {} ('{}') expects {:?}, got {}",
                    i,
                    field.name,
                    field.data_type,
                    value.type_name()
                )));
            }
        }
        Ok(())
    }

    /// Serialize into a slot buffer of exactly `desc.tuple_size()` bytes.
    pub fn encode(&self, desc: &TupleDesc, buf: &mut [u8]) -> StorageResult<()> {
        self.conforms_to(desc)?;
        let mut offset = 0;
        for (value, field) in self.values.iter().zip(desc.fields()) {
            let width = field.data_type.width();
            field
                .data_type
                .encode(value, &mut buf[offset..offset + width])?;
            offset += width;
        }
        Ok(())
    }

    /// Deserialize a slot buffer written by [`Tuple::encode`].
    pub fn decode(desc: &TupleDesc, buf: &[u8], record_id: RecordId) -> StorageResult<Self> {
        let mut values = Vec::with_capacity(desc.num_fields());
        let mut offset = 0;
        for field in desc.fields() {
            let width = field.data_type.width();
            values.push(field.data_type.decode(&buf[offset..offset + width])?);
            offset += width;
        }
        Ok(Self {
            values,
            record_id: Some(record_id),
        })
    }
}
