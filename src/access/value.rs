use crate::storage::error::{StorageError, StorageResult};
use byteorder::{ByteOrder, LittleEndian};

/// Column types. Every type has a fixed on-page width so that a page can be
/// carved into equally sized tuple slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int32,
    Int64,
    Boolean,
    /// Character data of at most `n` bytes, stored as a 4-byte length
    /// followed by `n` zero-padded bytes.
    Varchar(u16),
}

impl DataType {
    /// Bytes this type occupies in a tuple slot.
    pub fn width(&self) -> usize {
        match self {
            DataType::Int32 => 4,
            DataType::Int64 => 8,
            DataType::Boolean => 1,
            DataType::Varchar(max_len) => 4 + *max_len as usize,
        }
    }

    /// Encode `value` into `buf`, which must be exactly `self.width()` bytes.
    pub fn encode(&self, value: &Value, buf: &mut [u8]) -> StorageResult<()> {
        debug_assert_eq!(buf.len(), self.width());
        match (self, value) {
            (DataType::Int32, Value::Int32(v)) => LittleEndian::write_i32(buf, *v),
            (DataType::Int64, Value::Int64(v)) => LittleEndian::write_i64(buf, *v),
            (DataType::Boolean, Value::Boolean(b)) => buf[0] = u8::from(*b),
            (DataType::Varchar(max_len), Value::String(s)) => {
                let bytes = s.as_bytes();
                if bytes.len() > *max_len as usize {
                    return Err(StorageError::SchemaMismatch(format!(
                        "string of {} bytes exceeds VARCHAR({})",
                        bytes.len(),
                        max_len
                    )));
                }
                LittleEndian::write_u32(&mut buf[..4], bytes.len() as u32);
                buf[4..4 + bytes.len()].copy_from_slice(bytes);
                buf[4 + bytes.len()..].fill(0);
            }
            (expected, actual) => {
                return Err(StorageError::TypeMismatch {
                    expected: *expected,
                    actual: actual.type_name(),
                })
            }
        }
        Ok(())
    }

    /// Decode a value of this type from `buf`.
    pub fn decode(&self, buf: &[u8]) -> StorageResult<Value> {
        debug_assert_eq!(buf.len(), self.width());
        let value = match self {
            DataType::Int32 => Value::Int32(LittleEndian::read_i32(buf)),
            DataType::Int64 => Value::Int64(LittleEndian::read_i64(buf)),
            DataType::Boolean => Value::Boolean(buf[0] != 0),
            DataType::Varchar(max_len) => {
                let len = LittleEndian::read_u32(&buf[..4]) as usize;
                if len > *max_len as usize {
                    return Err(StorageError::Serialization(format!(
                        "corrupt VARCHAR({}) length {}",
                        max_len, len
                    )));
                }
                let s = std::str::from_utf8(&buf[4..4 + len])
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Value::String(s.to_string())
            }
        };
        Ok(value)
    }
}

/// Values that can be stored in a tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Boolean(bool),
    String(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int32(_) => "INT32",
            Value::Int64(_) => "INT64",
            Value::Boolean(_) => "BOOLEAN",
            Value::String(_) => "VARCHAR",
        }
    }

    /// Check if this value can be stored in a column of `data_type`.
    pub fn is_compatible_with(&self, data_type: DataType) -> bool {
        match (self, data_type) {
            (Value::Int32(_), DataType::Int32) => true,
            (Value::Int64(_), DataType::Int64) => true,
            (Value::Boolean(_), DataType::Boolean) => true,
            (Value::String(s), DataType::Varchar(max_len)) => s.len() <= max_len as usize,
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}
