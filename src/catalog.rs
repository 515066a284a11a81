//! Table registry: maps table names and ids to heap files and schemas.

use crate::access::TupleDesc;
use crate::storage::disk::HeapFile;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::TableId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::info;
use std::path::Path;
use std::sync::Arc;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Id of the table called `name`. Ids are derived from the name alone so
/// that log records keep pointing at the right table across restarts.
pub fn table_id_for(name: &str) -> TableId {
    name.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ byte as u32).wrapping_mul(FNV_PRIME)
    })
}

#[derive(Debug)]
pub struct TableInfo {
    pub table_id: TableId,
    pub table_name: String,
    pub file: Arc<HeapFile>,
}

pub struct Catalog {
    tables: DashMap<TableId, Arc<TableInfo>>,
    names: DashMap<String, TableId>,
    page_size: usize,
}

impl Catalog {
    pub fn new(page_size: usize) -> Self {
        Self {
            tables: DashMap::new(),
            names: DashMap::new(),
            page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Register `name`, backed by the file at `path` (created if missing).
    /// Registering a name again with the same schema returns its id.
    pub fn add_table(&self, name: &str, path: &Path, desc: TupleDesc) -> StorageResult<TableId> {
        match self.names.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                let table_id = *entry.get();
                let existing = self.get_tuple_desc(table_id)?;
                if *existing != desc {
                    return Err(StorageError::SchemaMismatch(format!(
                        "table '{}' is already registered with a different schema",
                        name
                    )));
                }
                Ok(table_id)
            }
            Entry::Vacant(entry) => {
                let table_id = table_id_for(name);
                if let Some(other) = self.tables.get(&table_id) {
                    return Err(StorageError::TableIdCollision {
                        name: name.to_string(),
                        existing: other.table_name.clone(),
                        table_id,
                    });
                }

                let file = HeapFile::open(path, table_id, desc, self.page_size)?;
                info!(
                    "Registered table '{}' (id {}) at {} with {} pages",
                    name,
                    table_id,
                    path.display(),
                    file.num_pages()?
                );
                self.tables.insert(
                    table_id,
                    Arc::new(TableInfo {
                        table_id,
                        table_name: name.to_string(),
                        file: Arc::new(file),
                    }),
                );
                entry.insert(table_id);
                Ok(table_id)
            }
        }
    }

    fn table(&self, table_id: TableId) -> StorageResult<Arc<TableInfo>> {
        self.tables
            .get(&table_id)
            .map(|info| Arc::clone(info.value()))
            .ok_or_else(|| StorageError::UnknownTable(format!("id {}", table_id)))
    }

    pub fn get_database_file(&self, table_id: TableId) -> StorageResult<Arc<HeapFile>> {
        Ok(Arc::clone(&self.table(table_id)?.file))
    }

    pub fn get_tuple_desc(&self, table_id: TableId) -> StorageResult<Arc<TupleDesc>> {
        Ok(Arc::clone(self.table(table_id)?.file.desc()))
    }

    pub fn table_id(&self, name: &str) -> StorageResult<TableId> {
        self.names
            .get(name)
            .map(|id| *id.value())
            .ok_or_else(|| StorageError::UnknownTable(name.to_string()))
    }

    pub fn table_name(&self, table_id: TableId) -> StorageResult<String> {
        Ok(self.table(table_id)?.table_name.clone())
    }

    /// Registered table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Every registered heap file.
    pub fn files(&self) -> Vec<Arc<HeapFile>> {
        self.tables
            .iter()
            .map(|info| Arc::clone(&info.file))
            .collect()
    }
}
