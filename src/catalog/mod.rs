use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tracing::debug;

use crate::storage::{HeapFile, StorageError, StorageResult, TableId};
use crate::tuple::{FieldDesc, TupleDesc};

const CATALOG_FILE: &str = "catalog.json";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Table {0} already exists")]
    TableExists(String),

    #[error("Table {0} not found")]
    TableNotFound(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// On-disk description of one table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMetadata {
    pub id: TableId,
    pub name: String,
    /// Heap file path, relative to the catalog directory when inside it
    pub file: PathBuf,
    pub page_size: usize,
    pub fields: Vec<FieldDesc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogMetadata {
    tables: Vec<TableMetadata>,
}

struct TableEntry {
    name: String,
    file: Arc<HeapFile>,
}

/// Registry of tables and their heap files
pub struct Catalog {
    tables: RwLock<AHashMap<TableId, TableEntry>>,
    next_id: AtomicU32,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(AHashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Register an already opened heap file under `name`
    pub fn add_table(&self, name: impl Into<String>, file: Arc<HeapFile>) -> CatalogResult<TableId> {
        let name = name.into();
        let table_id = file.table_id();

        let mut tables = self.tables.write();
        if tables.values().any(|entry| entry.name == name) || tables.contains_key(&table_id) {
            return Err(CatalogError::TableExists(name));
        }
        self.next_id.fetch_max(table_id.0 + 1, Ordering::Relaxed);

        debug!(%table_id, name = %name, path = %file.path().display(), "table registered");
        tables.insert(table_id, TableEntry { name, file });
        Ok(table_id)
    }

    /// Open (or create) the heap file at `path` as a new table
    pub fn create_table(
        &self,
        name: impl Into<String>,
        path: impl AsRef<Path>,
        desc: TupleDesc,
        page_size: usize,
    ) -> CatalogResult<TableId> {
        let name = name.into();
        if self.table_id(&name).is_some() {
            return Err(CatalogError::TableExists(name));
        }

        let table_id = TableId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let file = HeapFile::open(path, table_id, Arc::new(desc), page_size)?;
        self.add_table(name, Arc::new(file))
    }

    /// Heap file backing `table_id`
    pub fn database_file(&self, table_id: TableId) -> StorageResult<Arc<HeapFile>> {
        self.tables
            .read()
            .get(&table_id)
            .map(|entry| Arc::clone(&entry.file))
            .ok_or(StorageError::TableNotFound(table_id))
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.tables
            .read()
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, _)| *id)
    }

    pub fn table_name(&self, table_id: TableId) -> Option<String> {
        self.tables
            .read()
            .get(&table_id)
            .map(|entry| entry.name.clone())
    }

    /// Every registered table id in ascending order
    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.tables.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Look a table up by name, failing with `TableNotFound`
    pub fn lookup(&self, name: &str) -> CatalogResult<TableId> {
        self.table_id(name)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }

    /// Write `catalog.json` describing every table into `dir`
    pub fn save(&self, dir: &Path) -> CatalogResult<()> {
        let tables = self.tables.read();
        let mut metadata = CatalogMetadata::default();
        for (id, entry) in tables.iter() {
            let path = entry.file.path();
            metadata.tables.push(TableMetadata {
                id: *id,
                name: entry.name.clone(),
                file: path.strip_prefix(dir).unwrap_or(path).to_path_buf(),
                page_size: entry.file.page_size(),
                fields: entry.file.tuple_desc().fields().to_vec(),
            });
        }
        metadata.tables.sort_by_key(|table| table.id);

        let content = serde_json::to_string_pretty(&metadata)?;
        fs::write(dir.join(CATALOG_FILE), content)?;
        Ok(())
    }

    /// Reopen every table listed in `dir/catalog.json`
    pub fn load(dir: &Path) -> CatalogResult<Self> {
        let content = fs::read_to_string(dir.join(CATALOG_FILE))?;
        let metadata: CatalogMetadata = serde_json::from_str(&content)?;

        let catalog = Self::new();
        for table in metadata.tables {
            let desc = Arc::new(TupleDesc::new(table.fields));
            let file = HeapFile::open(dir.join(&table.file), table.id, desc, table.page_size)?;
            catalog.add_table(table.name, Arc::new(file))?;
        }
        Ok(catalog)
    }

    /// [`Catalog::load`] if `dir` holds a catalog, an empty catalog otherwise
    pub fn open(dir: &Path) -> CatalogResult<Self> {
        if dir.join(CATALOG_FILE).exists() {
            Self::load(dir)
        } else {
            Ok(Self::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DEFAULT_PAGE_SIZE;
    use crate::tuple::FieldType;
    use tempfile::TempDir;

    fn people() -> TupleDesc {
        TupleDesc::new(vec![
            FieldDesc::new("id", FieldType::Int),
            FieldDesc::new("name", FieldType::Char(12)).nullable(),
        ])
    }

    fn setup_test_env() -> (TempDir, Catalog) {
        let temp_dir = tempfile::tempdir().unwrap();
        (temp_dir, Catalog::new())
    }

    #[test]
    fn test_create_and_lookup() {
        let (temp_dir, catalog) = setup_test_env();
        let id = catalog
            .create_table("people", temp_dir.path().join("people.dat"), people(), DEFAULT_PAGE_SIZE)
            .unwrap();

        assert_eq!(catalog.table_id("people"), Some(id));
        assert_eq!(catalog.table_name(id).as_deref(), Some("people"));
        assert_eq!(catalog.database_file(id).unwrap().table_id(), id);
        assert_eq!(catalog.table_ids(), vec![id]);
        assert!(matches!(
            catalog.database_file(TableId(999)),
            Err(StorageError::TableNotFound(TableId(999)))
        ));
        assert!(matches!(
            catalog.lookup("nobody"),
            Err(CatalogError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_table_name() {
        let (temp_dir, catalog) = setup_test_env();
        catalog
            .create_table("people", temp_dir.path().join("a.dat"), people(), DEFAULT_PAGE_SIZE)
            .unwrap();
        let result =
            catalog.create_table("people", temp_dir.path().join("b.dat"), people(), DEFAULT_PAGE_SIZE);
        assert!(matches!(result, Err(CatalogError::TableExists(_))));
    }

    #[test]
    fn test_add_table_advances_ids() {
        let (temp_dir, catalog) = setup_test_env();
        let file = HeapFile::open(
            temp_dir.path().join("ext.dat"),
            TableId(10),
            Arc::new(people()),
            DEFAULT_PAGE_SIZE,
        )
        .unwrap();
        catalog.add_table("ext", Arc::new(file)).unwrap();

        let next = catalog
            .create_table("other", temp_dir.path().join("other.dat"), people(), DEFAULT_PAGE_SIZE)
            .unwrap();
        assert_eq!(next, TableId(11));
    }

    #[test]
    fn test_save_and_load() {
        let (temp_dir, catalog) = setup_test_env();
        let id = catalog
            .create_table("people", temp_dir.path().join("people.dat"), people(), 1024)
            .unwrap();
        catalog.save(temp_dir.path()).unwrap();

        let loaded = Catalog::load(temp_dir.path()).unwrap();
        assert_eq!(loaded.table_id("people"), Some(id));
        let file = loaded.database_file(id).unwrap();
        assert_eq!(file.page_size(), 1024);
        assert_eq!(file.tuple_desc().as_ref(), &people());
        assert_eq!(file.path(), temp_dir.path().join("people.dat"));
    }

    #[test]
    fn test_open_without_catalog_is_empty() {
        let (temp_dir, _) = setup_test_env();
        let catalog = Catalog::open(temp_dir.path()).unwrap();
        assert!(catalog.table_ids().is_empty());
    }
}
