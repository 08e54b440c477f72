//! redb-backed catalog store.
//!
//! One table per record type. Variables are keyed by their key, everything
//! else by numeric id.

use super::StorageError;
use crate::calculation::Specialty;
use crate::catalog::{Catalog, validate_variable};
use crate::model::RiskModel;
use crate::variable::{Variable, VariableGroup, compare_display_names};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

const GROUPS: TableDefinition<u32, &[u8]> = TableDefinition::new("groups");
const VARIABLES: TableDefinition<&str, &[u8]> = TableDefinition::new("variables");
const MODELS: TableDefinition<u32, &[u8]> = TableDefinition::new("models");
const SPECIALTIES: TableDefinition<u32, &[u8]> = TableDefinition::new("specialties");

fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, StorageError> {
    Ok(postcard::to_allocvec(record)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(postcard::from_bytes(bytes)?)
}

/// Persistent catalog.
pub struct CatalogStore {
    db: Database,
}

impl std::fmt::Debug for CatalogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogStore").finish_non_exhaustive()
    }
}

impl CatalogStore {
    /// Create a new store, or open an existing one, at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref())?;
        let store = Self { db };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Open an existing store. Fails if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::open(path.as_ref())?;
        let store = Self { db };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> Result<(), StorageError> {
        let txn = self.db.begin_write()?;
        txn.open_table(GROUPS)?;
        txn.open_table(VARIABLES)?;
        txn.open_table(MODELS)?;
        txn.open_table(SPECIALTIES)?;
        txn.commit()?;
        Ok(())
    }

    // =========================================================================
    // WHOLE CATALOG
    // =========================================================================

    /// Replace the stored catalog. The catalog is validated first; nothing is
    /// written if it is invalid.
    pub fn import_catalog(&self, catalog: &Catalog) -> Result<(), StorageError> {
        catalog.validate()?;

        let txn = self.db.begin_write()?;
        txn.delete_table(GROUPS)?;
        txn.delete_table(VARIABLES)?;
        txn.delete_table(MODELS)?;
        txn.delete_table(SPECIALTIES)?;
        {
            let mut groups = txn.open_table(GROUPS)?;
            for group in &catalog.groups {
                groups.insert(group.id, encode(group)?.as_slice())?;
            }
            let mut variables = txn.open_table(VARIABLES)?;
            for variable in &catalog.variables {
                variables.insert(variable.key.as_str(), encode(variable)?.as_slice())?;
            }
            let mut models = txn.open_table(MODELS)?;
            for model in &catalog.models {
                models.insert(model.id, encode(model)?.as_slice())?;
            }
            let mut specialties = txn.open_table(SPECIALTIES)?;
            for specialty in &catalog.specialties {
                specialties.insert(specialty.id, encode(specialty)?.as_slice())?;
            }
        }
        txn.commit()?;

        tracing::info!(
            groups = catalog.groups.len(),
            variables = catalog.variables.len(),
            models = catalog.models.len(),
            specialties = catalog.specialties.len(),
            "catalog imported"
        );
        Ok(())
    }

    /// Read the whole catalog back.
    pub fn load_catalog(&self) -> Result<Catalog, StorageError> {
        Ok(Catalog {
            groups: self.all_groups()?,
            variables: self.all_variables()?,
            models: self.all_models()?,
            specialties: self.specialties()?,
        })
    }

    // =========================================================================
    // VARIABLES
    // =========================================================================

    /// Add a new variable. Its key must not be taken.
    pub fn insert_variable(&self, variable: &Variable) -> Result<(), StorageError> {
        self.check_variable(variable)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VARIABLES)?;
            if table.get(variable.key.as_str())?.is_some() {
                return Err(StorageError::DuplicateVariableKey(variable.key.clone()));
            }
            table.insert(variable.key.as_str(), encode(variable)?.as_slice())?;
        }
        txn.commit()?;

        tracing::debug!(key = %variable.key, "variable inserted");
        Ok(())
    }

    /// Replace an existing variable, matched by key.
    pub fn update_variable(&self, variable: &Variable) -> Result<(), StorageError> {
        self.check_variable(variable)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VARIABLES)?;
            if table.get(variable.key.as_str())?.is_none() {
                return Err(StorageError::VariableNotFound(variable.key.clone()));
            }
            table.insert(variable.key.as_str(), encode(variable)?.as_slice())?;
        }
        txn.commit()?;

        tracing::debug!(key = %variable.key, "variable updated");
        Ok(())
    }

    fn check_variable(&self, variable: &Variable) -> Result<(), StorageError> {
        let errors = validate_variable(variable, &self.all_groups()?);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StorageError::InvalidVariable(errors))
        }
    }

    pub fn variable(&self, key: &str) -> Result<Option<Variable>, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VARIABLES)?;
        table
            .get(key)?
            .map(|guard| decode(guard.value()))
            .transpose()
    }

    /// Every variable, sorted by display name.
    pub fn all_variables(&self) -> Result<Vec<Variable>, StorageError> {
        let mut variables: Vec<Variable> = self.read_all(VARIABLES)?;
        variables.sort_by(compare_display_names);
        Ok(variables)
    }

    // =========================================================================
    // GROUPS, MODELS, SPECIALTIES
    // =========================================================================

    /// Every group, in natural order.
    pub fn all_groups(&self) -> Result<Vec<VariableGroup>, StorageError> {
        let mut groups: Vec<VariableGroup> = self.read_all(GROUPS)?;
        groups.sort();
        Ok(groups)
    }

    /// Every model, by id.
    pub fn all_models(&self) -> Result<Vec<RiskModel>, StorageError> {
        self.read_all(MODELS)
    }

    pub fn model(&self, id: u32) -> Result<Option<RiskModel>, StorageError> {
        self.read_one(MODELS, id)
    }

    /// Every specialty, by id.
    pub fn specialties(&self) -> Result<Vec<Specialty>, StorageError> {
        self.read_all(SPECIALTIES)
    }

    pub fn specialty(&self, id: u32) -> Result<Option<Specialty>, StorageError> {
        self.read_one(SPECIALTIES, id)
    }

    fn read_one<T: DeserializeOwned>(
        &self,
        definition: TableDefinition<'static, u32, &'static [u8]>,
        id: u32,
    ) -> Result<Option<T>, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(definition)?;
        table
            .get(id)?
            .map(|guard| decode(guard.value()))
            .transpose()
    }

    fn read_all<K, T>(
        &self,
        definition: TableDefinition<'static, K, &'static [u8]>,
    ) -> Result<Vec<T>, StorageError>
    where
        K: redb::Key + 'static,
        T: DeserializeOwned,
    {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(definition)?;
        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            records.push(decode(value.value())?);
        }
        Ok(records)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::sample_catalog;
    use tempfile::TempDir;

    fn store() -> (TempDir, CatalogStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::create(dir.path().join("srcalc.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn empty_store_has_empty_catalog() {
        let (_dir, store) = store();
        assert_eq!(store.load_catalog().unwrap(), Catalog::default());
    }

    #[test]
    fn import_then_load() {
        let (_dir, store) = store();
        let catalog = sample_catalog();
        store.import_catalog(&catalog).unwrap();

        let loaded = store.load_catalog().unwrap();
        assert_eq!(loaded.models, catalog.models);
        assert_eq!(loaded.specialties, catalog.specialties);
        assert_eq!(loaded.variables.len(), catalog.variables.len());
        assert_eq!(loaded.groups[0].name, crate::variable::PROCEDURE_GROUP);
        assert_eq!(loaded.variables[0].display_name, "Age");
    }

    #[test]
    fn import_replaces_previous_contents() {
        let (_dir, store) = store();
        store.import_catalog(&sample_catalog()).unwrap();

        let mut smaller = sample_catalog();
        smaller.specialties.truncate(1);
        store.import_catalog(&smaller).unwrap();

        assert_eq!(store.specialties().unwrap().len(), 1);
    }

    #[test]
    fn invalid_catalog_is_not_written() {
        let (_dir, store) = store();
        let mut catalog = sample_catalog();
        catalog.specialties[0].model_ids.push(99);

        assert!(matches!(
            store.import_catalog(&catalog),
            Err(StorageError::InvalidCatalog(_))
        ));
        assert!(store.specialties().unwrap().is_empty());
    }

    #[test]
    fn insert_rejects_duplicate_key() {
        let (_dir, store) = store();
        store.import_catalog(&sample_catalog()).unwrap();

        let duplicate = Variable::boolean("copd", "Another COPD", 4);
        assert!(matches!(
            store.insert_variable(&duplicate),
            Err(StorageError::DuplicateVariableKey(key)) if key == "copd"
        ));

        let fresh = Variable::boolean("ascites", "Ascites", 4);
        store.insert_variable(&fresh).unwrap();
        assert_eq!(store.variable("ascites").unwrap(), Some(fresh));
    }

    #[test]
    fn insert_validates_fields() {
        let (_dir, store) = store();
        store.import_catalog(&sample_catalog()).unwrap();

        let bad = Variable::boolean("bad key", "Bad", 77);
        let Err(StorageError::InvalidVariable(errors)) = store.insert_variable(&bad) else {
            unreachable!("expected field errors");
        };
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn update_requires_existing_variable() {
        let (_dir, store) = store();
        store.import_catalog(&sample_catalog()).unwrap();

        let missing = Variable::boolean("nothing", "Nothing", 4);
        assert!(matches!(
            store.update_variable(&missing),
            Err(StorageError::VariableNotFound(_))
        ));

        let renamed = Variable::boolean("dnr", "Do Not Resuscitate", 4);
        store.update_variable(&renamed).unwrap();
        assert_eq!(
            store.variable("dnr").unwrap().map(|v| v.display_name),
            Some("Do Not Resuscitate".to_string())
        );
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("srcalc.redb");
        {
            let store = CatalogStore::create(&path).unwrap();
            store.import_catalog(&sample_catalog()).unwrap();
        }
        let store = CatalogStore::open(&path).unwrap();
        assert_eq!(store.model(2).unwrap().map(|m| m.id), Some(2));
        assert!(store.model(9).unwrap().is_none());
    }
}
