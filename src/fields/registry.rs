//! Field registry
//!
//! Maps names to computation field definitions so columns can refer to
//! fields by string. A registry is usually populated once at startup and
//! read afterwards; registration stays available at runtime behind a lock.

use crate::fields::builtin::builtin_fields;
use crate::fields::error::{RegistryError, RegistryResult};
use crate::fields::spec::{ComputationFieldSpec, FieldRef};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

static GLOBAL: OnceLock<Arc<FieldRegistry>> = OnceLock::new();

/// Name -> computation field mapping
#[derive(Debug, Default)]
pub struct FieldRegistry {
    fields: RwLock<BTreeMap<String, FieldRef>>,
}

impl FieldRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in field
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        {
            let mut fields = registry.write();
            for field in builtin_fields() {
                fields.insert(field.name().to_string(), field);
            }
        }
        registry
    }

    /// Shared process-wide registry, created with the built-ins on first use
    pub fn global() -> Arc<FieldRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(FieldRegistry::with_defaults()))
            .clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, FieldRef>> {
        self.fields.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, FieldRef>> {
        self.fields.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a field; an existing name is only replaced when `replace` is set
    pub fn register(&self, field: FieldRef, replace: bool) -> RegistryResult<FieldRef> {
        let mut fields = self.write();
        let name = field.name().to_string();
        if !replace && fields.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        tracing::debug!("Registered computation field {}", name);
        fields.insert(name, field.clone());
        Ok(field)
    }

    /// Remove a field by name
    pub fn unregister(&self, name: &str) -> RegistryResult<FieldRef> {
        self.write()
            .remove(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))
    }

    /// Look up a field; the error lists every registered name
    pub fn get_field_by_name(&self, name: &str) -> RegistryResult<FieldRef> {
        let fields = self.read();
        fields
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
                options: fields.keys().cloned().collect(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// All registered names, sorted
    pub fn get_all_report_fields_names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }
}
