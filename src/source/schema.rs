//! Entity schemas
//!
//! Describes the entities (tables) a data source exposes, their fields, and
//! the relations between them. Report construction validates every group-by
//! path, column and crosstab dimension against this schema before touching
//! any data.

use crate::source::error::{SourceError, SourceResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Separator used by traversing paths such as `client__contact__agent`
pub const PATH_SEPARATOR: &str = "__";

/// Storage kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Decimal,
    Text,
    Date,
    DateTime,
    Boolean,
    /// Foreign key; the value stored is the related row's primary key
    Relation,
}

impl FieldKind {
    /// Type name handed to the presentation layer
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Integer => "integer",
            FieldKind::Decimal => "decimal",
            FieldKind::Text => "text",
            FieldKind::Date => "date",
            FieldKind::DateTime => "datetime",
            FieldKind::Boolean => "boolean",
            FieldKind::Relation => "relation",
        }
    }
}

/// Definition of a single field on an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub verbose_name: Option<String>,
    pub kind: FieldKind,
    /// Target entity for relation fields
    #[serde(default, rename = "to")]
    pub related_entity: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            verbose_name: None,
            kind,
            related_entity: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn decimal(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Decimal)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    pub fn relation(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            related_entity: Some(target.into()),
            ..Self::new(name, FieldKind::Relation)
        }
    }

    /// Builder: set the human label
    pub fn verbose(mut self, verbose_name: impl Into<String>) -> Self {
        self.verbose_name = Some(verbose_name.into());
        self
    }

    pub fn is_relation(&self) -> bool {
        self.kind == FieldKind::Relation
    }

    /// Human label, falling back to the field name
    pub fn label(&self) -> &str {
        self.verbose_name.as_deref().unwrap_or(&self.name)
    }
}

/// An entity (table) with its fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    #[serde(default)]
    pub verbose_name: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

fn default_primary_key() -> String {
    "id".to_string()
}

impl EntitySchema {
    /// Create an entity with an integer `id` primary key
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verbose_name: None,
            primary_key: default_primary_key(),
            fields: vec![FieldDef::integer("id")],
        }
    }

    /// Builder: use a different primary key field (replacing `id`)
    pub fn primary_key(mut self, field: FieldDef) -> Self {
        self.fields.retain(|f| f.name != self.primary_key);
        self.primary_key = field.name.clone();
        self.fields.insert(0, field);
        self
    }

    /// Builder: add a field
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Builder: set the human label
    pub fn verbose(mut self, verbose_name: impl Into<String>) -> Self {
        self.verbose_name = Some(verbose_name.into());
        self
    }

    pub fn label(&self) -> &str {
        self.verbose_name.as_deref().unwrap_or(&self.name)
    }

    /// Look up a field by name; `<relation>_id` resolves to the relation itself
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name).or_else(|| {
            name.strip_suffix("_id")
                .and_then(|rel| self.fields.iter().find(|f| f.name == rel && f.is_relation()))
        })
    }

    /// Names of all concrete fields, primary key first
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// Outcome of walking a `a__b__c` path from a starting entity
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    /// Entity the walk started from
    pub root: String,
    /// Entity owning the final field
    pub entity: String,
    /// The final field
    pub field: FieldDef,
    /// Relation fields traversed before the final one, with the entity they live on
    pub hops: Vec<(String, FieldDef)>,
}

impl ResolvedPath {
    /// Whether the final field is itself a relation
    pub fn is_relation(&self) -> bool {
        self.field.is_relation()
    }

    /// Entity the final relation points to, if any
    pub fn target_entity(&self) -> Option<&str> {
        self.field.related_entity.as_deref()
    }

    pub fn traverses(&self) -> bool {
        !self.hops.is_empty()
    }
}

/// Collection of entities exposed by a data source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    entities: BTreeMap<String, EntitySchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add an entity
    pub fn entity(mut self, entity: EntitySchema) -> Self {
        self.add_entity(entity);
        self
    }

    pub fn add_entity(&mut self, entity: EntitySchema) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub fn get(&self, name: &str) -> SourceResult<&EntitySchema> {
        self.entities
            .get(name)
            .ok_or_else(|| SourceError::EntityNotFound(name.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntitySchema> {
        self.entities.values()
    }

    /// Walk a (possibly traversing) field path starting at `entity`
    pub fn resolve_path(&self, entity: &str, path: &str) -> SourceResult<ResolvedPath> {
        let mut current = self.get(entity)?;
        let mut hops = Vec::new();
        let parts: Vec<&str> = path.split(PATH_SEPARATOR).collect();

        for (i, part) in parts.iter().enumerate() {
            let field = current.get_field(part).ok_or_else(|| SourceError::FieldNotFound {
                entity: current.name.clone(),
                path: path.to_string(),
            })?;

            if i == parts.len() - 1 {
                return Ok(ResolvedPath {
                    root: entity.to_string(),
                    entity: current.name.clone(),
                    field: field.clone(),
                    hops,
                });
            }

            let target = match (&field.kind, &field.related_entity) {
                (FieldKind::Relation, Some(target)) => target,
                _ => {
                    return Err(SourceError::NotARelation {
                        entity: current.name.clone(),
                        field: field.name.clone(),
                    })
                }
            };
            hops.push((current.name.clone(), field.clone()));
            current = self.get(target)?;
        }

        Err(SourceError::FieldNotFound {
            entity: entity.to_string(),
            path: path.to_string(),
        })
    }

    /// Parse a schema file: a list of `[[entities]]` tables
    pub fn from_toml(content: &str) -> SourceResult<Self> {
        let file: SchemaFile = toml::from_str(content).map_err(|e| SourceError::Parse(e.to_string()))?;
        Ok(file.entities.into_iter().fold(Schema::new(), Schema::entity))
    }

    pub fn load(path: &Path) -> SourceResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

#[derive(Deserialize)]
struct SchemaFile {
    #[serde(default)]
    entities: Vec<EntitySchema>,
}
