//! Materialized records.
//!
//! A [`Record`] stores only the columns its query returned. Presence in the
//! attribute map is the loaded signal: a key mapped to a null `Value` is a loaded
//! null, while a missing key is an attribute that was never fetched. Reading a
//! missing attribute that is declared lazy goes through an [`AttributeLoader`].

use crate::executor::LifeError;
use crate::schema::EntityDef;
use indexmap::IndexMap;
use sea_query::Value;
use std::sync::Arc;

/// One result row keyed by output name (alias when present, else column name)
pub type Row = IndexMap<String, Value>;

/// Fetches a single absent attribute of a record
pub trait AttributeLoader {
    /// Load `attribute` for `record`, keyed by its primary key
    ///
    /// # Errors
    ///
    /// Returns `LifeError::RecordNotFound` when the keyed row no longer exists.
    fn load_attribute(&self, record: &Record, attribute: &str) -> Result<Value, LifeError>;
}

/// Cached result of an association load
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

impl Loaded {
    pub fn as_one(&self) -> Option<&Record> {
        match self {
            Loaded::One(record) => record.as_deref(),
            Loaded::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> &[Record] {
        match self {
            Loaded::Many(records) => records,
            Loaded::One(_) => &[],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Loaded::One(record) => usize::from(record.is_some()),
            Loaded::Many(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A materialized, possibly partial, entity instance
#[derive(Clone)]
pub struct Record {
    entity: Arc<EntityDef>,
    attributes: IndexMap<String, Value>,
    associations: IndexMap<String, Loaded>,
}

impl Record {
    pub fn new(entity: Arc<EntityDef>, attributes: Row) -> Self {
        Self {
            entity,
            attributes,
            associations: IndexMap::new(),
        }
    }

    pub fn entity(&self) -> &Arc<EntityDef> {
        &self.entity
    }

    pub fn entity_name(&self) -> &str {
        self.entity.name()
    }

    pub fn attributes(&self) -> &IndexMap<String, Value> {
        &self.attributes
    }

    /// Names of loaded attributes in load order
    pub fn attribute_names(&self) -> Vec<&str> {
        self.attributes.keys().map(String::as_str).collect()
    }

    /// Loaded value, without triggering any fetch
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Whether `name` is present in attribute storage (a loaded null counts)
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Loaded primary key value
    ///
    /// # Errors
    ///
    /// Returns `LifeError::MissingAttribute` if the primary key was not selected.
    pub fn primary_key_value(&self) -> Result<&Value, LifeError> {
        let pk = self.entity.primary_key_column();
        self.attributes
            .get(pk)
            .ok_or_else(|| LifeError::MissingAttribute {
                entity: self.entity.name().to_string(),
                attribute: pk.to_string(),
            })
    }

    /// Read an attribute, fetching it on demand when it is lazy and not yet loaded
    ///
    /// The fetched value is memoized, so each lazy attribute costs at most one
    /// query per record.
    ///
    /// # Errors
    ///
    /// Returns `LifeError::MissingAttribute` for an absent attribute that is not
    /// lazy, and whatever the loader returns for a failed fetch.
    pub fn read_attribute(
        &mut self,
        name: &str,
        loader: &dyn AttributeLoader,
    ) -> Result<&Value, LifeError> {
        if !self.attributes.contains_key(name) {
            if !self.entity.is_lazy(name) {
                return Err(LifeError::MissingAttribute {
                    entity: self.entity.name().to_string(),
                    attribute: name.to_string(),
                });
            }
            let value = loader.load_attribute(self, name)?;
            self.attributes.insert(name.to_string(), value);
        }
        self.attributes
            .get(name)
            .ok_or_else(|| LifeError::Other(format!("attribute {name} vanished after load")))
    }

    /// Remove a bookkeeping attribute after it has been consumed
    pub(crate) fn take_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes.shift_remove(name)
    }

    pub fn set_association(&mut self, name: impl Into<String>, loaded: Loaded) {
        self.associations.insert(name.into(), loaded);
    }

    pub fn association(&self, name: &str) -> Option<&Loaded> {
        self.associations.get(name)
    }

    pub fn association_mut(&mut self, name: &str) -> Option<&mut Loaded> {
        self.associations.get_mut(name)
    }

    pub fn is_association_loaded(&self, name: &str) -> bool {
        self.associations.contains_key(name)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.entity.name() == other.entity.name()
            && self.attributes == other.attributes
            && self.associations == other.associations
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("entity", &self.entity.name())
            .field("attributes", &self.attributes)
            .field("associations", &self.associations.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Whether `value` is SQL NULL
pub fn is_null(value: &Value) -> bool {
    *value == value.as_null()
}

/// Comparison key for a value, normalizing integer widths
///
/// `None` for NULL. Keys of different kinds never collide, so `1` and `"1"`
/// stay distinct.
pub fn value_key(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => b.map(|b| format!("b:{b}")),
        Value::TinyInt(i) => i.map(|i| format!("i:{i}")),
        Value::SmallInt(i) => i.map(|i| format!("i:{i}")),
        Value::Int(i) => i.map(|i| format!("i:{i}")),
        Value::BigInt(i) => i.map(|i| format!("i:{i}")),
        Value::TinyUnsigned(u) => u.map(|u| format!("i:{u}")),
        Value::SmallUnsigned(u) => u.map(|u| format!("i:{u}")),
        Value::Unsigned(u) => u.map(|u| format!("i:{u}")),
        Value::BigUnsigned(u) => u.map(|u| format!("i:{u}")),
        Value::Float(f) => f.map(|f| format!("f:{f}")),
        Value::Double(d) => d.map(|d| format!("f:{d}")),
        Value::String(s) => s.as_ref().map(|s| format!("s:{s}")),
        Value::Char(c) => c.map(|c| format!("s:{c}")),
        Value::Bytes(b) => b.as_ref().map(|b| format!("x:{b:?}")),
        Value::Uuid(u) => u.map(|u| format!("u:{u}")),
        Value::Decimal(d) => d.map(|d| format!("d:{d}")),
        Value::ChronoDate(d) => d.map(|d| format!("t:{d}")),
        Value::ChronoDateTime(d) => d.map(|d| format!("t:{d}")),
        Value::ChronoDateTimeUtc(d) => d.map(|d| format!("t:{d}")),
        other if is_null(other) => None,
        other => Some(format!("v:{other:?}")),
    }
}

/// Human readable form of a value, used in error messages and logs
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(Some(s)) => s.to_string(),
        other => match value_key(other) {
            Some(key) => key.split_once(':').map_or(key.clone(), |(_, v)| v.to_string()),
            None => "NULL".to_string(),
        },
    }
}
