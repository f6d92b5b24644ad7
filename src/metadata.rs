//! Key schemas of domain types.
//!
//! An [`EntityDescriptor`] declares which properties are the table's partition and sort keys and
//! which secondary indexes they key. [`EntityKeySchema::resolve`] validates the declaration once
//! per type and caches the result.

use super::{value::Item, Entity, Error, Result};
use parking_lot::RwLock;
use std::{
    any::TypeId,
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{Arc, OnceLock},
};

/// The stored type of a key attribute, needed when tables are created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScalarType {
    #[default]
    S,
    N,
    B,
    /// Stored as `N` or `S` depending on the [`crate::MarshallingMode`].
    Timestamp,
}

/// Declares one property of a domain type and the key roles it plays.
#[derive(Clone, Debug, Default)]
pub struct PropertyDescriptor {
    name: String,
    attribute_name: Option<String>,
    scalar_type: ScalarType,
    partition_key: bool,
    sort_key: bool,
    global_index_partition_keys: Vec<String>,
    global_index_sort_keys: Vec<String>,
    local_index_sort_keys: Vec<String>,
}

impl PropertyDescriptor {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn partition_key(mut self) -> Self {
        self.partition_key = true;
        self
    }

    pub fn sort_key(mut self) -> Self {
        self.sort_key = true;
        self
    }

    /// Stores the property under a different attribute name.
    pub fn attribute_name<S: Into<String>>(mut self, name: S) -> Self {
        self.attribute_name = Some(name.into());
        self
    }

    /// Only matters for key attributes. Defaults to `S`.
    pub fn scalar_type(mut self, scalar_type: ScalarType) -> Self {
        self.scalar_type = scalar_type;
        self
    }

    pub fn global_index_partition_key<I: IntoIterator<Item = S>, S: Into<String>>(mut self, index_names: I) -> Self {
        self.global_index_partition_keys.extend(index_names.into_iter().map(Into::into));
        self
    }

    pub fn global_index_sort_key<I: IntoIterator<Item = S>, S: Into<String>>(mut self, index_names: I) -> Self {
        self.global_index_sort_keys.extend(index_names.into_iter().map(Into::into));
        self
    }

    pub fn local_index_sort_key<S: Into<String>>(mut self, index_name: S) -> Self {
        self.local_index_sort_keys.push(index_name.into());
        self
    }
}

/// The declarative description of a domain type, returned by [`Entity::describe`].
#[derive(Clone, Debug)]
pub struct EntityDescriptor {
    table_name: String,
    properties: Vec<PropertyDescriptor>,
}

impl EntityDescriptor {
    /// `table_name` is the base table name. It is usually the type's name and may be rewritten per
    /// environment by [`crate::TableNameResolver`].
    pub fn new<S: Into<String>>(table_name: S) -> Self {
        Self {
            table_name: table_name.into(),
            properties: vec![],
        }
    }

    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Shorthand for a property with no key role.
    pub fn attribute<S: Into<String>>(self, name: S) -> Self {
        self.property(PropertyDescriptor::new(name))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    Global,
    Local,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecondaryIndex {
    pub name: String,
    pub kind: IndexKind,
    /// For local indexes this is always the table's partition key property.
    pub hash_key_property: String,
    pub range_key_property: Option<String>,
}

/// The validated key schema of a domain type. Immutable once resolved.
#[derive(Clone, Debug)]
pub struct EntityKeySchema {
    table_name: String,
    hash_key_property: String,
    range_key_property: Option<String>,
    properties: Vec<String>,
    attribute_name_overrides: HashMap<String, String>,
    property_names_by_attribute: HashMap<String, String>,
    scalar_types: HashMap<String, ScalarType>,
    indexes: BTreeMap<String, SecondaryIndex>,
    index_names_by_property: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Clone, Copy)]
enum IndexKeyRole {
    GlobalPartitionKey,
    GlobalSortKey,
    LocalSortKey,
}

#[derive(Default)]
struct IndexDeclaration {
    global_partition_keys: Vec<String>,
    global_sort_keys: Vec<String>,
    local_sort_keys: Vec<String>,
}

impl IndexDeclaration {
    fn keys_mut(&mut self, role: IndexKeyRole) -> &mut Vec<String> {
        match role {
            IndexKeyRole::GlobalPartitionKey => &mut self.global_partition_keys,
            IndexKeyRole::GlobalSortKey => &mut self.global_sort_keys,
            IndexKeyRole::LocalSortKey => &mut self.local_sort_keys,
        }
    }
}

fn schemas() -> &'static RwLock<HashMap<TypeId, Arc<EntityKeySchema>>> {
    static SCHEMAS: OnceLock<RwLock<HashMap<TypeId, Arc<EntityKeySchema>>>> = OnceLock::new();
    SCHEMAS.get_or_init(Default::default)
}

impl EntityKeySchema {
    /// Returns the schema of `T`, resolving and caching it on first use.
    pub fn of<T: Entity>() -> Result<Arc<Self>> {
        let type_id = TypeId::of::<T>();
        if let Some(schema) = schemas().read().get(&type_id) {
            return Ok(schema.clone());
        }
        let schema = Arc::new(Self::resolve(&T::describe())?);
        Ok(schemas().write().entry(type_id).or_insert(schema).clone())
    }

    pub fn resolve(descriptor: &EntityDescriptor) -> Result<Self> {
        let table = &descriptor.table_name;
        if table.is_empty() {
            return Err(Error::Configuration("table name must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        let mut hash_keys = vec![];
        let mut range_keys = vec![];
        let mut attribute_name_overrides = HashMap::new();
        let mut property_names_by_attribute = HashMap::new();
        let mut declarations: BTreeMap<String, IndexDeclaration> = BTreeMap::new();

        for p in &descriptor.properties {
            if p.name.is_empty() {
                return Err(Error::Configuration(format!("{}: property names must not be empty", table)));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(Error::Configuration(format!("{}: property {} is declared more than once", table, p.name)));
            }
            if p.partition_key && p.sort_key {
                return Err(Error::Configuration(format!(
                    "{}: property {} cannot be both the partition key and the sort key",
                    table, p.name
                )));
            }
            if p.partition_key {
                hash_keys.push(p.name.clone());
            }
            if p.sort_key {
                range_keys.push(p.name.clone());
            }

            let attribute_name = match &p.attribute_name {
                Some(a) if a.is_empty() => {
                    return Err(Error::Configuration(format!("{}: attribute name of {} must not be empty", table, p.name)));
                }
                Some(a) => {
                    attribute_name_overrides.insert(p.name.clone(), a.clone());
                    a.clone()
                }
                None => p.name.clone(),
            };
            if let Some(other) = property_names_by_attribute.insert(attribute_name.clone(), p.name.clone()) {
                return Err(Error::Configuration(format!(
                    "{}: properties {} and {} are both stored as attribute {}",
                    table, other, p.name, attribute_name
                )));
            }

            for (names, role) in [
                (&p.global_index_partition_keys, IndexKeyRole::GlobalPartitionKey),
                (&p.global_index_sort_keys, IndexKeyRole::GlobalSortKey),
                (&p.local_index_sort_keys, IndexKeyRole::LocalSortKey),
            ] {
                for index_name in names {
                    if index_name.is_empty() {
                        return Err(Error::Configuration(format!("{}: property {} names an empty index", table, p.name)));
                    }
                    declarations.entry(index_name.clone()).or_default().keys_mut(role).push(p.name.clone());
                }
            }
        }

        let hash_key_property = match hash_keys.as_slice() {
            [one] => one.clone(),
            [] => return Err(Error::Configuration(format!("{}: no partition key declared", table))),
            many => {
                return Err(Error::Configuration(format!(
                    "{}: multiple partition keys declared: {}",
                    table,
                    many.join(", ")
                )))
            }
        };
        let range_key_property = match range_keys.as_slice() {
            [] => None,
            [one] => Some(one.clone()),
            many => return Err(Error::Configuration(format!("{}: multiple sort keys declared: {}", table, many.join(", ")))),
        };

        let mut indexes = BTreeMap::new();
        let mut index_names_by_property: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (name, d) in declarations {
            let is_global = !d.global_partition_keys.is_empty() || !d.global_sort_keys.is_empty();
            if is_global && !d.local_sort_keys.is_empty() {
                return Err(Error::Configuration(format!(
                    "{}: index {} is declared as both a global and a local secondary index",
                    table, name
                )));
            }
            if d.global_partition_keys.len() > 1 {
                return Err(Error::Configuration(format!(
                    "{}: index {} declares multiple partition keys: {}",
                    table,
                    name,
                    d.global_partition_keys.join(", ")
                )));
            }
            let sort_keys = if is_global { &d.global_sort_keys } else { &d.local_sort_keys };
            if sort_keys.len() > 1 {
                return Err(Error::Configuration(format!(
                    "{}: index {} declares multiple sort keys: {}",
                    table,
                    name,
                    sort_keys.join(", ")
                )));
            }

            let index = if is_global {
                let Some(hash) = d.global_partition_keys.first() else {
                    return Err(Error::Configuration(format!(
                        "{}: global secondary index {} has a sort key but no partition key",
                        table, name
                    )));
                };
                SecondaryIndex {
                    name: name.clone(),
                    kind: IndexKind::Global,
                    hash_key_property: hash.clone(),
                    range_key_property: d.global_sort_keys.first().cloned(),
                }
            } else {
                if range_key_property.is_none() {
                    return Err(Error::Configuration(format!(
                        "{}: local secondary index {} requires the table to have a sort key",
                        table, name
                    )));
                }
                SecondaryIndex {
                    name: name.clone(),
                    kind: IndexKind::Local,
                    hash_key_property: hash_key_property.clone(),
                    range_key_property: d.local_sort_keys.first().cloned(),
                }
            };

            if index.kind == IndexKind::Global {
                index_names_by_property.entry(index.hash_key_property.clone()).or_default().insert(name.clone());
            }
            if let Some(range) = &index.range_key_property {
                index_names_by_property.entry(range.clone()).or_default().insert(name.clone());
            }
            indexes.insert(name, index);
        }

        Ok(Self {
            table_name: table.clone(),
            hash_key_property,
            range_key_property,
            properties: descriptor.properties.iter().map(|p| p.name.clone()).collect(),
            scalar_types: descriptor.properties.iter().map(|p| (p.name.clone(), p.scalar_type)).collect(),
            attribute_name_overrides,
            property_names_by_attribute,
            indexes,
            index_names_by_property,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn hash_key_property_name(&self) -> &str {
        &self.hash_key_property
    }

    pub fn range_key_property_name(&self) -> Option<&str> {
        self.range_key_property.as_deref()
    }

    /// Local secondary indexes always share the table's partition key.
    pub fn local_index_hash_key_property_name(&self) -> &str {
        &self.hash_key_property
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p == name)
    }

    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    pub fn scalar_type(&self, property: &str) -> ScalarType {
        self.scalar_types.get(property).copied().unwrap_or_default()
    }

    pub fn is_global_index_hash_key_property(&self, property: &str) -> bool {
        self.indexes.values().any(|i| i.kind == IndexKind::Global && i.hash_key_property == property)
    }

    pub fn is_global_index_range_key_property(&self, property: &str) -> bool {
        self.indexes.values().any(|i| i.range_key_property.as_deref() == Some(property))
    }

    /// Names of the indexes the property is a key of, in lexicographic order.
    pub fn index_names_for(&self, property: &str) -> BTreeSet<String> {
        self.index_names_by_property.get(property).cloned().unwrap_or_default()
    }

    pub fn index(&self, name: &str) -> Option<&SecondaryIndex> {
        self.indexes.get(name)
    }

    /// All secondary indexes, in lexicographic order of their names.
    pub fn indexes(&self) -> impl Iterator<Item = &SecondaryIndex> {
        self.indexes.values()
    }

    pub fn overridden_attribute_name(&self, property: &str) -> Option<&str> {
        self.attribute_name_overrides.get(property).map(String::as_str)
    }

    pub fn attribute_name<'a>(&'a self, property: &'a str) -> &'a str {
        self.overridden_attribute_name(property).unwrap_or(property)
    }

    pub fn hash_key_attribute_name(&self) -> &str {
        self.attribute_name(&self.hash_key_property)
    }

    pub fn range_key_attribute_name(&self) -> Option<&str> {
        self.range_key_property.as_deref().map(|p| self.attribute_name(p))
    }

    /// Renames a property-keyed item into its stored attribute names.
    pub fn to_attributes(&self, item: Item) -> Item {
        item.into_iter().map(|(k, v)| (self.attribute_name(&k).to_string(), v)).collect()
    }

    /// Renames a stored item back into property names. Unknown attributes are kept as they are.
    pub fn to_properties(&self, item: Item) -> Item {
        item.into_iter()
            .map(|(k, v)| match self.property_names_by_attribute.get(&k) {
                Some(p) => (p.clone(), v),
                None => (k, v),
            })
            .collect()
    }

    /// Extracts the primary key attributes of a stored item.
    pub fn primary_key(&self, item: &Item) -> Item {
        let mut key = Item::new();
        for attribute in std::iter::once(self.hash_key_attribute_name()).chain(self.range_key_attribute_name()) {
            if let Some(v) = item.get(attribute) {
                key.insert(attribute.to_string(), v.clone());
            }
        }
        key
    }
}
