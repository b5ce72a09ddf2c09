//! Provider types, the typed capabilities tasks share with each other.
//!
//! A [`ProviderType<T>`] is an identity, not a name. Every call to
//! [`ProviderType::new`] draws a fresh id, so two types labelled `"config"`
//! never match each other. The label only shows up in diagnostics.
//!
//! Like the task handles of a build graph, the type parameter only exists at
//! compile time. At runtime values are stored as `Arc<dyn Any + Send + Sync>`
//! and the handle remembers the [`TypeId`] of `T` so the engine can check every
//! exported value against its declaration before anyone downcasts it.

use std::any::{TypeId, type_name};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::context::Dynamic;
use crate::error::ProviderError;

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderTypeId(u64);

/// Where an exported provider is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// The exporting node and all of its descendants.
    #[default]
    Subtree,
    /// Every task in the tree, through a single shared registry.
    Project,
}

/// The type-erased part of a [`ProviderType`].
#[derive(Debug, Clone)]
pub(crate) struct ProviderTypeInfo {
    pub id: ProviderTypeId,
    pub name: Arc<str>,
    pub read_only: bool,
    pub scope: Scope,
    pub value_type: TypeId,
    pub value_type_name: &'static str,
}

/// A typed token identifying one kind of capability.
///
/// ```rust
/// use gentree::ProviderType;
///
/// struct Paths { root: String }
///
/// let paths = ProviderType::<Paths>::new("paths").read_only();
/// assert!(paths.is_read_only());
/// ```
pub struct ProviderType<T> {
    info: ProviderTypeInfo,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> ProviderType<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            info: ProviderTypeInfo {
                id: ProviderTypeId(NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed)),
                name: name.into(),
                read_only: false,
                scope: Scope::Subtree,
                value_type: TypeId::of::<T>(),
                value_type_name: type_name::<T>(),
            },
            _phantom: PhantomData,
        }
    }

    /// Marks the type as read-only, which allows it to be exported as an
    /// output and consumed by later phases.
    pub fn read_only(mut self) -> Self {
        self.info.read_only = true;
        self
    }

    /// Makes project scope the default for exports of this type.
    pub fn project_scoped(mut self) -> Self {
        self.info.scope = Scope::Project;
        self
    }
}

impl<T> ProviderType<T> {
    pub fn id(&self) -> ProviderTypeId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_read_only(&self) -> bool {
        self.info.read_only
    }

    pub fn scope(&self) -> Scope {
        self.info.scope
    }

    /// Export under the type's default scope.
    pub fn export(&self) -> ProviderExport {
        self.export_to(self.info.scope)
    }

    pub fn export_to(&self, scope: Scope) -> ProviderExport {
        ProviderExport {
            info: self.info.clone(),
            scope,
        }
    }

    pub fn dependency(&self) -> DependencyRequest {
        DependencyRequest {
            info: self.info.clone(),
            optional: false,
        }
    }
}

impl<T> Clone for ProviderType<T> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for ProviderType<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderType")
            .field("name", &self.info.name)
            .field("id", &self.info.id)
            .field("read_only", &self.info.read_only)
            .field("scope", &self.info.scope)
            .finish()
    }
}

/// A declared export: which type, visible where.
#[derive(Debug, Clone)]
pub struct ProviderExport {
    pub(crate) info: ProviderTypeInfo,
    pub(crate) scope: Scope,
}

impl ProviderExport {
    pub fn type_id(&self) -> ProviderTypeId {
        self.info.id
    }

    pub fn type_name(&self) -> &str {
        &self.info.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }
}

impl<T> From<&ProviderType<T>> for ProviderExport {
    fn from(value: &ProviderType<T>) -> Self {
        value.export()
    }
}

/// A declared dependency on some provider type.
#[derive(Debug, Clone)]
pub struct DependencyRequest {
    pub(crate) info: ProviderTypeInfo,
    pub(crate) optional: bool,
}

impl DependencyRequest {
    /// An optional dependency resolves to nothing instead of failing the run
    /// when no provider is visible.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn type_id(&self) -> ProviderTypeId {
        self.info.id
    }

    pub fn type_name(&self) -> &str {
        &self.info.name
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

impl<T> From<&ProviderType<T>> for DependencyRequest {
    fn from(value: &ProviderType<T>) -> Self {
        value.dependency()
    }
}

/// A stored provider value together with the name of its concrete type.
#[derive(Clone)]
pub(crate) struct Value {
    pub data: Dynamic,
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl Value {
    fn new<T: Send + Sync + 'static>(data: Arc<T>) -> Self {
        Self {
            data,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }
}

/// Named provider values handed back by a task, from `run` for its exports
/// and from `build` for its outputs.
#[derive(Clone, Default)]
pub struct Providers {
    pub(crate) values: BTreeMap<String, Value>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T>(&mut self, key: impl Into<String>, value: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.insert_arc(key, Arc::new(value))
    }

    /// Inserts an already shared value. Consumers receive this exact `Arc`.
    pub fn insert_arc<T>(&mut self, key: impl Into<String>, value: Arc<T>) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.values.insert(key.into(), Value::new(value));
        self
    }

    pub fn with<T>(mut self, key: impl Into<String>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.insert(key, value);
        self
    }

    pub fn with_arc<T>(mut self, key: impl Into<String>, value: Arc<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.insert_arc(key, value);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Checks the values against what the task declared: every declared key
    /// present, nothing extra, every value of the declared type.
    pub(crate) fn validate(
        &self,
        kind: &'static str,
        declared: &BTreeMap<String, ProviderExport>,
    ) -> Result<(), ProviderError> {
        for (key, export) in declared {
            let value = self.values.get(key).ok_or_else(|| ProviderError::Missing {
                kind,
                key: key.clone(),
            })?;

            if value.type_id != export.info.value_type {
                return Err(ProviderError::TypeMismatch {
                    kind,
                    key: key.clone(),
                    expected: export.info.value_type_name,
                    actual: value.type_name,
                });
            }
        }

        if let Some(key) = self.values.keys().find(|key| !declared.contains_key(*key)) {
            return Err(ProviderError::Undeclared {
                kind,
                key: key.clone(),
            });
        }

        Ok(())
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.values.iter().map(|(k, v)| (k, v.type_name)))
            .finish()
    }
}

/// The dependencies of a task, resolved to concrete provider values.
///
/// Passed to the task's `run` step. A key maps to `None` only for optional
/// dependencies nobody provides.
#[derive(Clone, Default)]
pub struct Resolved {
    pub(crate) values: BTreeMap<String, Option<Value>>,
}

impl Resolved {
    /// Returns the provider stored under `key`.
    ///
    /// The returned `Arc` is the same allocation the exporting task handed to
    /// the engine.
    pub fn get<T>(&self, key: &str) -> Result<Arc<T>, ProviderError>
    where
        T: Send + Sync + 'static,
    {
        self.get_optional(key)?
            .ok_or_else(|| ProviderError::NotResolved(key.to_string()))
    }

    pub fn get_optional<T>(&self, key: &str) -> Result<Option<Arc<T>>, ProviderError>
    where
        T: Send + Sync + 'static,
    {
        let slot = self
            .values
            .get(key)
            .ok_or_else(|| ProviderError::UnknownDependency(key.to_string()))?;

        let Some(value) = slot else {
            return Ok(None);
        };

        value
            .data
            .clone()
            .downcast::<T>()
            .map(Some)
            .map_err(|_| ProviderError::WrongType {
                key: key.to_string(),
                expected: type_name::<T>(),
                actual: value.type_name,
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(Some(_)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(
                self.values
                    .iter()
                    .map(|(k, v)| (k, v.as_ref().map(|v| v.type_name))),
            )
            .finish()
    }
}
