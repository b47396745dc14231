//! The per-service properties map and the reserved `"Filter"` predicate key.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::id::ServiceId;

/// The reserved properties key carrying a [`Filter`] that restricts which
/// candidate providers may satisfy a dependency.
pub const FILTER_KEY: &str = "Filter";

/// A dynamically typed property value.
#[derive(Clone)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Str(String),
    /// An opaque predicate, normally stored under [`FILTER_KEY`].
    Filter(Filter),
    /// Anything else the application wants to stash on a service.
    Any(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Filter(_) => write!(f, "Filter(..)"),
            Self::Any(_) => write!(f, "Any(..)"),
        }
    }
}

/// Case-sensitive string-keyed property map attached to a service at
/// construction.
#[derive(Debug, Clone, Default)]
pub struct Properties(HashMap<String, PropertyValue>);

impl Properties {
    #[inline]
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    #[inline]
    pub fn insert(&mut self, key: impl Into<String>, value: PropertyValue) -> &mut Self {
        self.0.insert(key.into(), value);
        self
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    /// Attach a [`Filter`] under the reserved [`FILTER_KEY`].
    #[inline]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.0.insert(FILTER_KEY.to_string(), PropertyValue::Filter(filter));
        self
    }

    /// The filter restricting dependency candidates, if one was set.
    pub fn filter(&self) -> Option<&Filter> {
        match self.0.get(FILTER_KEY) {
            Some(PropertyValue::Filter(f)) => Some(f),
            _ => None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An opaque predicate restricting which candidate providers may satisfy a
/// dependency. Parameterized on the candidate's [`ServiceId`] and its
/// [`Properties`], per the design note in spec §9.
#[derive(Clone)]
pub struct Filter(Arc<dyn Fn(ServiceId, &Properties) -> bool + Send + Sync>);

impl Filter {
    /// Build a filter from a predicate closure.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(ServiceId, &Properties) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    /// Evaluate the filter against a candidate provider.
    #[inline]
    pub fn matches(&self, candidate: ServiceId, properties: &Properties) -> bool {
        (self.0)(candidate, properties)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Filter(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_roundtrip() {
        let mut props = Properties::new();
        props.insert("name", PropertyValue::Str("db".into()));
        match props.get("name") {
            Some(PropertyValue::Str(s)) => assert_eq!(s, "db"),
            _ => panic!("expected Str"),
        }
    }

    #[test]
    fn filter_restricts_candidates() {
        let filter = Filter::new(|id, _props| id.get() % 2 == 0);
        let props = Properties::new();
        assert!(filter.matches(ServiceId(2), &props));
        assert!(!filter.matches(ServiceId(3), &props));
    }

    #[test]
    fn filter_attaches_under_reserved_key() {
        let filter = Filter::new(|_, _| true);
        let props = Properties::new().with_filter(filter);
        assert!(props.filter().is_some());
    }
}
