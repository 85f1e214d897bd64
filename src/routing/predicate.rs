//! # Predicates
//!
//! Named, AND-composed predicate values held by handler registrations. Clauses
//! are evaluated in insertion order and evaluation stops at the first clause
//! returning `false`.

use std::fmt;
use std::sync::Arc;

type Clause<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// An AND-composition of named clauses over `T`; no clauses matches everything
pub struct Predicate<T: ?Sized> {
    clauses: Vec<(String, Clause<T>)>,
}

impl<T: ?Sized> Predicate<T> {
    /// The match-all predicate
    pub fn always() -> Self {
        Self { clauses: Vec::new() }
    }

    pub fn new<F>(name: impl Into<String>, clause: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            clauses: vec![(name.into(), Arc::new(clause))],
        }
    }

    /// Append another clause; it runs after the existing ones
    pub fn and<F>(mut self, name: impl Into<String>, clause: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.clauses.push((name.into(), Arc::new(clause)));
        self
    }

    /// Append all clauses of `other`
    pub fn and_predicate(mut self, other: Predicate<T>) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    pub fn evaluate(&self, value: &T) -> bool {
        self.clauses.iter().all(|(_, clause)| clause(value))
    }

    /// Name of the first clause rejecting `value`, if any
    pub fn first_rejecting_clause(&self, value: &T) -> Option<&str> {
        self.clauses
            .iter()
            .find(|(_, clause)| !clause(value))
            .map(|(name, _)| name.as_str())
    }

    pub fn clause_names(&self) -> Vec<&str> {
        self.clauses.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn is_match_all(&self) -> bool {
        self.clauses.is_empty()
    }
}

impl<T: ?Sized> Default for Predicate<T> {
    fn default() -> Self {
        Self::always()
    }
}

impl<T: ?Sized> Clone for Predicate<T> {
    fn clone(&self) -> Self {
        Self {
            clauses: self.clauses.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Predicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("clauses", &self.clause_names())
            .finish()
    }
}
