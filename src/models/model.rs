//! Loaded, fully named planning model.
//!
//! A [`Model`] is the immutable result of validating a [`Problem`]: every
//! object has its final name, facts and goals point at timeline indices,
//! and name lookups are indexed. Planning state is only ever created from a
//! `Model`, never from a raw `Problem`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::{Problem, StateTemplate};
use crate::validation::{self, ValidationError};

/// A resource with its resolved name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDef {
    /// Unique object name.
    pub name: String,
    /// Resource class.
    pub class: String,
    /// Maximum simultaneous usage. `None` = unbounded.
    pub capacity: Option<u32>,
}

/// A timeline with its resolved name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineDef {
    /// Unique object name.
    pub name: String,
    /// Timeline class. `None` for facts-only timelines.
    pub class: Option<String>,
    /// State templates (empty for facts-only timelines).
    pub states: Vec<StateTemplate>,
}

/// A fact or goal bound to a timeline index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundRef {
    /// Index into [`Model::timelines`].
    pub timeline: usize,
    /// State value.
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectKey {
    Resource(usize),
    Timeline(usize),
}

/// A validated planning model.
#[derive(Debug, Clone)]
pub struct Model {
    /// Resources in declaration order.
    pub resources: Vec<ResourceDef>,
    /// Declared timelines in declaration order, followed by facts-only
    /// timelines in order of first mention.
    pub timelines: Vec<TimelineDef>,
    /// Facts in declaration order.
    pub facts: Vec<GroundRef>,
    /// Goals in declaration order.
    pub goals: Vec<GroundRef>,
    /// Classes whose instances may be synthesized.
    pub open_classes: BTreeSet<String>,
    pub(crate) names: HashMap<String, ObjectKey>,
}

impl Model {
    /// Validates a problem and resolves it into a model.
    ///
    /// Returns every detected [`ValidationError`] when the problem is
    /// malformed.
    pub fn load(problem: &Problem) -> Result<Self, Vec<ValidationError>> {
        validation::load_model(problem)
    }

    /// Index of the timeline with the given name.
    pub fn timeline_index(&self, name: &str) -> Option<usize> {
        match self.names.get(name) {
            Some(ObjectKey::Timeline(i)) => Some(*i),
            _ => None,
        }
    }

    /// Index of the resource with the given name.
    pub fn resource_index(&self, name: &str) -> Option<usize> {
        match self.names.get(name) {
            Some(ObjectKey::Resource(i)) => Some(*i),
            _ => None,
        }
    }

    /// Whether any object (resource or timeline) carries this name.
    pub fn has_object(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Indices of the timelines of a class, in declaration order.
    pub fn timelines_of_class<'a>(&'a self, class: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.timelines
            .iter()
            .enumerate()
            .filter(move |(_, t)| t.class.as_deref() == Some(class))
            .map(|(i, _)| i)
    }

    /// Indices of the resources of a class, in declaration order.
    pub fn resources_of_class<'a>(&'a self, class: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.resources
            .iter()
            .enumerate()
            .filter(move |(_, r)| r.class == class)
            .map(|(i, _)| i)
    }

    /// Whether instances of the class may be synthesized during planning.
    pub fn is_open(&self, class: &str) -> bool {
        self.open_classes.contains(class)
    }

    /// Facts of a timeline, in declaration order.
    pub fn facts_on(&self, timeline: usize) -> impl Iterator<Item = &GroundRef> {
        self.facts.iter().filter(move |f| f.timeline == timeline)
    }
}
