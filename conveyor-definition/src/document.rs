//! Raw definition document
//!
//! Serde representation of the YAML document exactly as written. Nothing in
//! here is validated beyond its shape; [`crate::parser`] turns a [`Document`]
//! into a checked [`conveyor_core::domain::definition::DefinitionModel`].
//!
//! Job and workflow mappings are read into [`NamedEntries`], which keeps
//! definition order and duplicate keys so duplicates can be reported by name.

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// Top-level definition document
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document {
    /// Version tag; YAML reads `2.1` as a number, so any scalar is accepted
    #[serde(default)]
    pub version: Option<serde_yaml::Value>,

    #[serde(default)]
    pub jobs: NamedEntries<JobDocument>,

    #[serde(default)]
    pub workflows: NamedEntries<WorkflowDocument>,
}

/// Mapping entries in document order, duplicates included
#[derive(Debug)]
pub struct NamedEntries<T>(pub Vec<(String, T)>);

impl<T> Default for NamedEntries<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<'de, T> Deserialize<'de> for NamedEntries<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T> Visitor<'de> for EntriesVisitor<T>
        where
            T: Deserialize<'de>,
        {
            type Value = NamedEntries<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of names to definitions")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(NamedEntries::default())
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, value)) = map.next_entry::<String, T>()? {
                    entries.push((name, value));
                }
                Ok(NamedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

/// A job entry under `jobs:`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDocument {
    pub environment: EnvironmentDocument,

    #[serde(default)]
    pub steps: Vec<StepDocument>,
}

/// The `environment:` block of a job
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentDocument {
    pub image: String,

    #[serde(default)]
    pub resource_class: Option<String>,

    #[serde(default)]
    pub working_directory: Option<String>,

    #[serde(default)]
    pub variables: BTreeMap<String, ScalarDocument>,
}

/// A scalar value that is exported as a string
///
/// Numbers are rendered from their parsed value, not their source text:
/// `1.10` exports as `1.1`. Quote a value to export it exactly as written.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScalarDocument {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for ScalarDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarDocument::Bool(value) => write!(f, "{}", value),
            ScalarDocument::Integer(value) => write!(f, "{}", value),
            ScalarDocument::Float(value) => write!(f, "{}", value),
            ScalarDocument::String(value) => write!(f, "{}", value),
        }
    }
}

/// An entry of a job's `steps:` list
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDocument {
    /// Defaults to the first line of the command
    #[serde(default)]
    pub name: Option<String>,

    pub command: String,

    #[serde(default)]
    pub timeout: Option<TimeoutDocument>,

    #[serde(default)]
    pub allow_failure: bool,
}

/// A timeout given either as whole seconds or as text like `10m`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimeoutDocument {
    Seconds(u64),
    Text(String),
}

/// A workflow entry under `workflows:`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDocument {
    pub trigger: TriggerDocument,

    #[serde(default)]
    pub jobs: Vec<String>,
}

/// A workflow trigger: either a bare name (`push`) or a table
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TriggerDocument {
    Named(String),
    Table(TriggerTable),
}

/// Table form of a trigger
///
/// The outer `Option` tells whether the key is present at all, the inner one
/// whether it has a value, so `push:` with nothing after it still counts.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerTable {
    #[serde(default, deserialize_with = "present")]
    pub push: Option<Option<PushDocument>>,

    #[serde(default, deserialize_with = "present")]
    pub schedule: Option<Option<ScheduleDocument>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushDocument {
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleDocument {
    #[serde(default)]
    pub cron: Option<String>,

    #[serde(default)]
    pub branch: Option<String>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
