use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::ids::FacetId;
use crate::time_base::{datetime_base, duration_base, format_datetime, format_duration};
use crate::transform::{CategorialTransform, ContinuousTransform};
use crate::value::{
    ARRAY_SUFFIX, canonical_text, coerce_number, is_missing, is_missing_number, lookup,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacetKind {
    Continuous,
    Categorial,
    Datetime,
    Duration,
}

impl FacetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FacetKind::Continuous => "continuous",
            FacetKind::Categorial => "categorial",
            FacetKind::Datetime => "datetime",
            FacetKind::Duration => "duration",
        }
    }

    /// Continuous and time facets share the interval bucketing path.
    pub fn is_interval(self) -> bool {
        !matches!(self, FacetKind::Categorial)
    }
}

/// One typed column of a dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Facet {
    pub id: FacetId,
    pub name: String,
    pub accessor: String,
    pub kind: FacetKind,
    pub is_array: bool,
    /// Sentinels treated as missing in addition to `null`.
    pub missing: Vec<JsonValue>,
    pub description: String,
    /// Domain in base space.
    pub minval: Option<f64>,
    pub maxval: Option<f64>,
    pub continuous_transform: ContinuousTransform,
    pub categorial_transform: CategorialTransform,
}

impl Facet {
    pub fn new(name: impl Into<String>, accessor: impl Into<String>, kind: FacetKind) -> Self {
        let accessor = accessor.into();
        Self {
            id: FacetId::new(),
            name: name.into(),
            is_array: accessor.ends_with(ARRAY_SUFFIX),
            accessor,
            kind,
            missing: Vec::new(),
            description: String::new(),
            minval: None,
            maxval: None,
            continuous_transform: ContinuousTransform::identity(),
            categorial_transform: CategorialTransform::default(),
        }
    }

    pub fn continuous(accessor: &str) -> Self {
        Self::new(accessor, accessor, FacetKind::Continuous)
    }

    pub fn categorial(accessor: &str) -> Self {
        Self::new(accessor, accessor, FacetKind::Categorial)
    }

    pub fn with_missing(mut self, missing: Vec<JsonValue>) -> Self {
        self.missing = missing;
        self
    }

    /// Accessor with any array marker removed; used for collision checks and
    /// relational column names.
    pub fn column(&self) -> &str {
        self.accessor
            .strip_suffix(ARRAY_SUFFIX)
            .unwrap_or(&self.accessor)
    }

    pub fn domain(&self) -> Option<(f64, f64)> {
        self.minval.zip(self.maxval)
    }

    /// Numeric base value of one raw value, `None` when not convertible.
    pub fn base_value(&self, value: &JsonValue) -> Option<f64> {
        match self.kind {
            FacetKind::Continuous => coerce_number(value),
            FacetKind::Datetime => datetime_base(value),
            FacetKind::Duration => duration_base(value),
            FacetKind::Categorial => None,
        }
    }

    /// Valid base values of a record, one per array element.
    pub fn base_values(&self, record: &JsonValue) -> Vec<f64> {
        lookup(record, &self.accessor)
            .iter()
            .filter(|value| !self.is_missing(value))
            .filter_map(|value| self.base_value(value))
            .collect()
    }

    /// Continuous facets match numeric sentinels by value, others by text.
    pub fn is_missing(&self, value: &JsonValue) -> bool {
        match self.kind {
            FacetKind::Continuous => is_missing_number(value, &self.missing),
            _ => is_missing(value, &self.missing),
        }
    }

    /// Valid canonical texts of a record, one per array element.
    pub fn text_values(&self, record: &JsonValue) -> Vec<String> {
        lookup(record, &self.accessor)
            .iter()
            .filter(|value| !self.is_missing(value))
            .filter_map(|value| canonical_text(value))
            .collect()
    }

    pub fn forward(&self, base: f64) -> f64 {
        self.continuous_transform.forward(base)
    }

    pub fn inverse(&self, transformed: f64) -> f64 {
        self.continuous_transform.inverse(transformed)
    }

    /// Display label for a base value.
    pub fn format_base(&self, base: f64) -> String {
        match self.kind {
            FacetKind::Datetime => format_datetime(base),
            FacetKind::Duration => format_duration(base),
            _ => base.to_string(),
        }
    }

    pub fn domain_over<'a>(
        &self,
        records: impl IntoIterator<Item = &'a JsonValue>,
    ) -> Option<(f64, f64)> {
        records
            .into_iter()
            .flat_map(|record| self.base_values(record))
            .fold(None, |acc, value| match acc {
                None => Some((value, value)),
                Some((lo, hi)) => Some((f64::min(lo, value), f64::max(hi, value))),
            })
    }

    pub fn sorted_values<'a>(&self, records: impl IntoIterator<Item = &'a JsonValue>) -> Vec<f64> {
        let mut values: Vec<f64> = records
            .into_iter()
            .flat_map(|record| self.base_values(record))
            .collect();
        values.sort_by(f64::total_cmp);
        values
    }

    /// Distinct texts with counts in first-seen order.
    pub fn category_counts<'a>(
        &self,
        records: impl IntoIterator<Item = &'a JsonValue>,
    ) -> Vec<(String, u64)> {
        let mut order: Vec<(String, u64)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for record in records {
            for text in self.text_values(record) {
                match index.get(&text) {
                    Some(&at) => order[at].1 += 1,
                    None => {
                        index.insert(text.clone(), order.len());
                        order.push((text, 1));
                    }
                }
            }
        }
        order
    }
}

/// The facet set of one dataset, unique by accessor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Facets {
    items: Vec<Facet>,
}

impl Facets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a facet unless one with the same accessor exists.
    pub fn insert(&mut self, facet: Facet) -> bool {
        if self.by_accessor(facet.column()).is_some() {
            return false;
        }
        self.items.push(facet);
        true
    }

    pub fn get(&self, id: FacetId) -> Option<&Facet> {
        self.items.iter().find(|facet| facet.id == id)
    }

    pub fn get_mut(&mut self, id: FacetId) -> Option<&mut Facet> {
        self.items.iter_mut().find(|facet| facet.id == id)
    }

    /// Matches with or without the array marker.
    pub fn by_accessor(&self, accessor: &str) -> Option<&Facet> {
        let column = accessor.strip_suffix(ARRAY_SUFFIX).unwrap_or(accessor);
        self.items.iter().find(|facet| facet.column() == column)
    }

    pub fn remove(&mut self, id: FacetId) -> Option<Facet> {
        let at = self.items.iter().position(|facet| facet.id == id)?;
        Some(self.items.remove(at))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Facet> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Facet> {
        self.items.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
