//! In-memory backend: an incremental cross-filter index over loaded records.
//!
//! Every configured filter owns one composite dimension. A record contributes
//! to a dimension's groups when no *other* dimension rejects it, so a filter's
//! own selection never collapses its own groups. Selection changes only move
//! the records whose pass state flipped.

use std::collections::HashMap;

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;

use crate::config::Limits;
use facetlab_core::inference::scan_records;
use facetlab_core::{
    Accumulator, AggregateOp, CategorialTransform, ContinuousTransform, DataRow, DatasetBackend,
    DatasetView, DeliveryTicket, Facet, FacetError, FacetKind, FacetResult, Facets, Filter,
    FilterId, KEY_SEPARATOR, KeyPredicate, RecordCounts,
};

#[derive(Clone, Copy, Debug, PartialEq)]
enum Measure {
    /// Row count, for aggregates without a facet.
    Rows,
    Values(AggregateOp),
    /// Unknown facet or an operation the facet kind cannot support.
    Undefined,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct KeyGroup {
    records: u64,
    accumulators: Vec<Accumulator>,
}

struct Dimension {
    /// Key ids per record; empty when a partition facet is missing.
    record_keys: Vec<Vec<u32>>,
    /// Bucket index tuple per key id.
    key_buckets: Vec<Vec<usize>>,
    key_labels: Vec<String>,
    groups: Vec<KeyGroup>,
    measures: Vec<Measure>,
    record_values: Vec<Vec<Option<f64>>>,
    rejects: Vec<bool>,
}

impl Dimension {
    fn apply(&mut self, record: usize, add: bool) {
        for &key in &self.record_keys[record] {
            let group = &mut self.groups[key as usize];
            if add {
                group.records += 1;
            } else {
                group.records -= 1;
            }
            for (at, value) in self.record_values[record].iter().enumerate() {
                if let Some(value) = value {
                    if add {
                        group.accumulators[at].add(*value);
                    } else {
                        group.accumulators[at].subtract(*value);
                    }
                }
            }
        }
    }

    fn reduce(&self, group: &KeyGroup) -> Vec<Option<f64>> {
        self.measures
            .iter()
            .zip(&group.accumulators)
            .map(|(measure, acc)| match measure {
                Measure::Rows => Some(group.records as f64),
                Measure::Values(op) => acc.reduce(*op),
                Measure::Undefined => None,
            })
            .collect()
    }

    fn passes(&self, record: usize, predicate: &KeyPredicate) -> bool {
        predicate.passes_all()
            || self.record_keys[record]
                .iter()
                .any(|&key| predicate.matches(&self.key_labels[key as usize]))
    }
}

#[derive(Default)]
struct CrossIndex {
    /// Number of dimensions rejecting each record.
    rejected_by: Vec<u32>,
    dimensions: HashMap<FilterId, Dimension>,
}

impl CrossIndex {
    fn reset(&mut self, records: usize) {
        self.rejected_by = vec![0; records];
        self.dimensions.clear();
    }

    fn visible_to(&self, dimension: &Dimension, record: usize) -> bool {
        self.rejected_by[record] - u32::from(dimension.rejects[record]) == 0
    }

    fn insert(&mut self, id: FilterId, mut dimension: Dimension) {
        for record in 0..self.rejected_by.len() {
            if self.visible_to(&dimension, record) {
                dimension.apply(record, true);
            }
        }
        self.dimensions.insert(id, dimension);
    }

    /// Re-evaluates one dimension's predicate and moves only the records whose
    /// visibility to other dimensions changed.
    fn set_predicate(&mut self, id: FilterId, predicate: &KeyPredicate) {
        let Some(mut dimension) = self.dimensions.remove(&id) else {
            return;
        };
        let mut moved = 0usize;
        for record in 0..dimension.rejects.len() {
            let rejects = !dimension.passes(record, predicate);
            if rejects == dimension.rejects[record] {
                continue;
            }
            let before: Vec<bool> = self
                .dimensions
                .values()
                .map(|other| self.visible_to(other, record))
                .collect();
            dimension.rejects[record] = rejects;
            if rejects {
                self.rejected_by[record] += 1;
            } else {
                self.rejected_by[record] -= 1;
            }
            let rejected_by = self.rejected_by[record];
            for (other, was_visible) in self.dimensions.values_mut().zip(before) {
                let visible = rejected_by - u32::from(other.rejects[record]) == 0;
                if visible != was_visible {
                    other.apply(record, visible);
                }
            }
            moved += 1;
        }
        debug!("memory: predicate of {id} moved {moved} records");
        self.dimensions.insert(id, dimension);
    }

    fn remove(&mut self, id: FilterId) {
        self.set_predicate(id, &KeyPredicate::default());
        self.dimensions.remove(&id);
    }

    fn counts(&self) -> RecordCounts {
        RecordCounts {
            total: self.rejected_by.len(),
            selected: self.rejected_by.iter().filter(|count| **count == 0).count(),
        }
    }
}

pub struct MemoryBackend {
    records: Vec<JsonValue>,
    index: CrossIndex,
    counts: RecordCounts,
    limits: Limits,
}

impl MemoryBackend {
    pub fn new(limits: Limits) -> Self {
        Self {
            records: Vec::new(),
            index: CrossIndex::default(),
            counts: RecordCounts::default(),
            limits,
        }
    }

    pub fn with_records(limits: Limits, records: Vec<JsonValue>) -> FacetResult<Self> {
        let mut backend = Self::new(limits);
        backend.load(records)?;
        Ok(backend)
    }

    pub fn records(&self) -> &[JsonValue] {
        &self.records
    }

    fn load(&mut self, records: Vec<JsonValue>) -> FacetResult<usize> {
        if let Some(at) = records.iter().position(|record| !record.is_object()) {
            return Err(FacetError::ingestion(format!(
                "record {at} is not a JSON object"
            )));
        }
        let loaded = records.len();
        self.records.extend(records);
        self.index.reset(self.records.len());
        self.counts = self.index.counts();
        Ok(loaded)
    }

    fn build_dimension(&self, view: &DatasetView<'_>, filter: &Filter) -> Dimension {
        let facets: Vec<Option<&Facet>> = filter
            .partitions
            .iter()
            .map(|partition| view.facet(partition.facet_id))
            .collect();
        let measures: Vec<(Measure, Option<&Facet>)> = filter
            .aggregates
            .iter()
            .map(|aggregate| match aggregate.facet_id {
                None => (Measure::Rows, None),
                Some(id) => match view.facet(id) {
                    None => (Measure::Undefined, None),
                    Some(facet) if facet.kind == FacetKind::Categorial => {
                        match aggregate.operation {
                            AggregateOp::Count => {
                                (Measure::Values(AggregateOp::Count), Some(facet))
                            }
                            _ => (Measure::Undefined, None),
                        }
                    }
                    Some(facet) => (Measure::Values(aggregate.operation), Some(facet)),
                },
            })
            .collect();

        let mut key_ids: HashMap<Vec<usize>, u32> = HashMap::new();
        let mut key_buckets = Vec::new();
        let mut record_keys = Vec::with_capacity(self.records.len());
        let mut record_values = Vec::with_capacity(self.records.len());
        for record in &self.records {
            let mut tuples: Vec<Vec<usize>> = vec![Vec::new()];
            for (partition, facet) in filter.partitions.iter().zip(&facets) {
                let buckets = match facet {
                    None => vec![0],
                    Some(facet) if partition.is_categorial() => facet
                        .text_values(record)
                        .iter()
                        .map(|text| partition.bucket_of_text(facet, text))
                        .collect(),
                    Some(facet) => facet
                        .base_values(record)
                        .into_iter()
                        .map(|value| partition.bucket_of(value))
                        .collect(),
                };
                tuples = fan_out(tuples, dedup(buckets));
            }
            let mut keys: Vec<u32> = tuples
                .into_iter()
                .map(|tuple| {
                    *key_ids.entry(tuple.clone()).or_insert_with(|| {
                        key_buckets.push(tuple);
                        (key_buckets.len() - 1) as u32
                    })
                })
                .collect();
            keys.sort_unstable();
            keys.dedup();
            record_keys.push(keys);
            record_values.push(
                measures
                    .iter()
                    .map(|(measure, facet)| match (measure, facet) {
                        (Measure::Values(_), Some(facet)) if facet.kind == FacetKind::Categorial => {
                            (!facet.text_values(record).is_empty()).then_some(0.0)
                        }
                        (Measure::Values(_), Some(facet)) => {
                            facet.base_values(record).first().copied()
                        }
                        _ => None,
                    })
                    .collect(),
            );
        }

        let separator = KEY_SEPARATOR.to_string();
        let key_labels = key_buckets
            .iter()
            .map(|tuple| {
                tuple
                    .iter()
                    .zip(&filter.partitions)
                    .map(|(bucket, partition)| partition.label_of(*bucket))
                    .collect::<Vec<_>>()
                    .join(separator.as_str())
            })
            .collect();
        let groups = vec![
            KeyGroup {
                records: 0,
                accumulators: vec![Accumulator::default(); measures.len()],
            };
            key_buckets.len()
        ];
        Dimension {
            rejects: vec![false; self.records.len()],
            record_keys,
            key_buckets,
            key_labels,
            groups,
            measures: measures.into_iter().map(|(measure, _)| measure).collect(),
            record_values,
        }
    }
}

fn dedup(mut buckets: Vec<usize>) -> Vec<usize> {
    buckets.sort_unstable();
    buckets.dedup();
    buckets
}

/// Cartesian extension of partial key tuples; no buckets means no key.
fn fan_out(tuples: Vec<Vec<usize>>, buckets: Vec<usize>) -> Vec<Vec<usize>> {
    tuples
        .into_iter()
        .flat_map(|tuple| {
            buckets.iter().map(move |bucket| {
                let mut next = tuple.clone();
                next.push(*bucket);
                next
            })
        })
        .collect()
}

#[async_trait]
impl DatasetBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ingest(&mut self, records: Vec<JsonValue>) -> FacetResult<usize> {
        self.load(records)
    }

    async fn scan_data(&mut self, facets: &mut Facets) -> FacetResult<()> {
        let added = scan_records(&self.records, facets, self.limits.sample_size);
        debug!("memory: scan added {added} facets");
        Ok(())
    }

    async fn set_min_max(&mut self, facet: &mut Facet) -> FacetResult<()> {
        let domain = facet.domain_over(&self.records);
        facet.minval = domain.map(|(lo, _)| lo);
        facet.maxval = domain.map(|(_, hi)| hi);
        Ok(())
    }

    async fn set_categories(&mut self, facet: &mut Facet) -> FacetResult<()> {
        facet.categorial_transform =
            CategorialTransform::from_counts(facet.category_counts(&self.records));
        Ok(())
    }

    async fn set_percentiles(&mut self, facet: &mut Facet) -> FacetResult<()> {
        facet.continuous_transform =
            ContinuousTransform::percentiles(&facet.sorted_values(&self.records));
        Ok(())
    }

    async fn set_exceedances(&mut self, facet: &mut Facet) -> FacetResult<()> {
        facet.continuous_transform =
            ContinuousTransform::exceedances(&facet.sorted_values(&self.records));
        Ok(())
    }

    fn init_data_filter(&mut self, view: &DatasetView<'_>, filter: &Filter) -> FacetResult<()> {
        self.index.remove(filter.id);
        let dimension = self.build_dimension(view, filter);
        debug!(
            "memory: dimension for {} with {} keys",
            filter.id,
            dimension.key_buckets.len()
        );
        self.index.insert(filter.id, dimension);
        Ok(())
    }

    fn release_data_filter(&mut self, filter: &Filter) {
        self.index.remove(filter.id);
        self.counts = self.index.counts();
    }

    fn update_data_filter(&mut self, _view: &DatasetView<'_>, filter: &Filter) -> FacetResult<()> {
        self.index.set_predicate(filter.id, &filter.filter_function());
        Ok(())
    }

    fn get_data(
        &mut self,
        _view: &DatasetView<'_>,
        filter: &Filter,
        ticket: DeliveryTicket,
    ) -> Option<JoinHandle<()>> {
        let Some(dimension) = self.index.dimensions.get(&filter.id) else {
            warn!("memory: no dimension for filter {}", filter.id);
            return None;
        };
        let mut order: Vec<usize> = (0..dimension.key_buckets.len())
            .filter(|key| dimension.groups[*key].records > 0)
            .collect();
        order.sort_by(|a, b| dimension.key_buckets[*a].cmp(&dimension.key_buckets[*b]));
        let rows = order
            .into_iter()
            .map(|key| DataRow {
                groups: dimension.key_buckets[key]
                    .iter()
                    .zip(&filter.partitions)
                    .map(|(bucket, partition)| partition.label_of(*bucket))
                    .collect(),
                aggregates: dimension.reduce(&dimension.groups[key]),
            })
            .collect();
        self.counts = self.index.counts();
        ticket.deliver(rows);
        None
    }

    fn record_counts(&self) -> Option<RecordCounts> {
        Some(self.counts)
    }
}
