//! Group-by requests and their output slots.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::aggregate::Aggregate;
use crate::ids::FilterId;
use crate::partition::Partition;
use crate::row::{DataRow, KEY_SEPARATOR};

const NOTIFY_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterState {
    Unconfigured,
    Configured,
    Active,
    Released,
}

/// Readiness signal; consumers read [`Filter::data`] on receipt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewData;

#[derive(Debug, Default)]
struct OutputSlot {
    generation: u64,
    data: Vec<DataRow>,
}

/// Shared result slot of one filter, safe to deliver into from spawned tasks.
#[derive(Clone, Debug)]
pub struct FilterOutput {
    slot: Arc<Mutex<OutputSlot>>,
    notify: broadcast::Sender<NewData>,
}

impl Default for FilterOutput {
    fn default() -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            slot: Arc::new(Mutex::new(OutputSlot::default())),
            notify,
        }
    }
}

impl FilterOutput {
    fn lock(&self) -> MutexGuard<'_, OutputSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Starts a new request; results of earlier requests become stale.
    pub fn begin(&self) -> DeliveryTicket {
        let mut slot = self.lock();
        slot.generation += 1;
        DeliveryTicket {
            generation: slot.generation,
            output: self.clone(),
        }
    }

    /// Drops any in-flight result without touching the current rows.
    pub fn invalidate(&self) {
        self.lock().generation += 1;
    }

    /// Empties the rows and announces it.
    pub fn clear(&self) {
        {
            let mut slot = self.lock();
            slot.generation += 1;
            slot.data.clear();
        }
        let _ = self.notify.send(NewData);
    }

    /// Stores rows when `generation` is still current.
    pub fn deliver(&self, generation: u64, rows: Vec<DataRow>) -> bool {
        {
            let mut slot = self.lock();
            if slot.generation != generation {
                debug!(
                    "filter: dropped stale result {generation}, current {}",
                    slot.generation
                );
                return false;
            }
            slot.data = rows;
        }
        let _ = self.notify.send(NewData);
        true
    }

    pub fn data(&self) -> Vec<DataRow> {
        self.lock().data.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NewData> {
        self.notify.subscribe()
    }
}

/// Permission to deliver one result into a filter's output.
#[derive(Clone, Debug)]
pub struct DeliveryTicket {
    pub generation: u64,
    output: FilterOutput,
}

impl DeliveryTicket {
    pub fn deliver(self, rows: Vec<DataRow>) -> bool {
        self.output.deliver(self.generation, rows)
    }

    pub fn is_current(&self) -> bool {
        self.output.generation() == self.generation
    }
}

/// Partition specification captured before a zoom.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartitionSnapshot {
    partitions: Vec<Partition>,
}

impl PartitionSnapshot {
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }
}

/// Predicate over composite keys: AND of each partition's selection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyPredicate {
    parts: Vec<Option<HashSet<String>>>,
}

impl KeyPredicate {
    pub fn passes_all(&self) -> bool {
        self.parts.iter().all(Option::is_none)
    }

    /// A single dimension tests the whole key; several split on the separator.
    pub fn matches(&self, key: &str) -> bool {
        if self.passes_all() {
            return true;
        }
        if let [only] = self.parts.as_slice() {
            return only.as_ref().is_none_or(|labels| labels.contains(key));
        }
        let mut labels = key.split(KEY_SEPARATOR);
        self.parts.iter().all(|part| {
            let label = labels.next().unwrap_or_default();
            part.as_ref().is_none_or(|allowed| allowed.contains(label))
        })
    }
}

#[derive(Debug)]
pub struct Filter {
    pub id: FilterId,
    pub title: String,
    pub chart_type: Option<String>,
    pub min_partitions: usize,
    pub max_partitions: usize,
    pub partitions: Vec<Partition>,
    pub aggregates: Vec<Aggregate>,
    state: FilterState,
    zoom_history: Vec<PartitionSnapshot>,
    output: FilterOutput,
}

impl Filter {
    pub fn new(title: impl Into<String>, min_partitions: usize, max_partitions: usize) -> Self {
        Self {
            id: FilterId::new(),
            title: title.into(),
            chart_type: None,
            min_partitions,
            max_partitions,
            partitions: Vec::new(),
            aggregates: Vec::new(),
            state: FilterState::Unconfigured,
            zoom_history: Vec::new(),
            output: FilterOutput::default(),
        }
    }

    pub fn with_chart_type(mut self, chart_type: impl Into<String>) -> Self {
        self.chart_type = Some(chart_type.into());
        self
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    pub fn set_state(&mut self, state: FilterState) {
        if self.state != state {
            debug!("filter: {} {:?} -> {:?}", self.id, self.state, state);
            self.state = state;
        }
    }

    pub fn is_configured(&self) -> bool {
        let count = self.partitions.len();
        count >= self.min_partitions && count <= self.max_partitions
    }

    pub fn is_active(&self) -> bool {
        self.state == FilterState::Active
    }

    pub fn output(&self) -> &FilterOutput {
        &self.output
    }

    pub fn data(&self) -> Vec<DataRow> {
        self.output.data()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NewData> {
        self.output.subscribe()
    }

    pub fn partition(&self, rank: usize) -> Option<&Partition> {
        self.partitions.iter().find(|partition| partition.rank == rank)
    }

    pub fn partition_mut(&mut self, rank: usize) -> Option<&mut Partition> {
        self.partitions
            .iter_mut()
            .find(|partition| partition.rank == rank)
    }

    /// Keeps ranks 1-based and contiguous in list order.
    pub fn renumber(&mut self) {
        for (at, partition) in self.partitions.iter_mut().enumerate() {
            partition.rank = at + 1;
        }
    }

    pub fn has_selection(&self) -> bool {
        self.partitions.iter().any(Partition::has_selection)
    }

    pub fn clear_selection(&mut self) {
        for partition in &mut self.partitions {
            partition.clear_selection();
        }
    }

    pub fn filter_function(&self) -> KeyPredicate {
        KeyPredicate {
            parts: self
                .partitions
                .iter()
                .map(Partition::selection_predicate)
                .collect(),
        }
    }

    pub fn push_snapshot(&mut self) {
        self.zoom_history.push(PartitionSnapshot {
            partitions: self.partitions.clone(),
        });
    }

    pub fn pop_snapshot(&mut self) -> Option<PartitionSnapshot> {
        self.zoom_history.pop()
    }

    pub fn restore(&mut self, snapshot: PartitionSnapshot) {
        self.partitions = snapshot.partitions;
    }

    pub fn zoom_depth(&self) -> usize {
        self.zoom_history.len()
    }
}
