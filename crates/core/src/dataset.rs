//! The dataset orchestrator: facets, filters and one resolved backend.

use log::{debug, error, info, warn};
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;

use crate::aggregate::Aggregate;
use crate::api::{DatasetBackend, DatasetView, RecordCounts};
use crate::facet::{Facet, FacetKind, Facets};
use crate::filter::{Filter, FilterState};
use crate::ids::{FacetId, FilterId};
use crate::partition::{Grouping, Partition};
use crate::{FacetError, FacetResult};

pub struct Dataset {
    facets: Facets,
    filters: Vec<Filter>,
    backend: Box<dyn DatasetBackend>,
    pending: Vec<JoinHandle<()>>,
}

impl Dataset {
    pub fn new(backend: Box<dyn DatasetBackend>) -> Self {
        info!("dataset: using {} backend", backend.name());
        Self {
            facets: Facets::new(),
            filters: Vec::new(),
            backend,
            pending: Vec::new(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn facets(&self) -> &Facets {
        &self.facets
    }

    pub fn facet(&self, id: FacetId) -> Option<&Facet> {
        self.facets.get(id)
    }

    pub fn facet_by_accessor(&self, accessor: &str) -> Option<&Facet> {
        self.facets.by_accessor(accessor)
    }

    /// Adds a user-defined facet; `None` when the accessor is taken.
    pub fn add_facet(&mut self, facet: Facet) -> Option<FacetId> {
        let id = facet.id;
        self.facets.insert(facet).then_some(id)
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn filter(&self, id: FilterId) -> Option<&Filter> {
        self.filters.iter().find(|filter| filter.id == id)
    }

    pub fn record_counts(&self) -> Option<RecordCounts> {
        self.backend.record_counts()
    }

    /// Loads records and rebuilds every active filter over them.
    pub async fn ingest(&mut self, records: Vec<JsonValue>) -> FacetResult<usize> {
        let loaded = self.backend.ingest(records).await?;
        info!("dataset: ingested {loaded} records");
        for at in 0..self.filters.len() {
            if self.filters[at].is_active() {
                self.release_at(at);
                self.activate_at(at)?;
            }
        }
        self.get_all_data();
        Ok(loaded)
    }

    pub async fn scan_data(&mut self) -> FacetResult<()> {
        self.backend.scan_data(&mut self.facets).await
    }

    pub async fn set_min_max(&mut self, facet_id: FacetId) -> FacetResult<()> {
        let facet = facet_mut(&mut self.facets, facet_id)?;
        self.backend.set_min_max(facet).await?;
        self.facet_changed(facet_id)
    }

    pub async fn set_categories(&mut self, facet_id: FacetId) -> FacetResult<()> {
        let facet = facet_mut(&mut self.facets, facet_id)?;
        self.backend.set_categories(facet).await?;
        self.facet_changed(facet_id)
    }

    pub async fn set_percentiles(&mut self, facet_id: FacetId) -> FacetResult<()> {
        let facet = facet_mut(&mut self.facets, facet_id)?;
        self.backend.set_percentiles(facet).await?;
        self.facet_changed(facet_id)
    }

    pub async fn set_exceedances(&mut self, facet_id: FacetId) -> FacetResult<()> {
        let facet = facet_mut(&mut self.facets, facet_id)?;
        self.backend.set_exceedances(facet).await?;
        self.facet_changed(facet_id)
    }

    /// Recomputes the domain or category rules, whichever the kind uses.
    pub async fn refresh_facet_domain(&mut self, facet_id: FacetId) -> FacetResult<()> {
        let is_interval = facet_mut(&mut self.facets, facet_id)?.kind.is_interval();
        if is_interval {
            self.set_min_max(facet_id).await
        } else {
            self.set_categories(facet_id).await
        }
    }

    pub fn add_filter(&mut self, filter: Filter) -> FilterId {
        let id = filter.id;
        debug!("dataset: add filter {id} '{}'", filter.title);
        self.filters.push(filter);
        id
    }

    pub fn remove_filter(&mut self, id: FilterId) -> FacetResult<Filter> {
        let at = self.index_of(id)?;
        self.release_at(at);
        let filter = self.filters.remove(at);
        filter.output().clear();
        self.get_all_data();
        Ok(filter)
    }

    /// Appends a partition on `facet_id`, computing the facet's domain or
    /// categories first when they are unknown. Returns the partition rank.
    pub async fn add_partition(&mut self, id: FilterId, facet_id: FacetId) -> FacetResult<usize> {
        let at = self.index_of(id)?;
        let rank = self.filters[at].partitions.len() + 1;
        let partition = match self.facets.get_mut(facet_id) {
            Some(facet) => {
                if facet.kind.is_interval() && facet.domain().is_none() {
                    self.backend.set_min_max(facet).await?;
                }
                if facet.kind == FacetKind::Categorial && facet.categorial_transform.is_empty() {
                    self.backend.set_categories(facet).await?;
                }
                let mut partition = Partition::new(facet, rank);
                partition.compute_groups(facet);
                partition
            }
            None => {
                warn!("dataset: partition on unknown facet {facet_id}, using constant bucket");
                Partition::detached(facet_id, rank)
            }
        };
        let filter = &mut self.filters[at];
        filter.partitions.push(partition);
        filter.renumber();
        self.restructure(at)?;
        Ok(rank)
    }

    pub fn remove_partition(&mut self, id: FilterId, rank: usize) -> FacetResult<()> {
        let at = self.index_of(id)?;
        let filter = &mut self.filters[at];
        let position = filter
            .partitions
            .iter()
            .position(|partition| partition.rank == rank)
            .ok_or_else(|| FacetError::not_found(format!("partition {rank}")))?;
        filter.partitions.remove(position);
        filter.renumber();
        self.restructure(at)
    }

    pub fn set_partition_grouping(
        &mut self,
        id: FilterId,
        rank: usize,
        grouping: Grouping,
        param: f64,
    ) -> FacetResult<()> {
        let at = self.index_of(id)?;
        let partition = self.filters[at]
            .partition_mut(rank)
            .ok_or_else(|| FacetError::not_found(format!("partition {rank}")))?;
        let Some(facet) = self.facets.get(partition.facet_id) else {
            return Err(FacetError::not_found(format!("facet {}", partition.facet_id)));
        };
        if (grouping == Grouping::Categorial) != (facet.kind == FacetKind::Categorial) {
            return Err(FacetError::invalid(format!(
                "{grouping:?} grouping does not apply to {} facet",
                facet.kind.as_str()
            )));
        }
        if !param.is_finite() || (grouping != Grouping::Categorial && param <= 0.0) {
            return Err(FacetError::invalid(format!("grouping parameter {param}")));
        }
        partition.set_grouping(grouping, param);
        partition.compute_groups(facet);
        self.restructure(at)
    }

    pub fn add_aggregate(&mut self, id: FilterId, aggregate: Aggregate) -> FacetResult<()> {
        let at = self.index_of(id)?;
        self.filters[at].aggregates.push(aggregate);
        self.restructure(at)
    }

    pub fn remove_aggregate(&mut self, id: FilterId, index: usize) -> FacetResult<Aggregate> {
        let at = self.index_of(id)?;
        let aggregates = &mut self.filters[at].aggregates;
        if index >= aggregates.len() {
            return Err(FacetError::not_found(format!("aggregate {index}")));
        }
        let removed = aggregates.remove(index);
        self.restructure(at)?;
        Ok(removed)
    }

    /// Drill interaction; only the cross-filter predicate is updated.
    pub fn select_group(&mut self, id: FilterId, rank: usize, group: usize) -> FacetResult<()> {
        let at = self.index_of(id)?;
        let partition = self.filters[at]
            .partition_mut(rank)
            .ok_or_else(|| FacetError::not_found(format!("partition {rank}")))?;
        if !partition.select_group(group) {
            return Err(FacetError::not_found(format!("group {group}")));
        }
        self.update_at(at)
    }

    pub fn clear_selection(&mut self, id: FilterId) -> FacetResult<()> {
        let at = self.index_of(id)?;
        self.filters[at].clear_selection();
        self.update_at(at)
    }

    pub fn zoom_in(&mut self, id: FilterId) -> FacetResult<()> {
        let at = self.index_of(id)?;
        let filter = &mut self.filters[at];
        filter.push_snapshot();
        for partition in &mut filter.partitions {
            if let Some(facet) = self.facets.get(partition.facet_id) {
                partition.zoom_to_selection(facet);
            }
        }
        filter.clear_selection();
        self.restructure(at)
    }

    /// Clears selections if any; otherwise pops the zoom history, or resets
    /// every partition to its facet's full domain when the history is empty.
    pub fn zoom_out(&mut self, id: FilterId) -> FacetResult<()> {
        let at = self.index_of(id)?;
        let filter = &mut self.filters[at];
        if filter.has_selection() {
            filter.clear_selection();
        } else if let Some(snapshot) = filter.pop_snapshot() {
            filter.restore(snapshot);
        } else {
            for partition in &mut filter.partitions {
                if let Some(facet) = self.facets.get(partition.facet_id) {
                    partition.reset_domain(facet);
                }
            }
        }
        self.restructure(at)
    }

    /// Rebuilds the backend resources of a configured filter.
    pub fn init_data_filter(&mut self, id: FilterId) -> FacetResult<()> {
        let at = self.index_of(id)?;
        if !self.filters[at].is_configured() {
            return Err(FacetError::invalid(format!(
                "filter {id} has {} partitions",
                self.filters[at].partitions.len()
            )));
        }
        self.release_at(at);
        self.filters[at].set_state(FilterState::Configured);
        self.activate_at(at)?;
        self.get_all_data();
        Ok(())
    }

    pub fn release_data_filter(&mut self, id: FilterId) -> FacetResult<()> {
        let at = self.index_of(id)?;
        self.release_at(at);
        self.filters[at].output().clear();
        self.get_all_data();
        Ok(())
    }

    pub fn update_data_filter(&mut self, id: FilterId) -> FacetResult<()> {
        let at = self.index_of(id)?;
        self.update_at(at)
    }

    /// Requests fresh rows for every active filter.
    pub fn get_all_data(&mut self) {
        let view = DatasetView {
            facets: &self.facets,
            filters: &self.filters,
        };
        for filter in self.filters.iter().filter(|filter| filter.is_active()) {
            let ticket = filter.output().begin();
            if let Some(handle) = self.backend.get_data(&view, filter, ticket) {
                self.pending.push(handle);
            }
        }
    }

    /// Waits for every outstanding backend request.
    pub async fn settle(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for handle in pending {
            if let Err(err) = handle.await {
                error!("dataset: data request task failed: {err}");
            }
        }
    }

    fn index_of(&self, id: FilterId) -> FacetResult<usize> {
        self.filters
            .iter()
            .position(|filter| filter.id == id)
            .ok_or_else(|| FacetError::not_found(format!("filter {id}")))
    }

    fn activate_at(&mut self, at: usize) -> FacetResult<()> {
        let view = DatasetView {
            facets: &self.facets,
            filters: &self.filters,
        };
        let filter = &self.filters[at];
        let mut outcome = self.backend.init_data_filter(&view, filter);
        if outcome.is_ok() {
            outcome = self.backend.update_data_filter(&view, filter);
        }
        if let Err(err) = outcome {
            error!("dataset: init of filter {} failed: {err}", filter.id);
            return Err(err);
        }
        self.filters[at].set_state(FilterState::Active);
        Ok(())
    }

    fn release_at(&mut self, at: usize) {
        let filter = &mut self.filters[at];
        if filter.is_active() {
            self.backend.release_data_filter(filter);
            filter.output().invalidate();
            filter.set_state(FilterState::Released);
        }
    }

    fn update_at(&mut self, at: usize) -> FacetResult<()> {
        if self.filters[at].is_active() {
            let view = DatasetView {
                facets: &self.facets,
                filters: &self.filters,
            };
            self.backend.update_data_filter(&view, &self.filters[at])?;
        }
        self.get_all_data();
        Ok(())
    }

    /// Structural change: tear down, then rebuild when still configured.
    fn restructure(&mut self, at: usize) -> FacetResult<()> {
        self.release_at(at);
        if self.filters[at].is_configured() {
            self.filters[at].set_state(FilterState::Configured);
            self.activate_at(at)?;
        } else {
            self.filters[at].set_state(FilterState::Unconfigured);
            self.filters[at].output().clear();
        }
        self.get_all_data();
        Ok(())
    }

    /// Regenerates partitions over a facet whose domain or transform changed.
    fn facet_changed(&mut self, facet_id: FacetId) -> FacetResult<()> {
        let Some(facet) = self.facets.get(facet_id) else {
            return Ok(());
        };
        let mut touched = Vec::new();
        for (at, filter) in self.filters.iter_mut().enumerate() {
            let mut hit = false;
            for partition in &mut filter.partitions {
                if partition.facet_id == facet_id {
                    partition.compute_groups(facet);
                    hit = true;
                }
            }
            if hit {
                touched.push(at);
            }
        }
        for at in touched {
            self.restructure(at)?;
        }
        Ok(())
    }
}

fn facet_mut(facets: &mut Facets, id: FacetId) -> FacetResult<&mut Facet> {
    facets
        .get_mut(id)
        .ok_or_else(|| FacetError::not_found(format!("facet {id}")))
}
