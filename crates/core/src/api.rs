use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;

use crate::facet::{Facet, Facets};
use crate::filter::{DeliveryTicket, Filter};
use crate::ids::{FacetId, FilterId};
use crate::FacetResult;

/// Dataset-wide counters maintained by backends that hold the records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub total: usize,
    pub selected: usize,
}

/// Read-only view of the dataset handed to backend lifecycle hooks.
#[derive(Clone, Copy)]
pub struct DatasetView<'a> {
    pub facets: &'a Facets,
    pub filters: &'a [Filter],
}

impl<'a> DatasetView<'a> {
    pub fn facet(&self, id: FacetId) -> Option<&'a Facet> {
        self.facets.get(id)
    }

    /// Active filters other than `id`, the ones whose selections restrict it.
    pub fn other_active(&self, id: FilterId) -> impl Iterator<Item = &'a Filter> + 'a {
        self.filters
            .iter()
            .filter(move |filter| filter.id != id && filter.is_active())
    }
}

/// Execution backend of a dataset.
///
/// Facet scans are async because relational backends query for them.
/// Lifecycle hooks are synchronous; `get_data` either delivers immediately
/// or returns the handle of the task that will.
#[async_trait]
pub trait DatasetBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Loads records; on error nothing is kept.
    async fn ingest(&mut self, records: Vec<JsonValue>) -> FacetResult<usize>;

    async fn scan_data(&mut self, facets: &mut Facets) -> FacetResult<()>;

    async fn set_min_max(&mut self, facet: &mut Facet) -> FacetResult<()>;

    async fn set_categories(&mut self, facet: &mut Facet) -> FacetResult<()>;

    async fn set_percentiles(&mut self, facet: &mut Facet) -> FacetResult<()>;

    async fn set_exceedances(&mut self, facet: &mut Facet) -> FacetResult<()>;

    fn init_data_filter(&mut self, view: &DatasetView<'_>, filter: &Filter) -> FacetResult<()>;

    fn release_data_filter(&mut self, filter: &Filter);

    fn update_data_filter(&mut self, view: &DatasetView<'_>, filter: &Filter) -> FacetResult<()>;

    fn get_data(
        &mut self,
        view: &DatasetView<'_>,
        filter: &Filter,
        ticket: DeliveryTicket,
    ) -> Option<JoinHandle<()>>;

    fn record_counts(&self) -> Option<RecordCounts> {
        None
    }
}
