use facetlab_store::{
    Aggregate, Dataset, FacetId, Filter, FilterId, Grouping, Limits, MemoryBackend,
};
use serde_json::json;

fn rows(dataset: &Dataset, id: FilterId) -> Vec<(String, Vec<Option<f64>>)> {
    dataset
        .filter(id)
        .expect("filter")
        .data()
        .into_iter()
        .map(|row| (row.key(), row.aggregates))
        .collect()
}

fn facet_id(dataset: &Dataset, accessor: &str) -> FacetId {
    dataset.facet_by_accessor(accessor).expect("facet").id
}

async fn counted(records: Vec<serde_json::Value>, accessor: &str) -> (Dataset, FilterId) {
    let mut dataset = Dataset::new(Box::new(MemoryBackend::new(Limits::default())));
    dataset.ingest(records).await.expect("ingest");
    dataset.scan_data().await.expect("scan");
    let id = dataset.add_filter(Filter::new(accessor, 1, 1));
    let facet = facet_id(&dataset, accessor);
    dataset.add_partition(id, facet).await.expect("partition");
    dataset
        .add_aggregate(id, Aggregate::count())
        .expect("aggregate");
    (dataset, id)
}

#[tokio::test]
async fn zoom_in_then_out_restores_the_partitions() {
    let records = (1..=10).map(|x| json!({ "x": x })).collect();
    let (mut dataset, id) = counted(records, "x").await;
    dataset
        .set_partition_grouping(id, 1, Grouping::FixedN, 2.0)
        .expect("grouping");
    let rows_before = rows(&dataset, id);
    dataset.select_group(id, 1, 1).expect("select");
    let captured = dataset.filter(id).expect("filter").partitions.clone();

    dataset.zoom_in(id).expect("zoom in");
    let filter = dataset.filter(id).expect("filter");
    assert_eq!(filter.zoom_depth(), 1);
    assert!(!filter.has_selection());
    assert_eq!(
        rows(&dataset, id),
        vec![
            ("Other".to_string(), vec![Some(5.0)]),
            ("2.125".to_string(), vec![Some(3.0)]),
            ("4.375".to_string(), vec![Some(2.0)]),
        ]
    );

    dataset.zoom_out(id).expect("zoom out");
    let filter = dataset.filter(id).expect("filter");
    assert_eq!(filter.zoom_depth(), 0);
    assert_eq!(filter.partitions, captured);
    assert_eq!(rows(&dataset, id), rows_before);

    dataset.zoom_out(id).expect("clear selection");
    assert!(!dataset.filter(id).expect("filter").has_selection());
    dataset.zoom_out(id).expect("reset");
    assert_eq!(rows(&dataset, id), rows_before);
}

#[tokio::test]
async fn zooming_fixed_size_bins_rescales_the_size() {
    let records = (1..=10).map(|x| json!({ "x": x })).collect();
    let (mut dataset, id) = counted(records, "x").await;
    dataset
        .set_partition_grouping(id, 1, Grouping::FixedSize, 1.0)
        .expect("grouping");
    dataset.select_group(id, 1, 1).expect("first");
    dataset.select_group(id, 1, 3).expect("extend");

    dataset.zoom_in(id).expect("zoom in");
    let partition = dataset
        .filter(id)
        .and_then(|filter| filter.partition(1))
        .expect("partition");
    assert!((partition.grouping_param - 1.0 / 3.0).abs() < 1e-12);
    assert_eq!(partition.minval, Some(1.0));
    assert_eq!(partition.maxval, Some(4.0));

    dataset.zoom_out(id).expect("pop");
    dataset.zoom_out(id).expect("clear");
    dataset.zoom_out(id).expect("reset");
    let partition = dataset
        .filter(id)
        .and_then(|filter| filter.partition(1))
        .expect("partition");
    assert_eq!(partition.grouping, Grouping::FixedSize);
    assert_eq!(partition.grouping_param, 1.0);
    assert_eq!(partition.groups.len(), 9);
}

#[tokio::test]
async fn categorial_zoom_keeps_selected_groups() {
    let records = ["cat", "dog", "cat", "bird", "cat"]
        .iter()
        .map(|animal| json!({ "animal": animal }))
        .collect();
    let (mut dataset, id) = counted(records, "animal").await;
    dataset.select_group(id, 1, 1).expect("cat");
    dataset.select_group(id, 1, 3).expect("bird");

    dataset.zoom_in(id).expect("zoom in");
    let labels: Vec<String> = dataset
        .filter(id)
        .and_then(|filter| filter.partition(1))
        .expect("partition")
        .groups
        .iter()
        .map(|group| group.value.clone())
        .collect();
    assert_eq!(labels, vec!["cat", "bird"]);
    assert_eq!(
        rows(&dataset, id),
        vec![
            ("Other".to_string(), vec![Some(1.0)]),
            ("cat".to_string(), vec![Some(3.0)]),
            ("bird".to_string(), vec![Some(1.0)]),
        ]
    );
}
