use facetlab_store::{
    Aggregate, AggregateOp, Dataset, FacetId, FacetKind, Filter, FilterId, Grouping, Limits,
    MemoryBackend, RecordCounts,
};
use serde_json::{Value, json};

fn memory_dataset() -> Dataset {
    Dataset::new(Box::new(MemoryBackend::new(Limits::default())))
}

fn facet_id(dataset: &Dataset, accessor: &str) -> FacetId {
    dataset
        .facet_by_accessor(accessor)
        .unwrap_or_else(|| panic!("facet {accessor}"))
        .id
}

fn rows(dataset: &Dataset, id: FilterId) -> Vec<(String, Vec<Option<f64>>)> {
    dataset
        .filter(id)
        .expect("filter")
        .data()
        .into_iter()
        .map(|row| (row.key(), row.aggregates))
        .collect()
}

fn pets() -> Vec<Value> {
    vec![
        json!({"animal": "cat", "x": 1, "weight": 4.0}),
        json!({"animal": "dog", "x": 2, "weight": 20.0}),
        json!({"animal": "cat", "x": 6, "weight": 5.0}),
        json!({"animal": "bird", "x": 7, "weight": 0.5}),
        json!({"animal": "cat", "x": 10, "weight": 6.0}),
    ]
}

async fn count_filter(dataset: &mut Dataset, title: &str, accessor: &str) -> FilterId {
    let id = dataset.add_filter(Filter::new(title, 1, 1));
    let facet = facet_id(dataset, accessor);
    dataset.add_partition(id, facet).await.expect("partition");
    dataset
        .add_aggregate(id, Aggregate::count())
        .expect("aggregate");
    id
}

#[tokio::test]
async fn inference_types_scanned_columns() {
    let mut dataset = memory_dataset();
    dataset
        .ingest(vec![
            json!({"at": "2024-01-01T00:00:00Z", "wait": "PT5M", "n": 1, "tags": ["a"]}),
            json!({"at": "2024-02-01T00:00:00Z", "wait": "PT1H", "n": 2, "tags": []}),
        ])
        .await
        .expect("ingest");
    dataset.scan_data().await.expect("scan");
    let kind = |accessor: &str| {
        dataset
            .facet_by_accessor(accessor)
            .unwrap_or_else(|| panic!("facet {accessor}"))
            .kind
    };
    assert_eq!(kind("at"), FacetKind::Datetime);
    assert_eq!(kind("wait"), FacetKind::Duration);
    assert_eq!(kind("n"), FacetKind::Continuous);
    assert_eq!(kind("tags[]"), FacetKind::Categorial);
    assert_eq!(kind("tags.length"), FacetKind::Continuous);
}

#[tokio::test]
async fn fixed_n_over_one_to_ten() {
    let mut dataset = memory_dataset();
    let records = (1..=10).map(|x| json!({ "x": x })).collect();
    dataset.ingest(records).await.expect("ingest");
    dataset.scan_data().await.expect("scan");
    let id = count_filter(&mut dataset, "x", "x").await;
    dataset
        .set_partition_grouping(id, 1, Grouping::FixedN, 2.0)
        .expect("grouping");

    assert_eq!(
        rows(&dataset, id),
        vec![
            ("3.25".to_string(), vec![Some(5.0)]),
            ("7.75".to_string(), vec![Some(5.0)]),
        ]
    );
}

#[tokio::test]
async fn categorial_counts_follow_first_seen_order() {
    let mut dataset = memory_dataset();
    dataset.ingest(pets()).await.expect("ingest");
    dataset.scan_data().await.expect("scan");
    let id = count_filter(&mut dataset, "animals", "animal").await;
    let weight = facet_id(&dataset, "weight");
    dataset
        .add_aggregate(id, Aggregate::over(weight, AggregateOp::Sum))
        .expect("sum");

    assert_eq!(
        rows(&dataset, id),
        vec![
            ("cat".to_string(), vec![Some(3.0), Some(15.0)]),
            ("dog".to_string(), vec![Some(1.0), Some(20.0)]),
            ("bird".to_string(), vec![Some(1.0), Some(0.5)]),
        ]
    );
}

#[tokio::test]
async fn selections_restrict_other_filters_only() {
    let mut dataset = memory_dataset();
    dataset.ingest(pets()).await.expect("ingest");
    dataset.scan_data().await.expect("scan");
    let animals = count_filter(&mut dataset, "animals", "animal").await;
    let xs = count_filter(&mut dataset, "x", "x").await;
    dataset
        .set_partition_grouping(xs, 1, Grouping::FixedN, 2.0)
        .expect("grouping");
    let unfiltered_animals = rows(&dataset, animals);

    dataset.select_group(animals, 1, 1).expect("select cat");
    assert_eq!(rows(&dataset, animals), unfiltered_animals);
    assert_eq!(
        rows(&dataset, xs),
        vec![
            ("3.25".to_string(), vec![Some(1.0)]),
            ("7.75".to_string(), vec![Some(2.0)]),
        ]
    );
    assert_eq!(
        dataset.record_counts(),
        Some(RecordCounts {
            total: 5,
            selected: 3
        })
    );

    dataset.select_group(xs, 1, 2).expect("select upper half");
    assert_eq!(
        rows(&dataset, animals),
        vec![
            ("cat".to_string(), vec![Some(2.0)]),
            ("bird".to_string(), vec![Some(1.0)]),
        ]
    );
    assert_eq!(
        rows(&dataset, xs),
        vec![
            ("3.25".to_string(), vec![Some(1.0)]),
            ("7.75".to_string(), vec![Some(2.0)]),
        ]
    );

    dataset.clear_selection(animals).expect("clear");
    dataset.clear_selection(xs).expect("clear");
    assert_eq!(rows(&dataset, animals), unfiltered_animals);
    assert_eq!(
        dataset.record_counts(),
        Some(RecordCounts {
            total: 5,
            selected: 5
        })
    );
}

#[tokio::test]
async fn every_valid_record_lands_in_exactly_one_group() {
    let mut dataset = memory_dataset();
    let records = (0..200)
        .map(|i| json!({ "v": (i * 37 % 101) as f64 / 7.0 }))
        .chain([json!({ "v": null }), json!({ "other": 1 })])
        .collect();
    dataset.ingest(records).await.expect("ingest");
    dataset.scan_data().await.expect("scan");
    let id = count_filter(&mut dataset, "v", "v").await;
    for (grouping, param) in [
        (Grouping::FixedN, 7.0),
        (Grouping::FixedSize, 1.5),
        (Grouping::FixedSizeCentered, 2.0),
        (Grouping::Log, 5.0),
    ] {
        dataset
            .set_partition_grouping(id, 1, grouping, param)
            .expect("grouping");
        let total: f64 = rows(&dataset, id)
            .iter()
            .filter_map(|(_, aggregates)| aggregates[0])
            .sum();
        assert_eq!(total, 200.0, "{grouping:?}");
    }
}

#[tokio::test]
async fn toggling_a_selection_restores_aggregates_exactly() {
    let mut dataset = memory_dataset();
    let records = (0..50)
        .map(|i| {
            let kind = if i % 3 == 0 { "a" } else { "b" };
            json!({ "kind": kind, "v": 0.1 * i as f64 })
        })
        .collect();
    dataset.ingest(records).await.expect("ingest");
    dataset.scan_data().await.expect("scan");
    let kinds = count_filter(&mut dataset, "kinds", "kind").await;
    let values = count_filter(&mut dataset, "values", "v").await;
    let v = facet_id(&dataset, "v");
    dataset
        .add_aggregate(values, Aggregate::over(v, AggregateOp::Sum))
        .expect("sum");
    dataset
        .add_aggregate(values, Aggregate::over(v, AggregateOp::Avg))
        .expect("avg");
    let before = rows(&dataset, values);

    for _ in 0..5 {
        dataset.select_group(kinds, 1, 2).expect("select");
        dataset.select_group(kinds, 1, 2).expect("deselect");
    }
    assert_eq!(rows(&dataset, values), before);
}

#[tokio::test]
async fn structural_edits_walk_the_state_machine() {
    let mut dataset = memory_dataset();
    dataset.ingest(pets()).await.expect("ingest");
    dataset.scan_data().await.expect("scan");
    let id = dataset.add_filter(Filter::new("pair", 2, 2));
    let animal = facet_id(&dataset, "animal");
    let x = facet_id(&dataset, "x");

    dataset.add_partition(id, animal).await.expect("first");
    let filter = dataset.filter(id).expect("filter");
    assert!(!filter.is_active());
    assert!(filter.data().is_empty());

    dataset.add_partition(id, x).await.expect("second");
    dataset
        .set_partition_grouping(id, 2, Grouping::FixedN, 1.0)
        .expect("grouping");
    assert!(dataset.filter(id).expect("filter").is_active());
    let keys: Vec<String> = rows(&dataset, id).into_iter().map(|(key, _)| key).collect();
    assert_eq!(keys, vec!["cat|5.5", "dog|5.5", "bird|5.5"]);

    dataset.remove_partition(id, 1).expect("remove");
    let filter = dataset.filter(id).expect("filter");
    assert!(!filter.is_active());
    assert!(filter.data().is_empty());
}

#[tokio::test]
async fn unknown_facets_fall_into_a_constant_bucket() {
    let mut dataset = memory_dataset();
    dataset.ingest(pets()).await.expect("ingest");
    let id = dataset.add_filter(Filter::new("ghost", 1, 1));
    dataset
        .add_partition(id, FacetId::new())
        .await
        .expect("partition");
    dataset
        .add_aggregate(id, Aggregate::over(FacetId::new(), AggregateOp::Sum))
        .expect("aggregate");
    assert_eq!(rows(&dataset, id), vec![("Other".to_string(), vec![None])]);
}

#[tokio::test]
async fn rejected_ingest_keeps_previous_records() {
    let mut dataset = memory_dataset();
    dataset.ingest(pets()).await.expect("ingest");
    dataset.scan_data().await.expect("scan");
    let id = count_filter(&mut dataset, "animals", "animal").await;
    let before = rows(&dataset, id);

    assert!(dataset.ingest(vec![json!([1, 2])]).await.is_err());
    assert_eq!(rows(&dataset, id), before);
}

#[tokio::test]
async fn new_data_is_broadcast_on_delivery() {
    let mut dataset = memory_dataset();
    dataset.ingest(pets()).await.expect("ingest");
    dataset.scan_data().await.expect("scan");
    let id = count_filter(&mut dataset, "animals", "animal").await;
    let mut receiver = dataset.filter(id).expect("filter").subscribe();

    dataset.select_group(id, 1, 1).expect("select");
    receiver.recv().await.expect("new data");
}

#[tokio::test]
async fn sums_span_the_full_double_range() {
    let mut dataset = memory_dataset();
    dataset
        .ingest(vec![
            json!({"k": "a", "v": 1e30}),
            json!({"k": "a", "v": 1e30}),
            json!({"k": "b", "v": 1e-12}),
            json!({"k": "b", "v": 1e-12}),
        ])
        .await
        .expect("ingest");
    dataset.scan_data().await.expect("scan");
    let id = count_filter(&mut dataset, "k", "k").await;
    let v = facet_id(&dataset, "v");
    dataset
        .add_aggregate(id, Aggregate::over(v, AggregateOp::Sum))
        .expect("sum");
    dataset.settle().await;
    assert_eq!(
        rows(&dataset, id),
        vec![
            ("a".to_string(), vec![Some(2.0), Some(2e30)]),
            ("b".to_string(), vec![Some(2.0), Some(2e-12)]),
        ]
    );
}
