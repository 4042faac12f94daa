use facetlab_core::{ContinuousTransform, Facet, Grouping, Partition};
use serde_json::json;

fn skewed() -> (Facet, Vec<serde_json::Value>) {
    let records: Vec<_> = (1..=200)
        .map(|i| json!({ "v": (i * i) as f64 / 100.0 }))
        .collect();
    let mut facet = Facet::continuous("v");
    let (lo, hi) = facet.domain_over(&records).expect("domain");
    facet.minval = Some(lo);
    facet.maxval = Some(hi);
    (facet, records)
}

#[test]
fn percentile_groups_claim_every_value_in_order() {
    let (mut facet, records) = skewed();
    facet.continuous_transform = ContinuousTransform::percentiles(&facet.sorted_values(&records));
    let mut partition = Partition::new(&facet, 1);
    partition.set_grouping(Grouping::FixedN, 10.0);
    partition.compute_groups(&facet);
    assert_eq!(partition.groups.len(), 10);

    let mut previous = 0;
    let mut counts = vec![0usize; 11];
    for value in facet.sorted_values(&records) {
        let bucket = partition.bucket_of(value);
        assert!(bucket >= 1, "{value} fell outside every group");
        assert!(bucket >= previous);
        previous = bucket;
        counts[bucket] += 1;
    }
    // Equal-width rank bins hold roughly equal shares of a skewed sample.
    assert!(counts[1..].iter().all(|count| (12..=28).contains(count)), "{counts:?}");
}

#[test]
fn exceedance_forward_is_monotone_over_the_data() {
    let (facet, records) = skewed();
    let sorted = facet.sorted_values(&records);
    let transform = ContinuousTransform::exceedances(&sorted);
    let ranks: Vec<f64> = sorted.iter().map(|value| transform.forward(*value)).collect();
    assert!(ranks.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(ranks.first().copied(), Some(-200.0));
    assert_eq!(ranks.last().copied(), Some(200.0));
}

#[test]
fn raw_bounds_tile_the_domain() {
    let (mut facet, records) = skewed();
    facet.continuous_transform = ContinuousTransform::percentiles(&facet.sorted_values(&records));
    let mut partition = Partition::new(&facet, 1);
    partition.set_grouping(Grouping::FixedN, 7.0);
    partition.compute_groups(&facet);
    let bounds: Vec<_> = partition
        .groups
        .iter()
        .map(|group| group.bounds.expect("interval bounds"))
        .collect();
    assert_eq!(bounds[0].raw_min, facet.minval.expect("min"));
    assert_eq!(bounds[bounds.len() - 1].raw_max, facet.maxval.expect("max"));
    for pair in bounds.windows(2) {
        assert_eq!(pair[0].raw_max, pair[1].raw_min);
        assert_eq!(pair[0].max, pair[1].min);
    }
}
