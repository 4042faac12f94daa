//! Bucketing of one facet into ordered groups.
//!
//! Interval groups are computed in transformed space and carry their bounds
//! mapped back to base space. Bucket assignment compares base values against
//! those base bounds: `[min, max]` for the first group, `(min, max]` for the
//! rest. Index 0 is reserved for values no group claims.

use std::collections::HashSet;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::facet::{Facet, FacetKind};
use crate::ids::FacetId;
use crate::row::OTHER_LABEL;

pub const DEFAULT_BIN_COUNT: f64 = 20.0;
pub const MAX_BINS: usize = 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// `param` equal-width intervals.
    FixedN,
    /// Intervals of width `param` aligned on multiples of it.
    FixedSize,
    /// Intervals of width `param` centred on multiples of it.
    FixedSizeCentered,
    /// `param` intervals equal in `log10` space.
    Log,
    Categorial,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupBounds {
    pub min: f64,
    pub max: f64,
    pub raw_min: f64,
    pub raw_max: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub index: usize,
    pub value: String,
    pub bounds: Option<GroupBounds>,
    pub count: u64,
    pub selected: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub facet_id: FacetId,
    pub rank: usize,
    pub kind: FacetKind,
    pub grouping: Grouping,
    pub grouping_param: f64,
    /// Domain in base space; `None` falls back to the facet domain.
    pub minval: Option<f64>,
    pub maxval: Option<f64>,
    /// Restricts categorial groups after a zoom; empty means all.
    pub categories: Vec<String>,
    pub groups: Vec<Group>,
    /// Selected interval in transformed space as two boundary points.
    pub selected: Vec<f64>,
}

impl Partition {
    pub fn new(facet: &Facet, rank: usize) -> Self {
        let grouping = if facet.kind.is_interval() {
            Grouping::FixedN
        } else {
            Grouping::Categorial
        };
        Self {
            facet_id: facet.id,
            rank,
            kind: facet.kind,
            grouping,
            grouping_param: DEFAULT_BIN_COUNT,
            minval: facet.minval,
            maxval: facet.maxval,
            categories: Vec::new(),
            groups: Vec::new(),
            selected: Vec::new(),
        }
    }

    /// Placeholder dimension for a facet id that no longer resolves.
    pub fn detached(facet_id: FacetId, rank: usize) -> Self {
        Self {
            facet_id,
            rank,
            kind: FacetKind::Categorial,
            grouping: Grouping::Categorial,
            grouping_param: DEFAULT_BIN_COUNT,
            minval: None,
            maxval: None,
            categories: Vec::new(),
            groups: Vec::new(),
            selected: Vec::new(),
        }
    }

    pub fn is_categorial(&self) -> bool {
        self.grouping == Grouping::Categorial
    }

    pub fn set_grouping(&mut self, grouping: Grouping, param: f64) {
        self.grouping = grouping;
        self.grouping_param = param;
    }

    /// Regenerates the group list; existing selections are dropped.
    pub fn compute_groups(&mut self, facet: &Facet) {
        self.selected.clear();
        self.groups = if self.is_categorial() {
            self.categorial_groups(facet)
        } else {
            self.interval_groups(facet)
        };
    }

    fn categorial_groups(&self, facet: &Facet) -> Vec<Group> {
        let observed = facet.categorial_transform.groups();
        let labels: Vec<(String, u64)> = if self.categories.is_empty() {
            observed
        } else {
            self.categories
                .iter()
                .map(|label| {
                    let count = observed
                        .iter()
                        .find(|(group, _)| group == label)
                        .map_or(0, |(_, count)| *count);
                    (label.clone(), count)
                })
                .collect()
        };
        labels
            .into_iter()
            .enumerate()
            .map(|(at, (value, count))| Group {
                index: at + 1,
                value,
                bounds: None,
                count,
                selected: false,
            })
            .collect()
    }

    fn interval_groups(&self, facet: &Facet) -> Vec<Group> {
        let Some((lo, hi)) = self.minval.zip(self.maxval).or_else(|| facet.domain()) else {
            return Vec::new();
        };
        let (t_lo, t_hi) = (facet.forward(lo), facet.forward(hi));
        let edges = interval_edges(self.grouping, self.grouping_param, t_lo, t_hi);
        let raw: Vec<f64> = edges
            .iter()
            .enumerate()
            .map(|(at, edge)| match at {
                0 if *edge == t_lo => lo,
                n if n == edges.len() - 1 && *edge == t_hi => hi,
                _ => facet.inverse(*edge),
            })
            .collect();
        edges
            .windows(2)
            .zip(raw.windows(2))
            .enumerate()
            .map(|(at, (t, r))| Group {
                index: at + 1,
                value: facet.format_base(0.5 * (r[0] + r[1])),
                bounds: Some(GroupBounds {
                    min: t[0],
                    max: t[1],
                    raw_min: r[0],
                    raw_max: r[1],
                }),
                count: 0,
                selected: false,
            })
            .collect()
    }

    /// Bucket index of a base value, 0 when no group claims it.
    pub fn bucket_of(&self, base: f64) -> usize {
        let at = self.groups.partition_point(|group| {
            group
                .bounds
                .is_some_and(|bounds| bounds.raw_max < base)
        });
        let Some(group) = self.groups.get(at) else {
            return 0;
        };
        let Some(bounds) = group.bounds else {
            return 0;
        };
        let above_min = if at == 0 {
            base >= bounds.raw_min
        } else {
            base > bounds.raw_min
        };
        if above_min { group.index } else { 0 }
    }

    /// Bucket index of a categorial text, 0 when no group claims it.
    pub fn bucket_of_text(&self, facet: &Facet, text: &str) -> usize {
        facet
            .categorial_transform
            .match_group(text)
            .and_then(|label| self.groups.iter().find(|group| group.value == label))
            .map_or(0, |group| group.index)
    }

    /// Label of a bucket index; indices past the last group clamp to it.
    pub fn label_of(&self, index: usize) -> String {
        if index == 0 {
            return OTHER_LABEL.to_string();
        }
        match self.groups.get(index - 1) {
            Some(group) => group.value.clone(),
            None => match self.groups.last() {
                Some(last) => {
                    warn!(
                        "partition: bucket {index} beyond {} groups, clamped",
                        self.groups.len()
                    );
                    last.value.clone()
                }
                None => OTHER_LABEL.to_string(),
            },
        }
    }

    /// Drill interaction on one group.
    ///
    /// Categorial groups toggle. Interval partitions select a contiguous range:
    /// the first click selects the group, clicks outside the range extend it and
    /// a click inside restarts it.
    pub fn select_group(&mut self, index: usize) -> bool {
        let Some(at) = index.checked_sub(1).filter(|at| *at < self.groups.len()) else {
            return false;
        };
        let Some(bounds) = self.groups[at].bounds else {
            self.groups[at].selected = !self.groups[at].selected;
            return true;
        };
        match self.selected.as_slice() {
            [lo, hi] if bounds.min < *lo => self.selected = vec![bounds.min, *hi],
            [lo, hi] if bounds.max > *hi => self.selected = vec![*lo, bounds.max],
            _ => self.selected = vec![bounds.min, bounds.max],
        }
        self.mark_selected_range();
        true
    }

    fn mark_selected_range(&mut self) {
        let [lo, hi] = self.selected.as_slice() else {
            return;
        };
        let (lo, hi) = (*lo, *hi);
        for group in &mut self.groups {
            group.selected = group
                .bounds
                .is_some_and(|bounds| bounds.min >= lo && bounds.max <= hi);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
        for group in &mut self.groups {
            group.selected = false;
        }
    }

    pub fn has_selection(&self) -> bool {
        !self.selected.is_empty() || self.groups.iter().any(|group| group.selected)
    }

    pub fn selected_indices(&self) -> Vec<usize> {
        self.groups
            .iter()
            .filter(|group| group.selected)
            .map(|group| group.index)
            .collect()
    }

    /// Labels allowed through this dimension; `None` lets everything pass.
    pub fn selection_predicate(&self) -> Option<HashSet<String>> {
        if !self.has_selection() {
            return None;
        }
        Some(
            self.groups
                .iter()
                .filter(|group| group.selected)
                .map(|group| group.value.clone())
                .collect(),
        )
    }

    /// Narrows the domain (or category list) to the current selection.
    pub fn zoom_to_selection(&mut self, facet: &Facet) {
        if !self.is_categorial() {
            if let [lo, hi] = self.selected.as_slice() {
                let (lo, hi) = (*lo, *hi);
                let domain = self.minval.zip(self.maxval).or_else(|| facet.domain());
                if let Some((old_lo, old_hi)) = domain {
                    let old_width = facet.forward(old_hi) - facet.forward(old_lo);
                    let rescale = matches!(
                        self.grouping,
                        Grouping::FixedSize | Grouping::FixedSizeCentered
                    );
                    if rescale && old_width > 0.0 {
                        self.grouping_param *= (hi - lo) / old_width;
                    }
                }
                self.minval = Some(facet.inverse(lo));
                self.maxval = Some(facet.inverse(hi));
            }
        } else {
            let selected: Vec<String> = self
                .groups
                .iter()
                .filter(|group| group.selected)
                .map(|group| group.value.clone())
                .collect();
            if !selected.is_empty() {
                self.categories = selected;
            }
        }
        self.compute_groups(facet);
    }

    /// Returns to the facet's full domain and category list; the grouping
    /// and its parameter are kept.
    pub fn reset_domain(&mut self, facet: &Facet) {
        self.minval = facet.minval;
        self.maxval = facet.maxval;
        self.categories.clear();
        self.compute_groups(facet);
    }
}

/// Interval edges in transformed space, always at least two.
fn interval_edges(grouping: Grouping, param: f64, lo: f64, hi: f64) -> Vec<f64> {
    if !(hi > lo) {
        return vec![lo, lo];
    }
    match grouping {
        Grouping::FixedSize if param > 0.0 => {
            let start = (lo / param).floor() * param;
            let end = (hi / param).ceil() * param;
            stepped_edges(start, end, param)
        }
        Grouping::FixedSizeCentered if param > 0.0 => {
            let start = ((lo / param + 0.5).floor() - 0.5) * param;
            let end = ((hi / param - 0.5).ceil() + 0.5) * param;
            stepped_edges(start, end, param)
        }
        Grouping::Log if lo > 0.0 => {
            let count = bin_count(param);
            let (log_lo, log_hi) = (lo.log10(), hi.log10());
            let step = (log_hi - log_lo) / count as f64;
            let mut edges: Vec<f64> = (0..=count)
                .map(|i| 10f64.powf(log_lo + i as f64 * step))
                .collect();
            edges[0] = lo;
            edges[count] = hi;
            edges
        }
        _ => {
            let count = bin_count(param);
            let step = (hi - lo) / count as f64;
            let mut edges: Vec<f64> = (0..=count).map(|i| lo + i as f64 * step).collect();
            edges[count] = hi;
            edges
        }
    }
}

fn bin_count(param: f64) -> usize {
    if param.is_finite() && param >= 1.0 {
        (param.round() as usize).min(MAX_BINS)
    } else {
        DEFAULT_BIN_COUNT as usize
    }
}

fn stepped_edges(start: f64, end: f64, size: f64) -> Vec<f64> {
    let wanted = ((end - start) / size).round();
    let count = (wanted as usize).clamp(1, MAX_BINS);
    if wanted > MAX_BINS as f64 {
        warn!("partition: bin size {size} needs {wanted} bins, clamped to {MAX_BINS}");
    }
    let size = (end - start) / count as f64;
    let mut edges: Vec<f64> = (0..=count).map(|i| start + i as f64 * size).collect();
    edges[count] = end;
    edges
}
