//! Value-to-rank and value-to-group mappings computed from observed data.

use serde::{Deserialize, Serialize};

/// Number of interpolated percentile points between the duplicated extremes.
pub const PERCENTILE_STEPS: u32 = 99;
pub const WILDCARD: char = '%';

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    #[default]
    None,
    Percentiles,
    Exceedances,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub x: f64,
    pub fx: f64,
}

/// Piecewise-linear map between base values (`x`) and ranks (`fx`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuousTransform {
    pub kind: TransformKind,
    pub points: Vec<ControlPoint>,
}

impl ContinuousTransform {
    pub fn identity() -> Self {
        Self::default()
    }

    /// Builds the percentile map from ascending values.
    pub fn percentiles(sorted: &[f64]) -> Self {
        let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
            return Self::identity();
        };
        let n = sorted.len();
        let mut points = Vec::with_capacity(PERCENTILE_STEPS as usize + 4);
        points.push(ControlPoint { x: min, fx: 0.0 });
        points.push(ControlPoint { x: min, fx: 0.0 });
        for p in 1..=PERCENTILE_STEPS {
            let x = f64::from(p) * 0.01 * (n as f64 + 1.0) - 1.0;
            points.push(ControlPoint {
                x: interpolate_sorted(sorted, x),
                fx: f64::from(p),
            });
        }
        points.push(ControlPoint { x: max, fx: 100.0 });
        points.push(ControlPoint { x: max, fx: 100.0 });
        Self {
            kind: TransformKind::Percentiles,
            points,
        }
    }

    /// Builds the exceedance map from ascending values: `+k` marks the value
    /// exceeded by one in `k` records, `-k` its mirror from below.
    pub fn exceedances(sorted: &[f64]) -> Self {
        let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
            return Self::identity();
        };
        let n = sorted.len();
        let mut lower = Vec::new();
        let mut upper = Vec::new();
        let mut oom = 1usize;
        let mut mult = 3usize;
        while mult * oom < n {
            let k = mult * oom;
            upper.push(ControlPoint {
                x: sorted[n - n / k - 1],
                fx: k as f64,
            });
            lower.push(ControlPoint {
                x: sorted[n / k],
                fx: -(k as f64),
            });
            mult += 1;
            if mult == 10 {
                oom *= 10;
                mult = 1;
            }
        }
        let mut points = Vec::with_capacity(lower.len() + upper.len() + 3);
        points.push(ControlPoint {
            x: min,
            fx: -(n as f64),
        });
        points.extend(lower.into_iter().rev());
        points.push(ControlPoint {
            x: median(sorted),
            fx: 0.0,
        });
        points.extend(upper);
        points.push(ControlPoint { x: max, fx: n as f64 });
        Self {
            kind: TransformKind::Exceedances,
            points,
        }
    }

    pub fn is_active(&self) -> bool {
        self.kind != TransformKind::None && self.points.len() >= 2
    }

    /// Base value to rank; identity when inactive, clamped at the ends.
    pub fn forward(&self, x: f64) -> f64 {
        if !self.is_active() {
            return x;
        }
        let (first, last) = (self.points[0], self.points[self.points.len() - 1]);
        if x <= first.x {
            return first.fx;
        }
        if x >= last.x {
            return last.fx;
        }
        let upper = self.points.partition_point(|point| point.x <= x);
        let (lo, hi) = (self.points[upper - 1], self.points[upper]);
        lo.fx + (x - lo.x) / (hi.x - lo.x) * (hi.fx - lo.fx)
    }

    /// Rank to base value; identity when inactive, clamped at the ends.
    pub fn inverse(&self, fx: f64) -> f64 {
        if !self.is_active() {
            return fx;
        }
        let (first, last) = (self.points[0], self.points[self.points.len() - 1]);
        if fx <= first.fx {
            return first.x;
        }
        if fx >= last.fx {
            return last.x;
        }
        let upper = self.points.partition_point(|point| point.fx <= fx);
        let (lo, hi) = (self.points[upper - 1], self.points[upper]);
        lo.x + (fx - lo.fx) / (hi.fx - lo.fx) * (hi.x - lo.x)
    }
}

fn interpolate_sorted(sorted: &[f64], x: f64) -> f64 {
    let last = sorted.len() - 1;
    if x <= 0.0 {
        return sorted[0];
    }
    let index = x.floor() as usize;
    if index >= last {
        return sorted[last];
    }
    let frac = x - index as f64;
    (1.0 - frac) * sorted[index] + frac * sorted[index + 1]
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorialRule {
    pub expression: String,
    pub group: String,
    pub count: u64,
}

impl CategorialRule {
    pub fn is_wildcard(&self) -> bool {
        self.expression.contains(WILDCARD)
    }
}

/// Ordered rules mapping raw text to group labels.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorialTransform {
    pub rules: Vec<CategorialRule>,
}

impl CategorialTransform {
    /// Identity rules for `(value, count)` pairs, kept in the given order.
    pub fn from_counts(counts: impl IntoIterator<Item = (String, u64)>) -> Self {
        let rules = counts
            .into_iter()
            .map(|(value, count)| CategorialRule {
                expression: value.clone(),
                group: value,
                count,
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Literal rules win over wildcards; wildcards apply in insertion order.
    pub fn match_group(&self, text: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| !rule.is_wildcard() && rule.expression == text)
            .or_else(|| {
                self.rules
                    .iter()
                    .find(|rule| rule.is_wildcard() && wildcard_matches(&rule.expression, text))
            })
            .map(|rule| rule.group.as_str())
    }

    /// Distinct groups in first-seen rule order with summed counts.
    pub fn groups(&self) -> Vec<(String, u64)> {
        let mut groups: Vec<(String, u64)> = Vec::new();
        for rule in &self.rules {
            match groups.iter_mut().find(|(group, _)| *group == rule.group) {
                Some((_, count)) => *count += rule.count,
                None => groups.push((rule.group.clone(), rule.count)),
            }
        }
        groups
    }

    /// Points a rule at another group, adding the rule when it is new.
    pub fn set_rule_group(&mut self, expression: &str, group: &str) {
        match self
            .rules
            .iter_mut()
            .find(|rule| rule.expression == expression)
        {
            Some(rule) => rule.group = group.to_string(),
            None => self.rules.push(CategorialRule {
                expression: expression.to_string(),
                group: group.to_string(),
                count: 0,
            }),
        }
    }
}

/// `%` matches any run of characters, everything else is literal.
pub fn wildcard_matches(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split(WILDCARD).collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if text.len() < first.len() + last.len() || !text.starts_with(first) || !text.ends_with(last)
    {
        return false;
    }
    let mut rest = &text[first.len()..text.len() - last.len()];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(at) => rest = &rest[at + middle.len()..],
            None => return false,
        }
    }
    true
}
