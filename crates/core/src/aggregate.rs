use serde::{Deserialize, Serialize};

use crate::ids::FacetId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
}

impl AggregateOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateOp::Count => "count",
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
        }
    }
}

/// One measure; without a facet it counts rows whatever the operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub facet_id: Option<FacetId>,
    pub operation: AggregateOp,
}

impl Aggregate {
    pub fn count() -> Self {
        Self {
            facet_id: None,
            operation: AggregateOp::Count,
        }
    }

    pub fn over(facet_id: FacetId, operation: AggregateOp) -> Self {
        Self {
            facet_id: Some(facet_id),
            operation,
        }
    }
}

/// 64-bit limbs of the exact sum; covers every finite `f64` magnitude with
/// headroom for 2^64 additions and the sign.
const LIMBS: usize = 35;
/// Binary exponent of the least significant bit, the smallest subnormal.
const LSB_EXPONENT: i32 = -1074;

/// Exact sum of finite `f64` values as a two's complement integer counting
/// units of `2^-1074`. Addition and subtraction are exact, so any sequence
/// of adds undone by the matching subtracts restores the sum bit for bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExactSum {
    limbs: [u64; LIMBS],
}

impl Default for ExactSum {
    fn default() -> Self {
        Self { limbs: [0; LIMBS] }
    }
}

impl ExactSum {
    pub fn add(&mut self, value: f64) {
        self.apply(value, false);
    }

    pub fn subtract(&mut self, value: f64) {
        self.apply(value, true);
    }

    fn apply(&mut self, value: f64, subtract: bool) {
        if !value.is_finite() || value == 0.0 {
            return;
        }
        let bits = value.to_bits();
        let negative = (bits >> 63 == 1) != subtract;
        let exponent = ((bits >> 52) & 0x7ff) as usize;
        let fraction = bits & ((1 << 52) - 1);
        // value = mantissa * 2^(shift - 1074)
        let (mantissa, shift) = if exponent == 0 {
            (fraction, 0)
        } else {
            (fraction | (1 << 52), exponent - 1)
        };
        let (limb, offset) = (shift / 64, shift % 64);
        let low = mantissa << offset;
        let high = if offset == 0 { 0 } else { mantissa >> (64 - offset) };
        let mut carry = false;
        for (at, slot) in self.limbs.iter_mut().enumerate().skip(limb) {
            let part = match at - limb {
                0 => low,
                1 => high,
                _ if !carry => break,
                _ => 0,
            };
            let (next, first) = if negative {
                slot.overflowing_sub(part)
            } else {
                slot.overflowing_add(part)
            };
            let (next, second) = if negative {
                next.overflowing_sub(u64::from(carry))
            } else {
                next.overflowing_add(u64::from(carry))
            };
            *slot = next;
            carry = first || second;
        }
    }

    fn is_negative(&self) -> bool {
        self.limbs[LIMBS - 1] >> 63 == 1
    }

    /// Nearest `f64` to the exact sum.
    pub fn value(&self) -> f64 {
        let negative = self.is_negative();
        let mut magnitude = self.limbs;
        if negative {
            let mut carry = true;
            for slot in &mut magnitude {
                let (next, overflow) = (!*slot).overflowing_add(u64::from(carry));
                *slot = next;
                carry = overflow;
            }
        }
        let Some(top) = magnitude.iter().rposition(|limb| *limb != 0) else {
            return 0.0;
        };
        let highest = top * 64 + 63 - magnitude[top].leading_zeros() as usize;
        let value = if highest < 64 {
            magnitude[0] as f64 * pow2(LSB_EXPONENT)
        } else {
            // Top 64 bits, with the lowest bit standing in for everything
            // below so the conversion rounds correctly.
            let start = highest - 63;
            let (limb, offset) = (start / 64, start % 64);
            let mut window = magnitude[limb] >> offset;
            if offset > 0 {
                window |= magnitude[limb + 1] << (64 - offset);
            }
            let below = magnitude[limb] & ((1u64 << offset) - 1) != 0
                || magnitude[..limb].iter().any(|word| *word != 0);
            window |= u64::from(below);
            window as f64 * pow2(start as i32 + LSB_EXPONENT)
        };
        if negative { -value } else { value }
    }
}

/// `2^exponent`, saturating to infinity above the `f64` range.
fn pow2(exponent: i32) -> f64 {
    match exponent {
        1024.. => f64::INFINITY,
        -1022..=1023 => f64::from_bits(((exponent + 1023) as u64) << 52),
        -1074..=-1023 => f64::from_bits(1u64 << (exponent + 1074)),
        _ => 0.0,
    }
}

/// Count plus exact sum; `add` and `subtract` are exact inverses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Accumulator {
    pub count: u64,
    pub sum: ExactSum,
}

impl Accumulator {
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum.add(value);
    }

    pub fn subtract(&mut self, value: f64) {
        self.count -= 1;
        self.sum.subtract(value);
    }

    pub fn sum(&self) -> f64 {
        self.sum.value()
    }

    /// Reduction result, `None` when undefined for an empty accumulator.
    pub fn reduce(&self, operation: AggregateOp) -> Option<f64> {
        match operation {
            AggregateOp::Count => Some(self.count as f64),
            _ if self.count == 0 => None,
            AggregateOp::Sum => Some(self.sum()),
            AggregateOp::Avg => Some(self.sum() / self.count as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_subtract_restores_bit_for_bit() {
        let mut acc = Accumulator::default();
        for value in [0.1, 1e9 + 0.3, -7.25, 3.0e-5] {
            acc.add(value);
        }
        let before = acc;
        for value in [0.7, 123_456.789, -0.000_001] {
            acc.add(value);
            acc.subtract(value);
            assert_eq!(acc, before);
        }
    }

    #[test]
    fn reductions_over_values() {
        let mut acc = Accumulator::default();
        assert_eq!(acc.reduce(AggregateOp::Count), Some(0.0));
        assert_eq!(acc.reduce(AggregateOp::Sum), None);
        assert_eq!(acc.reduce(AggregateOp::Avg), None);
        acc.add(1.5);
        acc.add(2.5);
        assert_eq!(acc.reduce(AggregateOp::Count), Some(2.0));
        assert_eq!(acc.reduce(AggregateOp::Sum), Some(4.0));
        assert_eq!(acc.reduce(AggregateOp::Avg), Some(2.0));
    }

    #[test]
    fn huge_values_sum_without_overflow() {
        let mut acc = Accumulator::default();
        acc.add(1e30);
        acc.add(1e30);
        assert_eq!(acc.reduce(AggregateOp::Sum), Some(2e30));
        acc.add(f64::MAX);
        acc.add(-f64::MAX);
        assert_eq!(acc.sum(), 2e30);
        acc.subtract(1e30);
        assert_eq!(acc.sum(), 1e30);
    }

    #[test]
    fn tiny_values_keep_their_magnitude() {
        let mut acc = Accumulator::default();
        acc.add(1e-12);
        acc.add(2e-12);
        let sum = acc.sum();
        assert!((sum - 3e-12).abs() < 1e-24, "{sum}");
        acc.add(f64::from_bits(1));
        acc.subtract(f64::from_bits(1));
        assert_eq!(acc.sum(), sum);
    }

    #[test]
    fn negative_totals_and_mixed_scales() {
        let mut acc = Accumulator::default();
        acc.add(-2.5);
        acc.add(1e-300);
        assert_eq!(acc.sum(), -2.5);
        acc.subtract(1e-300);
        acc.add(2.5);
        assert_eq!(acc.sum, ExactSum::default());
        assert_eq!(acc.sum(), 0.0);
    }
}
