//! Mean correction for the cross-domain all-reduce
//!
//! Vendor sub-groups reduce inputs that callers have already divided by the
//! local group size. Summing those local means across domains over-counts by
//! the cross-domain world size, so the stitched result is divided by it once,
//! either before or after the ring as the policy says.

use mosaic_interfaces::HostBuffer;
use mosaic_rendezvous::{with_host_elements, Element};
use mosaic_types::{MeanCorrection, ReduceOp};

/// Point in the cross-domain stage where a correction may run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionStage {
    BeforeRing,
    AfterRing,
}

/// Whether `policy` divides at `stage` for the reduction `op`.
///
/// Only additive reductions produce sums of means; extrema and products are
/// left untouched.
pub fn correction_applies(policy: MeanCorrection, stage: CorrectionStage, op: ReduceOp) -> bool {
    if !op.is_additive() {
        return false;
    }
    matches!(
        (policy, stage),
        (MeanCorrection::AfterRing, CorrectionStage::AfterRing)
            | (MeanCorrection::BeforeRing, CorrectionStage::BeforeRing)
    )
}

/// Reduction the cross-domain ring runs for a caller's `op`.
///
/// An average is divided exactly once. When the policy divides, the ring
/// sums and the correction supplies the division; with the correction
/// disabled the ring averages on its own.
pub fn ring_reduce_op(policy: MeanCorrection, op: ReduceOp) -> ReduceOp {
    match (op, policy) {
        (ReduceOp::Avg, MeanCorrection::Disabled) => ReduceOp::Avg,
        (ReduceOp::Avg, _) => ReduceOp::Sum,
        (other, _) => other,
    }
}

/// Divide every element by `divisor`.
///
/// Integers are promoted to f64, divided, rounded half away from zero and
/// cast back. A divisor of 0 or 1 leaves the values unchanged.
pub fn apply_mean_correction<T: Element>(values: &mut [T], divisor: usize) {
    if divisor <= 1 {
        return;
    }
    let divisor = divisor as f64;
    for value in values.iter_mut() {
        *value = T::from_f64(value.to_f64() / divisor);
    }
}

/// Apply the policy to a staged host buffer; returns whether it divided
pub fn correct_host(
    buffer: &mut HostBuffer,
    policy: MeanCorrection,
    stage: CorrectionStage,
    op: ReduceOp,
    divisor: usize,
) -> bool {
    if !correction_applies(policy, stage, op) || divisor <= 1 {
        return false;
    }
    with_host_elements!(buffer, |values| apply_mean_correction(values, divisor));
    true
}
