//! Bridging between [`HostBuffer`] and the element-generic primitives

use crate::element::Element;
use mosaic_interfaces::HostBuffer;
use mosaic_types::{MosaicError, ReduceOp, Result};

/// Run an element-generic expression on the typed contents of a host buffer.
///
/// `$buf` must evaluate to a `&HostBuffer` or `&mut HostBuffer`; `$v` is bound
/// to the matching `Vec<T>` reference in each arm.
#[macro_export]
macro_rules! with_host_elements {
    ($buf:expr, |$v:ident| $body:expr) => {
        match $buf {
            $crate::__private::HostBuffer::I32($v) => $body,
            $crate::__private::HostBuffer::I64($v) => $body,
            $crate::__private::HostBuffer::F32($v) => $body,
            $crate::__private::HostBuffer::F64($v) => $body,
        }
    };
}

fn combine_slices<T: Element>(acc: &mut [T], other: &[T], op: ReduceOp) {
    for (dst, src) in acc.iter_mut().zip(other) {
        *dst = dst.combine(*src, op);
    }
}

/// Fold `other` into `acc` element-wise
pub fn combine_host(acc: &mut HostBuffer, other: &HostBuffer, op: ReduceOp) -> Result<()> {
    if acc.len() != other.len() {
        return Err(MosaicError::internal(format!(
            "cannot combine buffers of {} and {} elements",
            acc.len(),
            other.len()
        )));
    }
    match (acc, other) {
        (HostBuffer::I32(a), HostBuffer::I32(b)) => combine_slices(a, b, op),
        (HostBuffer::I64(a), HostBuffer::I64(b)) => combine_slices(a, b, op),
        (HostBuffer::F32(a), HostBuffer::F32(b)) => combine_slices(a, b, op),
        (HostBuffer::F64(a), HostBuffer::F64(b)) => combine_slices(a, b, op),
        (a, b) => {
            return Err(MosaicError::internal(format!(
                "cannot combine {} with {}",
                a.dtype(),
                b.dtype()
            )))
        }
    }
    Ok(())
}

fn scale_slice<T: Element>(values: &mut [T], divisor: f64) {
    for value in values.iter_mut() {
        *value = T::from_f64(value.to_f64() / divisor);
    }
}

/// Divide every element by `divisor`; integers are rounded half away from zero
pub fn divide_host(buffer: &mut HostBuffer, divisor: usize) {
    let divisor = divisor as f64;
    with_host_elements!(buffer, |values| scale_slice(values, divisor))
}
