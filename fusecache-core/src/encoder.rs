//! Canonical signature keys for runtime input sets.
//!
//! Two input sets that can share generated code (same sizes, stride classes,
//! broadcast pattern, rank, dtype and device, in the same order) encode to the
//! same key. Scalar inputs contribute their value as well as their type.

use std::{
    borrow::Borrow,
    fmt::{self, Display, Write},
};

use crate::{
    device::DeviceType,
    input::{DimLayout, TensorDescriptor},
    Describe, Error, InputDescriptor, Result, ScalarValue,
};

/// Opaque, order-sensitive encoding of an input set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CanonicalKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CanonicalKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CanonicalKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Encode `inputs` into a fresh key.
pub fn encode(inputs: &[InputDescriptor]) -> Result<CanonicalKey> {
    let mut buf = String::new();
    encode_into(&mut buf, inputs)?;
    Ok(CanonicalKey(buf))
}

/// Encode `inputs` into `buf`, which is cleared first.
///
/// On error `buf` holds a partial encoding and must not be used as a key.
pub fn encode_into<V: Describe>(buf: &mut String, inputs: &[V]) -> Result<()> {
    buf.clear();
    for (index, input) in inputs.iter().enumerate() {
        match input.describe() {
            InputDescriptor::Tensor(tensor) => encode_tensor(buf, index, &tensor)?,
            InputDescriptor::Scalar(value) => encode_scalar(buf, &value).map_err(Error::msg)?,
            InputDescriptor::Opaque { kind } => {
                return Err(Error::InvalidInputKind {
                    index,
                    reason: format!("unsupported input kind `{kind}`"),
                }
                .bt())
            }
        }
        buf.push(';');
    }
    Ok(())
}

fn encode_tensor(buf: &mut String, index: usize, tensor: &TensorDescriptor) -> Result<()> {
    if tensor.strides.len() != tensor.rank() {
        return Err(Error::InvalidInputKind {
            index,
            reason: format!(
                "rank {} tensor carries {} strides",
                tensor.rank(),
                tensor.strides.len()
            ),
        }
        .bt());
    }
    if tensor.numel().is_none() {
        return Err(Error::InvalidInputKind {
            index,
            reason: format!("element count of {:?} overflows usize", tensor.sizes),
        }
        .bt());
    }
    let Some(layout) = tensor.layout() else {
        return Err(Error::InvalidInputKind {
            index,
            reason: format!(
                "extent of sizes {:?} with strides {:?} overflows usize",
                tensor.sizes, tensor.strides
            ),
        }
        .bt());
    };
    encode_tensor_unchecked(buf, tensor, &layout).map_err(Error::msg)
}

fn encode_tensor_unchecked(
    buf: &mut String,
    tensor: &TensorDescriptor,
    layout: &[DimLayout],
) -> fmt::Result {
    write!(
        buf,
        "t{}@{}.{}r{}[",
        tensor.dtype.name(),
        tensor.device.kind().code(),
        tensor.device.ordinal(),
        tensor.rank()
    )?;
    for size in &tensor.sizes {
        write!(buf, "{size},")?;
    }
    buf.push_str("]<");
    for dim in layout {
        match dim {
            DimLayout::Broadcast => buf.push('b'),
            DimLayout::Expanded => buf.push('e'),
            DimLayout::Contiguous => buf.push('c'),
            DimLayout::Strided(stride) => write!(buf, "s{stride}")?,
        }
        buf.push(',');
    }
    buf.push('>');
    Ok(())
}

fn encode_scalar(buf: &mut String, value: &ScalarValue) -> fmt::Result {
    let dtype = value.scalar_type();
    match value {
        ScalarValue::Bool(v) => write!(buf, "s{dtype}={}", *v as u8),
        ScalarValue::Int(v) => write!(buf, "s{dtype}={v}"),
        ScalarValue::Float(v) => write!(buf, "s{dtype}={:x}", v.to_bits()),
        ScalarValue::Complex(re, im) => {
            write!(buf, "s{dtype}={:x}/{:x}", re.to_bits(), im.to_bits())
        }
    }
}
