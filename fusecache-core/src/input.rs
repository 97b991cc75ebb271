use crate::{BackendDevice, ScalarType};

/// Description of one runtime input, as consumed by the signature encoder.
#[derive(Clone, Debug, PartialEq)]
pub enum InputDescriptor {
    Tensor(TensorDescriptor),
    /// A 0-dimensional value that may participate in specialization.
    Scalar(ScalarValue),
    /// Anything the encoder has no representation for (lists, strings, ...).
    Opaque { kind: String },
}

impl InputDescriptor {
    pub fn tensor(
        sizes: impl Into<Vec<usize>>,
        strides: impl Into<Vec<usize>>,
        dtype: ScalarType,
    ) -> Self {
        Self::Tensor(TensorDescriptor::new(sizes, strides, dtype))
    }

    /// A dense row-major tensor.
    pub fn contiguous(sizes: impl Into<Vec<usize>>, dtype: ScalarType) -> Self {
        Self::Tensor(TensorDescriptor::contiguous(sizes, dtype))
    }

    pub fn as_tensor(&self) -> Option<&TensorDescriptor> {
        match self {
            Self::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorDescriptor {
    pub sizes: Vec<usize>,
    pub strides: Vec<usize>,
    pub dtype: ScalarType,
    pub device: BackendDevice,
}

impl TensorDescriptor {
    pub fn new(
        sizes: impl Into<Vec<usize>>,
        strides: impl Into<Vec<usize>>,
        dtype: ScalarType,
    ) -> Self {
        Self {
            sizes: sizes.into(),
            strides: strides.into(),
            dtype,
            device: BackendDevice::cpu(),
        }
    }

    pub fn contiguous(sizes: impl Into<Vec<usize>>, dtype: ScalarType) -> Self {
        let sizes = sizes.into();
        let strides = contiguous_strides(&sizes);
        Self::new(sizes, strides, dtype)
    }

    pub fn on(mut self, device: BackendDevice) -> Self {
        self.device = device;
        self
    }

    pub fn rank(&self) -> usize {
        self.sizes.len()
    }

    /// Element count, `None` when it overflows `usize`.
    pub fn numel(&self) -> Option<usize> {
        self.sizes
            .iter()
            .try_fold(1usize, |acc, &size| acc.checked_mul(size))
    }

    /// Per-dimension layout class, outermost dimension first.
    ///
    /// `None` when the stride count differs from the rank or the extent of
    /// the tensor overflows `usize`. Size-1 dimensions do not take part in
    /// the density of the dimensions outside them.
    pub fn layout(&self) -> Option<Vec<DimLayout>> {
        if self.strides.len() != self.sizes.len() {
            return None;
        }
        let mut layout = Vec::with_capacity(self.rank());
        let mut dense = 1usize;
        for (&size, &stride) in self.sizes.iter().zip(&self.strides).rev() {
            if size == 1 {
                layout.push(DimLayout::Broadcast);
                continue;
            }
            let class = if stride == 0 {
                DimLayout::Expanded
            } else if stride == dense {
                DimLayout::Contiguous
            } else {
                DimLayout::Strided(stride)
            };
            layout.push(class);
            dense = size.checked_mul(stride.max(dense))?;
        }
        layout.reverse();
        Some(layout)
    }

    /// True when every dimension is dense in row-major order.
    pub fn is_contiguous(&self) -> bool {
        self.layout().is_some_and(|layout| {
            layout
                .iter()
                .all(|l| matches!(l, DimLayout::Contiguous | DimLayout::Broadcast))
        })
    }
}

/// Stride class of one dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DimLayout {
    /// Size-1 dimension, its stride carries no information.
    Broadcast,
    /// Stride 0 over a non-unit dimension.
    Expanded,
    /// Dense with respect to the next inner dimension.
    Contiguous,
    Strided(usize),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Complex(f64, f64),
}

impl ScalarValue {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Self::Bool(_) => ScalarType::Bool,
            Self::Int(_) => ScalarType::I64,
            Self::Float(_) => ScalarType::F64,
            Self::Complex(..) => ScalarType::ComplexF64,
        }
    }
}

/// Values that can describe themselves to the signature encoder.
pub trait Describe {
    fn describe(&self) -> InputDescriptor;
}

impl Describe for InputDescriptor {
    fn describe(&self) -> InputDescriptor {
        self.clone()
    }
}

/// Compute default (contiguous) strides for a tensor of given shape.
pub(crate) fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(shape.len());
    let mut acc = 1;
    for dim in shape.iter().rev() {
        strides.push(acc);
        acc *= *dim;
    }
    strides.reverse();
    strides
}
