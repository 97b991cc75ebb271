use std::fmt::{self, Display};

/// Element type tag of a tensor or scalar input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarType {
    Bool,
    U8,
    I8,
    I16,
    I32,
    I64,
    F16,
    BF16,
    F32,
    F64,
    ComplexF32,
    ComplexF64,
}

impl ScalarType {
    /// Short stable name, used inside signature keys.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "b8",
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::ComplexF32 => "c64",
            Self::ComplexF64 => "c128",
        }
    }

    pub const fn size_in_bytes(&self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::I16 | Self::F16 | Self::BF16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 | Self::ComplexF32 => 8,
            Self::ComplexF64 => 16,
        }
    }

    pub const fn is_floating_point(&self) -> bool {
        matches!(self, Self::F16 | Self::BF16 | Self::F32 | Self::F64)
    }

    pub const fn is_complex(&self) -> bool {
        matches!(self, Self::ComplexF32 | Self::ComplexF64)
    }
}

impl Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rust element types with a known [`ScalarType`].
pub trait DType: Copy + Send + Sync + 'static {
    const SCALAR_TYPE: ScalarType;
}

macro_rules! dtype {
    ($rt:ty, $variant:ident) => {
        impl DType for $rt {
            const SCALAR_TYPE: ScalarType = ScalarType::$variant;
        }
    };
}

dtype!(bool, Bool);
dtype!(u8, U8);
dtype!(i8, I8);
dtype!(i16, I16);
dtype!(i32, I32);
dtype!(i64, I64);
dtype!(f32, F32);
dtype!(f64, F64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_types_map_to_scalar_types() {
        assert_eq!(f32::SCALAR_TYPE, ScalarType::F32);
        assert_eq!(i64::SCALAR_TYPE.size_in_bytes(), 8);
        assert!(!bool::SCALAR_TYPE.is_floating_point());
        assert_eq!(ScalarType::ComplexF64.to_string(), ScalarType::ComplexF64.name());
    }
}
