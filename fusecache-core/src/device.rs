use std::fmt::{self, Display};

/// Capability interface for device-kind specific behavior.
pub trait DeviceType {
    /// Numeric code of this device kind, stable across runs.
    fn code(&self) -> i8;

    /// Human readable name.
    fn describe(&self) -> String;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKind {
    #[default]
    Unknown,
    Cpu,
    Cuda,
    Metal,
    /// Backend specific kind identified by its code.
    Other(i8),
}

impl DeviceType for DeviceKind {
    fn code(&self) -> i8 {
        match self {
            Self::Unknown => 0,
            Self::Cpu => 1,
            Self::Cuda => 2,
            Self::Metal => 3,
            Self::Other(code) => *code,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Unknown => "Unknown".to_string(),
            Self::Cpu => "CPU".to_string(),
            Self::Cuda => "CUDA".to_string(),
            Self::Metal => "Metal".to_string(),
            Self::Other(code) => format!("Backend{code}"),
        }
    }
}

/// A concrete device: a kind tag plus an ordinal.
///
/// Plain value type, cheap to copy and compare. Devices order by kind code
/// first, then by ordinal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BackendDevice {
    kind: DeviceKind,
    ordinal: i64,
}

impl BackendDevice {
    pub const fn new(kind: DeviceKind, ordinal: i64) -> Self {
        Self { kind, ordinal }
    }

    pub const fn cpu() -> Self {
        Self::new(DeviceKind::Cpu, 0)
    }

    pub const fn cuda(ordinal: i64) -> Self {
        Self::new(DeviceKind::Cuda, ordinal)
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Numeric type code, see [`DeviceType::code`].
    pub fn type_code(&self) -> i8 {
        self.kind.code()
    }

    pub fn ordinal(&self) -> i64 {
        self.ordinal
    }
}

impl PartialOrd for BackendDevice {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BackendDevice {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.type_code()
            .cmp(&other.type_code())
            .then(self.ordinal.cmp(&other.ordinal))
            .then(self.kind.cmp(&other.kind))
    }
}

impl Display for BackendDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.describe(), self.ordinal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devices_are_plain_values() {
        let a = BackendDevice::cuda(1);
        let b = a;
        assert_eq!(a, b);
        assert_eq!(b.to_string(), "CUDA:1");
        assert_eq!(BackendDevice::default().to_string(), "Unknown:0");
    }

    #[test]
    fn ordering_uses_type_then_ordinal() {
        let mut devices = vec![
            BackendDevice::cuda(1),
            BackendDevice::cpu(),
            BackendDevice::cuda(0),
        ];
        devices.sort();
        assert_eq!(
            devices,
            vec![
                BackendDevice::cpu(),
                BackendDevice::cuda(0),
                BackendDevice::cuda(1)
            ]
        );
    }

    #[test]
    fn other_kinds_describe_their_code() {
        let dev = BackendDevice::new(DeviceKind::Other(9), 2);
        assert_eq!(dev.type_code(), 9);
        assert_eq!(dev.to_string(), "Backend9:2");
    }
}
