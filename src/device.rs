use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use crate::{Error, Result};

/// Compute backend kind. Only the CPU backend ships today; the enum keeps
/// the device string grammar and dispatch seams open for more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
}

impl DeviceKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
        }
    }
}

/// A concrete compute placement: backend kind, device ordinal and stream
/// index. Compared by resolved identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    pub kind: DeviceKind,
    pub ordinal: usize,
    pub stream: usize,
}

impl Device {
    pub const fn new(kind: DeviceKind, ordinal: usize, stream: usize) -> Self {
        Self {
            kind,
            ordinal,
            stream,
        }
    }

    pub const fn cpu(ordinal: usize) -> Self {
        Self::new(DeviceKind::Cpu, ordinal, 0)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.as_str(), self.ordinal)?;
        if self.stream != 0 {
            write!(f, ":{}", self.stream)?;
        }
        Ok(())
    }
}

/// A possibly-wildcard device specification, parsed from the canonical
/// string grammar `<kind><ordinal>[:<stream>]`.
///
/// `xpu` as the kind means "the default backend kind"; `x` as the ordinal
/// (as in `xpux` or `cpux`) means "the default ordinal". Wildcard parts are
/// filled in from the process-wide default device at [`DeviceSpec::resolve`]
/// time; fully concrete specs ignore the default entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec {
    kind: Option<DeviceKind>,
    ordinal: Option<usize>,
    stream: usize,
}

impl DeviceSpec {
    /// The full wildcard, equivalent to parsing `"xpux"`.
    pub fn any() -> Self {
        Self {
            kind: None,
            ordinal: None,
            stream: 0,
        }
    }

    /// Fill wildcard parts from the process-wide default device.
    pub fn resolve(&self) -> Device {
        let default = get_default_device();
        Device {
            kind: self.kind.unwrap_or(default.kind),
            ordinal: self.ordinal.unwrap_or(default.ordinal),
            stream: self.stream,
        }
    }
}

impl From<Device> for DeviceSpec {
    fn from(device: Device) -> Self {
        Self {
            kind: Some(device.kind),
            ordinal: Some(device.ordinal),
            stream: device.stream,
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::invalid_parameter("device", format!("cannot parse device {s:?}"));

        let (head, stream) = match s.split_once(':') {
            Some((head, stream)) => {
                let stream = stream.parse::<usize>().map_err(|_| bad())?;
                (head, stream)
            }
            None => (s, 0),
        };

        let (kind, rest) = if let Some(rest) = head.strip_prefix("cpu") {
            (Some(DeviceKind::Cpu), rest)
        } else if let Some(rest) = head.strip_prefix("xpu") {
            (None, rest)
        } else {
            return Err(bad());
        };

        let ordinal = match rest {
            "" | "x" => None,
            digits => Some(digits.parse::<usize>().map_err(|_| bad())?),
        };

        Ok(Self {
            kind,
            ordinal,
            stream,
        })
    }
}

static DEFAULT_DEVICE: RwLock<Device> = RwLock::new(Device::cpu(0));

/// The process-wide default placement, consulted whenever a tensor is
/// constructed without an explicit device or with a wildcard spec.
pub fn get_default_device() -> Device {
    *DEFAULT_DEVICE.read().unwrap()
}

/// Swap the process-wide default device. Later constructions see the new
/// default; already-resolved handles are unaffected. Wildcard parts of
/// `spec` resolve against the previous default.
pub fn set_default_device(spec: &str) -> Result<Device> {
    let device = spec.parse::<DeviceSpec>()?.resolve();
    *DEFAULT_DEVICE.write().unwrap() = device;
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_concrete() {
        let spec: DeviceSpec = "cpu0:1".parse().unwrap();
        let device = spec.resolve();
        assert_eq!(device, Device::new(DeviceKind::Cpu, 0, 1));
        assert_eq!(device.to_string(), "cpu0:1");
        assert_eq!(Device::cpu(2).to_string(), "cpu2");
    }

    #[test]
    fn parse_wildcards() {
        for s in ["xpux", "xpu", "cpux"] {
            let device = s.parse::<DeviceSpec>().unwrap().resolve();
            assert_eq!(device.kind, DeviceKind::Cpu);
        }
        let spec: DeviceSpec = "xpu3".parse().unwrap();
        assert_eq!(spec.resolve().ordinal, 3);
    }

    #[test]
    fn rejects_garbage() {
        assert!("gpu0".parse::<DeviceSpec>().is_err());
        assert!("cpu0:x".parse::<DeviceSpec>().is_err());
        assert!("cpuzero".parse::<DeviceSpec>().is_err());
    }
}
