use std::fmt;
use std::str::FromStr;
use crate::error::Error;

/// Compute device a model or script is placed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu(Option<u32>),
    Gpu(Option<u32>),
}

impl FromStr for Device {
    type Err = Error;

    /// Accepts `CPU`, `GPU`, `CPU:<n>` and `GPU:<n>` in any case.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::syntax("Invalid DEVICE");
        let upper = text.to_ascii_uppercase();
        let (name, id) = match upper.split_once(':') {
            Some((name, id)) => (name, Some(id.parse::<u32>().map_err(|_| invalid())?)),
            None => (upper.as_str(), None),
        };
        match name {
            "CPU" => Ok(Device::Cpu(id)),
            "GPU" => Ok(Device::Gpu(id)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, id) = match self {
            Device::Cpu(id) => ("CPU", id),
            Device::Gpu(id) => ("GPU", id),
        };
        match id {
            Some(id) => write!(f, "{name}:{id}"),
            None => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu(None));
        assert_eq!("GPU:1".parse::<Device>().unwrap().to_string(), "GPU:1");
        assert!("TPU".parse::<Device>().is_err());
        assert!("GPU:x".parse::<Device>().is_err());
    }
}
