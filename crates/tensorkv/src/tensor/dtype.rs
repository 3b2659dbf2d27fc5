use std::fmt;

/// Element type of a [`Tensor`](super::Tensor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Float,
    Double,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Bool,
    String,
}

impl DataType {
    pub const ALL: [DataType; 10] = [
        DataType::Float,
        DataType::Double,
        DataType::Int8,
        DataType::Int16,
        DataType::Int32,
        DataType::Int64,
        DataType::Uint8,
        DataType::Uint16,
        DataType::Bool,
        DataType::String,
    ];

    /// Parses a type name as accepted by `AI.TENSORSET`, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|dtype| dtype.name().eq_ignore_ascii_case(name))
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Int8 => "INT8",
            DataType::Int16 => "INT16",
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::Uint8 => "UINT8",
            DataType::Uint16 => "UINT16",
            DataType::Bool => "BOOL",
            DataType::String => "STRING",
        }
    }

    /// Bytes per element, `None` for variable width strings.
    pub fn width(&self) -> Option<usize> {
        match self {
            DataType::Int8 | DataType::Uint8 | DataType::Bool => Some(1),
            DataType::Int16 | DataType::Uint16 => Some(2),
            DataType::Float | DataType::Int32 => Some(4),
            DataType::Double | DataType::Int64 => Some(8),
            DataType::String => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    /// Stable numeric code used by the binary codec.
    pub(crate) fn code(&self) -> u8 {
        match self {
            DataType::Float => 0,
            DataType::Double => 1,
            DataType::Int8 => 2,
            DataType::Int16 => 3,
            DataType::Int32 => 4,
            DataType::Int64 => 5,
            DataType::Uint8 => 6,
            DataType::Uint16 => 7,
            DataType::Bool => 8,
            DataType::String => 9,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|dtype| dtype.code() == code)
    }

    /// Inclusive integer range accepted for this type, `None` for non integers.
    pub(crate) fn integer_range(&self) -> Option<(i64, i64)> {
        match self {
            DataType::Int8 => Some((i8::MIN as i64, i8::MAX as i64)),
            DataType::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            DataType::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            DataType::Int64 => Some((i64::MIN, i64::MAX)),
            DataType::Uint8 => Some((0, u8::MAX as i64)),
            DataType::Uint16 => Some((0, u16::MAX as i64)),
            DataType::Bool => Some((0, 1)),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
