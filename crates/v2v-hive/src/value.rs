//! Encoding and decoding of registry value data.

use crate::HiveError;

/// Registry value types.
///
/// Only [`String`], [`ExpandString`] and [`Dword`] are produced by the
/// editor. The others are recognized when reading.
///
/// [`String`]: ValueType::String
/// [`ExpandString`]: ValueType::ExpandString
/// [`Dword`]: ValueType::Dword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ValueType {
    /// Just a key without a value (`REG_NONE`).
    None = 0,

    /// A string, usually UTF-16LE (`REG_SZ`).
    String = 1,

    /// A string containing `%env%` references (`REG_EXPAND_SZ`).
    ExpandString = 2,

    /// A blob of binary data (`REG_BINARY`).
    Binary = 3,

    /// A little-endian 32-bit integer (`REG_DWORD`).
    Dword = 4,

    /// A big-endian 32-bit integer (`REG_DWORD_BIG_ENDIAN`).
    DwordBigEndian = 5,

    /// A symbolic link to another key (`REG_LINK`).
    Link = 6,

    /// A list of strings (`REG_MULTI_SZ`).
    MultiString = 7,

    /// A resource list (`REG_RESOURCE_LIST`).
    ResourceList = 8,

    /// A resource descriptor (`REG_FULL_RESOURCE_DESCRIPTOR`).
    FullResourceDescriptor = 9,

    /// A resource requirements list (`REG_RESOURCE_REQUIREMENTS_LIST`).
    ResourceRequirementsList = 10,

    /// A little-endian 64-bit integer (`REG_QWORD`).
    Qword = 11,
}

impl ValueType {
    /// Converts a raw type tag into a known value type.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::None,
            1 => Self::String,
            2 => Self::ExpandString,
            3 => Self::Binary,
            4 => Self::Dword,
            5 => Self::DwordBigEndian,
            6 => Self::Link,
            7 => Self::MultiString,
            8 => Self::ResourceList,
            9 => Self::FullResourceDescriptor,
            10 => Self::ResourceRequirementsList,
            11 => Self::Qword,
            _ => return None,
        })
    }
}

impl From<ValueType> for u32 {
    fn from(value: ValueType) -> Self {
        value as u32
    }
}

/// Input accepted by [`encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueData<'a> {
    /// Text for string types.
    String(&'a str),

    /// A 32-bit integer.
    Dword(u32),
}

/// Encodes a value into its on-disk representation.
///
/// Strings are encoded as UTF-16LE followed by a terminating NUL code unit.
/// 32-bit integers are encoded as 4 little-endian bytes. Every other type
/// fails with [`HiveError::UnsupportedValueType`].
pub fn encode(value_type: ValueType, data: ValueData<'_>) -> Result<Vec<u8>, HiveError> {
    match (value_type, data) {
        (ValueType::String | ValueType::ExpandString, ValueData::String(text)) => Ok(text
            .encode_utf16()
            .chain([0])
            .flat_map(u16::to_le_bytes)
            .collect()),
        (ValueType::Dword, ValueData::Dword(value)) => Ok(value.to_le_bytes().to_vec()),
        (ValueType::String | ValueType::ExpandString | ValueType::Dword, _) => {
            Err(HiveError::InvalidValueData(value_type))
        }
        (other, _) => Err(HiveError::UnsupportedValueType(other)),
    }
}

/// Decodes UTF-16LE string data, stopping at the first NUL.
pub fn decode_string(data: &[u8]) -> String {
    let units = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect::<Vec<_>>();

    String::from_utf16_lossy(&units)
}

/// A registry value as stored under a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryValue {
    /// The value name. The default value has an empty name.
    pub name: String,

    /// The raw type tag.
    pub value_type: u32,

    /// The raw data.
    pub data: Vec<u8>,
}

impl RegistryValue {
    /// Creates a value by encoding `data` as `value_type`.
    pub fn encode(
        name: impl Into<String>,
        value_type: ValueType,
        data: ValueData<'_>,
    ) -> Result<Self, HiveError> {
        Ok(Self {
            name: name.into(),
            value_type: value_type.into(),
            data: encode(value_type, data)?,
        })
    }

    /// Returns the value type, if it is a known one.
    pub fn kind(&self) -> Option<ValueType> {
        ValueType::from_raw(self.value_type)
    }

    /// Returns the data as a string, for string-like types.
    pub fn as_string(&self) -> Option<String> {
        match self.kind()? {
            ValueType::String | ValueType::ExpandString | ValueType::Link => {
                Some(decode_string(&self.data))
            }
            _ => None,
        }
    }

    /// Returns the data as a 32-bit integer, for dword types.
    pub fn as_dword(&self) -> Option<u32> {
        let bytes = <[u8; 4]>::try_from(self.data.get(..4)?).ok()?;

        match self.kind()? {
            ValueType::Dword => Some(u32::from_le_bytes(bytes)),
            ValueType::DwordBigEndian => Some(u32::from_be_bytes(bytes)),
            _ => None,
        }
    }
}
