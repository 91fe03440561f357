//! On-disk structures of the `regf` hive format.
//!
//! All integers are little-endian. Cell offsets are relative to the start
//! of the first hive bin, which immediately follows the base block.
//!
//! # References
//!
//! - [Windows NT Registry File (REGF) format specification](https://github.com/libyal/libregf/blob/main/documentation/Windows%20NT%20Registry%20File%20(REGF)%20format.asciidoc)

#![allow(dead_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout,
    byteorder::little_endian::{U16, U32, U64},
};

use crate::store::upcase;

/// Size of the base block. Hive bins start right after it.
pub const BASE_BLOCK_SIZE: usize = 4096;

/// Hive bins are allocated in multiples of this size.
pub const HBIN_ALIGNMENT: usize = 4096;

/// Size of the hive bin header.
pub const HBIN_HEADER_SIZE: usize = 32;

/// Cells are allocated in multiples of this size.
pub const CELL_ALIGNMENT: usize = 8;

/// Size of the cell size field preceding every cell.
pub const CELL_SIZE_FIELD: usize = 4;

/// Marks an absent cell reference.
pub const INVALID_OFFSET: u32 = 0xFFFF_FFFF;

/// Largest value data stored in a single cell.
pub const MAX_CELL_DATA: usize = 16344;

/// Set in [`VkHeader::data_size`] when the data lives in `data_offset`.
pub const DATA_INLINE: u32 = 0x8000_0000;

/// Security descriptor written into freshly created hives: a self-relative
/// descriptor with no owner, group or ACLs.
pub const EMPTY_SECURITY_DESCRIPTOR: [u8; 20] = [
    1, 0, 0x04, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Base block signature.
pub const REGF_SIGNATURE: [u8; 4] = *b"regf";

/// Hive bin signature.
pub const HBIN_SIGNATURE: [u8; 4] = *b"hbin";

/// Key node signature.
pub const NK_SIGNATURE: [u8; 2] = *b"nk";

/// Value key signature.
pub const VK_SIGNATURE: [u8; 2] = *b"vk";

/// Security key signature.
pub const SK_SIGNATURE: [u8; 2] = *b"sk";

/// Big data signature.
pub const DB_SIGNATURE: [u8; 2] = *b"db";

/// Fast leaf signature.
pub const LF_SIGNATURE: [u8; 2] = *b"lf";

/// Hash leaf signature.
pub const LH_SIGNATURE: [u8; 2] = *b"lh";

/// Index leaf signature.
pub const LI_SIGNATURE: [u8; 2] = *b"li";

/// Index root signature.
pub const RI_SIGNATURE: [u8; 2] = *b"ri";

/// The base block at the start of every hive file.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct BaseBlock {
    pub signature: [u8; 4],
    pub primary_sequence: U32,
    pub secondary_sequence: U32,
    pub last_written: U64,
    pub major_version: U32,
    pub minor_version: U32,
    pub file_type: U32,
    pub file_format: U32,
    pub root_cell: U32,
    pub hive_bins_size: U32,
    pub clustering_factor: U32,
    pub file_name: [u8; 64],
    pub reserved1: [u8; 396],
    pub checksum: U32,
    pub reserved2: [u8; 3576],
    pub boot_type: U32,
    pub boot_recover: U32,
}

impl BaseBlock {
    /// Computes the checksum over the first 508 bytes.
    pub fn compute_checksum(&self) -> u32 {
        let checksum = self.as_bytes()[..508]
            .chunks_exact(4)
            .map(|dword| u32::from_le_bytes([dword[0], dword[1], dword[2], dword[3]]))
            .fold(0, |acc, dword| acc ^ dword);

        match checksum {
            0 => 1,
            0xFFFF_FFFF => 0xFFFF_FFFE,
            checksum => checksum,
        }
    }
}

/// The header of a hive bin.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct HbinHeader {
    pub signature: [u8; 4],
    pub offset: U32,
    pub size: U32,
    pub reserved: [u8; 8],
    pub timestamp: U64,
    pub spare: U32,
}

bitflags! {
    /// Key node flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NkFlags: u16 {
        const VOLATILE = 0x0001;
        const HIVE_EXIT = 0x0002;
        const HIVE_ENTRY = 0x0004;
        const NO_DELETE = 0x0008;
        const SYM_LINK = 0x0010;
        const COMP_NAME = 0x0020;
    }
}

bitflags! {
    /// Value key flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VkFlags: u16 {
        const COMP_NAME = 0x0001;
    }
}

/// A key node. The key name follows the header.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NkHeader {
    pub signature: [u8; 2],
    pub flags: U16,
    pub last_written: U64,
    pub access_bits: U32,
    pub parent: U32,
    pub subkey_count: U32,
    pub volatile_subkey_count: U32,
    pub subkeys_list: U32,
    pub volatile_subkeys_list: U32,
    pub value_count: U32,
    pub values_list: U32,
    pub security: U32,
    pub class_name: U32,
    pub max_subkey_name: U32,
    pub max_subkey_class: U32,
    pub max_value_name: U32,
    pub max_value_data: U32,
    pub work_var: U32,
    pub name_length: U16,
    pub class_length: U16,
}

impl NkHeader {
    /// Returns the key node flags.
    pub fn flags(&self) -> NkFlags {
        NkFlags::from_bits_retain(self.flags.get())
    }
}

/// A value key. The value name follows the header.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct VkHeader {
    pub signature: [u8; 2],
    pub name_length: U16,
    pub data_size: U32,
    pub data_offset: U32,
    pub data_type: U32,
    pub flags: U16,
    pub spare: U16,
}

impl VkHeader {
    /// Returns the value key flags.
    pub fn flags(&self) -> VkFlags {
        VkFlags::from_bits_retain(self.flags.get())
    }

    /// Returns whether the data is stored in the `data_offset` field.
    pub fn is_inline(&self) -> bool {
        self.data_size.get() & DATA_INLINE != 0
    }

    /// Returns the length of the data in bytes.
    pub fn data_len(&self) -> usize {
        (self.data_size.get() & !DATA_INLINE) as usize
    }
}

/// A security key. The security descriptor follows the header.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SkHeader {
    pub signature: [u8; 2],
    pub reserved: U16,
    pub flink: U32,
    pub blink: U32,
    pub refcount: U32,
    pub descriptor_size: U32,
}

/// A big data record, used for value data larger than a single cell.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct DbHeader {
    pub signature: [u8; 2],
    pub segment_count: U16,
    pub segment_list: U32,
}

/// The header of a subkey list. The entries follow the header.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ListHeader {
    pub signature: [u8; 2],
    pub count: U16,
}

/// An entry of an `lf` or `lh` subkey list.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct HashEntry {
    pub offset: U32,
    pub hash: U32,
}

/// Encodes a key or value name.
///
/// Returns the encoded bytes and whether the name was stored compressed.
/// Names consisting only of Latin-1 characters are stored one byte per
/// character, every other name is stored as UTF-16LE.
pub fn encode_name(name: &str) -> (Vec<u8>, bool) {
    if name.chars().all(|c| (c as u32) < 0x100) {
        (name.chars().map(|c| c as u8).collect(), true)
    }
    else {
        (name.encode_utf16().flat_map(u16::to_le_bytes).collect(), false)
    }
}

/// Decodes a key or value name.
pub fn decode_name(bytes: &[u8], compressed: bool) -> String {
    if compressed {
        bytes.iter().map(|&b| char::from(b)).collect()
    }
    else {
        let units = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();

        String::from_utf16_lossy(&units)
    }
}

/// Returns the length of a name in bytes as counted by the `max_*_name`
/// fields of a key node.
pub fn name_length_utf16(name: &str) -> u32 {
    (name.encode_utf16().count() * 2) as u32
}

/// Computes the hash stored in `lh` subkey lists.
pub fn name_hash(name: &str) -> u32 {
    let mut buffer = [0u16; 2];

    name.chars()
        .map(upcase)
        .flat_map(|c| c.encode_utf16(&mut buffer).to_vec())
        .fold(0u32, |hash, unit| {
            hash.wrapping_mul(37).wrapping_add(u32::from(unit))
        })
}

/// Returns the current time as a Windows `FILETIME`.
pub fn filetime_now() -> u64 {
    const UNIX_EPOCH_AS_FILETIME: u64 = 116_444_736_000_000_000;

    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    UNIX_EPOCH_AS_FILETIME + since_epoch.as_nanos() as u64 / 100
}

/// Rounds `size` up to the next multiple of `alignment`.
pub fn align_up(size: usize, alignment: usize) -> usize {
    size.div_ceil(alignment) * alignment
}
