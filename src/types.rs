//! Portable executable data types.
//!
//! These types are a one-to-one mapping of the data described in <https://docs.microsoft.com/en-us/windows/win32/debug/pe-format>,
//! <https://learn.microsoft.com/en-us/windows/win32/menurc/resource-file-formats> and
//! <https://learn.microsoft.com/en-us/windows/win32/api/verrsrc/ns-verrsrc-vs_fixedfileinfo>.

use alloc::string::{String, ToString};
use core::{mem, slice};

use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::constants::*;

#[repr(C, packed(1))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct VersionU8 {
    pub major: u8,
    pub minor: u8,
}
#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct VersionU16 {
    pub major: u16,
    pub minor: u16,
}
/// Version split into its most and least significant double words, as stored in [`FixedFileInfo`].
#[repr(C, packed(4))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct VersionU32 {
    pub major: u32,
    pub minor: u32,
}
impl VersionU32 {
    /// Pack a `a.b.c.d` quad.
    pub const fn from_quad(quad: [u16; 4]) -> Self {
        Self {
            major: (quad[0] as u32) << 16 | quad[1] as u32,
            minor: (quad[2] as u32) << 16 | quad[3] as u32,
        }
    }

    /// Unpack into a `a.b.c.d` quad.
    pub const fn quad(&self) -> [u16; 4] {
        let (major, minor) = (self.major, self.minor);
        [(major >> 16) as u16, major as u16, (minor >> 16) as u16, minor as u16]
    }
}

#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct DosHeader {
    pub magic:     u16,
    pub _unused:   [u16; 29],
    pub pe_offset: u32,
}

#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct CoffHeader {
    pub machine:                 u16,
    pub number_of_sections:      u16,
    pub time_date_stamp:         u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols:       u32,
    pub size_of_optional_header: u16,
    pub characteristics:         u16,
}
#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct StandardHeader {
    pub magic:                      u16,
    pub linker_version:             VersionU8,
    pub size_of_code:               u32,
    pub size_of_initialized_data:   u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point:     u32,
    pub base_of_code:               u32,
}
#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, Default)]
pub struct WindowsHeader<UXX> {
    pub image_base:               UXX,
    pub section_alignment:        u32,
    pub file_alignment:           u32,
    pub operating_system_version: VersionU16,
    pub image_version:            VersionU16,
    pub subsystem_version:        VersionU16,
    pub win32_version_value:      u32,
    pub size_of_image:            u32,
    pub size_of_headers:          u32,
    pub check_sum:                u32,
    pub subsystem:                u16,
    pub dll_characteristics:      u16,
    pub size_of_stack_reserve:    UXX,
    pub size_of_stack_commit:     UXX,
    pub size_of_heap_reserve:     UXX,
    pub size_of_heap_commit:      UXX,
    pub loader_flags:             u32,
    pub number_of_rva_and_sizes:  u32,
}
impl<UXX> WindowsHeader<UXX>
where
    UXX: IntoBytes,
{
    pub fn as_bytes(&self) -> &[u8] {
        // zerocopy can't derive IntoBytes for generic structs; both instantiations are free of padding
        unsafe {
            let len = mem::size_of_val(self);
            slice::from_raw_parts(self as *const Self as *const u8, len)
        }
    }
}

/// Windows specific optional header fields of either a PE32 or a PE32+ image.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub enum GenericWindowsHeader {
    WindowsHeader32(WindowsHeader<u32>),
    WindowsHeader64(WindowsHeader<u64>),
}
impl GenericWindowsHeader {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.as_bytes(),
            GenericWindowsHeader::WindowsHeader64(header) => header.as_bytes(),
        }
    }

    pub const fn section_alignment(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.section_alignment,
            GenericWindowsHeader::WindowsHeader64(header) => header.section_alignment,
        }
    }

    pub const fn file_alignment(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.file_alignment,
            GenericWindowsHeader::WindowsHeader64(header) => header.file_alignment,
        }
    }

    pub const fn size_of_image(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.size_of_image,
            GenericWindowsHeader::WindowsHeader64(header) => header.size_of_image,
        }
    }

    pub const fn size_of_headers(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.size_of_headers,
            GenericWindowsHeader::WindowsHeader64(header) => header.size_of_headers,
        }
    }

    pub const fn check_sum(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.check_sum,
            GenericWindowsHeader::WindowsHeader64(header) => header.check_sum,
        }
    }

    pub const fn number_of_rva_and_sizes(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.number_of_rva_and_sizes,
            GenericWindowsHeader::WindowsHeader64(header) => header.number_of_rva_and_sizes,
        }
    }

    /// Update the fields that change when the section layout changes.
    /// The checksum is cleared since it no longer matches the image.
    pub fn update_layout(&mut self, size_of_image: u32, number_of_rva_and_sizes: u32) {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => {
                header.size_of_image = size_of_image;
                header.number_of_rva_and_sizes = number_of_rva_and_sizes;
                header.check_sum = 0;
            }
            GenericWindowsHeader::WindowsHeader64(header) => {
                header.size_of_image = size_of_image;
                header.number_of_rva_and_sizes = number_of_rva_and_sizes;
                header.check_sum = 0;
            }
        }
    }
}

#[repr(C, packed(4))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct ImageDataDirectory {
    pub virtual_address: u32,
    pub size:            u32,
}

#[repr(C, packed(4))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct SectionHeader {
    pub name:                   u64,
    pub virtual_size:           u32,
    pub virtual_address:        u32,
    pub size_of_raw_data:       u32,
    pub pointer_to_raw_data:    u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_linenumbers: u32,
    pub number_of_relocations:  u16,
    pub number_of_linenumbers:  u16,
    pub characteristics:        u32,
}

impl SectionHeader {
    pub fn name(&self) -> Option<String> {
        let name = self.name.to_le_bytes();
        let name = core::str::from_utf8(
            &name[0..name.iter().position(|&c| c == b'\0').unwrap_or(name.len())],
        )
        .ok();
        name.map(|name| name.to_string())
    }

    /// Set the section name, truncated to 8 bytes.
    pub fn set_name(&mut self, name: &str) {
        let mut bytes = [0u8; 8];
        for (target, source) in bytes.iter_mut().zip(name.bytes()) {
            *target = source;
        }
        self.name = u64::from_le_bytes(bytes);
    }

    /// Returns whether the relative virtual address lies inside the section.
    pub fn contains_rva(&self, rva: u32) -> bool {
        let size = self.virtual_size.max(self.size_of_raw_data);
        rva >= self.virtual_address && (rva as u64) < self.virtual_address as u64 + size as u64
    }

    /// Returns the end of the section's raw data in the file.
    pub fn raw_end(&self) -> u64 { self.pointer_to_raw_data as u64 + self.size_of_raw_data as u64 }

    /// Returns the end of the section in the virtual address space.
    pub fn virtual_end(&self) -> u64 {
        self.virtual_address as u64 + self.virtual_size.max(self.size_of_raw_data) as u64
    }
}

#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct ResourceDirectoryTable {
    pub characteristics:        u32,
    pub time_date_stamp:        u32,
    pub version:                VersionU16,
    pub number_of_name_entries: u16,
    pub number_of_id_entries:   u16,
}

#[repr(C, packed(4))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct ResourceDirectoryEntry {
    pub name_offset_or_integer_id:         u32,
    pub data_entry_or_subdirectory_offset: u32,
}

#[repr(C, packed(4))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct ResourceDataEntry {
    pub data_rva: u32,
    pub size:     u32,
    pub codepage: u32,
    pub reserved: u32,
}

/// Header of both icon files and `RT_GROUP_ICON` resources.
#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct IconDirectory {
    pub reserved: u16,
    pub type_:    u16,
    pub count:    u16,
}

/// Image entry of an icon file, pointing to the image data by file offset.
#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct IconFileEntry {
    pub width:       u8,
    pub height:      u8,
    pub color_count: u8,
    pub reserved:    u8,
    pub planes:      u16,
    pub bit_count:   u16,
    pub bytes:       u32,
    pub offset:      u32,
}

/// Image entry of an `RT_GROUP_ICON` resource, pointing to the image data by `RT_ICON` id.
#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct GroupIconEntry {
    pub width:       u8,
    pub height:      u8,
    pub color_count: u8,
    pub reserved:    u8,
    pub planes:      u16,
    pub bit_count:   u16,
    pub bytes:       u32,
    pub id:          u16,
}

#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable)]
pub struct FixedFileInfo {
    pub signature:       u32,
    pub struct_version:  VersionU16,
    pub file_version:    VersionU32,
    pub product_version: VersionU32,
    pub file_flags_mask: u32,
    pub file_flags:      u32,
    pub file_os:         u32,
    pub file_type:       u32,
    pub file_subtype:    u32,
    pub file_date:       u64,
}
impl Default for FixedFileInfo {
    fn default() -> Self {
        Self {
            signature:       VS_FIXEDFILEINFO_SIGNATURE,
            struct_version:  VersionU16 {
                major: VS_FIXEDFILEINFO_VERSION as u16,
                minor: (VS_FIXEDFILEINFO_VERSION >> 16) as u16,
            },
            file_version:    VersionU32::from_quad([1, 0, 0, 0]),
            product_version: VersionU32::from_quad([1, 0, 0, 0]),
            file_flags_mask: VS_FFI_FILEFLAGSMASK,
            file_flags:      0x00000000,
            file_os:         VOS_NT_WINDOWS32,
            file_type:       VFT_APP,
            file_subtype:    0x00000000,
            file_date:       0x00000000,
        }
    }
}

/// Header shared by all nodes of a `VS_VERSIONINFO` block.
#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct VersionHeader {
    pub length:       u16,
    pub value_length: u16,
    pub type_:        u16,
}
