//! Portable executable image representation.
//!
//! See <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format> for more information.

use alloc::{borrow::Cow, format, string::ToString, vec::Vec};

use ahash::RandomState;
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use zerocopy::IntoBytes;

use crate::{constants::*, errors::*, resource::*, types::*, util::*};

/// Image data directory type enumeration, in data directory table order.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum DataDirectoryType {
    ExportTable,
    ImportTable,
    ResourceTable,
    ExceptionTable,
    CertificateTable,
    BaseRelocationTable,
    Debug,
    Architecture,
    GlobalPtr,
    TLSTable,
    LoadConfigTable,
    BoundImport,
    IAT,
    DelayImportDescriptor,
    CLRRuntimeHeader,
    Reserved,
}
impl DataDirectoryType {
    pub const ALL: [DataDirectoryType; 16] = {
        use DataDirectoryType::*;
        [
            ExportTable,
            ImportTable,
            ResourceTable,
            ExceptionTable,
            CertificateTable,
            BaseRelocationTable,
            Debug,
            Architecture,
            GlobalPtr,
            TLSTable,
            LoadConfigTable,
            BoundImport,
            IAT,
            DelayImportDescriptor,
            CLRRuntimeHeader,
            Reserved,
        ]
    };
}

/// Where the rebuilt resource directory goes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Placement {
    /// Overwrite the existing section, which has room for up to `capacity` bytes.
    InPlace { index: usize, capacity: u32 },
    /// Grow or shrink the existing section, which is the last one in the file and in memory.
    Extend { index: usize },
    /// Add a new section after all others, retiring the previous resource section if it is unshared.
    Append { retired: Option<usize> },
}

/// Portable executable image representation.
///
/// This struct is the main entry point for parsing a portable executable image
/// and placing an updated resource directory into it.
#[derive(Debug, Clone)]
pub struct Image<'a> {
    pub(crate) image: Cow<'a, [u8]>,

    pub(crate) coff_header:      CoffHeader,
    pub(crate) standard_header:  StandardHeader,
    pub(crate) windows_header:   GenericWindowsHeader,
    pub(crate) data_directories: IndexMap<DataDirectoryType, ImageDataDirectory, RandomState>,
    pub(crate) section_table:    Vec<SectionHeader>,

    pub(crate) resource_directory: Option<ResourceDirectory>,

    coff_header_offset:      usize,
    standard_header_offset:  usize,
    windows_header_offset:   usize,
    data_directories_offset: usize,
}

impl<'a> Image<'a> {
    /// Parse a portable executable image from a byte slice.
    ///
    /// # Returns
    /// Returns the `Image`, or an error if the bytes are not a portable executable image,
    /// are truncated or contain a corrupt resource directory.
    pub fn parse<R: Into<Cow<'a, [u8]>>>(image: R) -> Result<Self, LoadError> {
        let image = image.into();

        let dos_header = read::<DosHeader>(&image)
            .map_err(|_| LoadError::InvalidHeader("missing dos header".into()))?;
        if dos_header.magic != PE_DOS_MAGIC {
            return Err(LoadError::InvalidHeader("no dos magic".into()));
        }
        let pe_offset = dos_header.pe_offset as usize;
        debug!("pe_offset: {:#x?}", pe_offset);

        let pe_signature = read_at::<u32>(&image, pe_offset)
            .map_err(|_| LoadError::InvalidHeader("pe header offset outside of image".into()))?;
        if pe_signature != PE_NT_SIGNATURE {
            return Err(LoadError::InvalidHeader("no pe signature".into()));
        }

        let coff_header_offset = pe_offset + 4;
        let coff_header = read_at::<CoffHeader>(&image, coff_header_offset)?;
        debug!("{:#x?}: {:#x?}", coff_header_offset, coff_header);

        let standard_header_offset = coff_header_offset + 20;
        let standard_header = read_at::<StandardHeader>(&image, standard_header_offset)?;
        debug!("{:#x?}: {:#x?}", standard_header_offset, standard_header);

        let optional_header_size = coff_header.size_of_optional_header as usize;
        let magic = standard_header.magic;
        let (windows_header_offset, data_directories_offset, windows_header) =
            match magic {
                PE_32_MAGIC if optional_header_size >= 96 => {
                    let offset = standard_header_offset + 28;
                    let header = read_at::<WindowsHeader<u32>>(&image, offset)?;
                    (offset, standard_header_offset + 96, GenericWindowsHeader::WindowsHeader32(header))
                }
                PE_64_MAGIC if optional_header_size >= 112 => {
                    let offset = standard_header_offset + 24;
                    let header = read_at::<WindowsHeader<u64>>(&image, offset)?;
                    (offset, standard_header_offset + 112, GenericWindowsHeader::WindowsHeader64(header))
                }
                magic => {
                    return Err(LoadError::InvalidHeader(format!(
                        "invalid optional header (magic {:#x}, size {:#x})",
                        magic,
                        optional_header_size
                    )));
                }
            };
        debug!("{:#x?}: {:#x?}", windows_header_offset, windows_header);

        // the count is bounded by the table itself and the declared optional header size
        let section_table_offset = standard_header_offset + optional_header_size;
        let available = (section_table_offset - data_directories_offset) / 8;
        let declared = windows_header.number_of_rva_and_sizes() as usize;
        let count = declared.min(available).min(DataDirectoryType::ALL.len());
        if count < declared {
            warn!("{} data directories declared, only {} present", declared, count);
        }
        let mut data_directories = IndexMap::with_hasher(RandomState::new());
        for (index, &type_) in DataDirectoryType::ALL[..count].iter().enumerate() {
            let offset = data_directories_offset + index * 8;
            let directory = read_at::<ImageDataDirectory>(&image, offset)?;
            debug!("{:#x?}: {:?}: {:#x?}", offset, type_, directory);
            data_directories.insert(type_, directory);
        }

        let mut section_table = Vec::with_capacity(coff_header.number_of_sections as usize);
        for index in 0..coff_header.number_of_sections as usize {
            let offset = section_table_offset + index * 40;
            let section = read_at::<SectionHeader>(&image, offset)?;
            debug!(
                "{:#x?}: {}: {:#x?}",
                offset,
                section.name().unwrap_or("?".to_string()),
                section
            );
            section_table.push(section);
        }

        let mut result = Self {
            image,
            coff_header,
            standard_header,
            windows_header,
            data_directories,
            section_table,
            resource_directory: None,
            coff_header_offset,
            standard_header_offset,
            windows_header_offset,
            data_directories_offset,
        };
        result.resource_directory = result.parse_resource_directory()?;
        Ok(result)
    }

    #[cfg(feature = "std")]
    /// Parse a portable executable image from a file.
    ///
    /// # Returns
    /// Returns the `Image`, or an error if the file could not be read or is not a valid portable executable image.
    pub fn parse_file<P: AsRef<std::path::Path>>(path: P) -> Result<Image<'static>, LoadError> {
        let data = std::fs::read(path)?;
        Image::parse(data)
    }

    fn parse_resource_directory(&self) -> Result<Option<ResourceDirectory>, LoadError> {
        let Some(index) = self.resource_section_index() else {
            debug!("image has no resource section");
            return Ok(None);
        };
        let section = self.section_table[index];
        let virtual_address = match self.resource_data_directory() {
            Some(directory) => directory.virtual_address,
            None => {
                warn!("resource section found by name without data directory entry");
                section.virtual_address
            }
        };
        let base_address = section.pointer_to_raw_data as u64
            + (virtual_address - section.virtual_address) as u64;
        if base_address >= self.image.len() as u64 {
            return Err(LoadError::InvalidResources(format!(
                "resource directory at {:#x} outside of image",
                base_address
            )));
        }
        debug!(
            "found resource directory in {} section at {:#x?}",
            section.name().unwrap_or("?".to_string()),
            base_address
        );
        ResourceDirectory::parse_with_sections(
            &self.image,
            base_address as u32,
            virtual_address,
            &self.section_table,
        )
        .map(Some)
    }

    fn resource_data_directory(&self) -> Option<ImageDataDirectory> {
        self.data_directories
            .get(&DataDirectoryType::ResourceTable)
            .filter(|directory| directory.virtual_address != 0 && directory.size != 0)
            .copied()
    }

    /// Returns the index of the section holding the resource directory.
    /// The section is found through the resource data directory, or by its name if the directory entry is missing.
    pub fn resource_section_index(&self) -> Option<usize> {
        match self.resource_data_directory() {
            Some(directory) => self
                .section_table
                .iter()
                .position(|section| section.contains_rva(directory.virtual_address)),
            None => self
                .section_table
                .iter()
                .position(|section| section.name().as_deref() == Some(RESOURCE_SECTION_NAME)),
        }
    }

    /// Returns the section header of the section holding the resource directory.
    pub fn locate_resource_section(&self) -> Option<&SectionHeader> {
        self.resource_section_index().map(|index| &self.section_table[index])
    }

    /// End of the last section's raw data, or of the headers if there are no sections.
    fn sections_end(&self) -> u64 {
        self.section_table
            .iter()
            .filter(|section| section.size_of_raw_data > 0)
            .map(SectionHeader::raw_end)
            .max()
            .unwrap_or(0)
            .max(self.windows_header.size_of_headers() as u64)
    }

    fn virtual_end(sections: &[SectionHeader], size_of_headers: u32) -> u64 {
        sections
            .iter()
            .map(SectionHeader::virtual_end)
            .max()
            .unwrap_or(0)
            .max(size_of_headers as u64)
    }

    fn plan_placement(&self, size: u32) -> Placement {
        let Some(index) = self.resource_section_index() else {
            debug!("no resource section, appending a new one");
            return Placement::Append { retired: None };
        };
        let section = self.section_table[index];

        let shared = self
            .data_directories
            .iter()
            .filter(|(type_, directory)| {
                !matches!(
                    type_,
                    DataDirectoryType::ResourceTable | DataDirectoryType::CertificateTable
                ) && directory.size > 0
                    && section.contains_rva(directory.virtual_address)
            })
            .map(|(type_, _)| *type_)
            .collect::<Vec<_>>();
        let offset_in_section = self
            .resource_data_directory()
            .is_some_and(|directory| directory.virtual_address != section.virtual_address);
        if !shared.is_empty() || offset_in_section {
            info!("resource section also used by data directories {:?}", shared);
            warn!("resource section shared with other data can indicate a packed executable, keeping it intact");
            return Placement::Append { retired: None };
        }

        let others = || {
            self.section_table
                .iter()
                .enumerate()
                .filter(move |(other, _)| *other != index)
                .map(|(_, other)| other)
        };
        let next_raw = others()
            .filter(|other| {
                other.size_of_raw_data > 0 && other.pointer_to_raw_data > section.pointer_to_raw_data
            })
            .map(|other| other.pointer_to_raw_data)
            .min();
        let next_virtual = others()
            .filter(|other| other.virtual_address > section.virtual_address)
            .map(|other| other.virtual_address)
            .min();

        let raw_capacity = match next_raw {
            Some(next) => aligned_to(section.size_of_raw_data, self.windows_header.file_alignment())
                .min(next - section.pointer_to_raw_data),
            None => section.size_of_raw_data,
        };
        let virtual_capacity = next_virtual.map(|next| next - section.virtual_address);
        debug!(
            "resource section capacity: {:#x?} raw, {:#x?} virtual, {:#x?} required",
            raw_capacity, virtual_capacity, size
        );

        if size <= raw_capacity && virtual_capacity.map_or(true, |capacity| size <= capacity) {
            Placement::InPlace {
                index,
                capacity: raw_capacity,
            }
        } else if next_raw.is_none() && next_virtual.is_none() {
            Placement::Extend { index }
        } else {
            Placement::Append {
                retired: Some(index),
            }
        }
    }

    /// Set the resource directory of the image.
    ///
    /// The new layout is computed completely before any of the image is changed:
    /// - If the directory fits into the current resource section, it is overwritten in place.
    /// - If the resource section is the last section, it is resized and the data following it is moved.
    /// - Otherwise a new resource section is appended after all other sections. The previous resource
    ///   section keeps its address range but is zero-filled and renamed, unless other data directories
    ///   point into it, in which case it is kept intact.
    ///
    /// Other sections are never moved. Data after the last section is kept, and a certificate table in
    /// it has its offset updated. The checksum is reset.
    ///
    /// An empty directory on an image without resource section leaves the image untouched.
    ///
    /// # Returns
    /// Returns the previous resource directory, or an error if the new directory is too large,
    /// a section points outside the image or there is not enough space in the header. The image is unchanged in that case.
    ///
    /// # Safety
    /// Applications might reference resources that do not exist in the new directory.
    /// Signed images lose their signature validity.
    pub fn set_resource_directory(
        &mut self, mut resources: ResourceDirectory,
    ) -> Result<Option<ResourceDirectory>, CommitError> {
        if resources.is_empty() && self.resource_section_index().is_none() {
            debug!("no resources to add to an image without resource section");
            return Ok(None);
        }
        let size = resources.size();
        if size > u32::MAX as u64 {
            error!("resource directory of {:#x} bytes exceeds 32 bits", size);
            return Err(CommitError::ResourceSectionTooLarge(size));
        }
        let size = size as u32;
        let longest_name = resources.longest_name();
        if longest_name > u16::MAX as usize {
            error!("resource name of {} characters exceeds 16 bits", longest_name);
            return Err(CommitError::ResourceNameTooLong(longest_name));
        }
        let file_alignment = self.windows_header.file_alignment();
        let section_alignment = self.windows_header.section_alignment();
        let image_size = self.image.len() as u64;

        for section in self.section_table.iter() {
            if section.size_of_raw_data > 0 && section.raw_end() > image_size {
                error!(
                    "section {} ends at {:#x} outside of image",
                    section.name().unwrap_or("?".to_string()),
                    section.raw_end()
                );
                return Err(CommitError::InvalidSectionRange(section.raw_end(), image_size));
            }
        }

        let mut coff_header = self.coff_header;
        let mut standard_header = self.standard_header;
        let mut windows_header = self.windows_header;
        let mut data_directories = self.data_directories.clone();
        let mut section_table = self.section_table.clone();

        let mut added_directories = 0;
        for &type_ in DataDirectoryType::ALL[..=DataDirectoryType::ResourceTable as usize].iter() {
            if !data_directories.contains_key(&type_) {
                debug!("adding missing data directory {:?}", type_);
                data_directories.insert(type_, ImageDataDirectory::default());
                added_directories += 1;
            }
        }

        let placement = self.plan_placement(size);
        debug!("resource placement: {:?}", placement);

        let sections_end = self.sections_end().min(image_size) as usize;
        let (virtual_address, mut body, overlay_start, overlay_shift) = match placement {
            Placement::InPlace { index, capacity } => {
                let section = &mut section_table[index];
                let virtual_address = section.virtual_address;
                let start = section.pointer_to_raw_data as usize;
                let raw_size = section
                    .size_of_raw_data
                    .max(aligned_to(size, file_alignment).min(capacity));
                let mut data = resources.build(virtual_address);
                data.resize(raw_size as usize, 0);

                let mut body = self.image.to_vec();
                body[start..start + raw_size as usize].copy_from_slice(&data);
                section.size_of_raw_data = raw_size;
                section.virtual_size = size;
                (virtual_address, body, sections_end, 0i64)
            }
            Placement::Extend { index } => {
                let section = &mut section_table[index];
                let virtual_address = section.virtual_address;
                let start = section.pointer_to_raw_data as usize;
                let old_end = section.raw_end() as usize;
                let raw_size = aligned_to(size, file_alignment);
                if start as u64 + raw_size as u64 > u32::MAX as u64
                    || virtual_address as u64 + raw_size as u64 > u32::MAX as u64
                {
                    error!("extended resource section exceeds 32 bits");
                    return Err(CommitError::ResourceSectionTooLarge(size as u64));
                }
                let mut data = resources.build(virtual_address);
                data.resize(raw_size as usize, 0);

                let mut body = Vec::with_capacity(start + data.len() + self.image.len() - old_end);
                body.extend_from_slice(&self.image[..start]);
                body.extend_from_slice(&data);
                body.extend_from_slice(&self.image[old_end..]);

                let shift = raw_size as i64 - section.size_of_raw_data as i64;
                standard_header.size_of_initialized_data =
                    (standard_header.size_of_initialized_data as i64 + shift).clamp(0, u32::MAX as i64) as u32;
                section.size_of_raw_data = raw_size;
                section.virtual_size = size;
                (virtual_address, body, old_end, shift)
            }
            Placement::Append { retired } => {
                let virtual_address = aligned_to(
                    Self::virtual_end(&self.section_table, windows_header.size_of_headers()),
                    section_alignment as u64,
                );
                let start = aligned_to(self.sections_end(), file_alignment as u64);
                let raw_size = aligned_to(size, file_alignment);
                if virtual_address + size as u64 > u32::MAX as u64
                    || start + raw_size as u64 > u32::MAX as u64
                {
                    error!("appended resource section exceeds 32 bits");
                    return Err(CommitError::ResourceSectionTooLarge(size as u64));
                }
                let virtual_address = virtual_address as u32;
                let mut data = resources.build(virtual_address);
                data.resize(raw_size as usize, 0);

                let mut body = Vec::with_capacity(start as usize + data.len() + self.image.len() - sections_end);
                body.extend_from_slice(&self.image[..sections_end]);
                body.resize(start as usize, 0);
                body.extend_from_slice(&data);
                body.extend_from_slice(&self.image[sections_end..]);

                if let Some(index) = retired {
                    let section = &mut section_table[index];
                    debug!(
                        "retiring previous resource section {}",
                        section.name().unwrap_or("?".to_string())
                    );
                    let range = section.pointer_to_raw_data as usize..section.raw_end() as usize;
                    body[range].fill(0);
                    section.set_name(RETIRED_RESOURCE_SECTION_NAME);
                }

                let mut section = SectionHeader {
                    virtual_size: size,
                    virtual_address,
                    size_of_raw_data: raw_size,
                    pointer_to_raw_data: start as u32,
                    characteristics: IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
                    ..SectionHeader::default()
                };
                section.set_name(RESOURCE_SECTION_NAME);
                section_table.push(section);
                coff_header.number_of_sections += 1;
                standard_header.size_of_initialized_data =
                    standard_header.size_of_initialized_data.saturating_add(raw_size);

                let shift = (start + raw_size as u64) as i64 - sections_end as i64;
                (virtual_address, body, sections_end, shift)
            }
        };

        if let Some(resource_directory) = data_directories.get_mut(&DataDirectoryType::ResourceTable) {
            resource_directory.virtual_address = virtual_address;
            resource_directory.size = size;
        }
        if let Some(certificates) = data_directories.get_mut(&DataDirectoryType::CertificateTable) {
            // the certificate table address is a file offset
            let offset = certificates.virtual_address;
            if certificates.size > 0 && overlay_shift != 0 && offset as usize >= overlay_start {
                warn!("moving certificate table, the image signature is no longer valid");
                certificates.virtual_address = (offset as i64 + overlay_shift) as u32;
            }
        }

        let size_of_image = aligned_to(
            Self::virtual_end(&section_table, windows_header.size_of_headers()),
            section_alignment as u64,
        );
        windows_header.update_layout(size_of_image as u32, data_directories.len() as u32);
        coff_header.size_of_optional_header += added_directories * 8;

        // data directories, the rest of the optional header and the section table move together
        let old_section_table_offset =
            self.standard_header_offset + self.coff_header.size_of_optional_header as usize;
        let old_headers_end = old_section_table_offset + self.section_table.len() * 40;
        let mut tail = Vec::new();
        for directory in data_directories.values() {
            tail.extend_from_slice(directory.as_bytes());
        }
        tail.extend_from_slice(
            &self.image[self.data_directories_offset + self.data_directories.len() * 8
                ..old_section_table_offset],
        );
        for section in section_table.iter() {
            tail.extend_from_slice(section.as_bytes());
        }
        let headers_end = self.data_directories_offset + tail.len();

        let first_section_start = self
            .section_table
            .iter()
            .filter(|section| section.size_of_raw_data > 0)
            .map(|section| section.pointer_to_raw_data as usize)
            .min()
            .unwrap_or(body.len());
        let header_limit = first_section_start
            .min(windows_header.size_of_headers() as usize)
            .min(body.len());
        debug!(
            "header space: {:#x?} used, {:#x?} available",
            headers_end, header_limit
        );
        if headers_end > header_limit {
            error!(
                "not enough space in header for the section table ({:#x} > {:#x})",
                headers_end, header_limit
            );
            return Err(CommitError::NotEnoughSpaceInHeader);
        }
        if headers_end > old_headers_end && body[old_headers_end..headers_end].iter().any(|&b| b != 0) {
            error!("header space after the section table is in use");
            return Err(CommitError::NotEnoughSpaceInHeader);
        }

        let coff_range = self.coff_header_offset..self.coff_header_offset + 20;
        body[coff_range].copy_from_slice(coff_header.as_bytes());
        let standard_range = self.standard_header_offset..self.standard_header_offset + 24;
        body[standard_range].copy_from_slice(standard_header.as_bytes());
        let windows_bytes = windows_header.as_bytes();
        body[self.windows_header_offset..self.windows_header_offset + windows_bytes.len()]
            .copy_from_slice(windows_bytes);
        body[self.data_directories_offset..headers_end].copy_from_slice(&tail);

        self.image = body.into();
        self.coff_header = coff_header;
        self.standard_header = standard_header;
        self.windows_header = windows_header;
        self.data_directories = data_directories;
        self.section_table = section_table;

        resources.virtual_address = virtual_address;
        Ok(self.resource_directory.replace(resources))
    }

    /// Returns the current resource directory or `None` if the image does not contain a resource directory.
    pub fn resource_directory(&self) -> Option<&ResourceDirectory> {
        self.resource_directory.as_ref()
    }

    /// Returns the raw image data with all changes applied.
    pub fn data(&self) -> &[u8] { &self.image }

    /// Returns the parsed coff header.
    pub fn coff_header(&self) -> &CoffHeader { &self.coff_header }

    /// Returns the parsed standard header.
    pub fn standard_header(&self) -> &StandardHeader { &self.standard_header }

    /// Returns the parsed windows header.
    pub fn windows_header(&self) -> &GenericWindowsHeader { &self.windows_header }

    /// Returns the data directory for the requested header.
    pub fn data_directory(&self, directory: DataDirectoryType) -> Option<&ImageDataDirectory> {
        self.data_directories.get(&directory)
    }

    /// Returns all section headers in the image.
    pub fn section_table(&self) -> &[SectionHeader] { &self.section_table }

    /// Returns the `Image` with all data cloned into owned memory.
    pub fn cloned(&self) -> Image<'static> {
        Image {
            image:                   self.image.clone().into_owned().into(),
            coff_header:             self.coff_header,
            standard_header:         self.standard_header,
            windows_header:          self.windows_header,
            data_directories:        self.data_directories.clone(),
            section_table:           self.section_table.clone(),
            resource_directory:      self.resource_directory.clone(),
            coff_header_offset:      self.coff_header_offset,
            standard_header_offset:  self.standard_header_offset,
            windows_header_offset:   self.windows_header_offset,
            data_directories_offset: self.data_directories_offset,
        }
    }
}

/// Serialize the resource directory into a copy of the image.
///
/// # Returns
/// Returns the bytes of the updated image. The given image is left unchanged.
pub fn commit(image: &Image, resources: &ResourceDirectory) -> Result<Vec<u8>, CommitError> {
    let mut image = image.cloned();
    image.set_resource_directory(resources.clone())?;
    Ok(image.image.into_owned())
}

/// Write the data to the path by writing a temporary file in the same directory and renaming it over the target.
/// The target is left untouched if any step fails.
#[cfg(feature = "std")]
pub fn write_atomic<P: AsRef<std::path::Path>>(path: P, data: &[u8]) -> Result<(), CommitError> {
    use std::io::Write;

    let path = path.as_ref();
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => std::path::Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(directory)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    if let Ok(metadata) = std::fs::metadata(path) {
        file.as_file().set_permissions(metadata.permissions())?;
    }
    file.persist(path).map_err(|error| CommitError::WriteFailed(error.error))?;
    debug!("wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}
