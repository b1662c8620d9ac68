//! Data types for parsing and building the resource section.
//! The resource section contains the resource directory and the resource data.
//! See <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format#the-rsrc-section> for more information.

use alloc::{
    format,
    string::{String, ToString},
    vec::Vec,
};
use core::{borrow::Borrow, cell::RefCell, cmp::Ordering};

use ahash::RandomState;
use debug_ignore::DebugIgnore;
use indexmap::{IndexMap, IndexSet};
use log::{trace, warn};
use zerocopy::IntoBytes;

use crate::{constants::*, errors::*, types::*, util::*};

const HIGH_BIT: u32 = 0x80000000;
// type, name and language levels plus headroom for non-conformant trees
const MAX_DEPTH: usize = 8;

/// Portable executable resource directory.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ResourceDirectory {
    pub(crate) virtual_address: u32,
    pub(crate) root:            ResourceTable,
}
impl ResourceDirectory {
    /// Parse the resource directory from the given image at the given base address.
    /// The virtual address is used to resolve the resource data offsets and has to correspond to the virtual address in the section table header of the source image.
    ///
    /// # Returns
    /// Returns an error if the resource directory at the given address is invalid.
    pub fn parse(image: &[u8], base_address: u32, virtual_address: u32) -> Result<Self, LoadError> {
        Self::parse_with_sections(image, base_address, virtual_address, &[])
    }

    /// Parse the resource directory, resolving data outside the resource section through the given section table.
    pub(crate) fn parse_with_sections(
        image: &[u8], base_address: u32, virtual_address: u32, sections: &[SectionHeader],
    ) -> Result<Self, LoadError> {
        let resolver = Resolver {
            image,
            base_address,
            virtual_address,
            sections,
            visited: RefCell::new(IndexSet::with_hasher(RandomState::new())),
        };
        let root = ResourceTable::parse(&resolver, 0, 0)?;
        Ok(Self {
            virtual_address,
            root,
        })
    }

    /// Returns the virtual address of the resource directory in the source image.
    pub fn virtual_address(&self) -> u32 { self.virtual_address }

    /// Returns the root resource table.
    /// The root resource table contains the top-level resource entries.
    pub fn root(&self) -> &ResourceTable { &self.root }

    /// Returns the mutable root resource table.
    /// The root resource table contains the top-level resource entries.
    pub fn root_mut(&mut self) -> &mut ResourceTable { &mut self.root }

    /// Returns the length of the longest entry name in UTF-16 code units.
    pub fn longest_name(&self) -> usize { self.root.longest_name() }

    /// Returns the size of the resulting resource directory in bytes.
    pub fn size(&self) -> u64 {
        self.root.tables_size()
            + aligned_to(self.root.strings_size(), 4)
            + self.root.descriptions_size()
            + self.root.data_size()
    }

    /// Returns whether the directory contains no resources.
    pub fn is_empty(&self) -> bool { self.root.entries.is_empty() }

    /// Build the resource directory into raw bytes to be included in an image.
    /// The virtual address is used to compute the resource data offsets and has to correspond to the virtual address in the section table header of the target image.
    ///
    /// The directory tables come first, each table followed by the tables of its children,
    /// then the entry names, the data descriptions and finally the data itself, each leaf aligned to 4 bytes.
    /// The resulting size has to fit into 32 bits together with the virtual address.
    pub fn build(&self, virtual_address: u32) -> Vec<u8> {
        let tables_size = self.root.tables_size() as u32;
        let strings_size = aligned_to(self.root.strings_size() as u32, 4);
        let descriptions_size = self.root.descriptions_size() as u32;
        let mut layout = Layout {
            tables: Vec::with_capacity(tables_size as usize),
            strings: Vec::with_capacity(strings_size as usize),
            descriptions: Vec::with_capacity(descriptions_size as usize),
            data: Vec::with_capacity(self.root.data_size() as usize),
            strings_base: tables_size,
            descriptions_base: tables_size + strings_size,
            data_base: tables_size + strings_size + descriptions_size,
            virtual_address,
        };
        self.root.build_table(&mut layout);
        layout.strings.resize(strings_size as usize, 0);

        let mut data = layout.tables;
        data.extend(layout.strings);
        data.extend(layout.descriptions);
        data.extend(layout.data);
        data
    }

    /// Get the resource data at the given type, name and language.
    pub fn find(&self, path: &ResourcePath) -> Option<&ResourceData> {
        self.root
            .get(&path.type_)?
            .as_table()?
            .get(&path.name)?
            .as_table()?
            .get(&path.language)?
            .as_data()
    }

    /// Get the mutable resource data at the given type, name and language.
    pub fn find_mut(&mut self, path: &ResourcePath) -> Option<&mut ResourceData> {
        self.root
            .get_mut(&path.type_)?
            .as_table_mut()?
            .get_mut(&path.name)?
            .as_table_mut()?
            .get_mut(&path.language)?
            .as_data_mut()
    }

    /// Insert resource data at the given type, name and language, creating missing tables.
    /// # Returns
    /// The replaced data.
    pub fn insert_or_replace(
        &mut self, path: &ResourcePath, data: ResourceData,
    ) -> Option<ResourceData> {
        let names = self.root.table_or_insert(&path.type_);
        let languages = names.table_or_insert(&path.name);
        match languages.insert(&path.language, ResourceEntry::Data(data)) {
            Some(ResourceEntry::Data(data)) => Some(data),
            _ => None,
        }
    }

    /// Remove the resource data at the given type, name and language.
    /// Tables left empty by the removal are removed as well.
    /// # Returns
    /// The removed data.
    pub fn remove(&mut self, path: &ResourcePath) -> Option<ResourceData> {
        let names = self.root.get_mut(&path.type_)?.as_table_mut()?;
        let languages = names.get_mut(&path.name)?.as_table_mut()?;
        let removed = match languages.remove(&path.language)? {
            ResourceEntry::Data(data) => data,
            entry => {
                languages.insert(&path.language, entry);
                return None;
            }
        };
        if languages.is_empty() {
            names.remove(&path.name);
        }
        if names.is_empty() {
            self.root.remove(&path.type_);
        }
        Some(removed)
    }

    /// Remove all resources of the given type.
    /// # Returns
    /// The removed entry.
    pub fn remove_type<T: Into<ResourceEntryName>>(&mut self, type_: T) -> Option<ResourceEntry> {
        self.root.remove(type_.into())
    }

    /// Returns all resource data of the given type in directory order.
    pub fn leaves<T: Into<ResourceEntryName>>(
        &self, type_: T,
    ) -> Vec<(ResourcePath, &ResourceData)> {
        let type_ = type_.into();
        let mut leaves = Vec::new();
        let Some(names) = self.root.get(&type_).and_then(ResourceEntry::as_table) else {
            return leaves;
        };
        for (name, entry) in names.entries.iter() {
            let Some(languages) = entry.as_table() else {
                continue;
            };
            for (language, entry) in languages.entries.iter() {
                if let Some(data) = entry.as_data() {
                    let path = ResourcePath {
                        type_:    type_.clone(),
                        name:     name.clone(),
                        language: language.clone(),
                    };
                    leaves.push((path, data));
                }
            }
        }
        leaves
    }

    /// Returns the resource data of the given type and name in the first available language.
    pub fn find_any_language<T: Into<ResourceEntryName>, N: Into<ResourceEntryName>>(
        &self, type_: T, name: N,
    ) -> Option<(ResourcePath, &ResourceData)> {
        let name = name.into();
        self.leaves(type_).into_iter().find(|(path, _)| path.name == name)
    }

    /// Returns the first resource data of the given type in directory order.
    pub fn first_leaf<T: Into<ResourceEntryName>>(
        &self, type_: T,
    ) -> Option<(ResourcePath, &ResourceData)> {
        self.leaves(type_).into_iter().next()
    }
}

/// Location of resource data in the directory tree.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourcePath {
    pub type_:    ResourceEntryName,
    pub name:     ResourceEntryName,
    pub language: ResourceEntryName,
}
impl ResourcePath {
    pub fn new<T: Into<ResourceEntryName>, N: Into<ResourceEntryName>>(
        type_: T, name: N, language: LANGID,
    ) -> Self {
        Self {
            type_:    type_.into(),
            name:     name.into(),
            language: ResourceEntryName::ID(language as u32),
        }
    }

    /// Returns the language id, or `None` for a named language entry.
    pub fn language_id(&self) -> Option<LANGID> {
        self.language.id().and_then(|id| LANGID::try_from(id).ok())
    }
}

struct Resolver<'a> {
    image:           &'a [u8],
    base_address:    u32,
    virtual_address: u32,
    sections:        &'a [SectionHeader],
    // table offsets already parsed, each table may only be referenced once
    visited:         RefCell<IndexSet<u32, RandomState>>,
}
impl Resolver<'_> {
    fn directory_offset(&self, offset: u32) -> usize { self.base_address as usize + offset as usize }

    fn visit_table(&self, offset: u32) -> bool { self.visited.borrow_mut().insert(offset) }

    fn data_offset(&self, rva: u32) -> Option<usize> {
        let Some(section) = self.sections.iter().find(|section| section.contains_rva(rva)) else {
            // without a section table only the resource section itself is addressable
            return (self.sections.is_empty() && rva >= self.virtual_address)
                .then(|| self.base_address as usize + (rva - self.virtual_address) as usize);
        };
        if !section.contains_rva(self.virtual_address) {
            // data outside of the resource section, as left behind by some packers
            warn!(
                "resource data at {:#x?} lies in the {} section",
                rva,
                section.name().unwrap_or("?".to_string())
            );
        }
        Some(section.pointer_to_raw_data as usize + (rva - section.virtual_address) as usize)
    }
}

struct Layout {
    tables:            Vec<u8>,
    strings:           Vec<u8>,
    descriptions:      Vec<u8>,
    data:              Vec<u8>,
    strings_base:      u32,
    descriptions_base: u32,
    data_base:         u32,
    virtual_address:   u32,
}

/// Portable executable resource table.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ResourceTable {
    pub(crate) data:    ResourceDirectoryTable,
    pub(crate) entries: IndexMap<ResourceEntryName, ResourceEntry, RandomState>,
}
impl ResourceTable {
    fn parse(resolver: &Resolver, directory_offset: u32, level: usize) -> Result<Self, LoadError> {
        if level >= MAX_DEPTH {
            return Err(LoadError::InvalidResources(format!(
                "resource table at {:#x} nested too deeply",
                directory_offset
            )));
        }
        if !resolver.visit_table(directory_offset) {
            return Err(LoadError::InvalidResources(format!(
                "resource table at {:#x} is referenced more than once",
                directory_offset
            )));
        }
        let image = resolver.image;
        let table_offset = resolver.directory_offset(directory_offset);
        let resource_table = read_at::<ResourceDirectoryTable>(image, table_offset)?;
        trace!("{} {:#x?}", "--".repeat(level + 1), resource_table);

        let mut entries = IndexMap::default();

        let count = resource_table.number_of_name_entries as usize
            + resource_table.number_of_id_entries as usize;
        for index in 0..count {
            let entry_offset = table_offset + 16 + index * 8;
            let entry = read_at::<ResourceDirectoryEntry>(image, entry_offset)?;
            trace!("{} {:#x?}", "--".repeat(level + 1), entry);

            let name = ResourceEntryName::parse(resolver, entry.name_offset_or_integer_id)?;
            let target = entry.data_entry_or_subdirectory_offset;
            let resource = if target & HIGH_BIT != 0 {
                let child_offset = target ^ HIGH_BIT;
                if child_offset <= directory_offset {
                    return Err(LoadError::InvalidResources(format!(
                        "resource table at {:#x} refers back to {:#x}",
                        directory_offset, child_offset
                    )));
                }
                ResourceEntry::Table(ResourceTable::parse(resolver, child_offset, level + 1)?)
            } else {
                let description =
                    read_at::<ResourceDataEntry>(image, resolver.directory_offset(target))?;
                let address = resolver.data_offset(description.data_rva).ok_or_else(|| {
                    LoadError::InvalidResources(format!(
                        "resource data rva {:#x} outside of any section",
                        { description.data_rva }
                    ))
                })?;
                trace!("{} {:#x?} {:#x?}", "--".repeat(level + 1), address, description);
                let data = slice_at(image, address, description.size as usize)?;
                ResourceEntry::Data(ResourceData {
                    data:     data.to_vec().into(),
                    codepage: description.codepage,
                    reserved: description.reserved,
                })
            };
            if entries.insert(name, resource).is_some() {
                warn!("{} duplicate resource entry replaced", "--".repeat(level + 1));
            }
        }
        entries.sort_keys();
        Ok(Self {
            data: resource_table,
            entries,
        })
    }

    fn build_table(&self, layout: &mut Layout) {
        let mut header = self.data;
        header.number_of_name_entries =
            self.entries.keys().filter(|name| name.id().is_none()).count() as u16;
        header.number_of_id_entries = self.entries.len() as u16 - header.number_of_name_entries;
        layout.tables.extend_from_slice(header.as_bytes());

        let entries_offset = layout.tables.len();
        layout.tables.resize(entries_offset + self.entries.len() * 8, 0);

        for (index, (name, entry)) in self.entries.iter().enumerate() {
            let name_offset_or_integer_id = match name {
                ResourceEntryName::ID(id) => *id,
                ResourceEntryName::Name(_) => {
                    let offset = layout.strings_base + layout.strings.len() as u32;
                    layout.strings.extend(name.string_data());
                    offset | HIGH_BIT
                }
            };
            let data_entry_or_subdirectory_offset = match entry {
                ResourceEntry::Table(table) => {
                    let offset = layout.tables.len() as u32;
                    table.build_table(layout);
                    offset | HIGH_BIT
                }
                ResourceEntry::Data(data) => {
                    let offset = layout.descriptions_base + layout.descriptions.len() as u32;
                    let description = ResourceDataEntry {
                        data_rva: layout.virtual_address
                            + layout.data_base
                            + layout.data.len() as u32,
                        size:     data.data.len() as u32,
                        codepage: data.codepage,
                        reserved: data.reserved,
                    };
                    layout.descriptions.extend_from_slice(description.as_bytes());
                    layout.data.extend_from_slice(&data.data);
                    layout.data.resize(aligned_to(layout.data.len(), 4), 0);
                    offset
                }
            };
            let entry_data = ResourceDirectoryEntry {
                name_offset_or_integer_id,
                data_entry_or_subdirectory_offset,
            };
            let position = entries_offset + index * 8;
            layout.tables[position..position + 8].copy_from_slice(entry_data.as_bytes());
        }
    }

    fn table_or_insert(&mut self, name: &ResourceEntryName) -> &mut ResourceTable {
        if !matches!(self.entries.get(name), Some(ResourceEntry::Table(_))) {
            if self.entries.contains_key(name) {
                warn!("replacing resource data with a resource table at {:?}", name);
            }
            self.insert(name, ResourceEntry::Table(ResourceTable::default()));
        }
        match self.entries.get_mut(name) {
            Some(ResourceEntry::Table(table)) => table,
            _ => unreachable!("table inserted above"),
        }
    }

    fn longest_name(&self) -> usize {
        self.entries
            .iter()
            .map(|(name, entry)| {
                let length = match name {
                    ResourceEntryName::Name(units) => units.len(),
                    ResourceEntryName::ID(_) => 0,
                };
                let children = entry.as_table().map_or(0, ResourceTable::longest_name);
                length.max(children)
            })
            .max()
            .unwrap_or(0)
    }

    /// Get a resource entry from the table.
    /// # Returns
    /// The resource entry.
    pub fn get<N: Borrow<ResourceEntryName>>(&self, name: N) -> Option<&ResourceEntry> {
        self.entries.get(name.borrow())
    }

    /// Get a mutable resource entry from the table.
    /// # Returns
    /// The resource entry.
    pub fn get_mut<N: Borrow<ResourceEntryName>>(&mut self, name: N) -> Option<&mut ResourceEntry> {
        self.entries.get_mut(name.borrow())
    }

    /// Insert a resource entry into the table, keeping named entries before id entries and both sorted.
    /// If an entry with the given name already exists, it will be replaced.
    /// # Returns
    /// The replaced entry.
    pub fn insert<N: Borrow<ResourceEntryName>>(
        &mut self, name: N, entry: ResourceEntry,
    ) -> Option<ResourceEntry> {
        let previous = self.entries.insert(name.borrow().clone(), entry);
        if previous.is_none() {
            self.entries.sort_keys();
        }
        previous
    }

    /// Remove a resource entry from the table.
    /// # Returns
    /// The removed entry.
    pub fn remove<N: Borrow<ResourceEntryName>>(&mut self, name: N) -> Option<ResourceEntry> {
        self.entries.shift_remove(name.borrow())
    }

    /// Returns the entry names in the table.
    pub fn entries(&self) -> Vec<&ResourceEntryName> { self.entries.keys().collect() }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize { self.entries.len() }

    /// Returns whether the table has no entries.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Returns the size of the table and its children in the resource table.
    pub fn tables_size(&self) -> u64 {
        self.entries.values().map(ResourceEntry::table_size).sum::<u64>() + 16
    }

    /// Returns the size of the strings in the entry and its children in the resource table.
    pub fn strings_size(&self) -> u64 {
        self.entries
            .iter()
            .map(|(name, entry)| name.string_size() + entry.strings_size())
            .sum::<u64>()
    }

    /// Returns the size of the descriptions in the tables children in the resource table.
    pub fn descriptions_size(&self) -> u64 {
        self.entries.values().map(ResourceEntry::description_size).sum::<u64>()
    }

    /// Returns the size of the aligned data in the tables children in the resource table.
    pub fn data_size(&self) -> u64 { self.entries.values().map(ResourceEntry::data_size).sum::<u64>() }
}

/// Raw resource data.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ResourceData {
    data:     DebugIgnore<Vec<u8>>,
    codepage: u32,
    reserved: u32,
}
impl ResourceData {
    /// Create resource data with codepage 0.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data:     data.into(),
            codepage: 0,
            reserved: 0,
        }
    }

    /// Returns the raw data.
    pub fn data(&self) -> &[u8] { &self.data }

    /// Returns the codepage of the data.
    pub fn codepage(&self) -> u32 { self.codepage }

    /// Set the raw data.
    pub fn set_data(&mut self, data: Vec<u8>) { self.data = data.into(); }

    /// Set the codepage of the data.
    pub fn set_codepage(&mut self, codepage: u32) { self.codepage = codepage; }
}
impl From<Vec<u8>> for ResourceData {
    fn from(data: Vec<u8>) -> Self { Self::new(data) }
}

/// Resource entry in a resource table.
/// This can be either a child table or raw data.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ResourceEntry {
    Table(ResourceTable),
    Data(ResourceData),
}
impl ResourceEntry {
    pub fn as_table(&self) -> Option<&ResourceTable> {
        match self {
            ResourceEntry::Table(table) => Some(table),
            ResourceEntry::Data(_) => None,
        }
    }

    pub fn as_table_mut(&mut self) -> Option<&mut ResourceTable> {
        match self {
            ResourceEntry::Table(table) => Some(table),
            ResourceEntry::Data(_) => None,
        }
    }

    pub fn as_data(&self) -> Option<&ResourceData> {
        match self {
            ResourceEntry::Table(_) => None,
            ResourceEntry::Data(data) => Some(data),
        }
    }

    pub fn as_data_mut(&mut self) -> Option<&mut ResourceData> {
        match self {
            ResourceEntry::Table(_) => None,
            ResourceEntry::Data(data) => Some(data),
        }
    }

    /// Returns the size of the table entry and its children in the resource table.
    pub fn table_size(&self) -> u64 {
        match self {
            // entry + sub-table
            ResourceEntry::Table(table) => table.tables_size() + 8,
            // entry
            ResourceEntry::Data(_) => 8,
        }
    }

    /// Returns the size of the strings in the entry and its children in the resource table.
    /// This is the size of the resource names of child tables.
    pub fn strings_size(&self) -> u64 {
        match self {
            ResourceEntry::Table(table) => table.strings_size(),
            ResourceEntry::Data(_) => 0,
        }
    }

    /// Returns the size of the descriptions in the entry and its children in the resource table.
    /// This is the size of the resource data description of the entry or child entries.
    pub fn description_size(&self) -> u64 {
        match self {
            ResourceEntry::Table(table) => table.descriptions_size(),
            ResourceEntry::Data(_) => 16,
        }
    }

    /// Returns the aligned size of the data in the entry and its children in the resource table.
    /// This is the size of the resource data of the entry or child entries.
    pub fn data_size(&self) -> u64 {
        match self {
            ResourceEntry::Table(table) => table.data_size(),
            ResourceEntry::Data(data) => aligned_to(data.data.len() as u64, 4),
        }
    }
}

/// Resource directory entry name.
/// This can either be a raw id or a name.
/// Named entries order before id entries, as required in the resource table.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ResourceEntryName {
    // raw id
    ID(u32),
    // utf-16 code units without length prefix
    Name(Vec<u16>),
}
impl ResourceEntryName {
    fn parse(resolver: &Resolver, id: u32) -> Result<Self, ReadError> {
        if id & HIGH_BIT != 0 {
            trace!("reading resource name {:#x?}", id);
            let address = resolver.directory_offset(id ^ HIGH_BIT);
            let length = read_at::<u16>(resolver.image, address)? as usize;
            // size is in 16 bit characters so it needs to be doubled
            let data = slice_at(resolver.image, address + 2, length * 2)?;
            let units = data
                .chunks_exact(2)
                .map(|unit| u16::from_le_bytes([unit[0], unit[1]]))
                .collect::<Vec<_>>();
            trace!("resource name: {:?}", u16_to_string(&units));
            Ok(Self::Name(units))
        } else {
            trace!("reading resource id {:#x?}", id);
            Ok(Self::ID(id))
        }
    }

    pub fn from_string<S: AsRef<str>>(string: S) -> Self {
        Self::Name(string.as_ref().encode_utf16().collect())
    }

    pub fn to_string(&self) -> Option<String> {
        match self {
            Self::ID(_) => None,
            Self::Name(units) => Some(u16_to_string(units)),
        }
    }

    /// Returns the numeric id, or `None` for a named entry.
    pub fn id(&self) -> Option<u32> {
        match self {
            Self::ID(id) => Some(*id),
            Self::Name(_) => None,
        }
    }

    fn string_size(&self) -> u64 {
        match self {
            Self::ID(_) => 0,
            Self::Name(units) => 2 + units.len() as u64 * 2,
        }
    }

    fn string_data(&self) -> Vec<u8> {
        match self {
            Self::ID(_) => Vec::new(),
            Self::Name(units) => {
                let mut data = Vec::with_capacity(2 + units.len() * 2);
                // checked against `longest_name` before building
                data.extend_from_slice(&(units.len() as u16).to_le_bytes());
                data.extend(units.iter().flat_map(|unit| unit.to_le_bytes()));
                data
            }
        }
    }
}
impl Ord for ResourceEntryName {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Name(a), Self::Name(b)) => a.cmp(b),
            (Self::Name(_), Self::ID(_)) => Ordering::Less,
            (Self::ID(_), Self::Name(_)) => Ordering::Greater,
            (Self::ID(a), Self::ID(b)) => a.cmp(b),
        }
    }
}
impl PartialOrd for ResourceEntryName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}
impl From<u16> for ResourceEntryName {
    fn from(id: u16) -> Self { Self::ID(id as u32) }
}
impl From<u32> for ResourceEntryName {
    fn from(id: u32) -> Self { Self::ID(id) }
}
impl From<&str> for ResourceEntryName {
    fn from(name: &str) -> Self { Self::from_string(name) }
}
