//! Version information resource (`VS_VERSIONINFO`) parsing, building and editing.
//!
//! See <https://learn.microsoft.com/en-us/windows/win32/menurc/vs-versioninfo> for more information.

use alloc::{
    format,
    string::{String, ToString},
    vec::Vec,
};
use core::mem::size_of;

use ahash::RandomState;
use indexmap::IndexMap;
use log::{debug, trace, warn};
use zerocopy::IntoBytes;

use crate::{constants::*, errors::*, resource::*, types::*, util::*};

/// Language and code page pair a version string table is scoped to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct VersionLanguage {
    pub language:  LANGID,
    pub code_page: WORD,
}
impl Default for VersionLanguage {
    fn default() -> Self {
        Self {
            language:  LANGUAGE_ID_EN_US,
            code_page: CODE_PAGE_ID_EN_US,
        }
    }
}
impl VersionLanguage {
    /// Parse a string table key such as `040904b0`.
    fn parse_key(key: &str) -> Option<Self> {
        if key.len() != 8 || !key.is_ascii() {
            return None;
        }
        Some(Self {
            language:  u16::from_str_radix(&key[0..4], 16).ok()?,
            code_page: u16::from_str_radix(&key[4..8], 16).ok()?,
        })
    }

    fn key(&self) -> String { format!("{:04x}{:04x}", self.language, self.code_page) }
}

/// Node of the `VS_VERSIONINFO` tree, sharing a single header layout on all levels.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct VersionNode {
    key:      String,
    type_:    WORD,
    value:    Vec<u8>,
    children: Vec<VersionNode>,
}
impl VersionNode {
    fn new<S: Into<String>>(key: S, type_: WORD, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            type_,
            value,
            children: Vec::new(),
        }
    }

    fn parse(data: &[u8], depth: usize) -> Result<(Self, usize), ValidationError> {
        let corrupt = |error: ReadError| ValidationError::CorruptVersionResource(format!("{:?}", error));
        let header = read::<VersionHeader>(data).map_err(corrupt)?;
        let length = header.length as usize;
        if length < size_of::<VersionHeader>() || length > data.len() || depth > 4 {
            return Err(ValidationError::CorruptVersionResource(format!(
                "invalid node length {:#x} with {:#x} bytes available",
                length,
                data.len()
            )));
        }
        let data = &data[..length];
        let mut reader = ByteReader::new(data);
        reader.seek(size_of::<VersionHeader>());
        let key = reader.read_u16_string().map_err(corrupt)?;
        reader.align(4);
        trace!("{} {:?} {:?}", "--".repeat(depth + 1), key, header);

        let mut node = Self::new(key, header.type_, Vec::new());
        if header.type_ == VS_TYPE_TEXT && header.value_length > 0 {
            // text values are counted in characters by some tools and in bytes by others,
            // so take everything up to the end of the node
            node.value = reader.read_bytes(reader.remaining()).map_err(corrupt)?.to_vec();
            return Ok((node, length));
        }
        let value_length = (header.value_length as usize).min(reader.remaining());
        node.value = reader.read_bytes(value_length).map_err(corrupt)?.to_vec();
        reader.align(4);

        while reader.remaining() >= size_of::<VersionHeader>() {
            let offset = reader.position();
            let child_length = read_at::<u16>(data, offset).map_err(corrupt)? as usize;
            if child_length == 0 {
                break;
            }
            let (child, child_length) = Self::parse(&data[offset..], depth + 1)?;
            node.children.push(child);
            reader.seek(offset + child_length);
            reader.align(4);
        }
        Ok((node, length))
    }

    fn build(&self, writer: &mut ByteWriter) -> Result<(), ValidationError> {
        writer.align(4);
        let start = writer.position();
        let length_position = writer.reserve_u16();
        let value_length = match self.type_ {
            VS_TYPE_TEXT => self.value.len() / 2,
            _ => self.value.len(),
        };
        let value_length = u16::try_from(value_length)
            .map_err(|_| ValidationError::ValueTooLong("version value", self.value.len()))?;
        writer.write_u16(value_length);
        writer.write_u16(self.type_);
        writer.write_u16_string(&self.key);
        writer.align(4);
        writer.write_bytes(&self.value);
        for child in &self.children {
            child.build(writer)?;
        }
        writer.align(4);
        let length = writer.position() - start;
        let length = u16::try_from(length).map_err(|_| {
            warn!("version node {:?} of {:#x} bytes is too long", self.key, length);
            ValidationError::ValueTooLong("version node", length)
        })?;
        writer.patch_u16(length_position, length);
        Ok(())
    }

    fn text(&self) -> String {
        let mut reader = ByteReader::new(&self.value);
        reader.read_u16_string().unwrap_or_default()
    }
}

/// Parsed version information resource.
///
/// Holds the fixed file info, the string tables per language and code page and the translation table.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct VersionInfo {
    pub info:         FixedFileInfo,
    pub strings:      IndexMap<VersionLanguage, IndexMap<String, String, RandomState>, RandomState>,
    pub translations: Vec<VersionLanguage>,
    // VarFileInfo children other than the translation table
    var_extra:        Vec<VersionNode>,
    // top level children other than StringFileInfo and VarFileInfo
    extra:            Vec<VersionNode>,
}
impl VersionInfo {
    /// Parse version information from the raw data of a `RT_VERSION` resource.
    ///
    /// # Returns
    /// Returns an error if the data is not a valid version information block.
    pub fn parse(data: &[u8]) -> Result<Self, ValidationError> {
        let (root, _) = VersionNode::parse(data, 0)?;
        if root.key != VS_VERSION_INFO_KEY {
            return Err(ValidationError::CorruptVersionResource(format!(
                "unexpected root key {:?}",
                root.key
            )));
        }

        let info = if root.value.is_empty() {
            warn!("version information without fixed file info, using defaults");
            FixedFileInfo::default()
        } else {
            let info = read::<FixedFileInfo>(&root.value)
                .map_err(|error| ValidationError::CorruptVersionResource(format!("{:?}", error)))?;
            if info.signature != VS_FIXEDFILEINFO_SIGNATURE {
                return Err(ValidationError::CorruptVersionResource(format!(
                    "invalid fixed file info signature {:#x}",
                    { info.signature }
                )));
            }
            info
        };

        let mut version_info = Self {
            info,
            ..Self::default()
        };
        for child in root.children {
            match child.key.as_str() {
                VS_STRING_FILE_INFO_KEY => {
                    for table in child.children {
                        let language = VersionLanguage::parse_key(&table.key).ok_or_else(|| {
                            ValidationError::CorruptVersionResource(format!(
                                "invalid string table key {:?}",
                                table.key
                            ))
                        })?;
                        let strings = version_info.strings.entry(language).or_default();
                        for string in table.children {
                            strings.insert(string.key.clone(), string.text());
                        }
                    }
                }
                VS_VAR_FILE_INFO_KEY => {
                    for var in child.children {
                        if var.key == VS_TRANSLATION_KEY {
                            version_info.translations.extend(var.value.chunks_exact(4).map(
                                |pair| VersionLanguage {
                                    language:  u16::from_le_bytes([pair[0], pair[1]]),
                                    code_page: u16::from_le_bytes([pair[2], pair[3]]),
                                },
                            ));
                        } else {
                            version_info.var_extra.push(var);
                        }
                    }
                }
                _ => {
                    debug!("keeping unknown version information block {:?}", child.key);
                    version_info.extra.push(child);
                }
            }
        }
        Ok(version_info)
    }

    /// Build the version information into the raw data of a `RT_VERSION` resource.
    ///
    /// # Returns
    /// Returns an error if any node exceeds the 16 bit lengths of the format.
    pub fn build(&self) -> Result<Vec<u8>, ValidationError> {
        let mut root = VersionNode::new(VS_VERSION_INFO_KEY, VS_TYPE_BINARY, self.info.as_bytes().to_vec());

        if !self.strings.is_empty() {
            let mut string_file_info = VersionNode::new(VS_STRING_FILE_INFO_KEY, VS_TYPE_TEXT, Vec::new());
            for (language, strings) in &self.strings {
                let mut table = VersionNode::new(language.key(), VS_TYPE_TEXT, Vec::new());
                table.children.extend(strings.iter().map(|(key, value)| {
                    VersionNode::new(key.as_str(), VS_TYPE_TEXT, string_to_u16(value))
                }));
                string_file_info.children.push(table);
            }
            root.children.push(string_file_info);
        }

        if !self.translations.is_empty() || !self.var_extra.is_empty() {
            let mut var_file_info = VersionNode::new(VS_VAR_FILE_INFO_KEY, VS_TYPE_TEXT, Vec::new());
            if !self.translations.is_empty() {
                let value = self
                    .translations
                    .iter()
                    .flat_map(|translation| {
                        let mut pair = [0u8; 4];
                        pair[..2].copy_from_slice(&translation.language.to_le_bytes());
                        pair[2..].copy_from_slice(&translation.code_page.to_le_bytes());
                        pair
                    })
                    .collect();
                var_file_info.children.push(VersionNode::new(VS_TRANSLATION_KEY, VS_TYPE_BINARY, value));
            }
            var_file_info.children.extend(self.var_extra.iter().cloned());
            root.children.push(var_file_info);
        }
        root.children.extend(self.extra.iter().cloned());

        let mut writer = ByteWriter::new();
        root.build(&mut writer)?;
        Ok(writer.into_inner())
    }

    /// Returns the language string values are written to.
    /// This is the first string table, or the first translation if there are no string tables.
    pub fn primary_language(&self) -> VersionLanguage {
        self.strings
            .keys()
            .next()
            .or(self.translations.first())
            .copied()
            .unwrap_or_default()
    }

    /// Returns the string value for the key in the primary language, falling back to other languages.
    pub fn string(&self, key: &str) -> Option<&str> {
        self.strings
            .get(&self.primary_language())
            .and_then(|strings| strings.get(key))
            .or_else(|| self.strings.values().find_map(|strings| strings.get(key)))
            .map(String::as_str)
    }

    /// Set the string value for the key in the primary language.
    /// A string table and translation entry for the language are created if missing.
    pub fn set_string<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let language = self.primary_language();
        if !self.translations.contains(&language) {
            debug!("adding version translation {:?}", language);
            self.translations.push(language);
        }
        self.strings.entry(language).or_default().insert(key.into(), value.into());
    }

    /// Returns the numeric file version as `a.b.c.d` quad.
    pub fn file_version(&self) -> [u16; 4] { self.info.file_version.quad() }

    /// Returns the numeric product version as `a.b.c.d` quad.
    pub fn product_version(&self) -> [u16; 4] { self.info.product_version.quad() }

    /// Set the numeric file version and the `FileVersion` string.
    pub fn set_file_version(&mut self, version: [u16; 4]) {
        self.info.file_version = VersionU32::from_quad(version);
        self.set_string(VS_FILE_VERSION, format_version_quad(version));
    }

    /// Set the numeric product version and the `ProductVersion` string.
    pub fn set_product_version(&mut self, version: [u16; 4]) {
        self.info.product_version = VersionU32::from_quad(version);
        self.set_string(VS_PRODUCT_VERSION, format_version_quad(version));
    }
}

/// Parse a version in the form `a.b.c.d`, `a.b.c`, `a.b` or `a`.
/// Missing trailing components are 0 and anything after the last matched component is ignored.
///
/// Components above `65535` are rejected instead of wrapping around, so `"70000"` is an error
/// and not version `4464.0.0.0`.
///
/// # Returns
/// Returns an error if the text does not start with a number or a component does not fit into 16 bits.
pub fn parse_version_quad(text: &str) -> Result<[u16; 4], ValidationError> {
    let malformed = || ValidationError::MalformedVersion(text.to_string());
    let mut version = [0u16; 4];
    let mut rest = text.trim_start();
    for (index, component) in version.iter_mut().enumerate() {
        if index > 0 {
            match rest.strip_prefix('.') {
                Some(next) if next.starts_with(|c: char| c.is_ascii_digit()) => rest = next,
                _ => break,
            }
        }
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(malformed());
        }
        *component = rest[..digits].parse::<u16>().map_err(|_| malformed())?;
        rest = &rest[digits..];
    }
    Ok(version)
}

/// Format a version quad as `a.b.c.d`.
pub fn format_version_quad(version: [u16; 4]) -> String {
    format!("{}.{}.{}.{}", version[0], version[1], version[2], version[3])
}

impl ResourceDirectory {
    /// Get the version information of the first `RT_VERSION` resource.
    ///
    /// # Returns
    /// Returns `None` if there is no version resource, or an error if it cannot be parsed.
    pub fn get_version_info(&self) -> Result<Option<VersionInfo>, ValidationError> {
        self.first_leaf(RT_VERSION)
            .map(|(_, data)| VersionInfo::parse(data.data()))
            .transpose()
    }

    /// Set the version information, replacing the first `RT_VERSION` resource or adding a new one.
    /// The directory is unchanged if the version information cannot be built.
    pub fn set_version_info(&mut self, version_info: &VersionInfo) -> Result<(), ValidationError> {
        let data = version_info.build()?;
        let path = self
            .first_leaf(RT_VERSION)
            .map(|(path, _)| path)
            .unwrap_or_else(|| ResourcePath::new(RT_VERSION, 1u16, LANGUAGE_ID_EN_US));
        match self.find_mut(&path) {
            Some(resource) => resource.set_data(data),
            None => {
                self.insert_or_replace(&path, ResourceData::new(data));
            }
        }
        Ok(())
    }

    /// Get a version string from the version information.
    pub fn get_version_string(&self, key: &str) -> Result<Option<String>, ValidationError> {
        Ok(self
            .get_version_info()?
            .and_then(|info| info.string(key).map(str::to_string)))
    }

    /// Set a version string in the primary language of the version information.
    /// Version information is created if none exists.
    pub fn set_version_string(&mut self, key: &str, value: &str) -> Result<(), ValidationError> {
        self.edit_version_info(|info| info.set_string(key, value))
    }

    /// Set the numeric file version and the matching `FileVersion` string.
    pub fn set_file_version(&mut self, version: [u16; 4]) -> Result<(), ValidationError> {
        self.edit_version_info(|info| info.set_file_version(version))
    }

    /// Set the numeric product version and the matching `ProductVersion` string.
    pub fn set_product_version(&mut self, version: [u16; 4]) -> Result<(), ValidationError> {
        self.edit_version_info(|info| info.set_product_version(version))
    }

    fn edit_version_info<F: FnOnce(&mut VersionInfo)>(
        &mut self, edit: F,
    ) -> Result<(), ValidationError> {
        let mut version_info = self.get_version_info()?.unwrap_or_default();
        edit(&mut version_info);
        self.set_version_info(&version_info)
    }
}
