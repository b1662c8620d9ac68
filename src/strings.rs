//! String table (`RT_STRING`) editing.
//!
//! Strings are stored in blocks of 16 consecutive ids. Block `n` holds the ids `(n - 1) * 16` to `n * 16 - 1`,
//! each string prefixed with its length in UTF-16 code units and without terminator.
//! See <https://learn.microsoft.com/en-us/windows/win32/menurc/stringtable-resource> for more information.

use alloc::{string::String, vec::Vec};

use log::{debug, warn};

use crate::{constants::*, errors::*, resource::*, util::*};

/// Block of 16 strings of a string table.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct StringBlock {
    strings: [Vec<u16>; STRING_TABLE_BLOCK_SIZE as usize],
}
impl StringBlock {
    /// Returns the block id and the index within the block for a string id.
    pub const fn locate(id: u16) -> (u16, usize) {
        (id / STRING_TABLE_BLOCK_SIZE as u16 + 1, (id % STRING_TABLE_BLOCK_SIZE as u16) as usize)
    }

    /// Parse a block from the raw data of a `RT_STRING` resource.
    /// Strings missing from truncated data are treated as empty.
    pub fn parse(data: &[u8]) -> Self {
        let mut block = Self::default();
        let mut reader = ByteReader::new(data);
        for (index, string) in block.strings.iter_mut().enumerate() {
            let Ok(length) = reader.read::<u16>() else {
                warn!("string block truncated at string {}", index);
                break;
            };
            let Ok(units) = reader.read_bytes(length as usize * 2) else {
                warn!("string {} with length {} exceeds block data", index, length);
                break;
            };
            *string = units.chunks_exact(2).map(|unit| u16::from_le_bytes([unit[0], unit[1]])).collect();
        }
        block
    }

    /// Build the block into the raw data of a `RT_STRING` resource.
    pub fn build(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        // lengths are bounded by `set` and `parse`
        for string in &self.strings {
            writer.write_u16(string.len() as u16);
            for unit in string {
                writer.write_u16(*unit);
            }
        }
        writer.into_inner()
    }

    /// Returns the string at the index, or `None` if it is empty.
    pub fn get(&self, index: usize) -> Option<String> {
        self.strings.get(index).filter(|string| !string.is_empty()).map(|string| u16_to_string(string))
    }

    /// Set the string at the index.
    ///
    /// # Returns
    /// Returns an error if the string is longer than its 16 bit length prefix allows.
    pub fn set(&mut self, index: usize, value: &str) -> Result<(), ValidationError> {
        let units = value.encode_utf16().collect::<Vec<_>>();
        if u16::try_from(units.len()).is_err() {
            return Err(ValidationError::ValueTooLong("resource string", units.len() * 2));
        }
        if let Some(string) = self.strings.get_mut(index) {
            *string = units;
        }
        Ok(())
    }

    /// Returns whether all strings in the block are empty.
    pub fn is_empty(&self) -> bool { self.strings.iter().all(Vec::is_empty) }
}

impl ResourceDirectory {
    /// Get a string from the string table.
    ///
    /// # Returns
    /// Returns `None` if the string does not exist or is empty.
    pub fn get_resource_string(&self, id: u16) -> Option<String> {
        let (block_id, index) = StringBlock::locate(id);
        let (_, data) = self.find_any_language(RT_STRING, block_id)?;
        StringBlock::parse(data.data()).get(index)
    }

    /// Set a string in the string table.
    ///
    /// The containing block keeps its language, or is created with the default language.
    /// A block left without strings is removed.
    ///
    /// # Returns
    /// Returns an error if the string is too long for a string table.
    pub fn set_resource_string(&mut self, id: u16, value: &str) -> Result<(), ValidationError> {
        let (block_id, index) = StringBlock::locate(id);
        let (path, mut block) = match self.find_any_language(RT_STRING, block_id) {
            Some((path, data)) => (path, StringBlock::parse(data.data())),
            None => (ResourcePath::new(RT_STRING, block_id, LANGUAGE_ID_EN_US), StringBlock::default()),
        };
        block.set(index, value)?;
        if block.is_empty() {
            debug!("removing empty string block {}", block_id);
            self.remove(&path);
            return Ok(());
        }
        debug!("setting string {} in block {} at {}", id, block_id, index);
        self.insert_or_replace(&path, ResourceData::new(block.build()));
        Ok(())
    }
}
