//! Raw application defined data (`RT_RCDATA`).

use alloc::vec::Vec;

use log::debug;

use crate::{constants::*, resource::*};

impl ResourceDirectory {
    /// Get the raw data with the given id in the first available language.
    pub fn get_rcdata(&self, id: u16) -> Option<&[u8]> {
        self.find_any_language(RT_RCDATA, id).map(|(_, data)| data.data())
    }

    /// Set the raw data with the given id.
    /// Existing data keeps its language and codepage, new data is added with the default language.
    pub fn set_rcdata(&mut self, id: u16, data: Vec<u8>) {
        let path = match self.find_any_language(RT_RCDATA, id) {
            Some((path, _)) => path,
            None => ResourcePath::new(RT_RCDATA, id, LANGUAGE_ID_EN_US),
        };
        debug!("setting rcdata {} ({} bytes)", id, data.len());
        match self.find_mut(&path) {
            Some(resource) => resource.set_data(data),
            None => {
                self.insert_or_replace(&path, ResourceData::new(data));
            }
        }
    }
}
