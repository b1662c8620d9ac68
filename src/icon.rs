//! Icon (`RT_ICON`) and icon group (`RT_GROUP_ICON`) editing.
//!
//! See <https://learn.microsoft.com/en-us/previous-versions/ms997538(v=msdn.10)> for the icon file format.

use alloc::{format, string::String, vec::Vec};
use core::mem::size_of;

use log::{debug, warn};
use zerocopy::IntoBytes;

use crate::{constants::*, errors::*, resource::*, types::*, util::*};

const _: () = assert!(size_of::<IconFileEntry>() == 16);
const _: () = assert!(size_of::<GroupIconEntry>() == 14);

/// Image contained in an icon file.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IconImage {
    pub width:       u8,
    pub height:      u8,
    pub color_count: u8,
    pub planes:      u16,
    pub bit_count:   u16,
    /// Raw DIB or PNG data.
    pub data:        Vec<u8>,
}

/// Parse the images of an icon file.
///
/// # Returns
/// Returns an error if the header, the image count or an image range is inconsistent with the data.
pub fn parse_icon(data: &[u8]) -> Result<Vec<IconImage>, ValidationError> {
    let malformed = |message: String| ValidationError::MalformedIcon(message);
    let header = read::<IconDirectory>(data).map_err(|_| malformed("missing header".into()))?;
    if header.reserved != 0 || header.type_ != 1 {
        return Err(malformed(format!(
            "invalid header (reserved {}, type {})",
            { header.reserved },
            { header.type_ }
        )));
    }
    if header.count == 0 {
        return Err(malformed("no images".into()));
    }
    let entries_size = size_of::<IconDirectory>() + header.count as usize * size_of::<IconFileEntry>();
    if entries_size > data.len() {
        return Err(malformed(format!(
            "{} images declared but only {} bytes available",
            { header.count },
            data.len()
        )));
    }

    let mut images = Vec::with_capacity(header.count as usize);
    for index in 0..header.count as usize {
        let offset = size_of::<IconDirectory>() + index * size_of::<IconFileEntry>();
        let entry = read_at::<IconFileEntry>(data, offset)
            .map_err(|_| malformed(format!("missing entry {}", index)))?;
        let image = slice_at(data, entry.offset as usize, entry.bytes as usize).map_err(|_| {
            malformed(format!(
                "image {} at {:#x} with {:#x} bytes outside of data",
                index,
                { entry.offset },
                { entry.bytes }
            ))
        })?;
        debug!("icon image {}: {:?}", index, entry);
        images.push(IconImage {
            width:       entry.width,
            height:      entry.height,
            color_count: entry.color_count,
            planes:      entry.planes,
            bit_count:   entry.bit_count,
            data:        image.to_vec(),
        });
    }
    Ok(images)
}

/// Build an icon file from the given images.
pub fn build_icon(images: &[IconImage]) -> Vec<u8> {
    let mut writer = ByteWriter::new();
    writer.write(&IconDirectory {
        reserved: 0,
        type_:    1,
        count:    images.len() as u16,
    });
    let mut offset = size_of::<IconDirectory>() + images.len() * size_of::<IconFileEntry>();
    for image in images {
        writer.write(&IconFileEntry {
            width:       image.width,
            height:      image.height,
            color_count: image.color_count,
            reserved:    0,
            planes:      image.planes,
            bit_count:   image.bit_count,
            bytes:       image.data.len() as u32,
            offset:      offset as u32,
        });
        offset += image.data.len();
    }
    for image in images {
        writer.write_bytes(&image.data);
    }
    writer.into_inner()
}

impl ResourceDirectory {
    /// Set the icon of the executable from an icon file.
    ///
    /// All existing icons and icon groups are removed. Every image is added as `RT_ICON` resource
    /// with a newly allocated id, referenced by a single `RT_GROUP_ICON` resource.
    /// The group keeps the name and language of the previous primary group if there was one.
    ///
    /// # Returns
    /// Returns an error if the icon file is malformed. The directory is unchanged in that case.
    pub fn set_icon(&mut self, icon: &[u8]) -> Result<(), ValidationError> {
        let images = parse_icon(icon)?;

        let group_path = self
            .first_leaf(RT_GROUP_ICON)
            .map(|(path, _)| path)
            .unwrap_or_else(|| ResourcePath::new(RT_GROUP_ICON, 1u16, LANGUAGE_ID_EN_US));
        let language = group_path.language_id().unwrap_or(LANGUAGE_ID_EN_US);
        self.remove_icon();

        let mut next_id = self
            .leaves(RT_ICON)
            .iter()
            .filter_map(|(path, _)| path.name.id())
            .max()
            .unwrap_or(0)
            + 1;
        if next_id as usize + images.len() > u16::MAX as usize {
            return Err(ValidationError::MalformedIcon("no icon ids left".into()));
        }

        let mut group = ByteWriter::new();
        group.write(&IconDirectory {
            reserved: 0,
            type_:    1,
            count:    images.len() as u16,
        });
        for image in images {
            let id = next_id as u16;
            next_id += 1;
            group.write(&GroupIconEntry {
                width:       image.width,
                height:      image.height,
                color_count: image.color_count,
                reserved:    0,
                planes:      image.planes,
                bit_count:   image.bit_count,
                bytes:       image.data.len() as u32,
                id,
            });
            debug!("adding icon image {} ({} bytes)", id, image.data.len());
            self.insert_or_replace(
                &ResourcePath::new(RT_ICON, id, language),
                ResourceData::new(image.data),
            );
        }
        self.insert_or_replace(&group_path, ResourceData::new(group.into_inner()));
        Ok(())
    }

    /// Get the primary icon group as icon file.
    ///
    /// # Returns
    /// Returns `None` if there is no icon group, or an error if the group is malformed.
    pub fn get_icon(&self) -> Result<Option<Vec<u8>>, ValidationError> {
        let Some((group_path, group)) = self.first_leaf(RT_GROUP_ICON) else {
            return Ok(None);
        };
        let data = group.data();
        let header = read::<IconDirectory>(data)
            .map_err(|_| ValidationError::MalformedIcon("missing group header".into()))?;

        let mut images = Vec::with_capacity(header.count as usize);
        for index in 0..header.count as usize {
            let offset = size_of::<IconDirectory>() + index * size_of::<GroupIconEntry>();
            let entry = read_at::<GroupIconEntry>(data, offset).map_err(|_| {
                ValidationError::MalformedIcon(format!("missing group entry {}", index))
            })?;
            let path = ResourcePath {
                type_:    RT_ICON.into(),
                name:     entry.id.into(),
                language: group_path.language.clone(),
            };
            let image = self
                .find(&path)
                .or_else(|| self.find_any_language(RT_ICON, entry.id).map(|(_, data)| data));
            let Some(image) = image else {
                warn!("icon group references missing icon {}", { entry.id });
                continue;
            };
            images.push(IconImage {
                width:       entry.width,
                height:      entry.height,
                color_count: entry.color_count,
                planes:      entry.planes,
                bit_count:   entry.bit_count,
                data:        image.data().to_vec(),
            });
        }
        Ok(Some(build_icon(&images)))
    }

    /// Remove all icons and icon groups.
    pub fn remove_icon(&mut self) {
        self.remove_type(RT_GROUP_ICON);
        self.remove_type(RT_ICON);
    }

    /// Set the icon of the executable from an image in any format supported by the `image` crate.
    /// The image is scaled to the common icon sizes.
    #[cfg(feature = "images")]
    pub fn set_icon_image(&mut self, data: &[u8]) -> Result<(), ValidationError> {
        use image::{
            codecs::ico::{IcoEncoder, IcoFrame},
            imageops::FilterType,
            ExtendedColorType,
        };

        let image = image::load_from_memory(data)?;
        let frames = [256u32, 64, 48, 32, 24, 16]
            .into_iter()
            .map(|size| {
                let resized = image.resize_exact(size, size, FilterType::Lanczos3).into_rgba8();
                IcoFrame::as_png(resized.as_raw(), size, size, ExtendedColorType::Rgba8)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut icon = Vec::new();
        IcoEncoder::new(&mut icon).encode_images(&frames)?;
        self.set_icon(&icon)
    }
}
