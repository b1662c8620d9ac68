//! Resource updater for linked Windows **p**ortable **e**xecutables.
//!
//! Supports:
//! * Version information strings and the numeric file and product version
//! * Icon replacement from icon files or, with the `images` feature, arbitrary images
//! * Application manifests and the requested execution level
//! * String tables and raw `RCDATA` resources
//!
//! See [`ResourceUpdater`] for the file based entry point, or [`Image`] and [`ResourceDirectory`]
//! for working on bytes directly.
//!
//! # Examples
//!
//! ### Stamping an executable
//! ```
//! use rcedit::ResourceUpdater;
//!
//! let mut updater = ResourceUpdater::new();
//! updater.load(BINARY_PATH)?;
//! updater.set_version_string("CompanyName", "Example")?;
//! updater.set_product_version("2.1")?;
//! updater.set_icon_file(ICON_PATH)?;
//! updater.set_execution_level("requireAdministrator")?;
//!
//! // nothing is written before the commit
//! updater.commit()?;
//! ```
//!
//! ### Editing image bytes
//! ```
//! use rcedit::{commit, Image};
//!
//! let data = std::fs::read(BINARY_PATH)?;
//!
//! // parse the executable image
//! let image = Image::parse(&data)?;
//!
//! // get the resource directory
//! let mut resources = image.resource_directory().cloned().unwrap_or_default();
//!
//! // edit the resource directory
//! resources.set_rcdata(101, b"payload".to_vec());
//! resources.set_resource_string(7, "hello")?;
//!
//! // build an executable image with all changes applied
//! let target = commit(&image, &resources)?;
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg_hide))]
#![cfg_attr(docsrs, doc(cfg_hide(doc)))]

extern crate alloc;

pub(crate) mod errors;
pub(crate) mod icon;
pub(crate) mod image;
pub(crate) mod manifest;
pub(crate) mod rcdata;
pub(crate) mod resource;
pub(crate) mod strings;
#[cfg(feature = "std")]
pub(crate) mod updater;
pub(crate) mod util;
pub(crate) mod version;

pub mod constants;
pub mod types;

pub use crate::{errors::*, icon::*, image::*, manifest::*, resource::*, strings::*, version::*};
#[cfg(feature = "std")]
pub use crate::updater::*;
