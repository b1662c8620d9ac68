//! File based resource updater driving the resource editors.

use std::path::{Path, PathBuf};

use log::info;

use crate::{errors::*, image::*, manifest::*, resource::*, version::*};

#[derive(Debug)]
struct Loaded {
    path:      PathBuf,
    image:     Image<'static>,
    resources: ResourceDirectory,
    committed: Option<Vec<u8>>,
}

/// Resource updater for a single executable file.
///
/// Edits only change the in-memory resource directory. Nothing is written before [`ResourceUpdater::commit`],
/// which serializes the loaded image with all edits applied and atomically replaces the file.
///
/// ```no_run
/// use rcedit::ResourceUpdater;
///
/// let mut updater = ResourceUpdater::new();
/// updater.load("app.exe")?;
/// updater.set_version_string("ProductName", "App")?;
/// updater.set_file_version("1.2.3.4")?;
/// updater.set_execution_level("asInvoker")?;
/// updater.commit()?;
/// # Ok::<(), rcedit::UpdateError>(())
/// ```
#[derive(Debug, Default)]
pub struct ResourceUpdater {
    loaded: Option<Loaded>,
}

impl ResourceUpdater {
    pub fn new() -> Self { Self::default() }

    /// Load the executable at the path, replacing any previously loaded one and its pending edits.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), UpdateError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(LoadError::from)?;
        let image = Image::parse(data)?;
        let resources = image.resource_directory().cloned().unwrap_or_default();
        info!("loaded {} with {} resource types", path.display(), resources.root().len());
        self.loaded = Some(Loaded {
            path: path.to_path_buf(),
            image,
            resources,
            committed: None,
        });
        Ok(())
    }

    /// Returns whether an executable is loaded.
    pub fn is_loaded(&self) -> bool { self.loaded.is_some() }

    fn loaded(&self) -> Result<&Loaded, UpdateError> {
        self.loaded.as_ref().ok_or(UpdateError::NotLoaded)
    }

    fn resources_mut(&mut self) -> Result<&mut ResourceDirectory, UpdateError> {
        self.loaded.as_mut().map(|loaded| &mut loaded.resources).ok_or(UpdateError::NotLoaded)
    }

    /// Returns the loaded image as it was read from disk.
    pub fn image(&self) -> Option<&Image<'static>> { self.loaded.as_ref().map(|loaded| &loaded.image) }

    /// Returns the resource directory with all pending edits applied.
    pub fn resources(&self) -> Option<&ResourceDirectory> {
        self.loaded.as_ref().map(|loaded| &loaded.resources)
    }

    /// Returns the image bytes written by the last successful commit.
    pub fn data(&self) -> Option<&[u8]> {
        self.loaded.as_ref().and_then(|loaded| loaded.committed.as_deref())
    }

    pub fn set_version_string(&mut self, key: &str, value: &str) -> Result<(), UpdateError> {
        Ok(self.resources_mut()?.set_version_string(key, value)?)
    }

    pub fn get_version_string(&self, key: &str) -> Result<Option<String>, UpdateError> {
        Ok(self.loaded()?.resources.get_version_string(key)?)
    }

    /// Set the file version from `a.b.c.d` text, updating the numeric and the string representation.
    pub fn set_file_version(&mut self, version: &str) -> Result<(), UpdateError> {
        let version = parse_version_quad(version)?;
        Ok(self.resources_mut()?.set_file_version(version)?)
    }

    /// Set the product version from `a.b.c.d` text, updating the numeric and the string representation.
    pub fn set_product_version(&mut self, version: &str) -> Result<(), UpdateError> {
        let version = parse_version_quad(version)?;
        Ok(self.resources_mut()?.set_product_version(version)?)
    }

    /// Replace the icon with the images of an icon file.
    pub fn set_icon(&mut self, icon: &[u8]) -> Result<(), UpdateError> {
        Ok(self.resources_mut()?.set_icon(icon)?)
    }

    /// Replace the icon with the icon file at the path.
    /// With the `images` feature, other image formats are converted.
    pub fn set_icon_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), UpdateError> {
        let data = read_input(path.as_ref())?;
        let resources = self.resources_mut()?;
        #[cfg(feature = "images")]
        if !data.starts_with(&[0, 0, 1, 0]) {
            log::debug!("converting non-icon image");
            return Ok(resources.set_icon_image(&data)?);
        }
        Ok(resources.set_icon(&data)?)
    }

    /// Set the requested execution level.
    /// The level is validated before anything else, so an invalid level fails even without a loaded image.
    pub fn set_execution_level(&mut self, level: &str) -> Result<(), UpdateError> {
        let level = level.parse::<ExecutionLevel>()?;
        self.resources_mut()?.set_execution_level(level);
        Ok(())
    }

    pub fn get_execution_level(&self) -> Result<Option<ExecutionLevel>, UpdateError> {
        Ok(self.loaded()?.resources.execution_level())
    }

    pub fn set_manifest(&mut self, manifest: &str) -> Result<(), UpdateError> {
        self.resources_mut()?.set_manifest(manifest);
        Ok(())
    }

    /// Replace the manifest with the content of the file at the path, verbatim.
    pub fn set_manifest_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), UpdateError> {
        let data = read_input(path.as_ref())?;
        self.resources_mut()?.set_manifest_data(data);
        Ok(())
    }

    pub fn get_manifest(&self) -> Result<Option<String>, UpdateError> {
        Ok(self.loaded()?.resources.get_manifest())
    }

    pub fn set_resource_string(&mut self, id: u16, value: &str) -> Result<(), UpdateError> {
        Ok(self.resources_mut()?.set_resource_string(id, value)?)
    }

    pub fn get_resource_string(&self, id: u16) -> Result<Option<String>, UpdateError> {
        Ok(self.loaded()?.resources.get_resource_string(id))
    }

    pub fn set_rcdata(&mut self, id: u16, data: Vec<u8>) -> Result<(), UpdateError> {
        self.resources_mut()?.set_rcdata(id, data);
        Ok(())
    }

    pub fn set_rcdata_file<P: AsRef<Path>>(&mut self, id: u16, path: P) -> Result<(), UpdateError> {
        let data = read_input(path.as_ref())?;
        self.set_rcdata(id, data)
    }

    pub fn get_rcdata(&self, id: u16) -> Result<Option<Vec<u8>>, UpdateError> {
        Ok(self.loaded()?.resources.get_rcdata(id).map(<[u8]>::to_vec))
    }

    /// Write the loaded executable with all edits applied back to its path.
    pub fn commit(&mut self) -> Result<(), UpdateError> {
        let path = self.loaded()?.path.clone();
        self.commit_to(path)
    }

    /// Write the loaded executable with all edits applied to the path.
    ///
    /// The image is rebuilt from the loaded file on every call. On failure the target file is unchanged.
    pub fn commit_to<P: AsRef<Path>>(&mut self, path: P) -> Result<(), UpdateError> {
        let loaded = self.loaded.as_mut().ok_or(UpdateError::NotLoaded)?;
        let data = commit(&loaded.image, &loaded.resources)?;
        write_atomic(path.as_ref(), &data)?;
        info!("committed {} bytes to {}", data.len(), path.as_ref().display());
        loaded.committed = Some(data);
        Ok(())
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>, UpdateError> {
    std::fs::read(path).map_err(|source| UpdateError::Input {
        path: path.to_path_buf(),
        source,
    })
}
