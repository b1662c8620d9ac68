#![allow(dead_code)]

use rcedit::*;
use std::sync::Once;

pub const FILE_ALIGNMENT: u32 = 0x200;
pub const SECTION_ALIGNMENT: u32 = 0x1000;
pub const CHECK_SUM: u32 = 0x1234;

static INIT_LOGGER: Once = Once::new();
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::builder()
            .is_test(true)
            .filter_level(log::LevelFilter::Debug)
            .format_timestamp(None)
            .format_module_path(false)
            .format_level(true)
            .format_target(false)
            .write_style(env_logger::WriteStyle::Auto)
            .init();
    });
}

pub enum SectionData {
    Raw(Vec<u8>),
    Resources(ResourceDirectory),
}

/// Builder for minimal PE32 and PE32+ images.
pub struct PeBuilder {
    pub pe64:                    bool,
    pub headers_size:            u32,
    pub number_of_rva_and_sizes: u32,
    pub sections:                Vec<(&'static str, SectionData)>,
    pub overlay:                 Vec<u8>,
    pub certificate:             bool,
}

impl PeBuilder {
    pub fn new(pe64: bool) -> Self {
        Self {
            pe64,
            headers_size: 0x400,
            number_of_rva_and_sizes: 16,
            sections: Vec::new(),
            overlay: Vec::new(),
            certificate: false,
        }
    }

    pub fn section(mut self, name: &'static str, data: Vec<u8>) -> Self {
        self.sections.push((name, SectionData::Raw(data)));
        self
    }

    pub fn resources(mut self, resources: ResourceDirectory) -> Self {
        self.sections.push((".rsrc", SectionData::Resources(resources)));
        self
    }

    /// Data after the last section, referenced by the certificate table if `certificate` is set.
    pub fn overlay(mut self, overlay: Vec<u8>, certificate: bool) -> Self {
        self.overlay = overlay;
        self.certificate = certificate;
        self
    }

    pub fn headers_size(mut self, size: u32) -> Self {
        self.headers_size = size;
        self
    }

    pub fn data_directories(mut self, count: u32) -> Self {
        self.number_of_rva_and_sizes = count;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let optional_header_size =
            if self.pe64 { 112 } else { 96 } + self.number_of_rva_and_sizes as usize * 8;
        let mut data_directories = vec![(0u32, 0u32); self.number_of_rva_and_sizes as usize];

        // section data and headers
        let mut raw = Vec::new();
        let mut headers = Vec::new();
        let mut pointer = self.headers_size;
        let mut virtual_address = SECTION_ALIGNMENT;
        for (name, data) in self.sections {
            let data = match data {
                SectionData::Raw(data) => data,
                SectionData::Resources(resources) => {
                    let data = resources.build(virtual_address);
                    if let Some(directory) = data_directories.get_mut(2) {
                        *directory = (virtual_address, data.len() as u32);
                    }
                    data
                }
            };
            let raw_size = align(data.len() as u32, FILE_ALIGNMENT);
            let mut header = Vec::with_capacity(40);
            let mut section_name = [0u8; 8];
            section_name[..name.len()].copy_from_slice(name.as_bytes());
            header.extend_from_slice(&section_name);
            header.extend_from_slice(&(data.len() as u32).to_le_bytes());
            header.extend_from_slice(&virtual_address.to_le_bytes());
            header.extend_from_slice(&raw_size.to_le_bytes());
            header.extend_from_slice(&pointer.to_le_bytes());
            header.extend_from_slice(&[0; 12]);
            header.extend_from_slice(&0x40000040u32.to_le_bytes());
            headers.push(header);

            let mut data = data;
            data.resize(raw_size as usize, 0);
            raw.extend_from_slice(&data);
            pointer += raw_size;
            virtual_address += align(raw_size.max(1), SECTION_ALIGNMENT);
        }
        if self.certificate && self.number_of_rva_and_sizes > 4 {
            data_directories[4] = (pointer, self.overlay.len() as u32);
        }
        let size_of_image = virtual_address;

        let mut image = vec![0u8; self.headers_size as usize];
        put(&mut image, 0, b"MZ");
        put(&mut image, 0x3c, &0x40u32.to_le_bytes());
        put(&mut image, 0x40, b"PE\0\0");

        let mut coff = Vec::new();
        coff.extend_from_slice(&(if self.pe64 { 0x8664u16 } else { 0x14c }).to_le_bytes());
        coff.extend_from_slice(&(headers.len() as u16).to_le_bytes());
        coff.extend_from_slice(&[0; 12]);
        coff.extend_from_slice(&(optional_header_size as u16).to_le_bytes());
        coff.extend_from_slice(&0x0102u16.to_le_bytes());
        put(&mut image, 0x44, &coff);

        let mut optional = Vec::new();
        optional.extend_from_slice(&(if self.pe64 { 0x20bu16 } else { 0x10b }).to_le_bytes());
        optional.extend_from_slice(&[14, 0]);
        optional.extend_from_slice(&0x200u32.to_le_bytes()); // size of code
        optional.extend_from_slice(&0x400u32.to_le_bytes()); // size of initialized data
        optional.extend_from_slice(&0u32.to_le_bytes());
        optional.extend_from_slice(&0x1000u32.to_le_bytes()); // entry point
        optional.extend_from_slice(&0x1000u32.to_le_bytes()); // base of code
        if self.pe64 {
            optional.extend_from_slice(&0x140000000u64.to_le_bytes());
        } else {
            optional.extend_from_slice(&0x2000u32.to_le_bytes()); // base of data
            optional.extend_from_slice(&0x400000u32.to_le_bytes());
        }
        optional.extend_from_slice(&SECTION_ALIGNMENT.to_le_bytes());
        optional.extend_from_slice(&FILE_ALIGNMENT.to_le_bytes());
        for version in [6u16, 0, 0, 0, 6, 0] {
            optional.extend_from_slice(&version.to_le_bytes());
        }
        optional.extend_from_slice(&0u32.to_le_bytes());
        optional.extend_from_slice(&size_of_image.to_le_bytes());
        optional.extend_from_slice(&self.headers_size.to_le_bytes());
        optional.extend_from_slice(&CHECK_SUM.to_le_bytes());
        optional.extend_from_slice(&2u16.to_le_bytes()); // subsystem
        optional.extend_from_slice(&0x8160u16.to_le_bytes());
        for size in [0x100000u64, 0x1000, 0x100000, 0x1000] {
            if self.pe64 {
                optional.extend_from_slice(&size.to_le_bytes());
            } else {
                optional.extend_from_slice(&(size as u32).to_le_bytes());
            }
        }
        optional.extend_from_slice(&0u32.to_le_bytes());
        optional.extend_from_slice(&self.number_of_rva_and_sizes.to_le_bytes());
        for (address, size) in data_directories {
            optional.extend_from_slice(&address.to_le_bytes());
            optional.extend_from_slice(&size.to_le_bytes());
        }
        assert_eq!(optional.len(), optional_header_size);
        put(&mut image, 0x58, &optional);

        let mut offset = 0x58 + optional_header_size;
        for header in headers {
            put(&mut image, offset, &header);
            offset += 40;
        }

        image.extend_from_slice(&raw);
        image.extend_from_slice(&self.overlay);
        image
    }
}

fn put(image: &mut [u8], offset: usize, data: &[u8]) {
    image[offset..offset + data.len()].copy_from_slice(data);
}

pub fn align(value: u32, alignment: u32) -> u32 { value.div_ceil(alignment) * alignment }

/// Icon file with `count` fake images of increasing size.
pub fn icon(count: usize) -> Vec<u8> {
    let images = (0..count)
        .map(|index| {
            let size = 16 * (index as u8 + 1);
            IconImage {
                width:       size,
                height:      size,
                color_count: 0,
                planes:      1,
                bit_count:   32,
                data:        vec![index as u8 + 1; 40 + index * 10],
            }
        })
        .collect::<Vec<_>>();
    build_icon(&images)
}

/// A resource directory with an entry of most supported resource types.
pub fn sample_resources() -> ResourceDirectory {
    let mut resources = ResourceDirectory::default();
    resources.set_version_string("CompanyName", "Example Corp").unwrap();
    resources.set_file_version([1, 0, 0, 0]).unwrap();
    resources.set_icon(&icon(2)).unwrap();
    resources.set_manifest(&rcedit::default_manifest(ExecutionLevel::AsInvoker));
    resources.set_resource_string(1, "first").unwrap();
    resources.set_rcdata(7, b"payload".to_vec());
    resources
}

/// All resource leaves of the directory with their data.
pub fn all_leaves(resources: &ResourceDirectory) -> Vec<(ResourcePath, Vec<u8>)> {
    resources
        .root()
        .entries()
        .into_iter()
        .flat_map(|type_| resources.leaves(type_.clone()))
        .map(|(path, data)| (path, data.data().to_vec()))
        .collect()
}

/// Image with a code section, a resource section and a data section after it.
pub fn image_with_resources(pe64: bool) -> Vec<u8> {
    PeBuilder::new(pe64)
        .section(".text", vec![0xcc; 0x180])
        .resources(sample_resources())
        .section(".data", vec![0xda; 0x300])
        .build()
}
