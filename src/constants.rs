//! Windows API and binary constants.

#![allow(non_upper_case_globals)]

pub type DWORD = u32;
pub type WORD = u16;
pub type LANGID = WORD;


// https://learn.microsoft.com/en-us/windows/win32/menurc/string-str

pub const VS_COMMENTS: &str = "Comments";
pub const VS_COMPANY_NAME: &str = "CompanyName";
pub const VS_FILE_DESCRIPTION: &str = "FileDescription";
pub const VS_FILE_VERSION: &str = "FileVersion";
pub const VS_INTERNAL_NAME: &str = "InternalName";
pub const VS_LEGAL_COPYRIGHT: &str = "LegalCopyright";
pub const VS_LEGAL_TRADEMARKS: &str = "LegalTrademarks";
pub const VS_ORIGINAL_FILENAME: &str = "OriginalFilename";
pub const VS_PRIVATE_BUILD: &str = "PrivateBuild";
pub const VS_PRODUCT_NAME: &str = "ProductName";
pub const VS_PRODUCT_VERSION: &str = "ProductVersion";
pub const VS_SPECIAL_BUILD: &str = "SpecialBuild";

// https://learn.microsoft.com/en-us/windows/win32/menurc/vs-versioninfo
pub const VS_VERSION_INFO_KEY: &str = "VS_VERSION_INFO";
pub const VS_STRING_FILE_INFO_KEY: &str = "StringFileInfo";
pub const VS_VAR_FILE_INFO_KEY: &str = "VarFileInfo";
pub const VS_TRANSLATION_KEY: &str = "Translation";
pub const VS_TYPE_BINARY: WORD = 0;
pub const VS_TYPE_TEXT: WORD = 1;


// https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-lcid/a9eac961-e77d-41a6-90a5-ce1a8b0cdb9c
pub const LANGUAGE_ID_NEUTRAL: LANGID = 0;
pub const LANGUAGE_ID_EN_US: LANGID = 1033; // 0x0409, en-US
// https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-ucoderef/28fefe92-d66c-4b03-90a9-97b473223d43
pub const CODE_PAGE_ID_EN_US: WORD = 1200; // 0x04B0, UTF-16LE


// https://docs.microsoft.com/en-us/windows/win32/api/verrsrc/ns-verrsrc-vs_fixedfileinfo

pub const VOS_NT_WINDOWS32: DWORD = 0x00040004;
pub const VFT_APP: DWORD = 0x00000001;
pub const VS_FFI_FILEFLAGSMASK: DWORD = 0x0000003F;
pub const VS_FIXEDFILEINFO_SIGNATURE: DWORD = 0xFEEF04BD;
pub const VS_FIXEDFILEINFO_VERSION: DWORD = 0x00010000;


// https://docs.microsoft.com/en-us/windows/win32/debug/pe-format

pub const PE_DOS_MAGIC: WORD = 0x5a4d; // MZ
pub const PE_NT_SIGNATURE: DWORD = 0x00004550; // PE00
pub const PE_32_MAGIC: WORD = 0x010b;
pub const PE_64_MAGIC: WORD = 0x020b;

pub const RESOURCE_SECTION_NAME: &str = ".rsrc";
pub const RETIRED_RESOURCE_SECTION_NAME: &str = ".oldrsrc";


// https://docs.microsoft.com/en-us/windows/win32/menurc/resource-types

pub const RT_CURSOR: WORD = 0x01;
pub const RT_BITMAP: WORD = 0x02;
pub const RT_ICON: WORD = 0x03;
pub const RT_MENU: WORD = 0x04;
pub const RT_DIALOG: WORD = 0x05;
pub const RT_STRING: WORD = 0x06;
pub const RT_RCDATA: WORD = 0x0A;
pub const RT_GROUP_CURSOR: WORD = 0x0C;
pub const RT_GROUP_ICON: WORD = 0x0E;
pub const RT_VERSION: WORD = 0x10;
pub const RT_MANIFEST: WORD = 0x18;

// https://learn.microsoft.com/en-us/windows/win32/menurc/stringtable-resource
pub const STRING_TABLE_BLOCK_SIZE: u32 = 16;


// https://docs.microsoft.com/en-us/windows/win32/debug/pe-format#section-flags

pub const IMAGE_SCN_CNT_INITIALIZED_DATA: DWORD = 0x00000040;
pub const IMAGE_SCN_MEM_READ: DWORD = 0x40000000;


// https://learn.microsoft.com/en-us/windows/win32/sbscs/application-manifests#trustinfo

pub const EXECUTION_LEVEL_AS_INVOKER: &str = "asInvoker";
pub const EXECUTION_LEVEL_HIGHEST_AVAILABLE: &str = "highestAvailable";
pub const EXECUTION_LEVEL_REQUIRE_ADMINISTRATOR: &str = "requireAdministrator";
