mod common;

use common::*;
use rcedit::{constants::*, *};

#[test]
fn parse_version_quads() {
    assert_eq!(parse_version_quad("1.2.3.4").unwrap(), [1, 2, 3, 4]);
    assert_eq!(parse_version_quad("1.2.3").unwrap(), [1, 2, 3, 0]);
    assert_eq!(parse_version_quad("1.2").unwrap(), [1, 2, 0, 0]);
    assert_eq!(parse_version_quad("1").unwrap(), [1, 0, 0, 0]);
    assert_eq!(parse_version_quad("2.5-beta").unwrap(), [2, 5, 0, 0], "trailing text ignored");
    assert_eq!(parse_version_quad("1.2.x").unwrap(), [1, 2, 0, 0]);

    assert!(matches!(parse_version_quad("abc"), Err(ValidationError::MalformedVersion(_))));
    assert!(matches!(parse_version_quad(""), Err(ValidationError::MalformedVersion(_))));
    assert!(parse_version_quad("70000.1").is_err(), "components are 16 bit");
    assert!(matches!(parse_version_quad("70000"), Err(ValidationError::MalformedVersion(_))));
    assert_eq!(parse_version_quad("65535").unwrap(), [65535, 0, 0, 0]);

    assert_eq!(format_version_quad([1, 2, 3, 4]), "1.2.3.4");
}

#[test]
fn set_and_get_version_strings() {
    init_logger();

    let mut resources = ResourceDirectory::default();
    assert_eq!(resources.get_version_string("CompanyName").unwrap(), None);

    resources.set_version_string("CompanyName", "Example Corp").unwrap();
    resources.set_version_string("ProductName", "Example").unwrap();
    resources.set_version_string("CompanyName", "Other Corp").unwrap();
    assert_eq!(resources.get_version_string("CompanyName").unwrap().as_deref(), Some("Other Corp"));
    assert_eq!(resources.get_version_string("ProductName").unwrap().as_deref(), Some("Example"));
    assert_eq!(resources.get_version_string("Comments").unwrap(), None);

    let info = resources.get_version_info().unwrap().unwrap();
    let language = VersionLanguage {
        language:  LANGUAGE_ID_EN_US,
        code_page: CODE_PAGE_ID_EN_US,
    };
    assert_eq!(info.primary_language(), language);
    assert_eq!(info.translations, vec![language], "translation added with the string table");
    assert_eq!(resources.leaves(RT_VERSION).len(), 1);
}

#[test]
fn set_file_and_product_version() {
    init_logger();

    let mut resources = ResourceDirectory::default();
    resources.set_version_string("CompanyName", "Example Corp").unwrap();
    resources.set_file_version([1, 2, 3, 4]).unwrap();
    resources.set_product_version([5, 6, 0, 0]).unwrap();

    let info = resources.get_version_info().unwrap().unwrap();
    assert_eq!(info.file_version(), [1, 2, 3, 4]);
    assert_eq!(info.product_version(), [5, 6, 0, 0]);
    assert_eq!({ info.info.file_version.major }, 0x00010002);
    assert_eq!({ info.info.file_version.minor }, 0x00030004);
    assert_eq!(info.string(VS_FILE_VERSION), Some("1.2.3.4"));
    assert_eq!(info.string(VS_PRODUCT_VERSION), Some("5.6.0.0"));
    assert_eq!(info.string(VS_COMPANY_NAME), Some("Example Corp"), "other strings kept");
}

#[test]
fn version_info_round_trip() {
    init_logger();

    let mut info = VersionInfo::default();
    info.set_string("CompanyName", "Example Corp");
    info.set_string("Comments", "");
    info.set_file_version([3, 2, 1, 0]);

    let data = info.build().unwrap();
    assert_eq!(data.len() % 4, 0);
    assert_eq!(u16::from_le_bytes([data[0], data[1]]) as usize, data.len(), "root length covers the block");

    let parsed = VersionInfo::parse(&data).unwrap();
    assert_eq!(parsed, info);
    assert_eq!(parsed.string("Comments"), Some(""));
}

#[test]
fn version_strings_fall_back_across_languages() {
    init_logger();

    let german = VersionLanguage {
        language:  0x0407,
        code_page: 1252,
    };
    let mut info = VersionInfo::default();
    info.strings.entry(german).or_default().insert("CompanyName".into(), "Beispiel".into());
    info.translations.push(german);

    let mut resources = ResourceDirectory::default();
    resources.set_version_info(&info).unwrap();
    resources.set_version_string("ProductName", "Produkt").unwrap();

    let info = resources.get_version_info().unwrap().unwrap();
    assert_eq!(info.primary_language(), german, "existing language is used for new strings");
    assert_eq!(info.strings.len(), 1);
    assert_eq!(info.string("ProductName"), Some("Produkt"));
    assert_eq!(resources.get_version_string("CompanyName").unwrap().as_deref(), Some("Beispiel"));
}

#[test]
fn reject_version_strings_exceeding_node_length() {
    init_logger();

    let mut resources = ResourceDirectory::default();
    resources.set_version_string("Comments", "short").unwrap();

    // the whole block has to fit a 16 bit length
    let long = "x".repeat(30000);
    resources.set_version_string("Comments", &long).unwrap();
    assert_eq!(resources.get_version_string("Comments").unwrap(), Some(long.clone()));

    let too_long = "x".repeat(40000);
    let result = resources.set_version_string("Comments", &too_long);
    assert!(matches!(result, Err(ValidationError::ValueTooLong(_, _))));
    assert_eq!(resources.get_version_string("Comments").unwrap(), Some(long), "previous value kept");

    let mut info = VersionInfo::default();
    info.set_string("Comments", too_long);
    assert!(info.build().is_err());
}

#[test]
fn reject_corrupt_version_info() {
    init_logger();

    let mut resources = ResourceDirectory::default();
    resources.insert_or_replace(
        &ResourcePath::new(RT_VERSION, 1u16, LANGUAGE_ID_EN_US),
        vec![0xff, 0x7f, 0, 0].into(),
    );
    assert!(matches!(
        resources.get_version_string("CompanyName"),
        Err(ValidationError::CorruptVersionResource(_))
    ));
    assert!(matches!(
        resources.set_version_string("CompanyName", "Example"),
        Err(ValidationError::CorruptVersionResource(_))
    ));
}

#[test]
fn set_icon_replaces_icons() {
    init_logger();

    let mut resources = ResourceDirectory::default();
    resources.set_icon(&icon(2)).unwrap();
    assert_eq!(resources.leaves(RT_ICON).len(), 2);

    resources.set_icon(&icon(3)).unwrap();
    let icons = resources.leaves(RT_ICON);
    assert_eq!(icons.len(), 3, "previous icons removed");
    let groups = resources.leaves(RT_GROUP_ICON);
    assert_eq!(groups.len(), 1);

    let group = groups[0].1.data();
    assert_eq!(u16::from_le_bytes([group[4], group[5]]), 3, "group declares three images");
    assert_eq!(group.len(), 6 + 3 * 14);

    // group entries reference the icon ids in order
    let ids = (0..3)
        .map(|index| {
            let offset = 6 + index * 14 + 12;
            u16::from_le_bytes([group[offset], group[offset + 1]]) as u32
        })
        .collect::<Vec<_>>();
    let icon_ids = icons.iter().filter_map(|(path, _)| path.name.id()).collect::<Vec<_>>();
    assert_eq!(ids, icon_ids);
}

#[test]
fn get_icon_reassembles_icon_file() {
    init_logger();

    let mut resources = ResourceDirectory::default();
    assert_eq!(resources.get_icon().unwrap(), None);

    let source = icon(3);
    resources.set_icon(&source).unwrap();
    let rebuilt = resources.get_icon().unwrap().unwrap();
    assert_eq!(parse_icon(&rebuilt).unwrap(), parse_icon(&source).unwrap());

    resources.remove_icon();
    assert!(resources.leaves(RT_ICON).is_empty());
    assert!(resources.leaves(RT_GROUP_ICON).is_empty());
}

#[test]
fn set_icon_keeps_named_group() {
    init_logger();

    let mut resources = ResourceDirectory::default();
    let group = ResourcePath {
        type_:    RT_GROUP_ICON.into(),
        name:     "MAINICON".into(),
        language: ResourceEntryName::ID(0x0407),
    };
    resources.insert_or_replace(&group, vec![0, 0, 1, 0, 0, 0].into());

    resources.set_icon(&icon(1)).unwrap();
    let groups = resources.leaves(RT_GROUP_ICON);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].0, group);
    let icons = resources.leaves(RT_ICON);
    assert_eq!(icons[0].0.language_id(), Some(0x0407), "icons use the group language");
}

#[test]
fn reject_malformed_icons() {
    init_logger();

    let mut resources = ResourceDirectory::default();
    resources.set_icon(&icon(1)).unwrap();
    let before = all_leaves(&resources);

    let source = icon(2);
    let cases: [&[u8]; 4] = [
        &[],
        &[0, 0, 2, 0, 1, 0],
        &[0, 0, 1, 0, 0, 0],
        &source[..source.len() - 1],
    ];
    for case in cases {
        assert!(matches!(resources.set_icon(case), Err(ValidationError::MalformedIcon(_))));
    }
    assert_eq!(all_leaves(&resources), before, "failed edits leave the icons unchanged");
}

#[test]
fn set_execution_level_without_manifest() {
    init_logger();

    let mut resources = ResourceDirectory::default();
    assert_eq!(resources.execution_level(), None);
    resources.set_execution_level(ExecutionLevel::HighestAvailable);

    assert_eq!(resources.execution_level(), Some(ExecutionLevel::HighestAvailable));
    let manifests = resources.leaves(RT_MANIFEST);
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].0, ResourcePath::new(RT_MANIFEST, 1u16, LANGUAGE_ID_NEUTRAL));
}

#[test]
fn replace_execution_level() {
    init_logger();

    let manifest = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v1" manifestVersion="1.0">
  <trustInfo xmlns="urn:schemas-microsoft-com:asm.v3">
    <security>
      <requestedPrivileges>
        <requestedExecutionLevel level='asInvoker' uiAccess="false"/>
      </requestedPrivileges>
    </security>
  </trustInfo>
</assembly>
"#;
    let mut resources = ResourceDirectory::default();
    resources.set_manifest(manifest);
    assert_eq!(resources.execution_level(), Some(ExecutionLevel::AsInvoker));

    resources.set_execution_level(ExecutionLevel::RequireAdministrator);
    assert_eq!(
        resources.get_manifest().unwrap(),
        manifest.replace("'asInvoker'", "'requireAdministrator'"),
        "only the level value changes"
    );
}

#[test]
fn insert_execution_level_into_manifest() {
    init_logger();

    let manifest = r#"<assembly xmlns="urn:schemas-microsoft-com:asm.v1" manifestVersion="1.0">
  <assemblyIdentity name="Example" version="1.0.0.0"/>
</assembly>"#;
    let updated = set_manifest_execution_level(manifest, ExecutionLevel::AsInvoker);
    assert!(updated.contains(r#"<assemblyIdentity name="Example" version="1.0.0.0"/>"#));
    assert!(updated.ends_with("</assembly>"));
    assert_eq!(manifest_execution_level(&updated), Some(ExecutionLevel::AsInvoker));

    let prefixed = r#"<asmv1:assembly xmlns:asmv1="urn:schemas-microsoft-com:asm.v1">
  <asmv3:trustInfo xmlns:asmv3="urn:schemas-microsoft-com:asm.v3"><asmv3:security><asmv3:requestedPrivileges>
    <asmv3:requestedExecutionLevel uiAccess="false"/>
  </asmv3:requestedPrivileges></asmv3:security></asmv3:trustInfo>
</asmv1:assembly>"#;
    let updated = set_manifest_execution_level(prefixed, ExecutionLevel::HighestAvailable);
    assert!(updated.contains(r#"<asmv3:requestedExecutionLevel level="highestAvailable" uiAccess="false"/>"#));
    assert_eq!(manifest_execution_level(&updated), Some(ExecutionLevel::HighestAvailable));
}

#[test]
fn parse_execution_levels() {
    assert_eq!("asInvoker".parse::<ExecutionLevel>().unwrap(), ExecutionLevel::AsInvoker);
    assert_eq!("highestAvailable".parse::<ExecutionLevel>().unwrap(), ExecutionLevel::HighestAvailable);
    assert_eq!(
        "requireAdministrator".parse::<ExecutionLevel>().unwrap(),
        ExecutionLevel::RequireAdministrator
    );
    assert!(matches!(
        "bogus".parse::<ExecutionLevel>(),
        Err(ValidationError::InvalidExecutionLevel(_))
    ));
    assert!("AsInvoker".parse::<ExecutionLevel>().is_err(), "levels are case sensitive");
    assert_eq!(ExecutionLevel::RequireAdministrator.to_string(), "requireAdministrator");
}

#[test]
fn set_manifest_keeps_single_manifest() {
    init_logger();

    let mut resources = ResourceDirectory::default();
    let first = ResourcePath::new(RT_MANIFEST, 1u16, LANGUAGE_ID_EN_US);
    let second = ResourcePath::new(RT_MANIFEST, 2u16, LANGUAGE_ID_EN_US);
    resources.insert_or_replace(&first, b"<assembly/>".to_vec().into());
    resources.insert_or_replace(&second, b"<assembly/>".to_vec().into());

    resources.set_manifest_data(b"\xef\xbb\xbf<assembly></assembly>".to_vec());
    let manifests = resources.leaves(RT_MANIFEST);
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].0, first, "first manifest keeps its location");
    assert_eq!(resources.get_manifest().as_deref(), Some("<assembly></assembly>"), "bom stripped");
}

#[test]
fn set_and_get_resource_strings() {
    init_logger();

    let mut resources = ResourceDirectory::default();
    assert_eq!(resources.get_resource_string(1), None);

    resources.set_resource_string(1, "hi").unwrap();
    resources.set_resource_string(17, "block two").unwrap();
    assert_eq!(resources.get_resource_string(1).as_deref(), Some("hi"));
    assert_eq!(resources.get_resource_string(17).as_deref(), Some("block two"));
    assert_eq!(resources.get_resource_string(2), None, "empty slot");
    assert_eq!(resources.get_resource_string(100), None, "missing block");

    let blocks = resources.leaves(RT_STRING);
    assert_eq!(
        blocks.iter().map(|(path, _)| path.name.id()).collect::<Vec<_>>(),
        vec![Some(1), Some(2)]
    );
    let mut expected = vec![0, 0, 2, 0, b'h', 0, b'i', 0];
    expected.resize(8 + 14 * 2, 0);
    assert_eq!(blocks[0].1.data(), &expected[..]);

    resources.set_resource_string(1, "").unwrap();
    assert_eq!(resources.get_resource_string(1), None);
    assert_eq!(resources.leaves(RT_STRING).len(), 1, "emptied block removed");
}

#[test]
fn resource_strings_keep_block_language() {
    init_logger();

    let mut block = StringBlock::default();
    block.set(0, "null").unwrap();
    let path = ResourcePath::new(RT_STRING, 1u16, 0x0407);
    let mut resources = ResourceDirectory::default();
    resources.insert_or_replace(&path, block.build().into());

    resources.set_resource_string(3, "drei").unwrap();
    let blocks = resources.leaves(RT_STRING);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].0, path);
    assert_eq!(resources.get_resource_string(0).as_deref(), Some("null"));
    assert_eq!(resources.get_resource_string(3).as_deref(), Some("drei"));
}

#[test]
fn reject_resource_strings_exceeding_length_prefix() {
    init_logger();

    let mut resources = ResourceDirectory::default();
    let longest = "y".repeat(u16::MAX as usize);
    resources.set_resource_string(1, &longest).unwrap();
    assert_eq!(resources.get_resource_string(1).map(|string| string.len()), Some(longest.len()));

    let result = resources.set_resource_string(1, &"y".repeat(u16::MAX as usize + 1));
    assert!(matches!(result, Err(ValidationError::ValueTooLong(_, _))));
    assert_eq!(resources.get_resource_string(1), Some(longest), "previous value kept");

    let mut block = StringBlock::default();
    assert!(block.set(0, &"z".repeat(70000)).is_err());
    assert!(block.is_empty());
}

#[test]
fn string_blocks_tolerate_truncation() {
    assert_eq!(StringBlock::locate(0), (1, 0));
    assert_eq!(StringBlock::locate(31), (2, 15));

    let block = StringBlock::parse(&[0, 0, 3, 0, b'a', 0]);
    assert_eq!(block.get(0), None);
    assert_eq!(block.get(1), None, "string exceeding the data is dropped");
    assert!(block.is_empty());
}

#[test]
fn set_and_get_rcdata() {
    init_logger();

    let mut resources = sample_resources();
    let before = all_leaves(&resources);

    resources.set_rcdata(101, b"blob".to_vec());
    assert_eq!(resources.get_rcdata(101), Some(&b"blob"[..]));
    assert_eq!(resources.get_rcdata(102), None);

    let after = all_leaves(&resources);
    assert_eq!(after.len(), before.len() + 1);
    for leaf in &before {
        assert!(after.contains(leaf), "other resources unchanged: {:?}", leaf.0);
    }

    resources.set_rcdata(101, b"replaced".to_vec());
    assert_eq!(resources.get_rcdata(101), Some(&b"replaced"[..]));
    assert_eq!(resources.leaves(RT_RCDATA).len(), 2);
}
