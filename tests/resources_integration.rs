//! Resource directory walking over synthetic images.

mod common;

use common::{put_u16, put_u32, resources_blob, PeBuilder, ResourceSpec};
use pescope::pe::types::ResourceId;
use pescope::PeImage;

fn spec(type_id: u32, name_id: u32, data: Vec<u8>) -> ResourceSpec {
    ResourceSpec {
        type_id,
        name_id,
        language: 1033,
        data,
    }
}

#[test]
fn walks_three_level_tree_in_order() {
    let builder = PeBuilder::new().text_section(vec![0x90; 0x100]);
    let rsrc_va = builder.section_va(1);
    let blob = resources_blob(
        &[
            spec(10, 101, b"first resource".to_vec()),
            spec(24, 1, b"<assembly/>".to_vec()),
        ],
        rsrc_va,
    );
    let image = PeImage::parse(builder.resource_section(blob).build());

    assert!(image.valid());
    let resources = image.resources();
    assert_eq!(resources.len(), 2);

    assert_eq!(resources[0].resource_type, ResourceId::Id(10));
    assert_eq!(resources[0].name, ResourceId::Id(101));
    assert_eq!(resources[0].language, 1033);
    assert_eq!(resources[0].data(image.data()), b"first resource");

    assert_eq!(resources[1].resource_type, ResourceId::Id(24));
    assert_eq!(resources[1].data(image.data()), b"<assembly/>");
}

#[test]
fn resource_entropy_is_lazy_and_bounded() {
    let builder = PeBuilder::new().text_section(vec![0x90; 0x100]);
    let rsrc_va = builder.section_va(1);
    let constant = vec![0xAA; 256];
    let varied: Vec<u8> = (0..=255u8).collect();
    let blob = resources_blob(&[spec(10, 1, constant), spec(10, 2, varied)], rsrc_va);
    let image = PeImage::parse(builder.resource_section(blob).build());

    let resources = image.resources();
    assert!(resources[0].entropy(image.data()) < 1e-9);
    let e = resources[1].entropy(image.data());
    assert!((7.9..=8.0).contains(&e));
}

// Scenario: a directory entry whose offset points back at an ancestor is
// skipped; the remaining siblings are still reported.
#[test]
fn cyclic_entry_is_skipped_and_siblings_survive() {
    let builder = PeBuilder::new().text_section(vec![0x90; 0x100]);
    let rsrc_va = builder.section_va(1);
    let mut blob = resources_blob(
        &[
            spec(10, 101, b"victim".to_vec()),
            spec(11, 102, b"survivor".to_vec()),
        ],
        rsrc_va,
    );
    // Retarget the first root entry at the root itself.
    put_u32(&mut blob, 16 + 4, 0x8000_0000);

    let image = PeImage::parse(builder.resource_section(blob).build());
    let resources = image.resources();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].resource_type, ResourceId::Id(11));
    assert_eq!(resources[0].data(image.data()), b"survivor");
}

#[test]
fn subdirectory_below_language_level_is_ignored() {
    let builder = PeBuilder::new().text_section(vec![0x90; 0x100]);
    let rsrc_va = builder.section_va(1);
    let mut blob = resources_blob(&[spec(10, 101, b"payload".to_vec())], rsrc_va);
    // Turn the language-level leaf pointer into a subdirectory pointer; the
    // walk is already at the third level, so this must be skipped.
    let lang_dir = 16 + 8 + 24;
    put_u32(&mut blob, lang_dir + 20, 0x8000_0000 | (lang_dir as u32 + 24));

    let image = PeImage::parse(builder.resource_section(blob).build());
    assert!(image.resources().is_empty());
}

#[test]
fn malformed_leaf_does_not_poison_siblings() {
    let builder = PeBuilder::new().text_section(vec![0x90; 0x100]);
    let rsrc_va = builder.section_va(1);
    let mut blob = resources_blob(
        &[
            spec(10, 101, b"bad".to_vec()),
            spec(11, 102, b"good".to_vec()),
        ],
        rsrc_va,
    );
    // Corrupt the first leaf's data RVA so it cannot resolve.
    let first_data_entry = 16 + 16 + 24 + 24;
    put_u32(&mut blob, first_data_entry, 0x0990_0000);

    let image = PeImage::parse(builder.resource_section(blob).build());
    let resources = image.resources();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].data(image.data()), b"good");
}

#[test]
fn declared_size_is_clamped_to_file() {
    let builder = PeBuilder::new().text_section(vec![0x90; 0x100]);
    let rsrc_va = builder.section_va(1);
    let mut blob = resources_blob(&[spec(10, 101, vec![0x42; 32])], rsrc_va);
    // Inflate the declared size far past the end of the file.
    let data_entry = 16 + 8 + 24 + 24;
    put_u32(&mut blob, data_entry + 4, 0x00FF_0000);

    let image = PeImage::parse(builder.resource_section(blob).build());
    let resources = image.resources();
    assert_eq!(resources.len(), 1);
    assert!(resources[0].data.end <= image.file_size());
    assert_eq!(resources[0].declared_size, 0x00FF_0000);
}

#[test]
fn truncated_directory_counts_are_contained() {
    let builder = PeBuilder::new().text_section(vec![0x90; 0x100]);
    let rsrc_va = builder.section_va(1);
    let mut blob = resources_blob(&[spec(10, 101, b"x".to_vec())], rsrc_va);
    // Claim far more id entries than the section holds.
    put_u16(&mut blob, 14, 0x4000);

    let image = PeImage::parse(builder.resource_section(blob).build());
    // The walk terminates; whatever was readable is reported.
    let _ = image.resources();
}
