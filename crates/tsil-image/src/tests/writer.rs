use super::*;
use crate::metadata::{FieldType, MetadataBuilder, TypeKind};
use crate::opcode::Instr;
use std::io::Read;

fn sample_metadata() -> MetadataBuilder {
    let mut mb = MetadataBuilder::new();
    let ty = mb.define_type("$Program", None, TypeKind::Class, true);
    let field = mb.define_field(ty, "count", true, FieldType::Int32);
    let main = mb.define_method(ty, "Main", true, false, 0);
    mb.set_method_body(
        main,
        1,
        vec![
            Instr::LoadConstNum(1.0),
            Instr::StoreStaticField(field),
            Instr::RetVoid,
        ],
    );
    mb.set_entry_point(main);
    mb.finalize_type(ty);
    mb
}

#[test]
fn serialize_fails_on_unverified_metadata() {
    let mb = MetadataBuilder::new();
    assert!(serialize(&mb).is_err());
}

#[test]
fn serialize_succeeds_and_starts_with_magic() {
    let mb = sample_metadata();
    let bytes = serialize(&mb).expect("verified metadata should serialize");
    assert_eq!(&bytes[0..4], MAGIC);
}

#[test]
fn serializing_the_same_metadata_twice_is_byte_identical() {
    let mb = sample_metadata();
    let a = serialize(&mb).unwrap();
    let b = serialize(&mb).unwrap();
    assert_eq!(a, b);
}

#[test]
fn write_to_path_produces_a_file_matching_serialize() {
    let mb = sample_metadata();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.tsilimg");
    write_to_path(&mb, &path).expect("write should succeed");

    let mut file = std::fs::File::open(&path).unwrap();
    let mut on_disk = Vec::new();
    file.read_to_end(&mut on_disk).unwrap();

    assert_eq!(on_disk, serialize(&mb).unwrap());
}

#[test]
fn write_to_path_reports_unverified_metadata_without_creating_a_file() {
    let mb = MetadataBuilder::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.tsilimg");
    let err = write_to_path(&mb, &path).unwrap_err();
    assert!(matches!(err, ImageError::Verification(_)));
    assert!(!path.exists());
}
