use super::*;
use tsil_image::MetadataBuilder;

#[test]
fn installs_distinct_tokens_for_every_intrinsic() {
    let mut metadata = MetadataBuilder::new();
    let handles = install(&mut metadata);

    let types = [
        handles.ts_function_type,
        handles.awaiter_type,
        handles.task_builder_type,
        handles.iterator_builder_type,
    ];
    for (i, a) in types.iter().enumerate() {
        for b in &types[i + 1..] {
            assert_ne!(a, b);
        }
    }
    for t in types {
        assert!(metadata.type_def(t).finalized);
    }
}

#[test]
fn task_builder_create_starts_with_a_pending_task() {
    let mut metadata = MetadataBuilder::new();
    let handles = install(&mut metadata);
    let def = metadata.method_def(handles.task_builder_create);
    assert!(def.body.is_some());
    let interp_body = def.body.as_ref().unwrap();
    assert!(interp_body
        .iter()
        .any(|i| matches!(i, tsil_image::Instr::CallStatic(m, _) if *m == handles.awaiter_pending)));
}

#[test]
fn awaiter_complete_takes_this_and_a_value_argument() {
    let mut metadata = MetadataBuilder::new();
    let handles = install(&mut metadata);
    let def = metadata.method_def(handles.awaiter_complete);
    assert_eq!(def.param_count, 1);
    assert!(!def.is_static);
}

#[test]
fn cell_create_stores_its_argument_in_the_value_field() {
    let mut metadata = MetadataBuilder::new();
    let handles = install(&mut metadata);
    let def = metadata.method_def(handles.cell_create);
    assert!(def.is_static);
    assert_eq!(def.param_count, 1);
    let body = def.body.as_ref().unwrap();
    assert!(body
        .iter()
        .any(|i| matches!(i, tsil_image::Instr::StoreField(f) if *f == handles.cell_value_field)));
}

#[test]
fn console_log_is_a_static_single_arg_method() {
    let mut metadata = MetadataBuilder::new();
    let handles = install(&mut metadata);
    let def = metadata.method_def(handles.console_log);
    assert!(def.is_static);
    assert_eq!(def.param_count, 1);
}
