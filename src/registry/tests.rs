use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use super::*;
use crate::model::{BoundingBox, FieldType};
use crate::pdf::fixtures::{labelled_template_pdf, sized_template_pdf, template_pdf};
use crate::schema::SchemaPath;

fn registry() -> (TempDir, TemplateRegistry) {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = TemplateRegistry::new(dir.path());
    (dir, registry)
}

fn mapping(path: &str, page: usize, bbox: BoundingBox) -> FieldMapping {
    FieldMapping {
        schema_path: SchemaPath::parse(path).unwrap(),
        page,
        bbox,
        field_type: FieldType::Text,
        format: None,
        font_size: None,
        checked_when_equals: None,
    }
}

fn name_box() -> BoundingBox {
    BoundingBox {
        x: 72.0,
        y: 600.0,
        width: 228.0,
        height: 14.0,
    }
}

#[test]
fn template_id_depends_only_on_bytes() {
    let (_dir, registry) = registry();
    let first = template_pdf(1);
    let same = first.clone();
    let other = sized_template_pdf(1, 595, 842);

    assert_eq!(
        registry.resolve(&first).template_id,
        registry.resolve(&same).template_id
    );
    assert_ne!(
        registry.resolve(&first).template_id,
        registry.resolve(&other).template_id
    );
    assert_eq!(registry.resolve(&first).template_id.len(), 64);
    assert_eq!(registry.resolve(&first).state, ConfigState::Absent);
}

#[test]
fn register_starter_persists_template_config_and_hints() {
    let (_dir, registry) = registry();
    let template = template_pdf(2);
    let template_id = template_id_for(&template);

    let starter = registry
        .register_starter(&template_id, &template, Some("case_1"))
        .expect("starter registered");
    assert!(starter.fields.is_empty());
    assert_eq!(starter.page_count, 2);
    assert_eq!(starter.source_case_id.as_deref(), Some("case_1"));

    let dir = registry.template_dir(&template_id);
    assert_eq!(fs::read(dir.join(TEMPLATE_FILE)).unwrap(), template);
    assert!(matches!(registry.resolve(&template).state, ConfigState::Starter(_)));

    let hints: FieldHints =
        serde_json::from_slice(&fs::read(registry.hints_path(&template_id)).unwrap()).unwrap();
    assert_eq!(hints.page_count, 2);
    assert_eq!(hints.candidates.len(), 4);
    assert_eq!(hints.candidates[0].guess_type, FieldType::Text);
    assert_eq!(hints.candidates[0].bbox, name_box());
    assert_eq!(hints.candidates[1].guess_type, FieldType::Checkbox);
    assert_eq!(hints.candidates[3].page, 1);
}

#[test]
fn register_starter_never_overwrites_operator_fields() {
    let (_dir, registry) = registry();
    let template = template_pdf(1);
    let template_id = template_id_for(&template);

    registry.register_starter(&template_id, &template, None).unwrap();
    let configured = registry
        .update_fields(&template_id, vec![mapping("investor.legal_name", 0, name_box())])
        .expect("fields accepted");
    let before = fs::read(registry.config_path(&template_id)).unwrap();

    let again = registry
        .register_starter(&template_id, &template, Some("case_2"))
        .unwrap();
    assert_eq!(again, configured);
    assert_eq!(fs::read(registry.config_path(&template_id)).unwrap(), before);
    assert!(matches!(registry.resolve(&template).state, ConfigState::Configured(_)));
}

#[test]
fn update_fields_rejects_inconsistent_mappings() {
    let (_dir, registry) = registry();
    let template = template_pdf(1);
    let template_id = template_id_for(&template);
    registry.register_starter(&template_id, &template, None).unwrap();

    let off_page = registry
        .update_fields(&template_id, vec![mapping("investor.legal_name", 1, name_box())])
        .unwrap_err();
    assert_eq!(off_page.kind(), "template_config_error");
    assert!(off_page.to_string().contains("page 1 out of range"));

    let outside = BoundingBox {
        x: 600.0,
        y: 780.0,
        width: 50.0,
        height: 20.0,
    };
    let outside = registry
        .update_fields(&template_id, vec![mapping("investor.legal_name", 0, outside)])
        .unwrap_err();
    assert!(outside.to_string().contains("outside page 0"));

    let unknown = registry
        .update_fields(&template_id, vec![mapping("investor.nickname", 0, name_box())])
        .unwrap_err();
    assert!(unknown.to_string().contains("does not address"));

    assert!(registry.load(&template_id).unwrap().unwrap().fields.is_empty());
}

#[test]
fn update_fields_requires_registered_template() {
    let (_dir, registry) = registry();
    let err = registry
        .update_fields("0".repeat(64).as_str(), Vec::new())
        .unwrap_err();
    assert_eq!(err.kind(), "template_config_error");
}

#[test]
fn corrupt_config_resolves_absent_and_is_left_alone() {
    let (_dir, registry) = registry();
    let template = template_pdf(1);
    let template_id = template_id_for(&template);
    let config_path = registry.config_path(&template_id);
    fs::create_dir_all(config_path.parent().unwrap()).unwrap();
    fs::write(&config_path, b"{\"config_version\": 1, \"templ").unwrap();

    assert_eq!(registry.resolve(&template).state, ConfigState::Absent);

    let err = registry
        .register_starter(&template_id, &template, None)
        .unwrap_err();
    assert_eq!(err.kind(), "template_config_error");
    assert_eq!(
        fs::read(&config_path).unwrap(),
        b"{\"config_version\": 1, \"templ".to_vec()
    );
}

#[test]
fn register_starter_rejects_mismatched_identity_and_non_pdf_bytes() {
    let (_dir, registry) = registry();
    let template = template_pdf(1);

    let err = registry
        .register_starter("deadbeef", &template, None)
        .unwrap_err();
    assert_eq!(err.kind(), "template_config_error");

    let garbage = b"not a pdf".to_vec();
    let err = registry
        .register_starter(&template_id_for(&garbage), &garbage, None)
        .unwrap_err();
    assert_eq!(err.kind(), "input_error");
}

#[test]
fn concurrent_starters_converge_on_one_config() {
    let (_dir, registry) = registry();
    let registry = Arc::new(registry);
    let template = Arc::new(template_pdf(1));
    let template_id = template_id_for(&template);

    let handles = (0..8)
        .map(|index| {
            let registry = Arc::clone(&registry);
            let template = Arc::clone(&template);
            let template_id = template_id.clone();
            thread::spawn(move || {
                registry
                    .register_starter(&template_id, &template, Some(&format!("case_{index}")))
                    .expect("starter or existing config")
            })
        })
        .collect::<Vec<_>>();

    let configs = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect::<Vec<_>>();
    let stored = registry.load(&template_id).unwrap().unwrap();

    assert!(stored.fields.is_empty());
    assert!(configs.iter().all(|config| *config == stored));
    assert_eq!(
        fs::read_dir(registry.template_dir(&template_id))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".staging"))
            .count(),
        0
    );
}

#[test]
fn list_reports_state_and_field_counts() {
    let (_dir, registry) = registry();
    assert!(registry.list().unwrap().is_empty());

    let first = template_pdf(1);
    let second = sized_template_pdf(1, 595, 842);
    let first_id = template_id_for(&first);
    let second_id = template_id_for(&second);
    registry.register_starter(&first_id, &first, None).unwrap();
    registry.register_starter(&second_id, &second, None).unwrap();
    registry
        .update_fields(&second_id, vec![mapping("investor.legal_name", 0, name_box())])
        .unwrap();

    let summaries = registry.list().unwrap();
    assert_eq!(summaries.len(), 2);
    let configured = summaries
        .iter()
        .find(|summary| summary.template_id == second_id)
        .unwrap();
    assert_eq!(configured.state, "configured");
    assert_eq!(configured.field_count, 1);
    assert!(configured.updated_at.is_some());
}

#[test]
fn template_ids_must_be_sha256_hex() {
    let (_dir, registry) = registry();
    assert!(is_template_id(&template_id_for(b"anything")));
    assert!(!is_template_id("../../etc"));
    assert!(!is_template_id(&"A".repeat(64)));
    assert_eq!(
        registry.load("../escape").unwrap_err().kind(),
        "template_config_error"
    );
}

#[test]
fn label_suggestions_never_populate_starter_fields() {
    let (_dir, registry) = registry();
    let template = labelled_template_pdf();
    let template_id = template_id_for(&template);

    let config = registry
        .register_starter(&template_id, &template, None)
        .unwrap();
    assert!(config.fields.is_empty());

    let hints: FieldHints =
        serde_json::from_slice(&fs::read(registry.hints_path(&template_id)).unwrap()).unwrap();
    let suggested = hints
        .candidates
        .iter()
        .filter(|candidate| candidate.suggested_schema_path.is_some())
        .count();
    assert_eq!(suggested, 3);
}
