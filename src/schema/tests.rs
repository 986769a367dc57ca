use serde_json::json;

use super::*;

#[test]
fn schema_path_round_trips_display_form() {
    let path = SchemaPath::parse("investor.addresses[0].postal_code").expect("valid path");
    assert_eq!(path.to_string(), "investor.addresses[0].postal_code");
    assert_eq!(path.template(), "investor.addresses[].postal_code");
    assert!(path.is_addressable());
}

#[test]
fn schema_path_rejects_malformed_input() {
    assert!(SchemaPath::parse("").is_err());
    assert!(SchemaPath::parse("investor..legal_name").is_err());
    assert!(SchemaPath::parse("signatures[x].signer_name").is_err());
    assert!(SchemaPath::parse("signatures[0").is_err());
    assert!(SchemaPath::parse("Investor.LegalName").is_err());
}

#[test]
fn unknown_and_container_paths_are_not_addressable() {
    let unknown = SchemaPath::parse("investor.nickname").expect("syntactically valid");
    assert!(!unknown.is_addressable());

    let container = SchemaPath::parse("investment.amount").expect("syntactically valid");
    assert!(!container.is_addressable());
}

#[test]
fn ordering_follows_schema_declaration() {
    let mut paths = vec![
        SchemaPath::parse("signatures[0].signer_name").unwrap(),
        SchemaPath::parse("investor.addresses[1].line1").unwrap(),
        SchemaPath::parse("investment.amount.value").unwrap(),
        SchemaPath::parse("investor.addresses[0].city").unwrap(),
        SchemaPath::parse("investor").unwrap(),
        SchemaPath::parse("investor.legal_name").unwrap(),
    ];
    paths.sort();

    let rendered = paths.iter().map(ToString::to_string).collect::<Vec<_>>();
    assert_eq!(
        rendered,
        vec![
            "investor",
            "investor.legal_name",
            "investor.addresses[0].city",
            "investor.addresses[1].line1",
            "investment.amount.value",
            "signatures[0].signer_name",
        ]
    );
}

#[test]
fn resolve_yields_null_for_missing_nodes() {
    let data = CanonicalData {
        signatures: Some(vec![Signature {
            signer_name: Some("Ada Lovelace".to_string()),
            ..Signature::default()
        }]),
        ..CanonicalData::default()
    };

    let present = SchemaPath::parse("signatures[0].signer_name").unwrap();
    let out_of_range = SchemaPath::parse("signatures[3].signer_name").unwrap();
    let missing_branch = SchemaPath::parse("investor.contact.email").unwrap();

    assert_eq!(data.resolve(&present), FieldValue::Text("Ada Lovelace".to_string()));
    assert_eq!(data.resolve(&out_of_range), FieldValue::Null);
    assert_eq!(data.resolve(&missing_branch), FieldValue::Null);
}

#[test]
fn amount_value_keeps_integer_and_text_shapes() {
    let data: CanonicalData = serde_json::from_value(json!({
        "investment": {"amount": {"value": 250000, "currency": "USD"}}
    }))
    .expect("canonical data should deserialize");
    let path = SchemaPath::parse("investment.amount.value").unwrap();
    assert_eq!(data.resolve(&path), FieldValue::Integer(250000));

    let text: AmountValue = serde_json::from_value(json!("about a million")).unwrap();
    assert_eq!(text, AmountValue::Text("about a million".to_string()));
    assert_eq!(text.as_number(), None);
}

#[test]
fn every_schema_leaf_is_addressable() {
    for leaf in schema_leaves() {
        let concrete = leaf.replace("[]", "[0]");
        let path = SchemaPath::parse(&concrete).expect("schema leaves parse");
        assert!(path.is_addressable(), "{leaf} should be addressable");
    }
}
