mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::StatusCode;
use common::{config, store_with};
use querygrid::config::GridDefinition;
use querygrid::error::{GridError, Messages};
use querygrid::field::{FieldConfig, Projection};
use querygrid::output::{FETCH_OK, OutputFormatter};
use querygrid::predicate::Row;
use querygrid::query::{Pagination, QueryInput};
use querygrid::server::AppState;
use serde_json::{Value, json};

fn row(value: Value) -> Row {
    value.as_object().cloned().expect("object row")
}

#[test]
fn without_a_projection_rows_pass_through() {
    let output = OutputFormatter::new("1.2.3");
    let input = QueryInput::from_value(&json!({"limit": 1})).expect("well-shaped");
    let rows = vec![row(json!({"full_name": "Ann", "internal": 1}))];
    let envelope = output.format_output(&input, BTreeMap::new(), rows.clone(), Pagination::new(1, 1), None, None);
    assert!(envelope.success);
    assert_eq!(envelope.content(), rows.as_slice());
}

#[test]
fn envelope_carries_input_configuration_content_and_pagination() {
    let config = config(json!({
        "name": {"databaseName": "full_name", "search": true, "displayName": "Name"},
        "secret": {"show": false}
    }));
    let fields = FieldConfig::new(&config);
    let output = OutputFormatter::new("1.2.3");
    let input = QueryInput::from_value(&json!({"searchKeyword": {"name": "an"}, "page": "1"})).expect("well-shaped");
    let rows = vec![row(json!({"full_name": "Ann", "secret": "s3"}))];
    let mut pagination = Pagination::new(10, 1);
    pagination.total = 1;
    let envelope = output.format_output(
        &input,
        fields.public_config(),
        rows,
        pagination,
        Some(&fields.projection()),
        Some(&config),
    );

    let value = serde_json::to_value(&envelope).expect("serializes");
    assert_eq!(value["success"], json!(true));
    assert_eq!(value["message"]["id"], json!(FETCH_OK));
    assert_eq!(value["version"], json!("1.2.3"));
    assert!(value["timestamp"].is_string());
    assert_eq!(value["data"]["input"], json!({"searchKeyword": {"name": "an"}, "page": "1"}));
    assert_eq!(value["data"]["content"], json!([{"name": "Ann"}]), "renamed, hidden fields dropped");
    assert_eq!(value["data"]["pagination"], json!({"limit": 10, "page": 1, "skip": 0, "total": 1}));
    assert_eq!(
        value["data"]["configuration"]["name"],
        json!({"displayName": "Name", "show": true, "search": true, "filter": false, "range": false, "sort": false})
    );
}

#[test]
fn excluded_join_columns_are_stripped_at_any_depth() {
    let config = config(json!({
        "members": {
            "databaseName": "member_ids",
            "join": {"model": "users", "as": "members", "fields": ["name"], "exclude": ["link.table", "token"]}
        }
    }));
    let mut projection = Projection::new();
    projection.insert("members", "member_ids");
    let rows = vec![row(json!({
        "member_ids": [1, 2],
        "members": [
            {"name": "A", "token": "t", "link": {"table": "m2m", "role": "owner"}},
            {"name": "B", "token": "u"}
        ]
    }))];
    let renamed = OutputFormatter::rename_rows(rows, &projection, Some(&config));
    assert_eq!(
        Value::Object(renamed[0].clone()),
        json!({"members": [{"name": "A", "link": {"role": "owner"}}, {"name": "B"}]})
    );
}

#[test]
fn failures_use_the_structured_message_or_the_fallback() {
    let output = OutputFormatter::new("1.2.3");
    let mut messages = Messages::new();
    messages.insert("age".into(), vec!["unknown field".into()]);
    let envelope = serde_json::to_value(output.failure(&GridError::Validation(messages))).expect("serializes");
    assert_eq!(envelope["success"], json!(false));
    assert_eq!(envelope["message"]["id"], json!("validation_failed"));
    assert_eq!(envelope["data"]["errors"], json!({"age": ["unknown field"]}));

    let envelope = output.failure(&GridError::Store("disk on fire".into()));
    assert_eq!(envelope.message.description, "The request could not be completed");
    assert!(envelope.pagination().is_none());
}

fn app() -> AppState<querygrid::store::MemoryStore> {
    let store = store_with("people", vec![json!({"name": "Ann", "age": 30}), json!({"name": "Bob", "age": 41})]);
    let grid: GridDefinition = serde_json::from_value(json!({
        "collection": "people",
        "fields": {"name": {"search": true, "sort": true}, "age": {"range": true}}
    }))
    .expect("grid parses");
    AppState::new(Arc::new(store), BTreeMap::from([("people".to_owned(), grid)]), "grid", "9.9.9")
}

#[tokio::test]
async fn requests_map_to_statuses() {
    let app = app();
    let header = Value::Null;

    let (status, envelope) = app.run("people", &header, &json!({"range": {"age": {"min": 35, "max": 50}}})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope.content().len(), 1);
    assert_eq!(envelope.version, "9.9.9");

    let (status, envelope) = app.run("people", &header, &json!({"filter": {"age": 30}})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!envelope.success);

    let (status, _) = app.run("people", &header, &json!({"limit": [1]})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "shape errors are client errors");

    let (status, envelope) = app.run("planets", &header, &json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(envelope.message.id, "invalid_input");
}

#[test]
fn configuration_is_available_per_grid() {
    let app = app();
    let configuration = app.configuration("people").expect("known grid");
    assert!(configuration["name"].sort);
    assert!(configuration["age"].range);
    assert!(app.configuration("planets").is_none());
}
