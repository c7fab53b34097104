mod common;

use common::{config, store_with};
use querygrid::error::GridError;
use querygrid::grid::CollectionGrid;
use querygrid::output::OutputFormatter;
use querygrid::store::MemoryStore;
use serde_json::{Value, json};

fn numbered(count: i64) -> Vec<Value> {
    (1..=count).map(|n| json!({"n": n, "even": n % 2 == 0})).collect()
}

#[tokio::test]
async fn search_and_filter_are_both_required_to_match() {
    let config = config(json!({"name": {"search": true}, "age": {"filter": true}}));
    let store = store_with(
        "people",
        vec![json!({"name": "Pete Shaw", "age": 30}), json!({"name": "Pete Shaw", "age": 40})],
    );
    let input = json!({"searchKeyword": {"name": "Pete"}, "filter": {"age": [30]}});
    let mut grid = CollectionGrid::new(&store, "people", &config, &input).expect("well-shaped");
    let result = grid.fetch().await.expect("query ok");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0]["age"], json!(30));
    assert_eq!(result.pagination.total, 1);
}

#[tokio::test]
async fn second_page_holds_rows_six_to_ten() {
    let config = config(json!({"n": {"sort": true}}));
    let store = store_with("numbers", numbered(12));
    let input = json!({"page": 2, "limit": 5});
    let mut grid = CollectionGrid::new(&store, "numbers", &config, &input).expect("well-shaped");
    let result = grid.fetch().await.expect("query ok");
    let ns: Vec<i64> = result.rows.iter().filter_map(|row| row["n"].as_i64()).collect();
    assert_eq!(ns, vec![6, 7, 8, 9, 10]);
    assert_eq!(
        serde_json::to_value(result.pagination).expect("serializes"),
        json!({"page": 2, "limit": 5, "total": 12, "skip": 5})
    );
}

#[tokio::test]
async fn sorting_on_a_field_without_sort_rejects_with_no_rows() {
    let config = config(json!({"name": {"search": true}}));
    let store = store_with("people", vec![json!({"name": "Ann"})]);
    let input = json!({"sort": {"name": "ascending"}});
    let mut grid = CollectionGrid::new(&store, "people", &config, &input).expect("well-shaped");
    match grid.fetch().await {
        Err(GridError::Validation(messages)) => assert!(messages.contains_key("name"), "rejection names the field"),
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn inverted_range_rejects_citing_the_ordering() {
    let config = config(json!({"age": {"range": true}}));
    let store = store_with("people", vec![json!({"age": 30})]);
    let input = json!({"range": {"age": {"min": 50, "max": 10}}});
    let mut grid = CollectionGrid::new(&store, "people", &config, &input).expect("well-shaped");
    let error = grid.fetch().await.expect_err("inverted range");
    let body = error.body();
    assert_eq!(body.id, "validation_failed");
    assert!(body.msg["age"][0].as_str().expect("message").contains("min must be less than max"));
}

#[tokio::test]
async fn range_bounds_are_inclusive() {
    let config = config(json!({"age": {"range": true, "sort": true}}));
    let store = store_with("people", (5..=15).map(|age| json!({"age": age})).collect());
    let input = json!({"range": {"age": {"min": 8, "max": 10}}, "sort": {"age": "descending"}});
    let mut grid = CollectionGrid::new(&store, "people", &config, &input).expect("well-shaped");
    let result = grid.fetch().await.expect("query ok");
    let ages: Vec<i64> = result.rows.iter().filter_map(|row| row["age"].as_i64()).collect();
    assert_eq!(ages, vec![10, 9, 8]);
}

#[tokio::test]
async fn page_size_and_total_hold_for_every_page() {
    let config = config(json!({"n": {}, "even": {"filter": true}}));
    let store = store_with("numbers", numbered(23));
    for page in 1..=4 {
        let input = json!({"filter": {"even": true}, "page": page, "limit": 4});
        let mut grid = CollectionGrid::new(&store, "numbers", &config, &input).expect("well-shaped");
        let result = grid.fetch().await.expect("query ok");
        assert!(result.rows.len() <= result.pagination.limit, "page {page} too long");
        assert!(result.pagination.total >= result.rows.len());
        assert_eq!(result.pagination.total, 11);
    }
}

#[tokio::test]
async fn array_columns_match_when_any_element_does() {
    let config = config(json!({"title": {}, "tags": {"filter": true}}));
    let store = store_with(
        "posts",
        vec![
            json!({"title": "a", "tags": ["rust", "db"]}),
            json!({"title": "b", "tags": ["go"]}),
            json!({"title": "c", "tags": []}),
        ],
    );
    let input = json!({"filter": {"tags": ["db", "web"]}});
    let mut grid = CollectionGrid::new(&store, "posts", &config, &input).expect("well-shaped");
    let result = grid.fetch().await.expect("query ok");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0]["title"], json!("a"));
}

#[tokio::test]
async fn free_text_without_searchable_fields_matches_nothing() {
    let config = config(json!({"name": {}}));
    let store = store_with("people", vec![json!({"name": "Ann"})]);
    let input = json!({"searchKeyword": {"query": "ann"}});
    let mut grid = CollectionGrid::new(&store, "people", &config, &input).expect("well-shaped");
    let result = grid.fetch().await.expect("query ok");
    assert!(result.rows.is_empty(), "free text must never widen to the whole collection");
    assert_eq!(result.pagination.total, 0);
}

#[tokio::test]
async fn a_grid_fetches_once() {
    let config = config(json!({"n": {}}));
    let store = store_with("numbers", numbered(3));
    let mut grid = CollectionGrid::new(&store, "numbers", &config, &json!({})).expect("well-shaped");
    grid.fetch().await.expect("first fetch");
    assert!(matches!(grid.fetch().await, Err(GridError::Phase(_))));
}

#[tokio::test]
async fn missing_collection_is_an_empty_result() {
    let config = config(json!({"n": {}}));
    let store = MemoryStore::new();
    let mut grid = CollectionGrid::new(&store, "nothing_here", &config, &json!({})).expect("well-shaped");
    let result = grid.fetch().await.expect("query ok");
    assert!(result.rows.is_empty());
    assert_eq!(result.pagination.total, 0);
}

#[tokio::test]
async fn joins_expand_and_excluded_columns_never_reach_the_output() {
    let config = config(json!({
        "title": {"search": true},
        "authors": {
            "databaseName": "author_ids",
            "join": {"model": "users", "as": "authors", "fields": ["id", "name"], "exclude": ["id"]}
        },
        "editor": {
            "databaseName": "editor_id",
            "join": {"model": "users", "fields": ["name", "meta"], "exclude": ["meta.internal"]}
        }
    }));
    let store = store_with(
        "books",
        vec![json!({"title": "Dune", "author_ids": [1, 2], "editor_id": 3})],
    );
    store
        .insert(
            "users",
            [
                json!({"id": 1, "name": "Frank", "password": "x"}),
                json!({"id": 2, "name": "Brian", "password": "y"}),
                json!({"id": 3, "name": "Ed", "meta": {"internal": true, "team": "fiction"}}),
            ],
        )
        .expect("insert");
    let mut grid = CollectionGrid::new(&store, "books", &config, &json!({})).expect("well-shaped");
    let result = grid.fetch().await.expect("query ok");
    let rows = OutputFormatter::rename_rows(result.rows, &grid.projection(), Some(grid.config()));

    assert_eq!(
        rows[0]["authors"],
        json!([{"name": "Frank"}, {"name": "Brian"}]),
        "join.exclude strips ids from every element and unlisted columns are never fetched"
    );
    assert_eq!(rows[0]["editor"], json!({"id": 3, "name": "Ed", "meta": {"team": "fiction"}}));
    assert_eq!(rows[0]["title"], json!("Dune"));
}

#[tokio::test]
async fn the_request_shown_in_the_crate_docs_is_accepted() {
    let config = config(json!({
        "name": {"search": true, "sort": true},
        "status": {"search": true},
        "tags": {"filter": true},
        "age": {"range": true}
    }));
    let mut rows: Vec<Value> = (1..=7)
        .map(|n| json!({"name": format!("Alice {n}"), "status": "active", "tags": ["a"], "age": 30}))
        .collect();
    rows.push(json!({"name": "Alice 8", "status": "active", "tags": ["c"], "age": 30}));
    let store = store_with("people", rows);
    let input = json!({
        "searchKeyword": {"query": "alice", "status": "active"},
        "filter": {"tags": ["a", "b"]},
        "range": {"age": {"min": 18, "max": 65}},
        "sort": {"name": "ascending"},
        "page": 2, "limit": 5
    });
    let mut grid = CollectionGrid::new(&store, "people", &config, &input).expect("well-shaped");
    let result = grid.fetch().await.expect("the documented request validates");
    let names: Vec<&str> = result.rows.iter().filter_map(|row| row["name"].as_str()).collect();
    assert_eq!(names, vec!["Alice 6", "Alice 7"]);
    assert_eq!(result.pagination.total, 7);
}
