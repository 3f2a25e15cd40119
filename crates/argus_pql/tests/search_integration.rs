//! End-to-end compilation and execution against a real index database.

use argus_db::files::{start_file_scan, upsert_item_file, NewFile};
use argus_db::schema::init_schema;
use argus_db::setters::upsert_setter;
use argus_db::{serialize_f32, IndexDb};
use argus_pql::{prepare_query, search, NoEmbedder, PqlQuery};
use argus_protocol::OutputDataType;

fn seeded_db() -> IndexDb {
    let db = IndexDb::open_memory().unwrap();
    init_schema(&db).unwrap();
    let scan_id = start_file_scan(&db, "/media").unwrap();

    for (sha, path, mime, last_modified) in [
        ("f1", "/media/a.png", "image/png", "2026-01-03T00:00:00Z"),
        ("f2", "/media/b.jpg", "image/jpeg", "2026-01-02T00:00:00Z"),
        ("f3", "/media/c.mp4", "video/mp4", "2026-01-01T00:00:00Z"),
    ] {
        upsert_item_file(
            &db,
            scan_id,
            &NewFile {
                sha256: sha,
                md5: "m",
                mime_type: mime,
                path,
                last_modified,
                size: Some(100),
                width: None,
                height: None,
                duration: None,
            },
        )
        .unwrap();
    }
    db
}

fn run(db: &IndexDb, raw: serde_json::Value) -> argus_pql::SearchOutcome {
    let query: PqlQuery = serde_json::from_value(raw).unwrap();
    search(db, query, &NoEmbedder).unwrap()
}

#[test]
fn cursor_scan_pages_by_last_modified() {
    let db = seeded_db();

    let page1 = run(
        &db,
        serde_json::json!({
            "order_args": [{ "order_by": "last_modified", "order": "desc" }],
            "page": 1,
            "page_size": 2
        }),
    );
    assert_eq!(page1.total, 3);
    assert_eq!(
        page1.results.iter().map(|r| r.path.as_str()).collect::<Vec<_>>(),
        ["/media/a.png", "/media/b.jpg"]
    );

    let page2 = run(
        &db,
        serde_json::json!({
            "order_args": [{ "order_by": "last_modified", "order": "desc" }],
            "page": 2,
            "page_size": 2
        }),
    );
    assert_eq!(
        page2.results.iter().map(|r| r.path.as_str()).collect::<Vec<_>>(),
        ["/media/c.mp4"]
    );
}

#[test]
fn count_mode_matches_unpaged_result_count() {
    let db = seeded_db();
    let outcome = run(
        &db,
        serde_json::json!({
            "query": { "startswith": { "type": "image/" } },
            "page_size": 0
        }),
    );
    assert_eq!(outcome.total, outcome.results.len() as i64);
    assert_eq!(outcome.total, 2);
}

#[test]
fn and_narrows_or_widens_not_excludes() {
    let db = seeded_db();

    let outcome = run(
        &db,
        serde_json::json!({
            "query": { "and_": [
                { "startswith": { "type": "image/" } },
                { "eq": { "type": "image/png" } }
            ]},
            "page_size": 0
        }),
    );
    assert_eq!(outcome.total, 1);

    let outcome = run(
        &db,
        serde_json::json!({
            "query": { "or_": [
                { "eq": { "type": "image/png" } },
                { "eq": { "type": "video/mp4" } }
            ]},
            "page_size": 0
        }),
    );
    assert_eq!(outcome.total, 2);

    let outcome = run(
        &db,
        serde_json::json!({
            "query": { "not_": { "eq": { "type": "image/png" } } },
            "page_size": 0
        }),
    );
    assert_eq!(outcome.total, 2);
}

#[test]
fn processed_by_under_not_finds_unprocessed_items() {
    let db = seeded_db();
    upsert_setter(&db, "ocr/doctr").unwrap();
    db.execute("INSERT INTO data_jobs (completed) VALUES (1)", &[])
        .unwrap();
    argus_db::item_data::add_item_data(
        &db,
        "f1",
        "ocr/doctr",
        1,
        OutputDataType::Text,
        0,
        None,
        true,
    )
    .unwrap();

    let outcome = run(
        &db,
        serde_json::json!({
            "query": { "and_": [
                { "startswith": { "type": "image/" } },
                { "not_": { "processed_by": { "setter": "ocr/doctr" } } }
            ]},
            "page_size": 0
        }),
    );
    // f1 was processed (placeholder counts), leaving only f2.
    assert_eq!(outcome.total, 1);
    assert_eq!(outcome.results[0].sha256, "f2");
}

#[test]
fn match_text_ranks_and_snippets() {
    let db = seeded_db();
    upsert_setter(&db, "ocr/doctr").unwrap();
    db.execute("INSERT INTO data_jobs (completed) VALUES (1)", &[])
        .unwrap();
    for (sha, text) in [("f1", "a quiet sunset over water"), ("f2", "city traffic at noon")] {
        let data_id = argus_db::item_data::add_item_data(
            &db,
            sha,
            "ocr/doctr",
            1,
            OutputDataType::Text,
            0,
            None,
            false,
        )
        .unwrap();
        argus_db::extracted_text::add_extracted_text(&db, data_id, text, Some("en"), Some(1.0), Some(0.9))
            .unwrap();
    }

    let outcome = run(
        &db,
        serde_json::json!({
            "query": {
                "match_text": { "match": "sunset", "select_snippet_as": "snippet" },
                "order_by": true,
                "select_as": "rank"
            },
            "page_size": 0
        }),
    );
    assert_eq!(outcome.total, 1);
    let result = &outcome.results[0];
    assert_eq!(result.sha256, "f1");
    let snippet = result.extra.get("snippet").unwrap().as_str().unwrap();
    assert!(snippet.contains("<b>sunset</b>"), "snippet: {snippet}");
    assert!(result.extra.contains_key("rank"));
}

#[test]
fn semantic_search_orders_by_distance() {
    let db = seeded_db();
    upsert_setter(&db, "clip/vit").unwrap();
    db.execute("INSERT INTO data_jobs (completed) VALUES (1)", &[])
        .unwrap();
    for (sha, vector) in [("f1", [1.0f32, 0.0]), ("f2", [0.0, 1.0]), ("f3", [0.9, 0.1])] {
        let data_id = argus_db::item_data::add_item_data(
            &db,
            sha,
            "clip/vit",
            1,
            OutputDataType::Clip,
            0,
            None,
            false,
        )
        .unwrap();
        argus_db::embeddings::add_embedding(&db, data_id, &vector).unwrap();
    }

    let encoded =
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, serialize_f32(&[1.0, 0.0]));
    let outcome = run(
        &db,
        serde_json::json!({
            "query": {
                "semantic_image": { "query": encoded, "model": "clip/vit", "embed": null },
                "order_by": true
            },
            "page_size": 0
        }),
    );
    assert_eq!(outcome.total, 3);
    let order: Vec<&str> = outcome.results.iter().map(|r| r.sha256.as_str()).collect();
    assert_eq!(order, ["f1", "f3", "f2"]);
}

#[test]
fn cursor_bounds_exclude_rows_at_or_below_gt() {
    let db = seeded_db();
    upsert_setter(&db, "clip/vit").unwrap();
    db.execute("INSERT INTO data_jobs (completed) VALUES (1)", &[])
        .unwrap();
    for (sha, vector) in [("f1", [1.0f32, 0.0]), ("f2", [0.0, 1.0]), ("f3", [0.9, 0.1])] {
        let data_id = argus_db::item_data::add_item_data(
            &db,
            sha,
            "clip/vit",
            1,
            OutputDataType::Clip,
            0,
            None,
            false,
        )
        .unwrap();
        argus_db::embeddings::add_embedding(&db, data_id, &vector).unwrap();
    }

    let encoded =
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, serialize_f32(&[1.0, 0.0]));
    // row_n turns distances into dense ranks; gt=1 skips the best match.
    let outcome = run(
        &db,
        serde_json::json!({
            "query": {
                "semantic_image": { "query": encoded, "model": "clip/vit", "embed": null },
                "order_by": true,
                "row_n": true,
                "gt": 1,
                "select_as": "rn"
            },
            "count": false,
            "page_size": 0
        }),
    );
    let order: Vec<&str> = outcome.results.iter().map(|r| r.sha256.as_str()).collect();
    assert_eq!(order, ["f3", "f2"]);
    for result in &outcome.results {
        assert!(result.extra.get("rn").unwrap().as_i64().unwrap() > 1);
    }
}

#[test]
fn text_entity_returns_one_row_per_text() {
    let db = seeded_db();
    upsert_setter(&db, "ocr/doctr").unwrap();
    db.execute("INSERT INTO data_jobs (completed) VALUES (1)", &[])
        .unwrap();
    for idx in 0..2 {
        let data_id = argus_db::item_data::add_item_data(
            &db,
            "f1",
            "ocr/doctr",
            1,
            OutputDataType::Text,
            idx,
            None,
            false,
        )
        .unwrap();
        argus_db::extracted_text::add_extracted_text(
            &db,
            data_id,
            &format!("page {idx} text"),
            Some("en"),
            Some(1.0),
            Some(0.9),
        )
        .unwrap();
    }

    let outcome = run(
        &db,
        serde_json::json!({
            "entity": "text-item",
            "select": ["text", "setter_name"],
            "order_args": [{ "order_by": "path", "order": "asc" }],
            "page_size": 0
        }),
    );
    assert_eq!(outcome.total, 2);
    for result in &outcome.results {
        assert!(result.data_id.is_some());
        assert_eq!(result.setter_name.as_deref(), Some("ocr/doctr"));
        assert!(result.text.as_deref().unwrap().contains("text"));
    }
}

#[test]
fn partition_by_item_collapses_duplicate_files() {
    let db = seeded_db();
    let scan_id = start_file_scan(&db, "/media").unwrap();
    // Second path for the same content.
    upsert_item_file(
        &db,
        scan_id,
        &NewFile {
            sha256: "f1",
            md5: "m",
            mime_type: "image/png",
            path: "/media/a_copy.png",
            last_modified: "2026-01-04T00:00:00Z",
            size: Some(100),
            width: None,
            height: None,
            duration: None,
        },
    )
    .unwrap();

    let unpartitioned = run(&db, serde_json::json!({ "page_size": 0 }));
    assert_eq!(unpartitioned.total, 4);

    let partitioned = run(
        &db,
        serde_json::json!({ "partition_by": "item_id", "page_size": 0 }),
    );
    assert_eq!(partitioned.total, 3);
}

#[test]
fn prepared_query_survives_serde_round_trip() {
    let raw = serde_json::json!({
        "query": { "and_": [
            { "startswith": { "type": "image/" } },
            { "match_text": { "match": "sunset" }, "order_by": true }
        ]},
        "page_size": 5
    });
    let query: PqlQuery = serde_json::from_value(raw).unwrap();
    let prepared = prepare_query(query, &NoEmbedder).unwrap();
    let as_json = serde_json::to_value(&prepared).unwrap();
    let _back: PqlQuery = serde_json::from_value(as_json).unwrap();
}
