//! Full extraction jobs against a file-backed index.

use argus_db::files::{start_file_scan, upsert_item_file, NewFile};
use argus_db::schema::init_schema;
use argus_db::system_config::SystemConfig;
use argus_db::{AccessMode, IndexDb};
use argus_engine::extraction::handlers::make_output_handler;
use argus_engine::extraction::input::make_input_transform;
use argus_engine::extraction::run_extraction_job;
use argus_protocol::{ModelMetadata, OutputValue, PredictionInput};
use argus_pql::NoEmbedder;
use std::path::Path;

struct Fixture {
    _dir: tempfile::TempDir,
    db: IndexDb,
    reader: IndexDb,
}

fn fixture_with_images(names: &[&str]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("index.db");
    let db = IndexDb::open(&db_path, AccessMode::ReadWrite).unwrap();
    init_schema(&db).unwrap();

    let scan_id = start_file_scan(&db, dir.path().to_str().unwrap()).unwrap();
    for name in names {
        let path = dir.path().join(format!("{name}.png"));
        std::fs::write(&path, format!("pixels of {name}")).unwrap();
        upsert_item_file(
            &db,
            scan_id,
            &NewFile {
                sha256: name,
                md5: "m",
                mime_type: "image/png",
                path: path.to_str().unwrap(),
                last_modified: "2026-01-01T00:00:00Z",
                size: Some(8),
                width: None,
                height: None,
                duration: None,
            },
        )
        .unwrap();
    }

    let reader = IndexDb::open(&db_path, AccessMode::ReadOnly).unwrap();
    Fixture {
        _dir: dir,
        db,
        reader,
    }
}

fn ocr_model() -> ModelMetadata {
    serde_json::from_value(serde_json::json!({
        "group": "ocr",
        "inference_id": "doctr",
        "input_handler": "file_bytes",
        "output_type": "text",
        "input_mime_types": ["image/"],
    }))
    .unwrap()
}

/// Inferer that "reads" the text out of each file input.
fn fake_ocr(units: &[PredictionInput]) -> anyhow::Result<Vec<OutputValue>> {
    Ok(units
        .iter()
        .map(|u| {
            let content = String::from_utf8_lossy(u.file.as_deref().unwrap_or_default());
            OutputValue::text(content.replace("pixels of", "text from"))
        })
        .collect())
}

#[test]
fn ocr_job_writes_text_and_completes_the_log() {
    let fx = fixture_with_images(&["img1", "img2"]);
    let model = ocr_model();

    let mut transform = make_input_transform(&model, None).unwrap();
    let mut handler = make_output_handler(&model, None);
    let mut inferer = fake_ocr;

    let report = run_extraction_job(
        &fx.db,
        &fx.reader,
        &SystemConfig::default(),
        &model,
        2,
        None,
        &NoEmbedder,
        transform.as_mut(),
        &mut inferer,
        handler.as_mut(),
    )
    .unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(report.images, 2);
    assert_eq!(report.units, 2);
    assert!(report.failed_paths.is_empty());

    let data_rows: i64 = fx
        .db
        .query_scalar(
            "SELECT COUNT(*) FROM item_data WHERE data_type = 'text' AND is_placeholder = 0",
            &[],
        )
        .unwrap();
    assert_eq!(data_rows, 2);
    let texts: i64 = fx
        .db
        .query_scalar("SELECT COUNT(*) FROM extracted_text", &[])
        .unwrap();
    assert_eq!(texts, 2);

    let (completed, remaining): (bool, i64) = {
        let row = fx
            .db
            .query_opt("SELECT completed, total_remaining FROM data_log", &[])
            .unwrap()
            .unwrap();
        (row.get(0).unwrap(), row.get(1).unwrap())
    };
    assert!(completed);
    assert_eq!(remaining, 0);

    let job_done: bool = fx
        .db
        .query_scalar("SELECT completed FROM data_jobs", &[])
        .unwrap();
    assert!(job_done);
}

#[test]
fn second_run_finds_nothing_to_do() {
    let fx = fixture_with_images(&["img1"]);
    let model = ocr_model();

    for _ in 0..2 {
        let mut transform = make_input_transform(&model, None).unwrap();
        let mut handler = make_output_handler(&model, None);
        let mut inferer = fake_ocr;
        run_extraction_job(
            &fx.db,
            &fx.reader,
            &SystemConfig::default(),
            &model,
            4,
            None,
            &NoEmbedder,
            transform.as_mut(),
            &mut inferer,
            handler.as_mut(),
        )
        .unwrap();
    }

    // The second run aborted before creating a job.
    let jobs: i64 = fx.db.query_scalar("SELECT COUNT(*) FROM data_jobs", &[]).unwrap();
    assert_eq!(jobs, 1);
    let rows: i64 = fx.db.query_scalar("SELECT COUNT(*) FROM item_data", &[]).unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn empty_output_leaves_placeholder_and_is_not_reprocessed() {
    let fx = fixture_with_images(&["img1"]);
    let model = ocr_model();

    let mut transform = make_input_transform(&model, None).unwrap();
    let mut handler = make_output_handler(&model, None);
    let mut inferer = |units: &[PredictionInput]| -> anyhow::Result<Vec<OutputValue>> {
        Ok(units.iter().map(|_| OutputValue::text("")).collect())
    };

    run_extraction_job(
        &fx.db,
        &fx.reader,
        &SystemConfig::default(),
        &model,
        4,
        None,
        &NoEmbedder,
        transform.as_mut(),
        &mut inferer,
        handler.as_mut(),
    )
    .unwrap();

    let placeholders: i64 = fx
        .db
        .query_scalar(
            "SELECT COUNT(*) FROM item_data WHERE is_placeholder = 1",
            &[],
        )
        .unwrap();
    assert_eq!(placeholders, 1);

    // Eligibility query now sees nothing.
    let mut transform = make_input_transform(&model, None).unwrap();
    let mut handler = make_output_handler(&model, None);
    let mut inferer = fake_ocr;
    let report = run_extraction_job(
        &fx.db,
        &fx.reader,
        &SystemConfig::default(),
        &model,
        4,
        None,
        &NoEmbedder,
        transform.as_mut(),
        &mut inferer,
        handler.as_mut(),
    )
    .unwrap();
    assert!(report.job_id.is_none());
}

#[test]
fn failed_item_is_recorded_and_job_continues() {
    let fx = fixture_with_images(&["img1", "img2"]);
    // Delete one file from disk so its input transform fails.
    let gone: String = fx
        .db
        .query_scalar(
            "SELECT path FROM files WHERE sha256 = 'img1'",
            &[],
        )
        .unwrap();
    std::fs::remove_file(&gone).unwrap();

    let model = ocr_model();
    let mut transform = make_input_transform(&model, None).unwrap();
    let mut handler = make_output_handler(&model, None);
    let mut inferer = fake_ocr;

    let report = run_extraction_job(
        &fx.db,
        &fx.reader,
        &SystemConfig::default(),
        &model,
        4,
        None,
        &NoEmbedder,
        transform.as_mut(),
        &mut inferer,
        handler.as_mut(),
    )
    .unwrap();

    // The discovery stream drops unreachable paths, so the missing item is
    // skipped rather than failed mid-transform.
    assert_eq!(report.processed, 1);
    let texts: i64 = fx
        .db
        .query_scalar("SELECT COUNT(*) FROM extracted_text", &[])
        .unwrap();
    assert_eq!(texts, 1);
}

#[test]
fn inference_failure_aborts_and_next_run_sweeps_partials() {
    let fx = fixture_with_images(&["img1", "img2", "img3"]);
    let model = ocr_model();

    // First batch succeeds, second one blows up.
    let mut calls = 0;
    let mut transform = make_input_transform(&model, None).unwrap();
    let mut handler = make_output_handler(&model, None);
    let mut inferer = |units: &[PredictionInput]| -> anyhow::Result<Vec<OutputValue>> {
        calls += 1;
        if calls > 1 {
            anyhow::bail!("inference backend went away");
        }
        fake_ocr(units)
    };

    let result = run_extraction_job(
        &fx.db,
        &fx.reader,
        &SystemConfig::default(),
        &model,
        1,
        None,
        &NoEmbedder,
        transform.as_mut(),
        &mut inferer,
        handler.as_mut(),
    );
    assert!(result.is_err());

    // The incomplete job anchor and its partial outputs are still present,
    // as the worker died mid-job.
    let incomplete: i64 = fx
        .db
        .query_scalar("SELECT COUNT(*) FROM data_jobs WHERE completed = 0", &[])
        .unwrap();
    assert_eq!(incomplete, 1);

    // The next run sweeps them and processes everything.
    let mut transform = make_input_transform(&model, None).unwrap();
    let mut handler = make_output_handler(&model, None);
    let mut inferer = fake_ocr;
    let report = run_extraction_job(
        &fx.db,
        &fx.reader,
        &SystemConfig::default(),
        &model,
        4,
        None,
        &NoEmbedder,
        transform.as_mut(),
        &mut inferer,
        handler.as_mut(),
    )
    .unwrap();
    assert_eq!(report.processed, 3);

    let incomplete: i64 = fx
        .db
        .query_scalar("SELECT COUNT(*) FROM data_jobs WHERE completed = 0", &[])
        .unwrap();
    assert_eq!(incomplete, 0);
    let texts: i64 = fx
        .db
        .query_scalar("SELECT COUNT(*) FROM extracted_text", &[])
        .unwrap();
    assert_eq!(texts, 3);
    assert!(!Path::new("/nonexistent").exists());
}
