//! Extracted text rows (OCR, transcripts, captions).

use crate::connection::IndexDb;
use crate::error::DbError;

/// Insert the text payload behind an existing `item_data` row.
pub fn add_extracted_text(
    db: &IndexDb,
    data_id: i64,
    text: &str,
    language: Option<&str>,
    language_confidence: Option<f64>,
    confidence: Option<f64>,
) -> Result<(), DbError> {
    db.execute(
        r#"
        INSERT INTO extracted_text (id, language, language_confidence, confidence, text, text_length)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
        &[
            data_id.into(),
            language.into(),
            language_confidence.into(),
            confidence.into(),
            text.into(),
            (text.chars().count() as i64).into(),
        ],
    )?;
    Ok(())
}

/// Text rows for an item, ordered by their position index.
pub fn get_text_for_item(db: &IndexDb, item_id: i64) -> Result<Vec<(i64, String)>, DbError> {
    let rows = db.query_all(
        r#"
        SELECT extracted_text.id, extracted_text.text
        FROM extracted_text
        JOIN item_data ON item_data.id = extracted_text.id
        WHERE item_data.item_id = ?
        ORDER BY item_data.idx
        "#,
        &[item_id.into()],
    )?;
    rows.iter().map(|r| Ok((r.get(0)?, r.get(1)?))).collect()
}
