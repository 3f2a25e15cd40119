//! Indexed folder roots.

use crate::connection::IndexDb;
use crate::error::DbError;
use chrono::Utc;

#[derive(Debug, Clone)]
pub struct Folder {
    pub path: String,
    pub included: bool,
}

pub fn get_folders(db: &IndexDb) -> Result<Vec<Folder>, DbError> {
    let rows = db.query_all("SELECT path, included FROM folders ORDER BY path", &[])?;
    rows.iter()
        .map(|r| {
            Ok(Folder {
                path: r.get(0)?,
                included: r.get(1)?,
            })
        })
        .collect()
}

/// Replace the folder lists wholesale.
pub fn replace_folders(
    db: &IndexDb,
    included: &[String],
    excluded: &[String],
) -> Result<(), DbError> {
    db.execute("DELETE FROM folders", &[])?;
    let now = Utc::now().to_rfc3339();
    for path in included {
        db.execute(
            "INSERT INTO folders (time_added, path, included) VALUES (?, ?, 1)",
            &[now.as_str().into(), path.as_str().into()],
        )?;
    }
    for path in excluded {
        db.execute(
            "INSERT INTO folders (time_added, path, included) VALUES (?, ?, 0)",
            &[now.as_str().into(), path.as_str().into()],
        )?;
    }
    Ok(())
}
