//! Data directory resolution.

use std::path::PathBuf;

/// Root data directory: `$ARGUS_DATA_DIR` or `~/.argus/data`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ARGUS_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .expect("Could not determine home directory")
        .join(".argus")
        .join("data")
}

/// Directory holding index databases.
pub fn index_dir() -> PathBuf {
    data_dir().join("index")
}

/// Path of one index database by name.
pub fn index_db_path(index_db: &str) -> PathBuf {
    index_dir().join(format!("{index_db}.db"))
}

/// List the index database names present on disk.
pub fn list_index_dbs() -> std::io::Result<Vec<String>> {
    let dir = index_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("db") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
