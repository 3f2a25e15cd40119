//! Per-index system configuration.
//!
//! Stored as JSON under a single key in the `system_config` table so the
//! whole snapshot is replaced atomically.

use crate::connection::IndexDb;
use crate::error::DbError;
use serde::{Deserialize, Serialize};

const CONFIG_KEY: &str = "system_config";

/// One scheduled model in the cron pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CronModel {
    pub inference_id: String,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// Extra predicate applied to a model's work discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFilter {
    /// Setter names the filter applies to; "*" matches every model.
    pub setter_names: Vec<String>,
    /// PQL query element, stored as its wire shape.
    pub pql_query: serde_json::Value,
}

/// Per-group or per-model batching overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSetting {
    pub group_name: String,
    #[serde(default)]
    pub inference_id: Option<String>,
    #[serde(default)]
    pub default_batch_size: Option<u32>,
    #[serde(default)]
    pub default_threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SystemConfig {
    #[serde(default)]
    pub enable_cron_job: bool,
    /// Standard five-field cron expression.
    #[serde(default)]
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub cron_models: Vec<CronModel>,
    #[serde(default)]
    pub job_filters: Vec<JobFilter>,
    #[serde(default)]
    pub job_settings: Vec<JobSetting>,
}

pub fn retrieve_system_config(db: &IndexDb) -> Result<SystemConfig, DbError> {
    match db.query_opt(
        "SELECT v FROM system_config WHERE k = ?",
        &[CONFIG_KEY.into()],
    )? {
        Some(row) => {
            let raw: String = row.get(0)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(SystemConfig::default()),
    }
}

pub fn persist_system_config(db: &IndexDb, config: &SystemConfig) -> Result<(), DbError> {
    let raw = serde_json::to_string(config)?;
    db.execute(
        r#"
        INSERT INTO system_config (k, v) VALUES (?, ?)
        ON CONFLICT(k) DO UPDATE SET v = excluded.v
        "#,
        &[CONFIG_KEY.into(), raw.into()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::init_schema;

    #[test]
    fn config_round_trips() {
        let db = IndexDb::open_memory().unwrap();
        init_schema(&db).unwrap();

        assert_eq!(retrieve_system_config(&db).unwrap(), SystemConfig::default());

        let config = SystemConfig {
            enable_cron_job: true,
            cron_schedule: Some("0 3 * * *".into()),
            cron_models: vec![CronModel {
                inference_id: "ocr/doctr".into(),
                batch_size: Some(16),
                threshold: None,
            }],
            ..Default::default()
        };
        persist_system_config(&db, &config).unwrap();
        assert_eq!(retrieve_system_config(&db).unwrap(), config);
    }
}
