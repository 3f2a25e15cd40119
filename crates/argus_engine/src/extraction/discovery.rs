//! Work discovery: derive the eligibility query for a model.

use anyhow::{bail, Result};
use argus_db::system_config::SystemConfig;
use argus_protocol::ModelMetadata;
use argus_pql::{Entity, PqlQuery, QueryElement};

/// Build the discovery query for a model: its eligibility predicate AND any
/// per-index job filters, shaped for the model's target entity.
pub fn build_job_query(model: &ModelMetadata, config: &SystemConfig) -> Result<PqlQuery> {
    let mut and: Vec<QueryElement> = Vec::new();
    let setter_name = model.setter_name();

    if !model.input_mime_types.is_empty() {
        and.push(parse_filter(serde_json::json!({
            "startswith": { "type": model.input_mime_types }
        }))?);
    }

    if model.skip_processed {
        let processed = if model.targets_text() {
            serde_json::json!({ "derived_by": { "setter": setter_name } })
        } else {
            serde_json::json!({ "processed_by": { "setter": setter_name } })
        };
        and.push(QueryElement::not(parse_filter(processed)?));
    }

    // Per-index user filters addressed to this model (or to every model).
    for filter in &config.job_filters {
        let applies = filter
            .setter_names
            .iter()
            .any(|name| name == "*" || *name == setter_name);
        if !applies {
            continue;
        }
        let element: QueryElement = serde_json::from_value(filter.pql_query.clone())?;
        // Flatten AND operators so the chain stays shallow.
        match element {
            QueryElement::And { and: children } => and.extend(children),
            other => and.push(other),
        }
    }

    let mut query = PqlQuery {
        query: Some(QueryElement::and(and)),
        order_args: Vec::new(),
        page: 1,
        page_size: 0,
        count: true,
        results: true,
        check_path: true,
        ..Default::default()
    };

    if model.targets_items() {
        query.entity = Entity::File;
        query.partition_by = Some("item_id".to_string());
        query.select = [
            "sha256",
            "path",
            "last_modified",
            "type",
            "md5",
            "duration",
            "audio_tracks",
            "video_tracks",
            "subtitle_tracks",
        ]
        .into_iter()
        .map(String::from)
        .collect();
    } else if model.targets_text() {
        query.entity = Entity::TextItem;
        query.select = ["sha256", "path", "last_modified", "md5", "type", "text"]
            .into_iter()
            .map(String::from)
            .collect();
    } else {
        bail!(
            "unsupported target entities for {}: {:?}",
            setter_name,
            model.target_entities
        );
    }

    Ok(query)
}

fn parse_filter(raw: serde_json::Value) -> Result<QueryElement> {
    Ok(serde_json::from_value(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_db::system_config::JobFilter;

    fn model(raw: serde_json::Value) -> ModelMetadata {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn items_model_partitions_by_item() {
        let model = model(serde_json::json!({
            "group": "ocr",
            "inference_id": "doctr",
            "input_handler": "file_bytes",
            "output_type": "text",
            "input_mime_types": ["image/"],
        }));
        let query = build_job_query(&model, &SystemConfig::default()).unwrap();
        assert_eq!(query.entity, Entity::File);
        assert_eq!(query.partition_by.as_deref(), Some("item_id"));
        assert_eq!(query.page_size, 0);
        assert!(query.check_path);
        // mime prefix + not-processed
        match query.query.unwrap() {
            QueryElement::And { and } => assert_eq!(and.len(), 2),
            _ => panic!("expected and"),
        }
    }

    #[test]
    fn text_model_targets_text_entity() {
        let model = model(serde_json::json!({
            "group": "st",
            "inference_id": "minilm",
            "input_handler": "text_content",
            "output_type": "text-embedding",
            "target_entities": ["text"],
        }));
        let query = build_job_query(&model, &SystemConfig::default()).unwrap();
        assert_eq!(query.entity, Entity::TextItem);
        assert!(query.select.contains(&"text".to_string()));
    }

    #[test]
    fn user_filters_apply_by_setter_name() {
        let model = model(serde_json::json!({
            "group": "ocr",
            "inference_id": "doctr",
            "input_handler": "file_bytes",
            "output_type": "text",
        }));
        let config = SystemConfig {
            job_filters: vec![
                JobFilter {
                    setter_names: vec!["*".into()],
                    pql_query: serde_json::json!({ "startswith": { "path": "/media" } }),
                },
                JobFilter {
                    setter_names: vec!["other/model".into()],
                    pql_query: serde_json::json!({ "eq": { "type": "video/mp4" } }),
                },
            ],
            ..Default::default()
        };
        let query = build_job_query(&model, &config).unwrap();
        match query.query.unwrap() {
            // not-processed + the wildcard filter; the other model's filter
            // is ignored.
            QueryElement::And { and } => assert_eq!(and.len(), 2),
            _ => panic!("expected and"),
        }
    }
}
