//! Vector similarity search over text and image embeddings.

use crate::error::PqlError;
use crate::filters::text::text_metadata_criteria;
use crate::filters::{derive_rank_column, finish_sortable_cte};
use crate::state::{QueryState, SortableOptions};
use argus_db::DbValue;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// How the query string is turned into an embedding at validation time.
pub trait QueryEmbedder {
    fn embed(&self, text: &str, model: &str, args: &EmbedArgs) -> Result<Vec<u8>, String>;
}

/// Embedder for contexts where queries must carry a raw embedding.
pub struct NoEmbedder;

impl QueryEmbedder for NoEmbedder {
    fn embed(&self, _text: &str, model: &str, _args: &EmbedArgs) -> Result<Vec<u8>, String> {
        Err(format!(
            "no inference service available to embed the query with model {model}"
        ))
    }
}

/// Model cache parameters used when embedding the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedArgs {
    #[serde(default = "default_cache_key")]
    pub cache_key: String,
    #[serde(default = "default_lru_size")]
    pub lru_size: u32,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: i64,
}

impl Default for EmbedArgs {
    fn default() -> Self {
        Self {
            cache_key: default_cache_key(),
            lru_size: default_lru_size(),
            ttl_seconds: default_ttl(),
        }
    }
}

fn default_cache_key() -> String {
    "search".to_string()
}

fn default_lru_size() -> u32 {
    1
}

fn default_ttl() -> i64 {
    60
}

/// Per-item aggregation when an item carries several embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DistanceAggregation {
    #[default]
    Min,
    Max,
    Avg,
}

impl DistanceAggregation {
    fn as_sql(&self) -> &'static str {
        match self {
            DistanceAggregation::Min => "MIN",
            DistanceAggregation::Max => "MAX",
            DistanceAggregation::Avg => "AVG",
        }
    }
}

fn distance_fn(name: Option<&str>) -> Result<&'static str, PqlError> {
    match name {
        None => Ok("vec_distance_l2"),
        Some(n) if n.eq_ignore_ascii_case("l2") => Ok("vec_distance_l2"),
        Some(n) if n.eq_ignore_ascii_case("cosine") => Ok("vec_distance_cosine"),
        Some(other) => Err(PqlError::InvalidFilter(format!(
            "unknown distance function: '{other}'"
        ))),
    }
}

/// Decode a base64-encoded f32 little-endian embedding.
fn decode_raw_embedding(encoded: &str) -> Result<Vec<u8>, PqlError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| PqlError::Embedding(format!("invalid base64 embedding: {e}")))?;
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(PqlError::Embedding(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Semantic search over text embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticTextArgs {
    /// Query text, or a base64 raw embedding when `embed` is absent.
    pub query: String,
    /// Embedding model; searches embeddings written by this setter.
    pub model: String,
    #[serde(default)]
    pub setters: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub language_min_confidence: Option<f64>,
    #[serde(default)]
    pub min_confidence: Option<f64>,
    #[serde(default)]
    pub min_length: Option<i64>,
    #[serde(default)]
    pub max_length: Option<i64>,
    #[serde(default)]
    pub distance_aggregation: DistanceAggregation,
    /// Exponent applied to source-text confidence in the weighted distance
    /// aggregation; 0 disables weighting.
    #[serde(default)]
    pub confidence_weight: f64,
    #[serde(default)]
    pub language_confidence_weight: f64,
    /// Distance function override ("l2" or "cosine").
    #[serde(default)]
    pub distance_func: Option<String>,
    /// Embed the query through the inference service. When absent, `query`
    /// must be a base64 raw embedding.
    #[serde(default = "default_embed")]
    pub embed: Option<EmbedArgs>,

    #[serde(skip)]
    pub(crate) embedding: Option<Vec<u8>>,
}

fn default_embed() -> Option<EmbedArgs> {
    Some(EmbedArgs::default())
}

impl SemanticTextArgs {
    pub fn validate(&mut self, embedder: &dyn QueryEmbedder) -> Result<bool, PqlError> {
        if self.query.trim().is_empty() {
            return Ok(false);
        }
        distance_fn(self.distance_func.as_deref())?;
        self.embedding = Some(match &self.embed {
            Some(args) => embedder
                .embed(&self.query, &self.model, args)
                .map_err(PqlError::Embedding)?,
            None => decode_raw_embedding(&self.query)?,
        });
        Ok(true)
    }
}

/// Weighted or plain rank expression over the distance column.
fn rank_expression(
    distance: &str,
    aggregation: DistanceAggregation,
    confidence_weight: f64,
    language_confidence_weight: f64,
    params: &mut Vec<DbValue>,
) -> String {
    let conf = "POW(COALESCE(extracted_text.confidence, 1), ?)";
    let lang = "POW(COALESCE(extracted_text.language_confidence, 1), ?)";
    if confidence_weight != 0.0 && language_confidence_weight != 0.0 {
        params.push(confidence_weight.into());
        params.push(language_confidence_weight.into());
        // Both weight params appear twice: once in the numerator product and
        // once in the denominator sum.
        params.push(confidence_weight.into());
        params.push(language_confidence_weight.into());
        format!("SUM({distance} * {conf} * {lang}) / SUM({conf} * {lang})")
    } else if confidence_weight != 0.0 {
        params.push(confidence_weight.into());
        params.push(confidence_weight.into());
        format!("SUM({distance} * {conf}) / SUM({conf})")
    } else if language_confidence_weight != 0.0 {
        params.push(language_confidence_weight.into());
        params.push(language_confidence_weight.into());
        format!("SUM({distance} * {lang}) / SUM({lang})")
    } else {
        format!("{}({distance})", aggregation.as_sql())
    }
}

pub fn build_semantic_text_cte(
    args: &SemanticTextArgs,
    sortable: &SortableOptions,
    ctx: &str,
    state: &mut QueryState,
) -> Result<String, PqlError> {
    let embedding = args
        .embedding
        .clone()
        .ok_or(PqlError::NotValidated)?;
    let func = distance_fn(args.distance_func.as_deref())?;
    let distance = format!("{func}(embeddings.embedding, ?)");

    let mut criteria_params = Vec::new();
    let criteria = text_metadata_criteria(
        &args.setters,
        &args.languages,
        args.language_min_confidence,
        args.min_confidence,
        args.min_length,
        args.max_length,
        &mut criteria_params,
    );
    let weighted = args.confidence_weight != 0.0 || args.language_confidence_weight != 0.0;
    let needs_text_join = !criteria.is_empty() || weighted;

    let std = state.std_cols(ctx);
    let mut params: Vec<DbValue> = Vec::new();

    // Rank params come first: the SELECT list precedes the WHERE clause.
    // Count mode drops the rank column, so its params must be dropped too.
    let rank_col = if state.is_count_query {
        String::new()
    } else {
        let mut rank_params = Vec::new();
        params.push(DbValue::Blob(embedding));
        let rank = rank_expression(
            &distance,
            args.distance_aggregation,
            args.confidence_weight,
            args.language_confidence_weight,
            &mut rank_params,
        );
        params.extend(rank_params);
        format!(", {}", derive_rank_column(&rank, sortable))
    };

    let body = if state.is_text_query {
        // Embeddings derived from the context's text row.
        params.push(DbValue::Text(args.model.clone()));
        params.extend(criteria_params);
        let where_clause = if criteria.is_empty() {
            String::new()
        } else {
            format!("\nWHERE {}", criteria.join(" AND "))
        };
        format!(
            "SELECT {std}{rank_col}\nFROM {ctx}\nJOIN item_data text_data ON text_data.id = {ctx}.data_id\nJOIN setters text_setters ON text_setters.id = text_data.setter_id\nJOIN extracted_text ON extracted_text.id = {ctx}.data_id\nJOIN item_data vec_data ON vec_data.source_id = extracted_text.id\nJOIN setters vec_setters ON vec_setters.id = vec_data.setter_id AND vec_setters.name = ?\nJOIN embeddings ON embeddings.id = vec_data.id{where_clause}\nGROUP BY {std}"
        )
    } else {
        params.push(DbValue::Text(args.model.clone()));
        let text_joins = if needs_text_join {
            "\nJOIN item_data text_data ON text_data.id = vec_data.source_id\nJOIN setters ON setters.id = text_data.setter_id\nJOIN extracted_text ON text_data.id = extracted_text.id"
        } else {
            ""
        };
        params.extend(criteria_params);
        let where_clause = if criteria.is_empty() {
            String::new()
        } else {
            format!("\nWHERE {}", criteria.join(" AND "))
        };
        format!(
            "SELECT {std}{rank_col}\nFROM {ctx}\nJOIN item_data vec_data ON vec_data.item_id = {ctx}.item_id\nJOIN setters vec_setters ON vec_setters.id = vec_data.setter_id AND vec_setters.name = ?\nJOIN embeddings ON embeddings.id = vec_data.id{text_joins}{where_clause}\nGROUP BY {std}"
        )
    };

    Ok(finish_sortable_cte(
        "semantic_text",
        body,
        params,
        sortable,
        !state.is_count_query,
        state,
    ))
}

/// Semantic search over image (clip) embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticImageArgs {
    /// Query text, or a base64 raw embedding when `embed` is absent.
    pub query: String,
    /// Clip model; searches embeddings written by this setter.
    pub model: String,
    #[serde(default)]
    pub distance_aggregation: DistanceAggregation,
    #[serde(default)]
    pub distance_func: Option<String>,
    #[serde(default = "default_embed")]
    pub embed: Option<EmbedArgs>,

    #[serde(skip)]
    pub(crate) embedding: Option<Vec<u8>>,
}

impl SemanticImageArgs {
    pub fn validate(&mut self, embedder: &dyn QueryEmbedder) -> Result<bool, PqlError> {
        if self.query.trim().is_empty() {
            return Ok(false);
        }
        distance_fn(self.distance_func.as_deref())?;
        self.embedding = Some(match &self.embed {
            Some(args) => embedder
                .embed(&self.query, &self.model, args)
                .map_err(PqlError::Embedding)?,
            None => decode_raw_embedding(&self.query)?,
        });
        Ok(true)
    }
}

pub fn build_semantic_image_cte(
    args: &SemanticImageArgs,
    sortable: &SortableOptions,
    ctx: &str,
    state: &mut QueryState,
) -> Result<String, PqlError> {
    let embedding = args
        .embedding
        .clone()
        .ok_or(PqlError::NotValidated)?;
    let func = distance_fn(args.distance_func.as_deref())?;
    let agg = args.distance_aggregation.as_sql();

    let std = state.std_cols(ctx);
    let rank_col = if state.is_count_query {
        String::new()
    } else {
        format!(
            ", {}",
            derive_rank_column(
                &format!("{agg}({func}(embeddings.embedding, ?))"),
                sortable
            )
        )
    };
    let mut params: Vec<DbValue> = Vec::new();
    if !state.is_count_query {
        params.push(DbValue::Blob(embedding));
    }
    params.push(DbValue::Text(args.model.clone()));

    let body = format!(
        "SELECT {std}{rank_col}\nFROM {ctx}\nJOIN item_data vec_data ON vec_data.item_id = {ctx}.item_id\nJOIN setters vec_setters ON vec_setters.id = vec_data.setter_id AND vec_setters.name = ?\nJOIN embeddings ON embeddings.id = vec_data.id\nGROUP BY {std}"
    );

    Ok(finish_sortable_cte(
        "semantic_image",
        body,
        params,
        sortable,
        !state.is_count_query,
        state,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_db::serialize_f32;

    struct FixedEmbedder(Vec<u8>);

    impl QueryEmbedder for FixedEmbedder {
        fn embed(&self, _text: &str, _model: &str, _args: &EmbedArgs) -> Result<Vec<u8>, String> {
            Ok(self.0.clone())
        }
    }

    fn semantic_args(query: &str) -> SemanticTextArgs {
        serde_json::from_value(serde_json::json!({
            "query": query,
            "model": "st/minilm",
        }))
        .unwrap()
    }

    #[test]
    fn empty_query_is_vacuous() {
        let mut args = semantic_args("  ");
        assert!(!args.validate(&NoEmbedder).unwrap());
    }

    #[test]
    fn embedder_output_is_stored() {
        let blob = serialize_f32(&[1.0, 2.0]);
        let mut args = semantic_args("a sunset");
        args.validate(&FixedEmbedder(blob.clone())).unwrap();
        assert_eq!(args.embedding, Some(blob));
    }

    #[test]
    fn raw_embedding_is_decoded_without_embedder() {
        let blob = serialize_f32(&[0.25, 0.5]);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&blob);
        let mut args = semantic_args(&encoded);
        args.embed = None;
        args.validate(&NoEmbedder).unwrap();
        assert_eq!(args.embedding, Some(blob));
    }

    #[test]
    fn weighted_rank_uses_pow_formula() {
        let mut params = Vec::new();
        let rank = rank_expression("d", DistanceAggregation::Min, 2.0, 0.0, &mut params);
        assert_eq!(
            rank,
            "SUM(d * POW(COALESCE(extracted_text.confidence, 1), ?)) / SUM(POW(COALESCE(extracted_text.confidence, 1), ?))"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn unknown_distance_func_is_rejected() {
        let mut args = semantic_args("sunset");
        args.distance_func = Some("manhattan".into());
        assert!(args.validate(&FixedEmbedder(vec![0, 0, 128, 63])).is_err());
    }
}
