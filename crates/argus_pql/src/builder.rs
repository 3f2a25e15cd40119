//! Query tree → SQL compilation.

use crate::columns::{contains_text_columns, qualified, ColumnTable};
use crate::error::PqlError;
use crate::filters::embeddings::QueryEmbedder;
use crate::model::{Entity, PqlQuery, QueryElement};
use crate::order::{args_direction, coalesced_sql, combine_order_lists, OrderClause};
use crate::state::QueryState;
use argus_db::DbValue;
use std::collections::HashSet;

/// A compiled statement: SQL text plus ordered bind parameters.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<DbValue>,
    /// Alias of each `extra_<i>` output column, in column order.
    pub extra_aliases: Vec<String>,
}

/// Validate filters and prune vacuous subtrees.
///
/// Must run once before [`build_query`]; embedding filters resolve their
/// query vectors here.
pub fn prepare_query(
    mut query: PqlQuery,
    embedder: &dyn QueryEmbedder,
) -> Result<PqlQuery, PqlError> {
    query.query = match query.query.take() {
        Some(root) => preprocess_element(root, embedder)?,
        None => None,
    };
    Ok(query)
}

fn preprocess_element(
    el: QueryElement,
    embedder: &dyn QueryEmbedder,
) -> Result<Option<QueryElement>, PqlError> {
    match el {
        QueryElement::Filter(mut filter) => {
            if filter.validate(embedder)? {
                Ok(Some(QueryElement::Filter(filter)))
            } else {
                Ok(None)
            }
        }
        QueryElement::And { and } => {
            let mut children = Vec::with_capacity(and.len());
            for child in and {
                if let Some(child) = preprocess_element(child, embedder)? {
                    children.push(child);
                }
            }
            Ok(match children.len() {
                0 => None,
                1 => Some(children.remove(0)),
                _ => Some(QueryElement::And { and: children }),
            })
        }
        QueryElement::Or { or } => {
            let mut children = Vec::with_capacity(or.len());
            for child in or {
                if let Some(child) = preprocess_element(child, embedder)? {
                    children.push(child);
                }
            }
            Ok(match children.len() {
                0 => None,
                1 => Some(children.remove(0)),
                _ => Some(QueryElement::Or { or: children }),
            })
        }
        QueryElement::Not { not } => Ok(preprocess_element(*not, embedder)?
            .map(|inner| QueryElement::Not { not: Box::new(inner) })),
    }
}

/// Compile a prepared query into SQL.
pub fn build_query(query: &PqlQuery, count_query: bool) -> Result<CompiledQuery, PqlError> {
    let is_text = query.entity.is_text();
    let mut state = QueryState::new(count_query, is_text);

    // Root of the chain: every file (joined out to its texts for text
    // queries).
    let begin_body = if is_text {
        "SELECT files.id AS file_id, files.item_id AS item_id, extracted_text.id AS data_id\nFROM files\nJOIN item_data ON item_data.item_id = files.item_id\nJOIN extracted_text ON extracted_text.id = item_data.id"
            .to_string()
    } else {
        "SELECT files.id AS file_id, files.item_id AS item_id\nFROM files".to_string()
    };
    state.add_named_cte("begin_cte", begin_body, vec![]);

    let mut context = "begin_cte".to_string();
    if let Some(root) = &query.query {
        context = process_query_element(root, &context, &mut state)?;
    }

    // Entity/partition grouping: collapse to one row per item or per text.
    let group_col = match query.entity {
        Entity::Item => Some("item_id"),
        Entity::TextItem => Some("data_id"),
        Entity::File | Entity::TextFile => match query.partition_by.as_deref() {
            None => None,
            Some("item_id") => Some("item_id"),
            Some("data_id") if is_text => Some("data_id"),
            Some(other) => return Err(PqlError::UnsupportedPartition(other.to_string())),
        },
    };
    if let Some(col) = group_col {
        let body = match (col, is_text) {
            ("item_id", false) => format!(
                "SELECT MAX({context}.file_id) AS file_id, {context}.item_id AS item_id\nFROM {context}\nGROUP BY {context}.item_id"
            ),
            ("item_id", true) => format!(
                "SELECT MAX({context}.file_id) AS file_id, {context}.item_id AS item_id, MAX({context}.data_id) AS data_id\nFROM {context}\nGROUP BY {context}.item_id"
            ),
            ("data_id", _) => format!(
                "SELECT MAX({context}.file_id) AS file_id, MAX({context}.item_id) AS item_id, {context}.data_id AS data_id\nFROM {context}\nGROUP BY {context}.data_id"
            ),
            _ => unreachable!("group_col is item_id or data_id"),
        };
        context = state.add_cte("partition", body, vec![]);
    }

    if count_query {
        let sql = assemble(
            &state,
            &format!("SELECT COUNT(*) AS total\nFROM {context}"),
        );
        let params = collect_params(&state, vec![]);
        return Ok(CompiledQuery {
            sql,
            params,
            extra_aliases: Vec::new(),
        });
    }

    // Column selection: std columns always ride along.
    let mut select_cols: Vec<String> = query.select.clone();
    for std_col in ["path", "sha256", "type", "last_modified"] {
        if !select_cols.iter().any(|c| c == std_col) {
            select_cols.push(std_col.to_string());
        }
    }
    select_cols.retain(|c| !matches!(c.as_str(), "file_id" | "item_id" | "data_id"));
    if !is_text {
        if let Some(col) = contains_text_columns(select_cols.iter().map(String::as_str)) {
            return Err(PqlError::TextColumnOutsideTextQuery(col.to_string()));
        }
        let order_cols: Vec<&str> = query.order_args.iter().map(|o| o.order_by.as_str()).collect();
        if let Some(col) = contains_text_columns(order_cols) {
            return Err(PqlError::TextColumnOutsideTextQuery(col.to_string()));
        }
    }

    let mut selection = vec![
        format!("{context}.file_id AS file_id"),
        format!("{context}.item_id AS item_id"),
    ];
    if is_text {
        selection.push(format!("{context}.data_id AS data_id"));
    }
    for col in &select_cols {
        let (expr, table) = qualified(col)?;
        debug_assert!(table != ColumnTable::Text || is_text);
        selection.push(format!("{expr} AS \"{col}\""));
    }

    let mut joins = vec![
        format!("JOIN items ON items.id = {context}.item_id"),
        format!("JOIN files ON files.id = {context}.file_id"),
    ];
    if is_text {
        // Text queries always join their payload tables so selected text
        // columns and setter names resolve.
        joins.push(format!(
            "JOIN extracted_text ON extracted_text.id = {context}.data_id"
        ));
        joins.push(format!("JOIN item_data ON item_data.id = {context}.data_id"));
        joins.push("JOIN setters ON setters.id = item_data.setter_id".to_string());
    }

    // Ordering: merged filter/args clauses; CTEs off the chain head LEFT
    // JOIN in.
    let mut joined: HashSet<String> = HashSet::new();
    let clauses = combine_order_lists(&state.order_list, &query.order_args);
    let mut order_terms: Vec<String> = Vec::new();
    for clause in &clauses {
        for cte in clause.filter_ctes() {
            if cte != context && joined.insert(cte.to_string()) {
                joins.push(left_join(cte, &context, is_text));
            }
        }
        match clause {
            OrderClause::Args(args) => {
                let (expr, _) = qualified(&args.order_by)?;
                order_terms.push(format!(
                    "{expr} {} NULLS LAST",
                    args_direction(args).as_sql()
                ));
            }
            OrderClause::Filter(f) => {
                order_terms.push(format!(
                    "{}.order_rank {} NULLS LAST",
                    f.cte_name,
                    f.direction.as_sql()
                ));
            }
            OrderClause::Coalesced(fs) => {
                order_terms.push(coalesced_sql(fs)?);
            }
        }
    }

    // Extra output columns registered by filters.
    let mut extra_aliases = Vec::new();
    for (i, extra) in state.extra_columns.iter().enumerate() {
        if extra.need_join
            && extra.cte_name != context
            && joined.insert(extra.cte_name.clone())
        {
            joins.push(left_join(&extra.cte_name, &context, is_text));
        }
        selection.push(format!("{}.{} AS extra_{i}", extra.cte_name, extra.column));
        extra_aliases.push(extra.alias.clone());
    }

    let mut final_select = format!(
        "SELECT {}\nFROM {context}\n{}",
        selection.join(", "),
        joins.join("\n")
    );
    if !order_terms.is_empty() {
        final_select.push_str(&format!("\nORDER BY {}", order_terms.join(", ")));
    }

    let mut final_params = Vec::new();
    if query.page_size > 0 {
        let page = query.page.max(1);
        let offset = (page as i64 - 1) * query.page_size as i64;
        final_select.push_str("\nLIMIT ? OFFSET ?");
        final_params.push(DbValue::Integer(query.page_size as i64));
        final_params.push(DbValue::Integer(offset));
    }

    let sql = assemble(&state, &final_select);
    let params = collect_params(&state, final_params);
    Ok(CompiledQuery {
        sql,
        params,
        extra_aliases,
    })
}

fn left_join(cte: &str, context: &str, is_text: bool) -> String {
    if is_text {
        format!("LEFT JOIN {cte} ON {cte}.data_id = {context}.data_id")
    } else {
        format!("LEFT JOIN {cte} ON {cte}.file_id = {context}.file_id")
    }
}

fn process_query_element(
    el: &QueryElement,
    ctx: &str,
    state: &mut QueryState,
) -> Result<String, PqlError> {
    match el {
        QueryElement::Filter(filter) => filter.build_cte(ctx, state),
        QueryElement::And { and } => {
            // AND is implemented by chaining: each child narrows the set.
            let mut context = ctx.to_string();
            for child in and {
                context = process_query_element(child, &context, state)?;
            }
            Ok(context)
        }
        QueryElement::Or { or } => {
            let mut selects = Vec::with_capacity(or.len());
            for child in or {
                let child_cte = process_query_element(child, ctx, state)?;
                selects.push(format!(
                    "SELECT {}\nFROM {child_cte}",
                    state.std_cols(&child_cte)
                ));
            }
            Ok(state.add_cte("or", selects.join("\nUNION\n"), vec![]))
        }
        QueryElement::Not { not } => {
            let child_cte = process_query_element(not, ctx, state)?;
            let body = format!(
                "SELECT {}\nFROM {ctx}\nEXCEPT\nSELECT {}\nFROM {child_cte}",
                state.std_cols(ctx),
                state.std_cols(&child_cte)
            );
            Ok(state.add_cte("not", body, vec![]))
        }
    }
}

fn assemble(state: &QueryState, final_select: &str) -> String {
    let ctes: Vec<String> = state
        .ctes
        .iter()
        .map(|cte| format!("{} AS (\n{}\n)", cte.name, cte.body))
        .collect();
    format!("WITH {}\n{final_select}", ctes.join(",\n"))
}

fn collect_params(state: &QueryState, final_params: Vec<DbValue>) -> Vec<DbValue> {
    let mut params: Vec<DbValue> = state
        .ctes
        .iter()
        .flat_map(|cte| cte.params.iter().cloned())
        .collect();
    params.extend(final_params);
    params
}
