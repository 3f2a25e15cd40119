//! ORDER BY merging and coalescing.
//!
//! Two sources contribute clauses: sortable filters that opted in, and the
//! query's explicit `order_args`. Clauses are merged by priority (filters
//! win ties against args, then list position). Sortable filters that share
//! a priority collapse into a single coalesced clause so their ranks
//! interleave instead of cascading.

use crate::error::PqlError;
use crate::model::OrderArgs;
use crate::state::{OrderByFilterRef, OrderDirection, VERY_LARGE_NUMBER, VERY_SMALL_NUMBER};

/// One resolved ORDER BY contribution.
#[derive(Debug, Clone)]
pub enum OrderClause {
    Args(OrderArgs),
    Filter(OrderByFilterRef),
    /// Same-priority filter ranks coalesced into one clause.
    Coalesced(Vec<OrderByFilterRef>),
}

impl OrderClause {
    pub fn filter_ctes(&self) -> Vec<&str> {
        match self {
            OrderClause::Args(_) => Vec::new(),
            OrderClause::Filter(f) => vec![f.cte_name.as_str()],
            OrderClause::Coalesced(fs) => fs.iter().map(|f| f.cte_name.as_str()).collect(),
        }
    }
}

enum Entry {
    Filter(OrderByFilterRef),
    Args(OrderArgs),
}

impl Entry {
    fn priority(&self) -> i32 {
        match self {
            Entry::Filter(f) => f.priority,
            Entry::Args(a) => a.priority,
        }
    }

    fn source_rank(&self) -> i32 {
        // Filter clauses outrank explicit args at equal priority.
        match self {
            Entry::Filter(_) => 0,
            Entry::Args(_) => 1,
        }
    }
}

/// Merge the two clause sources into the final ordered list.
pub fn combine_order_lists(
    order_list: &[OrderByFilterRef],
    order_args: &[OrderArgs],
) -> Vec<OrderClause> {
    let mut combined: Vec<(Entry, usize)> = order_list
        .iter()
        .cloned()
        .map(Entry::Filter)
        .chain(order_args.iter().cloned().map(Entry::Args))
        .enumerate()
        .map(|(i, e)| (e, i))
        .collect();

    combined.sort_by_key(|(entry, index)| (-entry.priority(), entry.source_rank(), *index));

    group_order_list(combined.into_iter().map(|(e, _)| e))
}

fn group_order_list(entries: impl Iterator<Item = Entry>) -> Vec<OrderClause> {
    let mut grouped: Vec<OrderClause> = Vec::new();
    let mut pending: Vec<OrderByFilterRef> = Vec::new();
    let mut pending_priority = 0;

    let flush = |grouped: &mut Vec<OrderClause>, pending: &mut Vec<OrderByFilterRef>| {
        match pending.len() {
            0 => {}
            1 => grouped.push(OrderClause::Filter(pending.remove(0))),
            _ => grouped.push(OrderClause::Coalesced(std::mem::take(pending))),
        }
    };

    for entry in entries {
        match entry {
            Entry::Filter(f) => {
                if !pending.is_empty() && pending_priority != f.priority {
                    flush(&mut grouped, &mut pending);
                }
                pending_priority = f.priority;
                pending.push(f);
            }
            Entry::Args(a) => {
                flush(&mut grouped, &mut pending);
                grouped.push(OrderClause::Args(a));
            }
        }
    }
    flush(&mut grouped, &mut pending);
    grouped
}

/// Direction of an explicit order arg, applying per-column defaults.
pub fn args_direction(args: &OrderArgs) -> OrderDirection {
    match args.order.as_deref() {
        Some("asc") => OrderDirection::Asc,
        Some("desc") => OrderDirection::Desc,
        _ => {
            if args.order_by == "last_modified" {
                OrderDirection::Desc
            } else {
                OrderDirection::Asc
            }
        }
    }
}

/// SQL for a coalesced clause.
pub fn coalesced_sql(filters: &[OrderByFilterRef]) -> Result<String, PqlError> {
    let direction = filters
        .first()
        .map(|f| f.direction)
        .unwrap_or(OrderDirection::Asc);
    let (outer, sentinel) = match direction {
        OrderDirection::Asc => ("MIN", VERY_LARGE_NUMBER),
        OrderDirection::Desc => ("MAX", VERY_SMALL_NUMBER),
    };
    let parts: Vec<String> = filters
        .iter()
        .map(|f| format!("COALESCE({}.order_rank, {sentinel})", f.cte_name))
        .collect();
    Ok(format!(
        "{outer}({}) {}",
        parts.join(", "),
        direction.as_sql()
    ))
}
