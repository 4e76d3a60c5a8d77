//! Thin SQL helpers on top of the connection pool
//!
//! Every helper reserves its own connection and returns it before
//! reporting, whether the statement succeeded or not.

use super::pool::SqlPool;
use crate::Result;
use rusqlite::Statement;

/// Execute SQL that returns no rows.
pub fn exec(pool: &SqlPool, sql: &str) -> Result<()> {
    let conn = pool.reserve()?;
    conn.execute_batch(sql)?;
    Ok(())
}

/// Run a numeric query.
///
/// `inputs` are bound positionally starting at `?1`. Integer columns of the
/// result rows are read in row order into at most `max_outputs` values; rows
/// beyond that capacity are left unread. NULL reads as 0. The length of the
/// returned vector is the number of values read.
pub fn query_numeric(
    pool: &SqlPool,
    sql: &str,
    inputs: &[u64],
    max_outputs: usize,
) -> Result<Vec<u64>> {
    let conn = pool.reserve()?;
    let mut stmt = conn.prepare(sql)?;
    let bind: Vec<i64> = inputs.iter().map(|v| *v as i64).collect();
    bind_multi_i64(&mut stmt, 1, &bind)?;

    let columns = stmt.column_count();
    let mut values = Vec::with_capacity(max_outputs.min(64));
    let mut rows = stmt.raw_query();
    'rows: while values.len() < max_outputs {
        let Some(row) = rows.next()? else {
            break;
        };
        for i in 0..columns {
            if values.len() >= max_outputs {
                break 'rows;
            }
            let value: Option<i64> = row.get(i)?;
            values.push(value.unwrap_or(0) as u64);
        }
    }

    tracing::trace!("query_numeric read {} values", values.len());
    Ok(values)
}

/// Bind a run of 64-bit integers to consecutive parameters starting at
/// `first_index` (1-based). Stops at the first failing bind.
pub fn bind_multi_i64(stmt: &mut Statement<'_>, first_index: usize, values: &[i64]) -> Result<()> {
    for (i, value) in values.iter().enumerate() {
        stmt.raw_bind_parameter(first_index + i, *value)?;
    }
    Ok(())
}
