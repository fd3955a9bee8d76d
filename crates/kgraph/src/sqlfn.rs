//! Custom SQL scalar functions installed on every opened connection.

use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, Error as SqliteError, Result as SqliteResult};

/// Registers `REGEXP`, caching the compiled pattern across calls the way
/// SQLite's own `x REGEXP y` convention expects (`y` compiled once, `x`
/// tested per row).
pub fn register_regexp(conn: &Connection) -> SqliteResult<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let saved_re: Option<std::sync::Arc<Regex>> = ctx.get_aux(0)?;
            let regex = match saved_re {
                Some(re) => re,
                None => {
                    let pattern = ctx.get::<String>(0)?;
                    let compiled = Regex::new(&pattern)
                        .map_err(|e| SqliteError::UserFunctionError(Box::new(e)))?;
                    ctx.set_aux(0, compiled.clone())?;
                    std::sync::Arc::new(compiled)
                }
            };
            let text = ctx
                .get_raw(1)
                .as_str()
                .map_err(|e| SqliteError::UserFunctionError(e.into()))?;
            Ok(regex.is_match(text))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regexp_matches() {
        let conn = Connection::open_in_memory().unwrap();
        register_regexp(&conn).unwrap();
        let is_match: bool = conn
            .query_row("SELECT 'aaeei' REGEXP '^[aei]*$'", [], |row| row.get(0))
            .unwrap();
        assert!(is_match);
    }
}
