/// Which backing driver a DSN selects (spec §6 "Backing store DSN").
///
/// `Sqlite` is the transient in-process variant used primarily for tests;
/// `Postgres` is the persistent server variant used in production. Most SQL
/// the core issues is driver-agnostic (bound through `sqlx::Any`), but a
/// handful of spots are dialect-aware: reserved-identifier quoting (the
/// `Group` table name collides with a keyword on the server driver) and the
/// `FOR UPDATE SKIP LOCKED` claim hint, which only Postgres honors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn from_dsn(dsn: &str) -> Option<Self> {
        let scheme = dsn.split(':').next()?;
        match scheme {
            "sqlite" | "sqlite3" => Some(Dialect::Sqlite),
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            _ => None,
        }
    }

    /// Quotes an identifier that may collide with a reserved word (notably
    /// the `Group` table, spec §6). SQLite and Postgres both accept double
    /// quotes for quoted identifiers, so this is mostly documentation of
    /// intent, but it keeps the decision in one dialect-aware place rather
    /// than scattered string literals.
    pub fn quote_ident(self, ident: &str) -> String {
        format!("\"{ident}\"")
    }

    /// Whether this dialect supports `FOR UPDATE SKIP LOCKED` (spec §4.8
    /// claim path). SQLite has no row-level locking model, so claims on
    /// SQLite rely purely on the `UPDATE ... WHERE ...` atomicity of a
    /// single statement instead.
    pub fn supports_skip_locked(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Rewrites the crate-wide `?` bind placeholder into this dialect's
    /// native syntax. SQLite accepts bare `?` directly; Postgres only
    /// understands sequentially numbered `$1, $2, ...` parameters, and
    /// `sqlx::Any` does not translate between the two on its own, so every
    /// query built against the shared `?` surface is rewritten here before
    /// it reaches the driver.
    pub(crate) fn rewrite_placeholders(self, sql: &str) -> String {
        if self != Dialect::Postgres {
            return sql.to_string();
        }
        let mut out = String::with_capacity(sql.len() + 8);
        let mut in_quote = false;
        let mut n = 0u32;
        for c in sql.chars() {
            match c {
                '\'' => {
                    in_quote = !in_quote;
                    out.push(c);
                }
                '?' if !in_quote => {
                    n += 1;
                    out.push('$');
                    out.push_str(&n.to_string());
                }
                _ => out.push(c),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_sqlite_schemes() {
        assert_eq!(
            Dialect::from_dsn("sqlite://:memory:"),
            Some(Dialect::Sqlite)
        );
        assert_eq!(
            Dialect::from_dsn("sqlite3:///tmp/x.db"),
            Some(Dialect::Sqlite)
        );
    }

    #[test]
    fn recognizes_postgres_schemes() {
        assert_eq!(
            Dialect::from_dsn("postgres://user@host/db"),
            Some(Dialect::Postgres)
        );
        assert_eq!(
            Dialect::from_dsn("postgresql://user@host/db"),
            Some(Dialect::Postgres)
        );
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert_eq!(Dialect::from_dsn("mysql://user@host/db"), None);
    }

    #[test]
    fn sqlite_leaves_placeholders_untouched() {
        let sql = "SELECT * FROM Cluster WHERE ID = ? AND State = ?";
        assert_eq!(Dialect::Sqlite.rewrite_placeholders(sql), sql);
    }

    #[test]
    fn postgres_numbers_placeholders_sequentially() {
        let sql = "SELECT * FROM Cluster WHERE ID = ? AND State = ?";
        assert_eq!(
            Dialect::Postgres.rewrite_placeholders(sql),
            "SELECT * FROM Cluster WHERE ID = $1 AND State = $2"
        );
    }

    #[test]
    fn postgres_ignores_question_marks_inside_string_literals() {
        let sql = "SELECT * FROM Cluster WHERE State = 'pending?' AND ID = ?";
        assert_eq!(
            Dialect::Postgres.rewrite_placeholders(sql),
            "SELECT * FROM Cluster WHERE State = 'pending?' AND ID = $1"
        );
    }
}
