//! Target dialect table: quoting, placeholders, and clause forms.

use crate::types::Symbol;
use serde::{Deserialize, Serialize};

/// The SQL dialect to render for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    Sqlite,
    Mysql,
    Sqlserver,
}

impl Dialect {
    /// Quotes an identifier, doubling embedded closing quote characters.
    pub(crate) fn quote_ident(&self, name: &str, out: &mut String) {
        let (open, close) = match self {
            Dialect::Postgres | Dialect::Sqlite => ('"', '"'),
            Dialect::Mysql => ('`', '`'),
            Dialect::Sqlserver => ('[', ']'),
        };
        out.push(open);
        for ch in name.chars() {
            if ch == close {
                out.push(close);
            }
            out.push(ch);
        }
        out.push(close);
    }

    /// Placeholder text for the parameter at `position` (1-based).
    pub(crate) fn placeholder(&self, position: usize, name: &Symbol) -> String {
        match self {
            Dialect::Postgres => format!("${position}"),
            Dialect::Sqlite => format!(":{name}"),
            Dialect::Mysql => "?".to_string(),
            Dialect::Sqlserver => format!("@{name}"),
        }
    }

    pub(crate) fn bool_literal(&self, value: bool) -> &'static str {
        match self {
            Dialect::Sqlserver => {
                if value {
                    "1"
                } else {
                    "0"
                }
            }
            _ => {
                if value {
                    "TRUE"
                } else {
                    "FALSE"
                }
            }
        }
    }

    /// Whether the dialect accepts `FILTER (WHERE …)` on aggregates;
    /// otherwise the arguments are wrapped in `CASE WHEN`.
    pub(crate) fn supports_agg_filter(&self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Sqlite)
    }

    /// Whether `NULLS FIRST`/`NULLS LAST` may be spelled out.
    pub(crate) fn supports_nulls_order(&self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Sqlite)
    }
}
