//! Minimal `CREATE TABLE` parsing.
//!
//! Only the parenthesized column list is read: column names, declared types
//! and the primary key. Anything else in the statement is ignored.

/// Column type affinity, derived from the declared type the way SQLite does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

impl Affinity {
    pub fn from_declared_type(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            Affinity::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Affinity::Text
        } else if upper.is_empty() || upper.contains("BLOB") {
            Affinity::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }

    /// Whether a value with this serial type could have been stored in a
    /// column of this affinity.
    pub fn admits(self, serial_type: u64) -> bool {
        let numeric = serial_type <= 9;
        let text = serial_type >= 13 && serial_type % 2 == 1;
        let blob = serial_type >= 12 && serial_type % 2 == 0;
        match self {
            Affinity::Integer | Affinity::Real => numeric || blob,
            Affinity::Text => serial_type == 0 || text || blob,
            Affinity::Numeric | Affinity::Blob => numeric || text || blob,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub declared_type: String,
    pub affinity: Affinity,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableDefinition {
    pub columns: Vec<ColumnDef>,
    pub without_rowid: bool,
}

impl TableDefinition {
    /// Index of the column that aliases the rowid, if any.
    ///
    /// Only a lone `INTEGER` primary key on a rowid table qualifies; its value
    /// is stored as NULL in every record.
    pub fn rowid_alias(&self) -> Option<usize> {
        if self.without_rowid {
            return None;
        }
        let mut keys = self.columns.iter().enumerate().filter(|(_, c)| c.primary_key);
        let (index, column) = keys.next()?;
        if keys.next().is_some() || !column.declared_type.eq_ignore_ascii_case("INTEGER") {
            return None;
        }
        Some(index)
    }
}

const COLUMN_CONSTRAINTS: &[&str] = &[
    "CONSTRAINT",
    "PRIMARY",
    "NOT",
    "NULL",
    "UNIQUE",
    "CHECK",
    "DEFAULT",
    "COLLATE",
    "REFERENCES",
    "GENERATED",
    "AS",
];

const TABLE_CONSTRAINTS: &[&str] = &["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

/// Parse the column list of a `CREATE TABLE` statement.
///
/// Returns `None` when the statement has no parenthesized column list
/// (for example `CREATE TABLE t AS SELECT ...`).
pub fn parse_create_table(sql: &str) -> Option<TableDefinition> {
    let (body, tail) = outer_parens(sql)?;
    let mut definition = TableDefinition {
        without_rowid: tail
            .split_whitespace()
            .map(str::to_ascii_uppercase)
            .collect::<Vec<_>>()
            .windows(2)
            .any(|w| w[0] == "WITHOUT" && w[1].trim_end_matches(';') == "ROWID"),
        ..Default::default()
    };

    let mut table_keys = Vec::new();
    for part in split_top_level(body) {
        let tokens = tokenize(part);
        let Some(first) = tokens.first() else {
            continue;
        };
        let keyword = first.to_ascii_uppercase();
        if TABLE_CONSTRAINTS.contains(&keyword.as_str()) {
            if let Some(columns) = primary_key_columns(&tokens) {
                table_keys = columns;
            }
            continue;
        }
        definition.columns.push(column_def(&tokens));
    }

    for key in table_keys {
        if let Some(column) = definition
            .columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(&key))
        {
            column.primary_key = true;
        }
    }
    Some(definition)
}

fn column_def(tokens: &[String]) -> ColumnDef {
    let name = unquote(&tokens[0]);
    let mut type_words = Vec::new();
    let mut primary_key = false;
    let mut in_type = true;
    for (i, token) in tokens.iter().enumerate().skip(1) {
        let upper = token.to_ascii_uppercase();
        if COLUMN_CONSTRAINTS.contains(&upper.as_str()) {
            in_type = false;
        }
        if in_type {
            type_words.push(token.as_str());
        }
        if upper == "PRIMARY"
            && tokens
                .get(i + 1)
                .is_some_and(|t| t.eq_ignore_ascii_case("KEY"))
        {
            primary_key = true;
        }
    }
    let declared_type = join_type(&type_words);
    ColumnDef {
        affinity: Affinity::from_declared_type(&declared_type),
        name,
        declared_type,
        primary_key,
    }
}

/// `VARCHAR ( 10 )` style groups are rejoined without the inner spaces.
fn join_type(words: &[&str]) -> String {
    let mut out = String::new();
    for word in words {
        if !out.is_empty() && !word.starts_with('(') {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

fn primary_key_columns(tokens: &[String]) -> Option<Vec<String>> {
    let at = tokens.iter().position(|t| t.eq_ignore_ascii_case("PRIMARY"))?;
    if !tokens.get(at + 1)?.eq_ignore_ascii_case("KEY") {
        return None;
    }
    let group = tokens.get(at + 2)?;
    let inner = group.strip_prefix('(')?.strip_suffix(')')?;
    Some(
        split_top_level(inner)
            .into_iter()
            .filter_map(|col| tokenize(col).first().map(|t| unquote(t)))
            .collect(),
    )
}

/// Contents of the first balanced parenthesis group and the text after it.
fn outer_parens(sql: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    let mut start = None;
    let mut quote = None;
    for (i, ch) in sql.char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => quote = Some(ch),
            '[' => quote = Some(']'),
            '(' => {
                if depth == 0 {
                    start = Some(i + 1);
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Some((&sql[start?..i], &sql[i + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

/// Split at commas that are outside quotes and nested parentheses.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote = None;
    let mut start = 0;
    for (i, ch) in body.char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => quote = Some(ch),
            '[' => quote = Some(']'),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(body[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(body[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Whitespace-separated words; quoted identifiers and parenthesized groups
/// are single tokens.
fn tokenize(part: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote = None;
    for ch in part.chars() {
        if let Some(q) = quote {
            current.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' if depth == 0 => {
                current.push(ch);
                quote = Some(ch);
            }
            '[' if depth == 0 => {
                current.push(ch);
                quote = Some(']');
            }
            '(' => {
                if depth == 0 && !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                depth += 1;
                current.push(ch);
            }
            ')' => {
                current.push(ch);
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn unquote(token: &str) -> String {
    let stripped = match token.chars().next() {
        Some('"') => token.strip_prefix('"').and_then(|t| t.strip_suffix('"')),
        Some('`') => token.strip_prefix('`').and_then(|t| t.strip_suffix('`')),
        Some('[') => token.strip_prefix('[').and_then(|t| t.strip_suffix(']')),
        Some('\'') => token.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')),
        _ => None,
    };
    stripped.unwrap_or(token).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(sql: &str) -> Vec<String> {
        parse_create_table(sql)
            .map(|d| d.columns.into_iter().map(|c| c.name).collect())
            .unwrap_or_default()
    }

    #[test]
    fn simple_table() {
        let sql = "CREATE TABLE sms (id INTEGER PRIMARY KEY, body TEXT, sent INTEGER)";
        let def = parse_create_table(sql).unwrap();
        assert_eq!(names(sql), ["id", "body", "sent"]);
        assert_eq!(def.columns[0].affinity, Affinity::Integer);
        assert_eq!(def.columns[1].affinity, Affinity::Text);
        assert_eq!(def.rowid_alias(), Some(0));
    }

    #[test]
    fn types_with_arguments_keep_their_commas() {
        let def =
            parse_create_table("CREATE TABLE t (price DECIMAL(10, 2) NOT NULL, name VARCHAR(20))")
                .unwrap();
        assert_eq!(def.columns.len(), 2);
        assert_eq!(def.columns[0].declared_type, "DECIMAL(10, 2)");
        assert_eq!(def.columns[0].affinity, Affinity::Numeric);
        assert_eq!(def.columns[1].declared_type, "VARCHAR(20)");
        assert_eq!(def.columns[1].affinity, Affinity::Text);
    }

    #[test]
    fn table_constraints_are_not_columns() {
        let sql = "CREATE TABLE m (a INT, b TEXT, c BLOB, PRIMARY KEY (a), UNIQUE (b, c), \
                   FOREIGN KEY (c) REFERENCES other(x), CHECK (a > 0))";
        assert_eq!(names(sql), ["a", "b", "c"]);
        let def = parse_create_table(sql).unwrap();
        assert!(def.columns[0].primary_key);
        // INT is not INTEGER, so no alias
        assert_eq!(def.rowid_alias(), None);
    }

    #[test]
    fn quoted_identifiers() {
        let sql = r#"CREATE TABLE "my table" ("first col" TEXT, [second] INTEGER, `third`)"#;
        assert_eq!(names(sql), ["first col", "second", "third"]);
        let def = parse_create_table(sql).unwrap();
        assert_eq!(def.columns[2].declared_type, "");
        assert_eq!(def.columns[2].affinity, Affinity::Blob);
    }

    #[test]
    fn defaults_with_commas_and_parens() {
        let sql = "CREATE TABLE d (a TEXT DEFAULT 'x, y', b INTEGER DEFAULT (1 + 2), c REAL)";
        assert_eq!(names(sql), ["a", "b", "c"]);
        assert_eq!(parse_create_table(sql).unwrap().columns[2].affinity, Affinity::Real);
    }

    #[test]
    fn table_level_integer_key_is_alias() {
        let sql = "CREATE TABLE k (name TEXT, id INTEGER, PRIMARY KEY (id))";
        assert_eq!(parse_create_table(sql).unwrap().rowid_alias(), Some(1));
    }

    #[test]
    fn without_rowid_has_no_alias() {
        let sql = "CREATE TABLE w (id INTEGER PRIMARY KEY, v TEXT) WITHOUT ROWID";
        let def = parse_create_table(sql).unwrap();
        assert!(def.without_rowid);
        assert_eq!(def.rowid_alias(), None);
    }

    #[test]
    fn no_column_list() {
        assert!(parse_create_table("CREATE TABLE x AS SELECT 1").is_none());
        assert!(names("CREATE TABLE x AS SELECT 1").is_empty());
    }

    #[test]
    fn affinity_admission() {
        assert!(Affinity::Integer.admits(1));
        assert!(Affinity::Integer.admits(0));
        assert!(!Affinity::Integer.admits(15));
        assert!(Affinity::Text.admits(15));
        assert!(!Affinity::Text.admits(4));
        assert!(Affinity::Blob.admits(4));
    }
}
