//! Identifiants SQL validés, références de tables, types de colonnes et conditions
//!
//! Toutes les requêtes du pipeline sont construites dynamiquement à partir de
//! noms de schémas, tables et colonnes. Ces noms ne sont jamais concaténés
//! bruts: ils passent par [`Ident`] et [`TableRef`], qui n'acceptent que des
//! identifiants PostgreSQL non quotés.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SqlError};

/// Longueur maximale d'un identifiant PostgreSQL (NAMEDATALEN - 1)
pub const MAX_IDENT_LEN: usize = 63;

fn ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

fn type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_ ,()\[\]]*$").expect("static regex"))
}

/// Identifiant SQL non quoté (schéma, table, colonne, rôle)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ident(String);

impl Ident {
    /// Valide un identifiant
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(SqlError::identifier(value, "empty"));
        }
        if value.len() > MAX_IDENT_LEN {
            return Err(SqlError::identifier(
                value,
                format!("longer than {} bytes", MAX_IDENT_LEN),
            ));
        }
        if !ident_re().is_match(&value) {
            return Err(SqlError::identifier(
                value,
                "only ASCII letters, digits and '_' are allowed",
            ));
        }
        Ok(Self(value))
    }

    /// Identifiant constant connu valide (noms par défaut)
    pub fn from_static(value: &'static str) -> Self {
        debug_assert!(ident_re().is_match(value));
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Concatène `self` + `_` + `suffix` en un nouvel identifiant
    ///
    /// Sert à dériver les noms de colonnes et de tables calculées
    /// (`capakey_sar`, `capa_overlay_sar`, `walousmaj_l1`...).
    pub fn suffixed(&self, suffix: &str) -> Result<Self> {
        Self::new(format!("{}_{}", self.0, suffix))
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Ident {
    type Err = SqlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Ident {
    type Error = SqlError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Ident> for String {
    fn from(value: Ident) -> Self {
        value.0
    }
}

/// Référence qualifiée `schema.table`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableRef {
    pub schema: Ident,
    pub table: Ident,
}

impl TableRef {
    pub fn new(schema: Ident, table: Ident) -> Self {
        Self { schema, table }
    }

    /// Construit une référence depuis deux chaînes à valider
    pub fn parse_parts(schema: &str, table: &str) -> Result<Self> {
        Ok(Self {
            schema: Ident::new(schema)?,
            table: Ident::new(table)?,
        })
    }

    /// Même schéma, autre table
    pub fn sibling(&self, table: Ident) -> Self {
        Self {
            schema: self.schema.clone(),
            table,
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

impl FromStr for TableRef {
    type Err = SqlError;

    fn from_str(s: &str) -> Result<Self> {
        let (schema, table) = s
            .split_once('.')
            .ok_or_else(|| SqlError::InvalidTableRef(s.to_string()))?;
        if table.contains('.') {
            return Err(SqlError::InvalidTableRef(s.to_string()));
        }
        Self::parse_parts(schema, table)
    }
}

impl TryFrom<String> for TableRef {
    type Error = SqlError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TableRef> for String {
    fn from(value: TableRef) -> Self {
        value.to_string()
    }
}

/// Déclaration de type d'une colonne pour `CREATE TABLE` (`integer PRIMARY KEY`, `text[]`...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SqlType(String);

impl SqlType {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if !type_re().is_match(trimmed) {
            return Err(SqlError::InvalidType(value));
        }
        if !balanced_parentheses(trimmed) {
            return Err(SqlError::condition(value, "unbalanced parentheses"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub(crate) fn from_static(value: &'static str) -> Self {
        debug_assert!(type_re().is_match(value));
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SqlType {
    type Error = SqlError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SqlType> for String {
    fn from(value: SqlType) -> Self {
        value.0
    }
}

/// Fragment SQL booléen utilisé comme condition d'une règle (`aeroport_coverage > 0.5`)
///
/// Le contenu reste du SQL libre évalué par la base. Seul l'empilement de
/// requêtes est refusé: `;`, `--` et `/*` hors littéraux. Les parenthèses
/// doivent être équilibrées pour que la condition reste un seul prédicat une
/// fois parenthésée.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition(String);

impl Condition {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(SqlError::condition(value, "empty"));
        }
        if let Some(token) = forbidden_token(trimmed) {
            return Err(SqlError::condition(
                value.clone(),
                format!("'{}' is not allowed outside string literals", token),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Condition {
    type Error = SqlError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Condition> for String {
    fn from(value: Condition) -> Self {
        value.0
    }
}

/// Cherche `;`, `--` ou `/*` hors d'un littéral entre apostrophes
fn forbidden_token(sql: &str) -> Option<&'static str> {
    let bytes = sql.as_bytes();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\'' {
            // '' dans un littéral bascule deux fois: l'état reste correct
            in_literal = !in_literal;
        } else if !in_literal {
            let next = bytes.get(i + 1).copied();
            match (b, next) {
                (b';', _) => return Some(";"),
                (b'-', Some(b'-')) => return Some("--"),
                (b'/', Some(b'*')) => return Some("/*"),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn balanced_parentheses(sql: &str) -> bool {
    let mut in_literal = false;
    let mut depth = 0usize;
    for b in sql.bytes() {
        match b {
            b'\'' => in_literal = !in_literal,
            b'(' if !in_literal => depth += 1,
            b')' if !in_literal => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            _ => {}
        }
    }
    depth == 0
}

/// Quote une chaîne en littéral SQL standard (`'O''Brien'`)
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Échappe `_`, `%` et `\` pour un motif `LIKE ... ESCAPE '\'`
pub fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        if matches!(c, '_' | '%' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Transforme une valeur de classe quelconque en suffixe de colonne
///
/// Minuscules, toute suite de caractères non alphanumériques devient un seul `_`.
/// Le résultat est toujours ajouté derrière un préfixe validé: un chiffre en
/// tête est donc accepté (`sar_prop_1_1`).
pub fn column_suffix(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        return Err(SqlError::identifier(raw, "no usable character for a column name"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_valid() {
        assert!(Ident::new("capakey").is_ok());
        assert!(Ident::new("_tmp1").is_ok());
        assert!(Ident::new("rnpp_200m_mode").is_ok());
        assert!(Ident::new("propertySituationIdf").is_ok());
    }

    #[test]
    fn test_ident_invalid() {
        assert!(Ident::new("").is_err());
        assert!(Ident::new("1abc").is_err());
        assert!(Ident::new("a-b").is_err());
        assert!(Ident::new("a b").is_err());
        assert!(Ident::new("capa; DROP TABLE x").is_err());
        assert!(Ident::new("\"quoted\"").is_err());
        assert!(Ident::new("a".repeat(64)).is_err());
        assert!(Ident::new("a".repeat(63)).is_ok());
    }

    #[test]
    fn test_ident_suffixed() {
        let id = Ident::new("walousmaj").unwrap();
        assert_eq!(id.suffixed("l1").unwrap().as_str(), "walousmaj_l1");
    }

    #[test]
    fn test_table_ref_parse() {
        let t: TableRef = "agdp.capa".parse().unwrap();
        assert_eq!(t.schema.as_str(), "agdp");
        assert_eq!(t.table.as_str(), "capa");
        assert_eq!(t.to_string(), "agdp.capa");

        assert!("capa".parse::<TableRef>().is_err());
        assert!("a.b.c".parse::<TableRef>().is_err());
        assert!("a.".parse::<TableRef>().is_err());
        assert!("a.b c".parse::<TableRef>().is_err());
    }

    #[test]
    fn test_table_ref_serde() {
        let t: TableRef = serde_json::from_str("\"results.classif\"").unwrap();
        assert_eq!(t.table.as_str(), "classif");
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"results.classif\"");
        assert!(serde_json::from_str::<TableRef>("\"results\"").is_err());
    }

    #[test]
    fn test_sql_type() {
        assert_eq!(
            SqlType::new(" integer PRIMARY KEY ").unwrap().as_str(),
            "integer PRIMARY KEY"
        );
        assert!(SqlType::new("text[]").is_ok());
        assert!(SqlType::new("numeric(10,2)").is_ok());
        assert!(SqlType::new("text; DROP TABLE a").is_err());
        assert!(SqlType::new("").is_err());
    }

    #[test]
    fn test_condition_accepts_literals() {
        assert!(Condition::new("aeroport_coverage > 0.5").is_ok());
        assert!(Condition::new("nature_desc = 'a;b -- c'").is_ok());
        assert!(Condition::new("name = 'O''Brien'").is_ok());
    }

    #[test]
    fn test_condition_rejects_stacking() {
        assert!(Condition::new("").is_err());
        assert!(Condition::new("   ").is_err());
        assert!(Condition::new("true; DROP TABLE agdp.capa").is_err());
        assert!(Condition::new("true -- comment").is_err());
        assert!(Condition::new("true /* x */").is_err());
        assert!(Condition::new("a = 'x' ; b").is_err());
        assert!(Condition::new("true) THEN '9' WHEN (true").is_err());
        assert!(Condition::new("(a > 1").is_err());
        assert!(Condition::new("(a > 1) AND name = ')'").is_ok());
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("5_1"), "'5_1'");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
        assert_eq!(quote_literal(""), "''");
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("1_1_1"), "1\\_1\\_1");
        assert_eq!(escape_like("50%"), "50\\%");
    }

    #[test]
    fn test_column_suffix() {
        assert_eq!(column_suffix("1_1").unwrap(), "1_1");
        assert_eq!(column_suffix("Zone Humide").unwrap(), "zone_humide");
        assert_eq!(column_suffix("  a--b  ").unwrap(), "a_b");
        assert_eq!(column_suffix("Été").unwrap(), "t");
        assert!(column_suffix("---").is_err());
        assert!(column_suffix("").is_err());
    }
}
