//! Codes hiérarchiques d'occupation du sol (`5_1`, `1_1_1_A`, `6_6_A`)

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SqlError};
use crate::ident::quote_literal;

/// Longueurs de préfixe des colonnes de niveau (`_l1` à `_l4`)
pub const LEVEL_LENGTHS: [usize; 4] = [1, 3, 5, 7];

fn code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9A-Za-z]+(_[0-9A-Za-z]+)*$").expect("static regex"))
}

/// Code de légende hiérarchique, segments séparés par `_`
///
/// Accepte aussi la forme littérale SQL (`'2_1'`), telle qu'elle apparaît
/// dans les listes de règles historiques.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LandUseCode(String);

impl LandUseCode {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        let unquoted = trimmed
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .unwrap_or(trimmed);
        if !code_re().is_match(unquoted) {
            return Err(SqlError::InvalidCode(value));
        }
        Ok(Self(unquoted.to_string()))
    }

    /// Code constant connu valide
    pub fn from_static(value: &'static str) -> Self {
        debug_assert!(code_re().is_match(value));
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Littéral SQL (`'5_1'`)
    pub fn literal(&self) -> String {
        quote_literal(&self.0)
    }

    /// Code parent: dernier segment retiré (`1_1_1_A` → `1_1_1`)
    ///
    /// Un code à un seul segment est son propre parent.
    pub fn parent(&self) -> LandUseCode {
        match self.0.rsplit_once('_') {
            Some((head, _)) => LandUseCode(head.to_string()),
            None => self.clone(),
        }
    }

    /// Vrai si `other` commence par `self` suivi de `_` (`1_1` → `1_1_1`, `1_1_1_A`)
    ///
    /// Même test que `other LIKE '1\_1\_%'` côté base.
    pub fn is_ancestor_of(&self, other: &str) -> bool {
        other.len() > self.0.len()
            && other.starts_with(self.0.as_str())
            && other.as_bytes()[self.0.len()] == b'_'
    }
}

impl fmt::Display for LandUseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LandUseCode {
    type Err = SqlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for LandUseCode {
    type Error = SqlError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<LandUseCode> for String {
    fn from(value: LandUseCode) -> Self {
        value.0
    }
}

/// Préfixes de niveau d'un code (`LEFT(code, n)` si `LENGTH(code) >= n`, sinon rien)
pub fn levels(code: &str) -> [Option<&str>; 4] {
    LEVEL_LENGTHS.map(|n| code.get(..n))
}
