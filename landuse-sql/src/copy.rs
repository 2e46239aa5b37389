//! Préparation des fichiers CSV pour `COPY ... FROM STDIN`
//!
//! Le fichier est lu en entier, normalisé en UTF-8 (décodage avec un
//! encodage de repli s'il n'est pas déjà en UTF-8), puis débarrassé de son
//! en-tête et des retours chariot hors guillemets. Les enregistrements sont
//! découpés comme PostgreSQL lit le format CSV: un champ entre guillemets
//! peut contenir des sauts de ligne. Une numérotation peut être ajoutée en
//! tête de chaque enregistrement pour alimenter une clé `serial`.

use std::borrow::Cow;

use encoding_rs::Encoding;
use memchr::memchr3_iter;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SqlError};
use crate::ident::{quote_literal, Ident, SqlType, TableRef};

/// Encodage de repli par défaut (sur-ensemble d'ISO-8859-1)
pub const DEFAULT_FALLBACK_ENCODING: &str = "windows-1252";

/// Nom de la clé série ajoutée sur demande
pub const SERIAL_COLUMN: &str = "id";

/// Déclaration d'une colonne (`["propertySituationIdf", "integer PRIMARY KEY"]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(Ident, SqlType)", into = "(Ident, SqlType)")]
pub struct ColumnDef {
    pub name: Ident,
    pub sql_type: SqlType,
}

impl From<(Ident, SqlType)> for ColumnDef {
    fn from((name, sql_type): (Ident, SqlType)) -> Self {
        Self { name, sql_type }
    }
}

impl From<ColumnDef> for (Ident, SqlType) {
    fn from(def: ColumnDef) -> Self {
        (def.name, def.sql_type)
    }
}

/// Options d'import CSV
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: char,
    /// Chaîne représentant NULL
    pub null: String,
    /// Première ligne ignorée
    pub header: bool,
    /// Numéro de ligne ajouté en première colonne
    pub serial: bool,
    pub fallback: &'static Encoding,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ';',
            null: String::new(),
            header: true,
            serial: false,
            fallback: encoding_rs::WINDOWS_1252,
        }
    }
}

/// Résout un nom d'encodage (`latin1`, `iso-8859-15`, `cp1252`...)
pub fn encoding_for_label(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| SqlError::UnsupportedEncoding(label.to_string()))
}

/// Texte UTF-8 du fichier et encodage effectivement utilisé
pub fn decode<'a>(data: &'a [u8], fallback: &'static Encoding) -> Result<(Cow<'a, str>, &'static Encoding)> {
    if let Ok(text) = simdutf8::basic::from_utf8(data) {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        return Ok((Cow::Borrowed(text), encoding_rs::UTF_8));
    }
    debug!(encoding = fallback.name(), "Input is not valid UTF-8, decoding with fallback");
    match fallback.decode_without_bom_handling_and_without_replacement(data) {
        Some(text) => Ok((text, fallback)),
        None => Err(SqlError::Decoding {
            encoding: fallback.name(),
        }),
    }
}

/// Données prêtes pour COPY: un enregistrement CSV par ligne logique, terminé par `\n`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPayload {
    pub data: String,
    pub rows: u64,
}

/// Construit le flux COPY à partir du texte décodé
pub fn prepare_payload(text: &str, options: &CsvOptions) -> CopyPayload {
    let mut data = String::with_capacity(text.len() + 16);
    let mut rows = 0u64;
    let mut header_pending = options.header;

    for record in Records::new(text) {
        if std::mem::take(&mut header_pending) {
            continue;
        }
        if record.is_empty() {
            continue;
        }
        rows += 1;
        if options.serial {
            data.push_str(&rows.to_string());
            data.push(options.delimiter);
        }
        data.push_str(&record);
        data.push('\n');
    }

    CopyPayload { data, rows }
}

/// Enregistrements CSV: `\n` hors guillemets termine l'enregistrement,
/// `\r` hors guillemets est supprimé
struct Records<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Records<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Cow<'a, str>;

    fn next(&mut self) -> Option<Self::Item> {
        let text = self.text;
        let bytes = text.as_bytes();
        if self.pos >= bytes.len() {
            return None;
        }
        let start = self.pos;
        let mut end = bytes.len();
        let mut in_quotes = false;
        let mut carriage = false;

        for i in memchr3_iter(b'"', b'\n', b'\r', &bytes[start..]) {
            let i = start + i;
            match bytes[i] {
                b'"' => in_quotes = !in_quotes,
                b'\n' if !in_quotes => {
                    end = i;
                    break;
                }
                b'\r' if !in_quotes => carriage = true,
                _ => {}
            }
        }
        self.pos = end + 1;

        let record = &text[start..end];
        Some(if carriage {
            Cow::Owned(strip_unquoted_cr(record))
        } else {
            Cow::Borrowed(record)
        })
    }
}

fn strip_unquoted_cr(record: &str) -> String {
    let mut in_quotes = false;
    record
        .chars()
        .filter(|&c| {
            if c == '"' {
                in_quotes = !in_quotes;
            }
            in_quotes || c != '\r'
        })
        .collect()
}

/// Recréation de la table cible
pub fn create_table_statements(table: &TableRef, columns: &[ColumnDef], serial: bool) -> Result<Vec<String>> {
    if columns.is_empty() {
        return Err(SqlError::Empty("column definition"));
    }
    if serial && columns.iter().any(|c| c.name.as_str() == SERIAL_COLUMN) {
        return Err(SqlError::DuplicateColumn {
            first: SERIAL_COLUMN.to_string(),
            second: SERIAL_COLUMN.to_string(),
            column: SERIAL_COLUMN.to_string(),
        });
    }
    let mut defs = Vec::with_capacity(columns.len() + 1);
    if serial {
        defs.push(format!("{} serial primary key", SERIAL_COLUMN));
    }
    defs.extend(columns.iter().map(|c| format!("{} {}", c.name, c.sql_type)));
    Ok(vec![
        format!("DROP TABLE IF EXISTS {}", table),
        format!("CREATE TABLE {} ({})", table, defs.join(", ")),
    ])
}

/// Commande COPY correspondant au layout de [`prepare_payload`]
pub fn copy_statement(table: &TableRef, columns: &[ColumnDef], options: &CsvOptions) -> String {
    let mut names: Vec<&str> = Vec::with_capacity(columns.len() + 1);
    if options.serial {
        names.push(SERIAL_COLUMN);
    }
    names.extend(columns.iter().map(|c| c.name.as_str()));
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, DELIMITER {}, NULL {})",
        table,
        names.join(", "),
        quote_literal(&options.delimiter.to_string()),
        quote_literal(&options.null)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<ColumnDef> {
        serde_json::from_str(r#"[["propertySituationIdf", "integer PRIMARY KEY"], ["divCad", "integer"]]"#)
            .unwrap()
    }

    #[test]
    fn test_decode_utf8_strips_bom() {
        let data = "\u{feff}a;b\n1;é\n".as_bytes();
        let (text, enc) = decode(data, encoding_rs::WINDOWS_1252).unwrap();
        assert_eq!(text, "a;b\n1;é\n");
        assert_eq!(enc, encoding_rs::UTF_8);
    }

    #[test]
    fn test_decode_latin1_fallback() {
        // "é" en windows-1252
        let data = b"a;b\n1;\xe9\n";
        let (text, enc) = decode(data, encoding_rs::WINDOWS_1252).unwrap();
        assert_eq!(text, "a;b\n1;é\n");
        assert_eq!(enc.name(), "windows-1252");
    }

    #[test]
    fn test_encoding_label() {
        assert_eq!(encoding_for_label("latin1").unwrap().name(), "windows-1252");
        assert_eq!(encoding_for_label("ISO-8859-15").unwrap().name(), "ISO-8859-15");
        assert!(encoding_for_label("klingon").is_err());
    }

    #[test]
    fn test_prepare_payload_header_and_cr() {
        let payload = prepare_payload("a;b\r\n1;2\r\n3;4", &CsvOptions::default());
        assert_eq!(payload.data, "1;2\n3;4\n");
        assert_eq!(payload.rows, 2);
    }

    #[test]
    fn test_prepare_payload_serial() {
        let options = CsvOptions {
            serial: true,
            ..Default::default()
        };
        let payload = prepare_payload("a;b\n1;2\n\n3;4\n", &options);
        assert_eq!(payload.data, "1;1;2\n2;3;4\n");
        assert_eq!(payload.rows, 2);
    }

    #[test]
    fn test_prepare_payload_quoted_multiline_field() {
        let options = CsvOptions {
            serial: true,
            ..Default::default()
        };
        let payload = prepare_payload("a;b\n\"line1\nline2\";2\n3;4\n", &options);
        assert_eq!(payload.data, "1;\"line1\nline2\";2\n2;3;4\n");
        assert_eq!(payload.rows, 2);
    }

    #[test]
    fn test_prepare_payload_keeps_quoted_blank_line_and_cr() {
        let options = CsvOptions {
            header: false,
            ..Default::default()
        };
        let payload = prepare_payload("\"x\r\n\ny\";1\r\n\"a \"\"q\"\"\";2\r\n", &options);
        assert_eq!(payload.data, "\"x\r\n\ny\";1\n\"a \"\"q\"\"\";2\n");
        assert_eq!(payload.rows, 2);
    }

    #[test]
    fn test_prepare_payload_without_header() {
        let options = CsvOptions {
            header: false,
            ..Default::default()
        };
        assert_eq!(prepare_payload("1;2\n", &options).rows, 1);
        assert_eq!(prepare_payload("", &options).rows, 0);
    }

    #[test]
    fn test_create_table_statements() {
        let table: TableRef = "agdp.cama".parse().unwrap();
        let sql = create_table_statements(&table, &columns(), false).unwrap();
        assert_eq!(sql[0], "DROP TABLE IF EXISTS agdp.cama");
        assert_eq!(
            sql[1],
            "CREATE TABLE agdp.cama (propertySituationIdf integer PRIMARY KEY, divCad integer)"
        );
        let sql = create_table_statements(&table, &columns(), true).unwrap();
        assert!(sql[1].starts_with("CREATE TABLE agdp.cama (id serial primary key, "));
    }

    #[test]
    fn test_copy_statement() {
        let table: TableRef = "agdp.cama".parse().unwrap();
        let options = CsvOptions {
            serial: true,
            ..Default::default()
        };
        assert_eq!(
            copy_statement(&table, &columns(), &options),
            "COPY agdp.cama (id, propertySituationIdf, divCad) FROM STDIN WITH (FORMAT csv, DELIMITER ';', NULL '')"
        );
    }
}
