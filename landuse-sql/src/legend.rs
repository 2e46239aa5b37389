//! Conversion de la légende interne vers INSPIRE HILUCS
//!
//! Trois types de règles, appliquées dans cet ordre dans un même `CASE`:
//! - troncature: le dernier segment du code est retiré (`1_1_1_A` → `1_1_1`)
//! - correspondance: remplacement exact (`7_1` → `6_3_1`)
//! - par défaut: le code est conservé
//!
//! La variante tableau (`hilucslanduse_2`) travaille sur l'ensemble des codes
//! applicables d'une parcelle: codes ignorés, dédoublonnage avec conservation
//! de l'ordre, puis suppression d'un code grossier lorsqu'un code plus
//! détaillé de la même branche est présent.
//!
//! [`LegendMap::map_code`] et [`LegendMap::map_codes`] reproduisent en mémoire
//! ce que font les requêtes générées.

use serde::{Deserialize, Serialize};

use crate::code::{LandUseCode, LEVEL_LENGTHS};
use crate::ident::{escape_like, quote_literal, Ident, TableRef};
use crate::error::Result;

/// Règles de conversion de légende
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegendMap {
    /// Codes à tronquer d'un niveau
    #[serde(default)]
    pub truncate: Vec<LandUseCode>,
    /// Correspondances exactes (code interne, code HILUCS)
    #[serde(default)]
    pub lookup: Vec<(LandUseCode, LandUseCode)>,
    /// Codes ignorés dans la variante tableau
    #[serde(default)]
    pub ignore: Vec<LandUseCode>,
    /// Codes retirés du tableau si un descendant est présent
    #[serde(default)]
    pub remove: Vec<LandUseCode>,
}

/// Colonnes manipulées par la conversion
#[derive(Debug, Clone)]
pub struct LegendColumns {
    /// Label issu de la classification (`walousmaj`)
    pub label: Ident,
    /// Tableau de tous les codes applicables (`all_hilucs`)
    pub all_codes: Ident,
    /// Sortie code unique (`hilucslanduse_1`)
    pub single: Ident,
    /// Sortie tableau (`hilucslanduse_2`)
    pub multiple: Ident,
}

impl LegendMap {
    /// Convertit un code
    pub fn map_code(&self, code: &str) -> String {
        if let Some(cl) = self.truncate.iter().find(|cl| cl.as_str() == code) {
            return cl.parent().to_string();
        }
        if let Some((_, to)) = self.lookup.iter().find(|(from, _)| from.as_str() == code) {
            return to.to_string();
        }
        code.to_string()
    }

    /// Convertit le label et le tableau de codes d'une ligne
    pub fn map_codes(&self, label: &str, all_codes: &[&str]) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(all_codes.len() + 1);
        for raw in std::iter::once(label).chain(all_codes.iter().copied()) {
            if self.ignore.iter().any(|cl| cl.as_str() == raw) {
                continue;
            }
            let mapped = self.map_code(raw);
            if !out.contains(&mapped) {
                out.push(mapped);
            }
        }
        for cl in &self.remove {
            let present = out.iter().any(|v| v == cl.as_str());
            let has_descendant = out.iter().any(|v| cl.is_ancestor_of(v));
            if present && has_descendant {
                out.retain(|v| v != cl.as_str());
            }
        }
        out
    }

    /// `CASE` appliqué à `expr` (colonne ou variable d'unnest)
    fn case_expr(&self, expr: &str) -> String {
        if self.truncate.is_empty() && self.lookup.is_empty() {
            return expr.to_string();
        }
        let mut sql = String::from("CASE");
        for cl in &self.truncate {
            sql.push_str(&format!(
                " WHEN {} = {} THEN {}",
                expr,
                cl.literal(),
                cl.parent().literal()
            ));
        }
        for (from, to) in &self.lookup {
            sql.push_str(&format!(" WHEN {} = {} THEN {}", expr, from.literal(), to.literal()));
        }
        sql.push_str(&format!(" ELSE {} END", expr));
        sql
    }

    /// Requêtes de la colonne code unique (scénario 1)
    pub fn single_statements(&self, table: &TableRef, cols: &LegendColumns) -> Vec<String> {
        vec![
            format!("ALTER TABLE {} DROP COLUMN IF EXISTS {}", table, cols.single),
            format!("ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} text", table, cols.single),
            format!(
                "UPDATE {} SET {} = ({})",
                table,
                cols.single,
                self.case_expr(cols.label.as_str())
            ),
        ]
    }

    /// Requêtes de la colonne tableau (scénario 2)
    pub fn array_statements(&self, table: &TableRef, cols: &LegendColumns) -> Result<Vec<String>> {
        let scratch = Ident::new(format!("tmp_{}_{}", cols.label, cols.all_codes))?;
        let mut statements = vec![
            format!("ALTER TABLE {} DROP COLUMN IF EXISTS {}", table, scratch),
            format!("ALTER TABLE {} ADD COLUMN {} text[]", table, scratch),
            format!(
                "UPDATE {} SET {} = array_prepend({}::text, {})",
                table, scratch, cols.label, cols.all_codes
            ),
            format!("ALTER TABLE {} DROP COLUMN IF EXISTS {}", table, cols.multiple),
            format!("ALTER TABLE {} ADD COLUMN {} text[]", table, cols.multiple),
        ];

        let mut select = format!(
            "ARRAY(SELECT {} FROM unnest({}) WITH ORDINALITY u(v, ord)",
            self.case_expr("v"),
            scratch
        );
        if !self.ignore.is_empty() {
            let ignored: Vec<String> = self.ignore.iter().map(|c| c.literal()).collect();
            select.push_str(&format!(" WHERE v NOT IN ({})", ignored.join(", ")));
        }
        select.push_str(" GROUP BY 1 ORDER BY min(ord))");
        statements.push(format!("UPDATE {} SET {} = {}", table, cols.multiple, select));

        for cl in &self.remove {
            let col = &cols.multiple;
            let pattern = quote_literal(&format!("{}\\_%", escape_like(cl.as_str())));
            statements.push(format!(
                "UPDATE {table} SET {col} = array_remove({col}, {lit}) \
                 WHERE {lit} = ANY({col}) \
                 AND EXISTS (SELECT 1 FROM unnest({col}) AS a WHERE a LIKE {pattern} ESCAPE '\\')",
                table = table,
                col = col,
                lit = cl.literal(),
                pattern = pattern,
            ));
        }

        statements.push(format!("ALTER TABLE {} DROP COLUMN IF EXISTS {}", table, scratch));
        Ok(statements)
    }
}

/// Requêtes des colonnes de niveau `<label>_l1` à `<label>_l4`
///
/// Un code plus court que le seuil donne NULL, jamais un préfixe tronqué.
pub fn level_statements(table: &TableRef, label: &Ident) -> Result<Vec<String>> {
    let mut add = Vec::with_capacity(LEVEL_LENGTHS.len());
    let mut set = Vec::with_capacity(LEVEL_LENGTHS.len());
    for (i, n) in LEVEL_LENGTHS.iter().enumerate() {
        let col = label.suffixed(&format!("l{}", i + 1))?;
        add.push(format!("ADD COLUMN IF NOT EXISTS {} character varying", col));
        set.push(format!(
            "{col} = CASE WHEN LENGTH({label}) >= {n} THEN LEFT({label}, {n}) END",
            col = col,
            label = label,
            n = n
        ));
    }
    Ok(vec![
        format!("ALTER TABLE {} {}", table, add.join(", ")),
        format!("UPDATE {} SET {}", table, set.join(", ")),
    ])
}
