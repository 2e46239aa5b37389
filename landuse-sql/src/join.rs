//! Table finale: unités de base jointes à toutes les tables de statistiques

use serde::{Deserialize, Serialize};

use crate::error::{Result, SqlError};
use crate::ident::{Ident, TableRef};

/// Une table jointe et sa clé vers l'identifiant de base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub table: TableRef,
    /// Colonne étrangère, supprimée de la table finale (`capakey_sar`)
    pub key: Ident,
}

/// Paramètres de la table finale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalTable {
    pub base: TableRef,
    pub base_id: Ident,
    #[serde(default = "FinalTable::default_geom")]
    pub geom: Ident,
    pub output: TableRef,
    pub joins: Vec<JoinSpec>,
}

impl FinalTable {
    fn default_geom() -> Ident {
        Ident::from_static("geom")
    }

    /// Requêtes de création, à exécuter dans une transaction
    pub fn statements(&self) -> Result<Vec<String>> {
        if self.joins.is_empty() {
            return Err(SqlError::Empty("join list"));
        }
        let mut select = vec![format!("a.{}", self.geom), format!("a.{}", self.base_id)];
        select.extend((1..=self.joins.len()).map(|i| format!("b_{}.*", i)));

        let mut from = format!("{} AS a", self.base);
        for (i, join) in self.joins.iter().enumerate() {
            from.push_str(&format!(
                " LEFT JOIN {t} AS b_{i} ON a.{id} = b_{i}.{key}",
                t = join.table,
                i = i + 1,
                id = self.base_id,
                key = join.key
            ));
        }

        let mut drops = vec!["DROP COLUMN IF EXISTS cat".to_string()];
        drops.extend(self.joins.iter().map(|j| format!("DROP COLUMN IF EXISTS {}", j.key)));

        Ok(vec![
            format!("DROP TABLE IF EXISTS {}", self.output),
            format!(
                "CREATE TABLE {} AS (SELECT {} FROM {})",
                self.output,
                select.join(", "),
                from
            ),
            format!("ALTER TABLE {} {}", self.output, drops.join(", ")),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(table: &str, key: &str) -> JoinSpec {
        JoinSpec {
            table: table.parse().unwrap(),
            key: Ident::new(key).unwrap(),
        }
    }

    #[test]
    fn test_final_table_statements() {
        let ft = FinalTable {
            base: "agdp.capa".parse().unwrap(),
            base_id: Ident::new("capakey").unwrap(),
            geom: FinalTable::default_geom(),
            output: "results.capa_statistics".parse().unwrap(),
            joins: vec![
                join("ancillary.capa_overlay_sar", "capakey_sar"),
                join("economy.capa_count_recypark", "capakey_recypark"),
            ],
        };
        let sql = ft.statements().unwrap();
        assert_eq!(sql[0], "DROP TABLE IF EXISTS results.capa_statistics");
        assert_eq!(
            sql[1],
            "CREATE TABLE results.capa_statistics AS (SELECT a.geom, a.capakey, b_1.*, b_2.* \
             FROM agdp.capa AS a \
             LEFT JOIN ancillary.capa_overlay_sar AS b_1 ON a.capakey = b_1.capakey_sar \
             LEFT JOIN economy.capa_count_recypark AS b_2 ON a.capakey = b_2.capakey_recypark)"
        );
        assert_eq!(
            sql[2],
            "ALTER TABLE results.capa_statistics DROP COLUMN IF EXISTS cat, \
             DROP COLUMN IF EXISTS capakey_sar, DROP COLUMN IF EXISTS capakey_recypark"
        );
    }

    #[test]
    fn test_final_table_requires_joins() {
        let ft = FinalTable {
            base: "agdp.capa".parse().unwrap(),
            base_id: Ident::new("capakey").unwrap(),
            geom: FinalTable::default_geom(),
            output: "results.capa_statistics".parse().unwrap(),
            joins: vec![],
        };
        assert!(ft.statements().is_err());
    }
}
