//! Préparation des géométries: réparation et éclatement des multi-parties

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ddl::index_name;
use crate::error::{Result, SqlError};
use crate::ident::{Ident, TableRef};

/// Type de géométrie conservé par `ST_CollectionExtract`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    Point,
    Line,
    #[default]
    Polygon,
}

impl GeometryKind {
    /// Code PostGIS (1, 2, 3)
    pub fn code(self) -> u8 {
        match self {
            GeometryKind::Point => 1,
            GeometryKind::Line => 2,
            GeometryKind::Polygon => 3,
        }
    }
}

impl FromStr for GeometryKind {
    type Err = SqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "point" | "1" => Ok(GeometryKind::Point),
            "line" | "linestring" | "2" => Ok(GeometryKind::Line),
            "polygon" | "3" => Ok(GeometryKind::Polygon),
            _ => Err(SqlError::InvalidType(s.to_string())),
        }
    }
}

/// Répare les géométries invalides en place
pub fn make_valid_statement(table: &TableRef, geom: &Ident, kind: GeometryKind) -> String {
    format!(
        "UPDATE {t} SET {g} = ST_Multi(ST_CollectionExtract(ST_MakeValid({g}), {k})) WHERE NOT ST_IsValid({g})",
        t = table,
        g = geom,
        k = kind.code()
    )
}

/// Éclate les multi-polygones en polygones simples
///
/// La table est remplacée par une table `(id, geom)` et son index GiST
/// recréé. À exécuter dans une transaction.
pub fn explode_statements(table: &TableRef, id: &Ident, geom: &Ident) -> Result<Vec<String>> {
    let scratch = table.sibling(Ident::new(format!("tmp_{}_dump", table.table))?);
    let index = index_name(table, geom)?;
    Ok(vec![
        format!("DROP TABLE IF EXISTS {}", scratch),
        format!(
            "CREATE TABLE {s} AS (SELECT {id}, (ST_Dump({g})).geom AS {g} FROM {t})",
            s = scratch,
            id = id,
            g = geom,
            t = table
        ),
        format!("DROP TABLE {}", table),
        format!("ALTER TABLE {} RENAME TO {}", scratch, table.table),
        format!("CREATE INDEX {} ON {} USING gist ({})", index, table, geom),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_valid() {
        let table: TableRef = "agdp.capa".parse().unwrap();
        let geom = Ident::new("geom").unwrap();
        assert_eq!(
            make_valid_statement(&table, &geom, GeometryKind::default()),
            "UPDATE agdp.capa SET geom = ST_Multi(ST_CollectionExtract(ST_MakeValid(geom), 3)) WHERE NOT ST_IsValid(geom)"
        );
        assert!(make_valid_statement(&table, &geom, GeometryKind::Point).contains("(geom), 1))"));
    }

    #[test]
    fn test_explode() {
        let table: TableRef = "ancillary.sar".parse().unwrap();
        let sql = explode_statements(&table, &Ident::new("gid").unwrap(), &Ident::new("geom").unwrap()).unwrap();
        assert_eq!(
            sql[1],
            "CREATE TABLE ancillary.tmp_sar_dump AS (SELECT gid, (ST_Dump(geom)).geom AS geom FROM ancillary.sar)"
        );
        assert_eq!(sql[3], "ALTER TABLE ancillary.tmp_sar_dump RENAME TO sar");
        assert_eq!(sql[4], "CREATE INDEX sar_geom_idx ON ancillary.sar USING gist (geom)");
    }

    #[test]
    fn test_geometry_kind_parse() {
        assert_eq!("POLYGON".parse::<GeometryKind>().unwrap(), GeometryKind::Polygon);
        assert_eq!("1".parse::<GeometryKind>().unwrap().code(), 1);
        assert!("surface".parse::<GeometryKind>().is_err());
    }
}
