//! Statistiques descriptives et aperçu de table

use crate::ident::{Condition, Ident, TableRef};

/// Effectif et surface totale (km²)
pub fn totals_query(table: &TableRef, geom: &Ident) -> String {
    format!(
        "SELECT count(*)::bigint, COALESCE(sum(ST_Area({})) / 1000000.0, 0)::float8 FROM {}",
        geom, table
    )
}

/// Effectif et surface (km²) des lignes vérifiant `filter`
pub fn filtered_query(table: &TableRef, geom: &Ident, filter: &Condition) -> String {
    format!("{} WHERE ({})", totals_query(table, geom), filter)
}

/// Effectif et surface (km²) par valeur de `column`, triés par valeur
pub fn grouped_query(table: &TableRef, geom: &Ident, column: &Ident) -> String {
    format!(
        "SELECT {c}::text, count(*)::bigint, COALESCE(sum(ST_Area({g})) / 1000000.0, 0)::float8 \
         FROM {t} GROUP BY 1 ORDER BY 1",
        c = column,
        g = geom,
        t = table
    )
}

/// Premières lignes d'une table en JSON
pub fn head_query(
    table: &TableRef,
    filter: Option<&Condition>,
    order_by: Option<&Ident>,
    limit: u32,
) -> String {
    let mut inner = format!("SELECT * FROM {}", table);
    if let Some(filter) = filter {
        inner.push_str(&format!(" WHERE ({})", filter));
    }
    if let Some(order) = order_by {
        inner.push_str(&format!(" ORDER BY {}", order));
    }
    inner.push_str(&format!(" LIMIT {}", limit));
    format!("SELECT row_to_json(t)::text FROM ({}) AS t", inner)
}

/// Ligne de statistiques: effectif et surface, absolus et relatifs
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Proportion {
    pub label: String,
    pub count: i64,
    pub area_km2: f64,
    pub count_ratio: f64,
    pub area_ratio: f64,
}

impl Proportion {
    /// Rapporte un effectif et une surface aux totaux (ratio nul si total nul)
    pub fn new(label: impl Into<String>, count: i64, area_km2: f64, total: i64, total_area: f64) -> Self {
        let count_ratio = if total > 0 { count as f64 / total as f64 } else { 0.0 };
        let area_ratio = if total_area > 0.0 { area_km2 / total_area } else { 0.0 };
        Self {
            label: label.into(),
            count,
            area_km2,
            count_ratio,
            area_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_and_filter() {
        let table: TableRef = "results.cusw".parse().unwrap();
        let geom = Ident::new("geom").unwrap();
        assert_eq!(
            totals_query(&table, &geom),
            "SELECT count(*)::bigint, COALESCE(sum(ST_Area(geom)) / 1000000.0, 0)::float8 FROM results.cusw"
        );
        let filter = Condition::new("walousmaj = '5_1'").unwrap();
        assert!(filtered_query(&table, &geom, &filter).ends_with("FROM results.cusw WHERE (walousmaj = '5_1')"));
    }

    #[test]
    fn test_grouped_query() {
        let table: TableRef = "results.cusw".parse().unwrap();
        let sql = grouped_query(&table, &Ident::new("geom").unwrap(), &Ident::new("walousmaj_l1").unwrap());
        assert!(sql.starts_with("SELECT walousmaj_l1::text, count(*)::bigint"));
        assert!(sql.ends_with("GROUP BY 1 ORDER BY 1"));
    }

    #[test]
    fn test_head_query() {
        let table: TableRef = "results.cusw".parse().unwrap();
        assert_eq!(
            head_query(&table, None, None, 5),
            "SELECT row_to_json(t)::text FROM (SELECT * FROM results.cusw LIMIT 5) AS t"
        );
        let filter = Condition::new("postclas_rule IS NOT NULL").unwrap();
        let order = Ident::new("capakey").unwrap();
        assert_eq!(
            head_query(&table, Some(&filter), Some(&order), 10),
            "SELECT row_to_json(t)::text FROM (SELECT * FROM results.cusw \
             WHERE (postclas_rule IS NOT NULL) ORDER BY capakey LIMIT 10) AS t"
        );
    }

    #[test]
    fn test_proportion() {
        let p = Proportion::new("5_1", 25, 2.5, 100, 10.0);
        assert_eq!(p.count_ratio, 0.25);
        assert_eq!(p.area_ratio, 0.25);
        let empty = Proportion::new("x", 0, 0.0, 0, 0.0);
        assert_eq!(empty.count_ratio, 0.0);
    }
}
