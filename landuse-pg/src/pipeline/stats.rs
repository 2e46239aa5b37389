//! Statistiques descriptives d'une table et aperçu de ses lignes

use deadpool_postgres::Pool;
use serde::Serialize;
use tracing::debug;

use landuse_sql::stats::{filtered_query, grouped_query, head_query, totals_query, Proportion};
use landuse_sql::{Condition, Ident, TableRef};

use crate::db::query_texts;
use crate::error::{DbContext, Result};

/// Sous-ensemble rapporté aux totaux
#[derive(Debug, Clone)]
pub enum Breakdown {
    None,
    Filter(Condition),
    GroupBy(Ident),
}

/// Effectifs et surfaces d'une table
#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub table: String,
    pub count: i64,
    pub area_km2: f64,
    pub rows: Vec<Proportion>,
}

impl TableStats {
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("STATISTICS {}", self.table);
        println!("{}", "=".repeat(60));
        println!("Rows:  {}", self.count);
        println!("Area:  {:.3} km²", self.area_km2);
        if !self.rows.is_empty() {
            println!("\n{:<20} {:>10} {:>8} {:>12} {:>8}", "value", "count", "%", "area km²", "%");
            for row in &self.rows {
                println!(
                    "{:<20} {:>10} {:>7.2}% {:>12.3} {:>7.2}%",
                    row.label,
                    row.count,
                    row.count_ratio * 100.0,
                    row.area_km2,
                    row.area_ratio * 100.0
                );
            }
        }
        println!("{}", "=".repeat(60));
    }
}

/// Calcule les totaux d'une table et, au besoin, la part d'un filtre ou de chaque valeur
pub async fn table_stats(pool: &Pool, table: &TableRef, geom: &Ident, breakdown: &Breakdown) -> Result<TableStats> {
    let client = pool.get().await?;

    let sql = totals_query(table, geom);
    debug!(sql = %sql, "Querying totals");
    let row = client.query_one(&sql, &[]).await.db_context("computing totals")?;
    let count: i64 = row.try_get(0).db_context("reading row count")?;
    let area_km2: f64 = row.try_get(1).db_context("reading total area")?;

    let rows = match breakdown {
        Breakdown::None => Vec::new(),
        Breakdown::Filter(filter) => {
            let sql = filtered_query(table, geom, filter);
            debug!(sql = %sql, "Querying filtered totals");
            let row = client.query_one(&sql, &[]).await.db_context("computing filtered totals")?;
            let n: i64 = row.try_get(0).db_context("reading filtered count")?;
            let area: f64 = row.try_get(1).db_context("reading filtered area")?;
            vec![Proportion::new(filter.as_str(), n, area, count, area_km2)]
        }
        Breakdown::GroupBy(column) => {
            let sql = grouped_query(table, geom, column);
            debug!(sql = %sql, "Querying grouped totals");
            let result = client.query(&sql, &[]).await.db_context("computing grouped totals")?;
            let mut rows = Vec::with_capacity(result.len());
            for row in &result {
                let label: Option<String> = row.try_get(0).db_context("reading group value")?;
                let n: i64 = row.try_get(1).db_context("reading group count")?;
                let area: f64 = row.try_get(2).db_context("reading group area")?;
                rows.push(Proportion::new(label.unwrap_or_else(|| "NULL".to_string()), n, area, count, area_km2));
            }
            rows
        }
    };

    Ok(TableStats {
        table: table.to_string(),
        count,
        area_km2,
        rows,
    })
}

/// Premières lignes d'une table, une ligne JSON par enregistrement
pub async fn head(
    pool: &Pool,
    table: &TableRef,
    filter: Option<&Condition>,
    order_by: Option<&Ident>,
    limit: u32,
) -> Result<Vec<String>> {
    let client = pool.get().await?;
    query_texts(&client, &head_query(table, filter, order_by, limit)).await
}
