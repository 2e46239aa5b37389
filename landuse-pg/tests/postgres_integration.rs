//! Tests d'intégration PostgreSQL
//!
//! Ces tests nécessitent une base PostGIS (extensions postgis et tablefunc).
//! Configuration via variables d'environnement:
//! - PGHOST, PGPORT, PGUSER, PGPASSWORD, PGDATABASE
//!
//! Exécution:
//! ```bash
//! docker run -d --name postgis-test -e POSTGRES_PASSWORD=test -p 5432:5432 postgis/postgis
//! PGPASSWORD=test cargo test -p landuse-pg --test postgres_integration -- --ignored
//! ```
//!
//! Chaque test travaille dans son propre schéma.

use anyhow::Result;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;

use landuse_pg::config::LegendConfig;
use landuse_pg::import::{import_csv, CsvImport};
use landuse_pg::pipeline::{apply_legend, classify, postclassify, run_overlay};
use landuse_sql::copy::{ColumnDef, CsvOptions};
use landuse_sql::postclass::{GardenAdjacency, SingleSourceAdjacency, Stage};
use landuse_sql::{
    ClassificationTarget, DecisionList, Ident, LandUseCode, OverlayJob, Postclassification, PostclassTarget, Rule,
    SqlType, TableRef,
};

/// Configuration de test
fn test_config() -> Config {
    let mut cfg = Config::new();
    cfg.host = Some(std::env::var("PGHOST").unwrap_or_else(|_| "localhost".into()));
    cfg.port = Some(
        std::env::var("PGPORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5432),
    );
    cfg.dbname = Some(std::env::var("PGDATABASE").unwrap_or_else(|_| "walous_test".into()));
    cfg.user = Some(std::env::var("PGUSER").unwrap_or_else(|_| "postgres".into()));
    cfg.password = std::env::var("PGPASSWORD").ok();
    cfg
}

async fn create_test_pool() -> Result<Pool> {
    let pool = test_config().create_pool(Some(Runtime::Tokio1), NoTls)?;
    Ok(pool)
}

/// Recrée un schéma vide puis exécute `setup`
async fn setup_schema(pool: &Pool, schema: &str, setup: &str) -> Result<()> {
    let client = pool.get().await?;
    client
        .batch_execute(&format!(
            "CREATE EXTENSION IF NOT EXISTS postgis;
             CREATE EXTENSION IF NOT EXISTS tablefunc;
             DROP SCHEMA IF EXISTS {schema} CASCADE;
             CREATE SCHEMA {schema};
             {setup}"
        ))
        .await?;
    Ok(())
}

fn table(s: &str) -> TableRef {
    s.parse().unwrap()
}

fn ident(s: &str) -> Ident {
    Ident::new(s).unwrap()
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_csv_import_then_classification() {
    let pool = create_test_pool().await.expect("Failed to create pool");
    setup_schema(&pool, "it_classify", "").await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("units.csv");
    std::fs::write(&path, "id;area\r\n1;100\r\n2;2500\r\n3;2501\r\n").unwrap();

    let units = table("it_classify.units");
    let columns = vec![
        ColumnDef {
            name: ident("id"),
            sql_type: SqlType::new("integer PRIMARY KEY").unwrap(),
        },
        ColumnDef {
            name: ident("area"),
            sql_type: SqlType::new("double precision").unwrap(),
        },
    ];
    let import = CsvImport {
        path: &path,
        table: &units,
        columns: &columns,
        options: CsvOptions::default(),
        overwrite: false,
    };
    let outcome = import_csv(&pool, &import).await.expect("CSV import failed");
    assert_eq!(outcome.rows_affected, 3);

    // Table existante sans overwrite: refus
    assert!(import_csv(&pool, &import).await.is_err());

    let rules: Vec<Rule> = serde_json::from_str(r#"[["area > 2500", "'2_1'"]]"#).unwrap();
    let list = DecisionList::new(rules, LandUseCode::new("6_6_A").unwrap());
    let target = ClassificationTarget {
        result: table("it_classify.classif"),
        stats: units,
        label_column: ident("walousmaj"),
        leaf_column: ident("rulebased_leaf"),
        grant: vec![],
    };
    classify(&pool, &target, &list).await.expect("Classification failed");

    let client = pool.get().await.unwrap();
    let rows = client
        .query("SELECT id, walousmaj, rulebased_leaf FROM it_classify.classif ORDER BY id", &[])
        .await
        .unwrap();
    let labels: Vec<(i32, String, i32)> = rows.iter().map(|r| (r.get(0), r.get(1), r.get(2))).collect();
    assert_eq!(
        labels,
        vec![
            (1, "6_6_A".to_string(), 2),
            (2, "6_6_A".to_string(), 2),
            (3, "2_1".to_string(), 1),
        ]
    );
}

/// A (5_1) touche B (petit jardin), B touche C; C ne touche pas A
const POSTCLASS_SETUP: &str = "
    CREATE TABLE it_postclass.classif (
        capakey text PRIMARY KEY,
        geom geometry(MultiPolygon, 31370),
        walousmaj varchar,
        all_hilucs text[],
        nat_lu_maj text,
        rnpp_200m_mode integer
    );
    INSERT INTO it_postclass.classif VALUES
        ('a', ST_Multi(ST_MakeEnvelope(0, 0, 100, 100, 31370)), '5_1', '{5_1}', '5_1', 2),
        ('b', ST_Multi(ST_MakeEnvelope(100, 0, 140, 40, 31370)), '1_1', '{1_1}', '1_1', 2),
        ('c', ST_Multi(ST_MakeEnvelope(140, 0, 240, 100, 31370)), '1_1', '{1_1}', '1_1', 2);
";

async fn labels_after(pool: &Pool, stages: Vec<Stage>) -> Vec<(String, String, Option<i32>)> {
    setup_schema(pool, "it_postclass", POSTCLASS_SETUP).await.unwrap();
    let target = PostclassTarget {
        table: table("it_postclass.classif"),
        id_column: ident("capakey"),
        geom: ident("geom"),
        label_column: ident("walousmaj"),
        rule_column: ident("postclas_rule"),
        all_codes: ident("all_hilucs"),
    };
    postclassify(pool, &target, &Postclassification { stages })
        .await
        .expect("Postclassification failed");

    let client = pool.get().await.unwrap();
    client
        .query("SELECT capakey, walousmaj, postclas_rule FROM it_postclass.classif ORDER BY capakey", &[])
        .await
        .unwrap()
        .iter()
        .map(|r| (r.get(0), r.get(1), r.get(2)))
        .collect()
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_postclassification_order_matters() {
    let pool = create_test_pool().await.expect("Failed to create pool");
    let garden = Stage::GardenAdjacency(GardenAdjacency::default());
    let single = Stage::SingleSourceAdjacency(SingleSourceAdjacency::default());

    // B devient 5_1 à l'étape 1, ce qui rend C éligible à l'étape 2
    let in_order = labels_after(&pool, vec![garden.clone(), single.clone()]).await;
    assert_eq!(
        in_order,
        vec![
            ("a".to_string(), "5_1".to_string(), None),
            ("b".to_string(), "5_1".to_string(), Some(1)),
            ("c".to_string(), "5_1".to_string(), Some(2)),
        ]
    );

    let reversed = labels_after(&pool, vec![single, garden]).await;
    assert_eq!(reversed[2], ("c".to_string(), "1_1".to_string(), None));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_coverage_is_clamped() {
    let pool = create_test_pool().await.expect("Failed to create pool");
    // Deux polygones superposés couvrant chacun toute l'unité
    setup_schema(
        &pool,
        "it_overlay",
        "CREATE TABLE it_overlay.capa (capakey text, geom geometry(MultiPolygon, 31370));
         CREATE TABLE it_overlay.sar (id integer, geom geometry(MultiPolygon, 31370));
         INSERT INTO it_overlay.capa VALUES ('p1', ST_Multi(ST_MakeEnvelope(0, 0, 10, 10, 31370)));
         INSERT INTO it_overlay.sar VALUES
            (1, ST_Multi(ST_MakeEnvelope(-5, -5, 15, 15, 31370))),
            (2, ST_Multi(ST_MakeEnvelope(-1, -1, 11, 11, 31370)));",
    )
    .await
    .unwrap();

    let job = OverlayJob::coverage(table("it_overlay.capa"), ident("capakey"), table("it_overlay.sar"));
    run_overlay(&pool, &job).await.expect("Overlay failed");

    let client = pool.get().await.unwrap();
    let row = client
        .query_one(
            "SELECT capakey_sar, sar_area::float8, sar_coverage::float8 FROM it_overlay.capa_overlay_sar",
            &[],
        )
        .await
        .unwrap();
    let id: String = row.get(0);
    let area: f64 = row.get(1);
    let coverage: f64 = row.get(2);
    assert_eq!(id, "p1");
    assert!((area - 200.0).abs() < 1e-6);
    assert_eq!(coverage, 1.0);
}

fn legend(json: &str) -> LegendConfig {
    serde_json::from_str(json).unwrap()
}

const LEGEND_SETUP: &str = "
    CREATE TABLE it_legend.classif (id integer, walousmaj varchar, all_hilucs text[]);
    INSERT INTO it_legend.classif VALUES
        (1, '5_1_C', '{5_1_C}'),
        (2, '1', '{1}'),
        (3, '1_1', '{1_1_1}'),
        (4, '2_1', '{6_6_A,2_1}');
";

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_levels_null_for_short_codes() {
    let pool = create_test_pool().await.expect("Failed to create pool");
    setup_schema(&pool, "it_legend", LEGEND_SETUP).await.unwrap();

    let config = legend(r#"{"table": "it_legend.classif", "truncate": ["5_1_C"]}"#);
    apply_legend(&pool, &table("it_legend.classif"), &config)
        .await
        .expect("Legend failed");

    let client = pool.get().await.unwrap();
    let rows = client
        .query(
            "SELECT walousmaj_l1, walousmaj_l2, walousmaj_l3, walousmaj_l4, hilucslanduse_1 \
             FROM it_legend.classif WHERE id IN (1, 2) ORDER BY id",
            &[],
        )
        .await
        .unwrap();
    let levels = |i: usize| -> Vec<Option<String>> { (0..4usize).map(|c| rows[i].get(c)).collect() };
    assert_eq!(
        levels(0),
        vec![Some("5".into()), Some("5_1".into()), Some("5_1_C".into()), None]
    );
    assert_eq!(levels(1), vec![Some("1".into()), None, None, None]);
    let single: String = rows[0].get(4);
    assert_eq!(single, "5_1");
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_array_legend_removes_ancestor() {
    let pool = create_test_pool().await.expect("Failed to create pool");
    setup_schema(&pool, "it_legend_array", &LEGEND_SETUP.replace("it_legend.", "it_legend_array."))
        .await
        .unwrap();

    let config = legend(r#"{"ignore": ["6_6_A"], "remove": ["1_1"], "levels": false}"#);
    apply_legend(&pool, &table("it_legend_array.classif"), &config)
        .await
        .expect("Legend failed");

    let client = pool.get().await.unwrap();
    let rows = client
        .query("SELECT id, hilucslanduse_2 FROM it_legend_array.classif WHERE id IN (3, 4) ORDER BY id", &[])
        .await
        .unwrap();
    let arrays: Vec<Vec<String>> = rows.iter().map(|r| r.get(1)).collect();
    assert_eq!(arrays[0], vec!["1_1_1"]);
    assert_eq!(arrays[1], vec!["2_1"]);

    // Le miroir en mémoire donne le même résultat
    assert_eq!(config.map.map_codes("1_1", &["1_1_1"]), vec!["1_1_1"]);
    assert_eq!(config.map.map_codes("2_1", &["6_6_A", "2_1"]), vec!["2_1"]);
}
