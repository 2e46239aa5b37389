//! Définition et implémentation des commandes CLI
//!
//! Chaque étape du pipeline est exposée seule; `run` les enchaîne toutes.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use deadpool_postgres::Pool;
use tracing::info;

use landuse_pg::config::Config;
use landuse_pg::db::{self, admin, DatabaseConfig, DatabaseOverrides};
use landuse_pg::error::PipelineError;
use landuse_pg::import::{self, DatasetOptions, OgrImport, OgrMode, ShapefileImport, ShpMode};
use landuse_pg::pipeline::{self, geometry, stats, LegendPreview};
use landuse_pg::report::RunReport;
use landuse_pg::session::{self, SessionEnv};
use landuse_pg::tools::backup::{self, RestoreOptions};
use landuse_pg::tools::export::{self, ExportSource};
use landuse_sql::geom::GeometryKind;
use landuse_sql::{Condition, Ident, TableRef};

/// Options de connexion, par-dessus les variables PG*
#[derive(Args, Debug, Clone, Default)]
pub struct DbArgs {
    /// PostgreSQL host (défaut : env PGHOST / localhost)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// PostgreSQL port (défaut : env PGPORT / 5432)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// PostgreSQL database name (défaut : env PGDATABASE / walous)
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// PostgreSQL user (défaut : env PGUSER / postgres)
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// PostgreSQL password (défaut : env PGPASSWORD)
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// SSL mode: disable, prefer, require (défaut : env PGSSLMODE / disable)
    #[arg(long, global = true)]
    pub ssl: Option<String>,
}

impl From<DbArgs> for DatabaseOverrides {
    fn from(args: DbArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            database: args.database,
            user: args.user,
            password: args.password,
            ssl: args.ssl,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the session environment (GRASS and PostgreSQL variables)
    Env,

    /// Prepare folders and the GRASS session
    #[command(subcommand)]
    Session(SessionCommand),

    /// Install a GRASS extension if missing
    Addon {
        name: String,
    },

    /// Database administration
    #[command(subcommand)]
    Db(DbCommand),

    /// Load datasets into PostGIS
    #[command(subcommand)]
    Import(ImportCommand),

    /// Repair invalid geometries in place
    MakeValid {
        table: TableRef,
        #[arg(long, default_value = "geom")]
        geom: Ident,
        /// Geometry type kept: point, line, polygon
        #[arg(long, default_value = "polygon")]
        kind: GeometryKind,
    },

    /// Split multipart geometries into single parts
    Explode {
        table: TableRef,
        #[arg(long, default_value = "id")]
        id: Ident,
        #[arg(long, default_value = "geom")]
        geom: Ident,
    },

    /// Compute the configured overlay statistics
    Overlay {
        /// Only this overlay (1-based position in the configuration)
        #[arg(long)]
        only: Option<usize>,
    },

    /// Join all statistics to the base units
    Join,

    /// Label every unit with the configured decision list
    Classify,

    /// Apply the ordered postclassification corrections
    Postclass,

    /// Convert labels to the HILUCS legend
    #[command(subcommand)]
    Legend(LegendCommand),

    /// Create the deliverable table
    Publish,

    /// Append uncadastred spaces to the deliverable table
    MergeUncadastred,

    /// Run the whole configured pipeline
    Run {
        /// Save the run report as JSON
        #[arg(long)]
        report_json: Option<PathBuf>,
    },

    /// Dump one table (pg_dump custom format)
    DumpTable {
        table: TableRef,
        /// Output file, or a backup name from the configuration
        output: String,
    },

    /// Dump the whole database (pg_dump custom format)
    DumpDb {
        /// Output file, or a backup name from the configuration
        output: String,
    },

    /// Restore a dump (pg_restore)
    Restore {
        /// Dump file, or a backup name from the configuration
        input: String,
        /// Drop objects before recreating them
        #[arg(long)]
        clean: bool,
        /// Do not verify the BLAKE3 sidecar
        #[arg(long)]
        skip_checksum: bool,
    },

    /// Export a table or a query result with ogr2ogr
    Export {
        #[arg(long, conflicts_with = "query", required_unless_present = "query")]
        table: Option<TableRef>,
        #[arg(long)]
        query: Option<String>,
        #[arg(short, long)]
        output: PathBuf,
        /// GDAL driver (e.g. GPKG, "ESRI Shapefile")
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Count and area of a table, optionally filtered or grouped
    Stats {
        table: TableRef,
        #[arg(long, default_value = "geom")]
        geom: Ident,
        #[arg(long, conflicts_with = "group_by")]
        filter: Option<String>,
        #[arg(long)]
        group_by: Option<Ident>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the first rows of a table as JSON lines
    Head {
        table: TableRef,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        order_by: Option<Ident>,
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: u32,
    },
}

#[derive(Subcommand)]
pub enum SessionCommand {
    /// Create the output and validation folders
    Dirs,
    /// Create the GRASSDATA folder
    Gisdb,
    /// Create the GRASS location
    Location {
        /// EPSG code (défaut : srid de la configuration)
        #[arg(long)]
        epsg: Option<u32>,
    },
    /// Create a mapset from the PERMANENT region
    Mapset {
        name: String,
    },
    /// Switch the GRASS session to a mapset, creating it if needed
    Launch {
        mapset: String,
    },
}

#[derive(Subcommand)]
pub enum DbCommand {
    /// Enable postgis and tablefunc
    Extensions,
    CreateSchema {
        schema: Ident,
        #[arg(long)]
        overwrite: bool,
    },
    /// Grant all privileges on a schema
    Grant {
        schema: Ident,
        user: Ident,
    },
    /// (Re)create the index <table>_<column>_idx
    Index {
        table: TableRef,
        column: Ident,
        #[arg(long)]
        gist: bool,
    },
    /// Add a serial column
    Serial {
        table: TableRef,
        #[arg(default_value = "id")]
        column: Ident,
        #[arg(long)]
        primary_key: bool,
    },
}

#[derive(Subcommand)]
pub enum ImportCommand {
    /// Import one dataset declared in the configuration
    Dataset {
        name: String,
        #[arg(long)]
        overwrite: bool,
        /// Source SRID of shapefiles (défaut : srid de la configuration)
        #[arg(long)]
        from_srid: Option<u32>,
        /// CSV delimiter
        #[arg(long)]
        delimiter: Option<char>,
    },
    /// Import every dataset declared in the configuration
    All {
        #[arg(long)]
        overwrite: bool,
    },
    /// Import a shapefile with shp2pgsql | psql
    Shp {
        path: PathBuf,
        table: TableRef,
        #[arg(long)]
        from_srid: Option<u32>,
        #[arg(long)]
        to_srid: Option<u32>,
        /// drop, append, create, prepare
        #[arg(long, default_value = "drop")]
        mode: ShpMode,
    },
    /// Import any GDAL-readable file with ogr2ogr
    Ogr {
        path: PathBuf,
        /// Target table (défaut : nom du fichier)
        #[arg(long)]
        table: Option<TableRef>,
        #[arg(long)]
        srid: Option<u32>,
        /// overwrite, append, update
        #[arg(long, default_value = "overwrite")]
        mode: OgrMode,
    },
}

#[derive(Subcommand)]
pub enum LegendCommand {
    /// Write the single, array and level columns
    Apply,
    /// Convert a label and its code list without a database
    Preview {
        label: String,
        codes: Vec<String>,
        #[arg(long)]
        json: bool,
    },
}

/// Configuration et connexion partagées par les commandes
pub struct Context {
    pub config_spec: String,
    pub db: DatabaseConfig,
}

impl Context {
    pub fn new(config_spec: String, db_args: DbArgs) -> Self {
        let mut db = DatabaseConfig::from_env();
        db.apply_overrides(db_args.into());
        Self { config_spec, db }
    }

    fn config(&self) -> Result<Config> {
        let config = Config::resolve(&self.config_spec)?;
        info!(config = %self.config_spec, "Configuration loaded");
        Ok(config)
    }

    async fn pool(&self) -> Result<Pool> {
        println!("Database: {} (SSL: {:?})", self.db.describe(), self.db.ssl_mode);
        let pool = db::create_pool(&self.db)?;
        db::test_connection(&pool).await?;
        Ok(pool)
    }

    fn session(&self, config: &Config) -> Result<SessionEnv> {
        Ok(SessionEnv::from_process(config.grass()?, &self.db))
    }
}

/// Exécute une commande
pub async fn dispatch(command: Commands, ctx: &Context) -> Result<()> {
    match command {
        Commands::Env => cmd_env(ctx),
        Commands::Session(command) => cmd_session(command, ctx).await,
        Commands::Addon { name } => {
            let config = ctx.config()?;
            println!("{}", session::ensure_addon(&ctx.session(&config)?, &name).await?);
            Ok(())
        }
        Commands::Db(command) => cmd_db(command, ctx).await,
        Commands::Import(command) => cmd_import(command, ctx).await,
        Commands::MakeValid { table, geom, kind } => {
            let pool = ctx.pool().await?;
            let rows = geometry::make_valid(&pool, &table, &geom, kind).await?;
            println!("{} geometries repaired in {}", rows, table);
            Ok(())
        }
        Commands::Explode { table, id, geom } => {
            let pool = ctx.pool().await?;
            let outcome = geometry::explode_multipart(&pool, &table, &id, &geom).await?;
            println!("{} exploded ({} rows)", table, outcome.rows_affected);
            Ok(())
        }
        Commands::Overlay { only } => cmd_overlay(only, ctx).await,
        Commands::Join => {
            let config = ctx.config()?;
            let spec = config
                .pipeline
                .final_table
                .as_ref()
                .ok_or_else(|| PipelineError::config("No 'pipeline.final_table' section in configuration"))?;
            let pool = ctx.pool().await?;
            pipeline::create_final_table(&pool, spec).await?;
            println!("Final table {} created", spec.output);
            Ok(())
        }
        Commands::Classify => {
            let config = ctx.config()?;
            let classification = config.classification()?;
            let pool = ctx.pool().await?;
            let outcome =
                pipeline::classify(&pool, &classification.target(), &classification.decision_list()).await?;
            println!("{} classified ({} rows)", classification.result, outcome.rows_affected);
            Ok(())
        }
        Commands::Postclass => {
            let config = ctx.config()?;
            let post = config
                .pipeline
                .postclassification
                .as_ref()
                .ok_or_else(|| PipelineError::config("No 'pipeline.postclassification' section in configuration"))?;
            let table = config.result_table(post.table.as_ref())?;
            let pool = ctx.pool().await?;
            let outcome = pipeline::postclassify(&pool, &post.target(table.clone()), &post.pipeline()).await?;
            println!("{} postclassified ({} rows updated)", table, outcome.rows_affected);
            Ok(())
        }
        Commands::Legend(command) => cmd_legend(command, ctx).await,
        Commands::Publish => {
            let config = ctx.config()?;
            let spec = config
                .pipeline
                .publish
                .as_ref()
                .ok_or_else(|| PipelineError::config("No 'pipeline.publish' section in configuration"))?;
            let pool = ctx.pool().await?;
            pipeline::publish(&pool, spec).await?;
            println!("{} published", spec.output);
            Ok(())
        }
        Commands::MergeUncadastred => {
            let config = ctx.config()?;
            let merge = config
                .pipeline
                .merge
                .as_ref()
                .ok_or_else(|| PipelineError::config("No 'pipeline.merge' section in configuration"))?;
            let pool = ctx.pool().await?;
            pipeline::merge_uncadastred(&pool, merge).await?;
            println!("{} created", merge.output);
            Ok(())
        }
        Commands::Run { report_json } => cmd_run(report_json.as_deref(), ctx).await,
        Commands::DumpTable { table, output } => {
            let config = ctx.config()?;
            let file = backup_path(&config, &output);
            let checksum = backup::dump_table(&ctx.db, &table, &file).await?;
            println!("{} dumped to {} (blake3 {})", table, file.display(), checksum);
            Ok(())
        }
        Commands::DumpDb { output } => {
            let config = ctx.config()?;
            let file = backup_path(&config, &output);
            let checksum = backup::dump_db(&ctx.db, &file).await?;
            println!("{} dumped to {} (blake3 {})", ctx.db.dbname, file.display(), checksum);
            Ok(())
        }
        Commands::Restore {
            input,
            clean,
            skip_checksum,
        } => {
            let config = ctx.config()?;
            let file = backup_path(&config, &input);
            let options = RestoreOptions {
                clean,
                skip_checksum,
                jobs: Some(config.jobs),
            };
            backup::restore(&ctx.db, &file, options).await?;
            println!("{} restored into {}", file.display(), ctx.db.dbname);
            Ok(())
        }
        Commands::Export {
            table,
            query,
            output,
            format,
        } => {
            let source = ExportSource::from_options(table, query)?;
            export::export(&ctx.db, &source, &output, format.as_deref()).await?;
            println!("Exported to {}", output.display());
            Ok(())
        }
        Commands::Stats {
            table,
            geom,
            filter,
            group_by,
            json,
        } => {
            let breakdown = match (filter, group_by) {
                (Some(filter), _) => stats::Breakdown::Filter(Condition::new(filter)?),
                (None, Some(column)) => stats::Breakdown::GroupBy(column),
                (None, None) => stats::Breakdown::None,
            };
            let pool = ctx.pool().await?;
            let result = stats::table_stats(&pool, &table, &geom, &breakdown).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                result.display();
            }
            Ok(())
        }
        Commands::Head {
            table,
            filter,
            order_by,
            limit,
        } => {
            let filter = filter.map(Condition::new).transpose()?;
            let pool = ctx.pool().await?;
            for line in stats::head(&pool, &table, filter.as_ref(), order_by.as_ref(), limit).await? {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

fn cmd_env(ctx: &Context) -> Result<()> {
    let config = ctx.config()?;
    for line in ctx.session(&config)?.display_lines() {
        println!("{}", line);
    }
    Ok(())
}

async fn cmd_session(command: SessionCommand, ctx: &Context) -> Result<()> {
    let config = ctx.config()?;
    let messages = match command {
        SessionCommand::Dirs => {
            let mut messages = Vec::new();
            for dir in [&config.output_dir, &config.validation_dir].into_iter().flatten() {
                messages.push(session::ensure_dir(dir)?);
            }
            if messages.is_empty() {
                messages.push("No output_dir nor validation_dir configured".to_string());
            }
            messages
        }
        SessionCommand::Gisdb => vec![session::ensure_gisdb(&config.grass()?.gisdb)?],
        SessionCommand::Location { epsg } => {
            let grass = config.grass()?;
            let env = ctx.session(&config)?;
            vec![session::ensure_location(&env, &grass.gisdb, &grass.location, epsg.unwrap_or(config.srid)).await?]
        }
        SessionCommand::Mapset { name } => {
            let grass = config.grass()?;
            vec![session::ensure_mapset(&grass.gisdb, &grass.location, &name)?]
        }
        SessionCommand::Launch { mapset } => {
            let env = ctx.session(&config)?;
            session::launch_mapset(&env, config.grass()?, config.srid, &mapset).await?
        }
    };
    for message in messages {
        println!("{}", message);
    }
    Ok(())
}

async fn cmd_db(command: DbCommand, ctx: &Context) -> Result<()> {
    let pool = ctx.pool().await?;
    match command {
        DbCommand::Extensions => {
            admin::ensure_extensions(&pool).await?;
            println!("Extensions ready");
        }
        DbCommand::CreateSchema { schema, overwrite } => {
            println!("{}", admin::create_schema(&pool, &schema, overwrite).await?);
        }
        DbCommand::Grant { schema, user } => {
            admin::grant_user(&pool, &schema, &user).await?;
            println!("Privileges on '{}' granted to '{}'", schema, user);
        }
        DbCommand::Index { table, column, gist } => {
            admin::create_index(&pool, &table, &column, gist).await?;
            println!("Index on {}({}) created", table, column);
        }
        DbCommand::Serial {
            table,
            column,
            primary_key,
        } => {
            admin::add_serial(&pool, &table, &column, primary_key).await?;
            println!("Serial column {} added to {}", column, table);
        }
    }
    Ok(())
}

async fn cmd_import(command: ImportCommand, ctx: &Context) -> Result<()> {
    let config = ctx.config()?;
    match command {
        ImportCommand::Dataset {
            name,
            overwrite,
            from_srid,
            delimiter,
        } => {
            let pool = ctx.pool().await?;
            let options = DatasetOptions {
                overwrite,
                from_srid,
                delimiter,
            };
            import::import_dataset(&pool, &ctx.db, &config, &name, &options).await?;
            println!("Dataset '{}' imported", name);
        }
        ImportCommand::All { overwrite } => {
            let pool = ctx.pool().await?;
            let options = DatasetOptions {
                overwrite,
                ..Default::default()
            };
            let total = config.datasets.len();
            for (i, name) in config.datasets.keys().enumerate() {
                info!(current = i + 1, total = total, dataset = %name, "Importing dataset");
                import::import_dataset(&pool, &ctx.db, &config, name, &options)
                    .await
                    .with_context(|| format!("importing dataset '{}'", name))?;
            }
            println!("{} datasets imported", total);
        }
        ImportCommand::Shp {
            path,
            table,
            from_srid,
            to_srid,
            mode,
        } => {
            let import = ShapefileImport {
                path: &path,
                table: &table,
                from_srid: from_srid.unwrap_or(config.srid),
                to_srid: to_srid.unwrap_or(config.srid),
                mode,
                quiet: true,
            };
            import::import_shapefile(&ctx.db, &import).await?;
            println!("{} imported into {}", path.display(), table);
        }
        ImportCommand::Ogr {
            path,
            table,
            srid,
            mode,
        } => {
            let import = OgrImport {
                path: &path,
                table: table.as_ref(),
                to_srid: srid,
                mode,
            };
            import::import_ogr(&ctx.db, &import).await?;
            println!("{} imported", path.display());
        }
    }
    Ok(())
}

async fn cmd_overlay(only: Option<usize>, ctx: &Context) -> Result<()> {
    let config = ctx.config()?;
    let jobs = &config.pipeline.overlays;
    let selected = match only {
        Some(n) => {
            let job = n
                .checked_sub(1)
                .and_then(|i| jobs.get(i))
                .ok_or_else(|| PipelineError::config(format!("No overlay #{} (1..={})", n, jobs.len())))?;
            std::slice::from_ref(job)
        }
        None => jobs.as_slice(),
    };
    if selected.is_empty() {
        println!("No overlay configured");
        return Ok(());
    }
    let pool = ctx.pool().await?;
    for outcome in pipeline::run_overlays(&pool, selected).await? {
        println!("{} ({} statements)", outcome.stage, outcome.statements);
    }
    Ok(())
}

async fn cmd_legend(command: LegendCommand, ctx: &Context) -> Result<()> {
    let config = ctx.config()?;
    let legend = config
        .pipeline
        .legend
        .as_ref()
        .ok_or_else(|| PipelineError::config("No 'pipeline.legend' section in configuration"))?;
    match command {
        LegendCommand::Apply => {
            let table = config.result_table(legend.table.as_ref())?;
            let pool = ctx.pool().await?;
            let outcome = pipeline::apply_legend(&pool, &table, legend).await?;
            println!("Legend written on {} ({} statements)", table, outcome.statements);
        }
        LegendCommand::Preview { label, codes, json } => {
            let codes: Vec<&str> = codes.iter().map(String::as_str).collect();
            let preview = LegendPreview::new(&legend.map, &label, &codes);
            if json {
                println!("{}", serde_json::to_string_pretty(&preview)?);
            } else {
                preview.display();
            }
        }
    }
    Ok(())
}

async fn cmd_run(report_json: Option<&Path>, ctx: &Context) -> Result<()> {
    let config = ctx.config()?;

    println!("=== Run {} ===", ctx.config_spec);
    println!("Overlays: {}", config.pipeline.overlays.len());
    println!("SRID: {}", config.srid);

    let pool = ctx.pool().await?;
    admin::ensure_extensions(&pool).await?;

    let mut report = RunReport::new(&ctx.config_spec);
    let result = pipeline::run(&pool, &config, &mut report).await;

    report.display();
    println!("{}", report.summary());
    if let Some(path) = report_json {
        report.save_to_file(path)?;
        println!("Report saved to {}", path.display());
    }

    result?;
    Ok(())
}

/// Nom de sauvegarde déclaré dans la configuration, sinon chemin tel quel
fn backup_path(config: &Config, spec: &str) -> PathBuf {
    config
        .backup(spec)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| PathBuf::from(spec))
}
