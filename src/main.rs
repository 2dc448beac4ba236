use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sea_orm::DatabaseConnection;
use sea_orm_migration::MigratorTrait;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use mapdata::config::Config;
use mapdata::database::entities::common_types::{BoundaryType, GeometryKind};
use mapdata::database::migrations::Migrator;
use mapdata::database::{establish_connection, get_database_url, migrate_database, MigrateDirection};
use mapdata::geometry::Point;
use mapdata::jobs::{resolve_boundaries, ResolutionWorker};
use mapdata::services::{
    BoundaryService, MapDataService, MapDataUpdate, NewMapData, UploadService,
};

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(short, long, global = true)]
    log_level: Option<String>,
    #[clap(short, long, global = true, default_value = "mapdata.toml")]
    config: PathBuf,
    /// Overrides the database path from the config file
    #[clap(short, long, global = true)]
    database: Option<String>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Db {
        #[clap(subcommand)]
        command: DbCommands,
    },
    Dataset {
        #[clap(subcommand)]
        command: DatasetCommands,
    },
    /// Load a CSV or spreadsheet into a dataset, replacing any previous upload
    Upload {
        #[clap(long)]
        dataset: String,
        file: PathBuf,
        /// Return without waiting for boundary resolution to finish
        #[clap(long)]
        no_wait: bool,
    },
    /// Resolve boundaries for a dataset's unresolved rows
    Resolve {
        #[clap(long)]
        dataset: String,
    },
    Boundaries {
        #[clap(subcommand)]
        command: BoundaryCommands,
    },
}

#[derive(Subcommand, Debug)]
enum DbCommands {
    Init,
    Migrate {
        #[clap(subcommand)]
        direction: MigrateDirection,
    },
}

#[derive(Subcommand, Debug)]
enum DatasetCommands {
    Create {
        name: String,
        #[clap(long)]
        description: Option<String>,
        #[clap(long, default_value = "point")]
        geometry: String,
        #[clap(long, default_value = "1")]
        user_id: i32,
    },
    List {
        /// Only active (true) or inactive (false) datasets
        #[clap(long)]
        active: Option<bool>,
    },
    Show {
        id: String,
        /// Number of rows to print from the backing table
        #[clap(long, default_value = "10")]
        rows: u64,
    },
    Rename {
        id: String,
        name: String,
    },
    Activate {
        id: String,
    },
    Deactivate {
        id: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum BoundaryCommands {
    /// Import a GeoJSON FeatureCollection of boundaries
    Import { file: PathBuf },
    List {
        #[clap(long = "type")]
        boundary_type: Option<String>,
    },
    /// Print the most specific boundary containing a coordinate
    Locate { lat: String, lng: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logging(&args.log_level);

    let mut config = Config::load(&args.config)?;
    if let Some(database) = args.database {
        config.database = database;
    }

    match args.command {
        Commands::Db { command } => match command {
            DbCommands::Init => {
                info!("Initializing database: {}", config.database);
                migrate_database(&config.database, MigrateDirection::Up).await?;
            }
            DbCommands::Migrate { direction } => {
                info!("Running database migration: {:?}", direction);
                migrate_database(&config.database, direction).await?;
            }
        },
        Commands::Dataset { command } => {
            let db = connect(&config).await?;
            run_dataset_command(MapDataService::new(db), command).await?;
        }
        Commands::Upload {
            dataset,
            file,
            no_wait,
        } => {
            let db = connect(&config).await?;
            let worker = ResolutionWorker::spawn(db.clone(), config.worker_config());
            let service = UploadService::new(db)
                .with_chunk_size(config.ingest.chunk_size)
                .with_resolver(worker.clone());

            let report = service.upload_path(&dataset, &file).await?;
            print_json(&report)?;

            if !no_wait && report.resolution.is_some() {
                if let Some(job) = worker.wait(report.table_name.as_str()).await? {
                    print_json(&job)?;
                }
            }
            worker.shutdown().await?;
        }
        Commands::Resolve { dataset } => {
            let db = connect(&config).await?;
            let record = MapDataService::new(db.clone()).get(&dataset).await?;
            let Some(table_name) = record.data_table.clone() else {
                warn!("Dataset {} has no uploaded data", record.id);
                return Ok(());
            };
            let manifest = record.column_manifest()?;
            let report = resolve_boundaries(&db, &table_name, &manifest).await?;
            print_json(&report)?;
        }
        Commands::Boundaries { command } => {
            let db = connect(&config).await?;
            run_boundary_command(BoundaryService::new(db), command).await?;
        }
    }

    Ok(())
}

async fn run_dataset_command(service: MapDataService, command: DatasetCommands) -> Result<()> {
    match command {
        DatasetCommands::Create {
            name,
            description,
            geometry,
            user_id,
        } => {
            let geometry_kind: GeometryKind = geometry
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let mut input = NewMapData::new(name, user_id);
            input.description = description;
            input.geometry_kind = geometry_kind;
            let record = service.create(input).await?;
            info!("Created dataset {}", record.id);
            print_json(&record)?;
        }
        DatasetCommands::List { active } => {
            print_json(&service.list(active).await?)?;
        }
        DatasetCommands::Show { id, rows } => {
            let record = service.get(&id).await?;
            let count = service.dynamic_row_count(&record).await?;
            let sample = service.dynamic_rows(&record, rows, 0).await?;
            print_json(&serde_json::json!({
                "dataset": record,
                "row_count": count,
                "rows": sample,
            }))?;
        }
        DatasetCommands::Rename { id, name } => {
            let changes = MapDataUpdate {
                name: Some(name),
                ..Default::default()
            };
            print_json(&service.update(&id, changes).await?)?;
        }
        DatasetCommands::Activate { id } => {
            print_json(&service.activate(&id).await?)?;
        }
        DatasetCommands::Deactivate { id } => {
            print_json(&service.deactivate(&id).await?)?;
        }
        DatasetCommands::Delete { id } => {
            let outcome = service.delete(&id).await?;
            info!("Deleted dataset {}", id);
            print_json(&outcome)?;
        }
    }
    Ok(())
}

async fn run_boundary_command(service: BoundaryService, command: BoundaryCommands) -> Result<()> {
    match command {
        BoundaryCommands::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let summary = service.import_feature_collection(&raw).await?;
            print_json(&summary)?;
        }
        BoundaryCommands::List { boundary_type } => {
            let boundary_type = boundary_type
                .map(|t| t.parse::<BoundaryType>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            print_json(&service.list(boundary_type).await?)?;
        }
        BoundaryCommands::Locate { lat, lng } => {
            let point = Point::parse(&lat, &lng)?;
            print_json(&service.find_containing(&point).await?)?;
        }
    }
    Ok(())
}

async fn connect(config: &Config) -> Result<DatabaseConnection> {
    let database_url = get_database_url(Some(&config.database));
    let db = establish_connection(&database_url).await?;
    // Bring the schema up to date so a fresh file is usable without `db init`
    Migrator::up(&db, None).await?;
    Ok(db)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn setup_logging(log_level: &Option<String>) {
    let log_level = match log_level
        .as_ref()
        .unwrap_or(&"info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!("sqlx=warn,{}", log_level)))
        .without_time()
        .init();
}
