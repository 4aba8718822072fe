use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use gymlens::analysis::{AnalysisStatus, AnalysisSummary, DetectionOrchestrator};
use gymlens::config::Config;
use gymlens::db::{Location, LocationType, LocationUpdate, MetadataStore, PhotoRecord, SqliteStore};
use gymlens::detect::LlmDetector;
use gymlens::ingest::{validate_files, ImageFile, ProgressSink, UploadOrchestrator, UploadSettings};
use gymlens::location::{LocationService, NewLocation};
use gymlens::logging;
use gymlens::storage::{FilesystemStore, ObjectStore, Sha256Signer, UrlSigner};

enum Command {
    Scan {
        name: String,
        location_type: LocationType,
        is_default: bool,
        retry_failed: bool,
        equipment: Vec<String>,
        photos: Vec<PathBuf>,
    },
    Add {
        location_id: Uuid,
        photos: Vec<PathBuf>,
    },
    Analyze {
        location_id: Uuid,
        retry_failed: bool,
    },
    Update {
        location_id: Uuid,
        update: LocationUpdate,
    },
    Equip {
        location_id: Uuid,
        names: Vec<String>,
    },
    Unequip(Uuid),
    List,
    Delete(Uuid),
    DeletePhoto(Uuid),
    SetDefault(Uuid),
}

struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_uuid(value: Option<&String>, what: &str) -> Uuid {
    let Some(value) = value else {
        eprintln!("Error: missing {}", what);
        std::process::exit(1);
    };
    match Uuid::parse_str(value) {
        Ok(id) => id,
        Err(_) => {
            eprintln!("Error: invalid {}: {}", what, value);
            std::process::exit(1);
        }
    }
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut name = None;
    let mut location_type: Option<LocationType> = None;
    let mut equipment = Vec::new();
    let mut is_default = false;
    let mut retry_failed = false;
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("gymlens {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--name" | "-n" => {
                if i + 1 < args.len() {
                    name = Some(args[i + 1].clone());
                    i += 1;
                } else {
                    eprintln!("Error: --name requires a value");
                    std::process::exit(1);
                }
            }
            "--type" | "-t" => {
                if i + 1 < args.len() {
                    match args[i + 1].parse() {
                        Ok(t) => location_type = Some(t),
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            std::process::exit(1);
                        }
                    }
                    i += 1;
                } else {
                    eprintln!("Error: --type requires a value");
                    std::process::exit(1);
                }
            }
            "--equipment" | "-e" => {
                if i + 1 < args.len() {
                    equipment.push(args[i + 1].clone());
                    i += 1;
                } else {
                    eprintln!("Error: --equipment requires a value");
                    std::process::exit(1);
                }
            }
            "--default" => is_default = true,
            "--retry-failed" => retry_failed = true,
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let Some((command, rest)) = positional.split_first() else {
        print_help();
        std::process::exit(1);
    };

    let command = match command.as_str() {
        "scan" => {
            let Some(name) = name else {
                eprintln!("Error: scan requires --name");
                std::process::exit(1);
            };
            Command::Scan {
                name,
                location_type: location_type.unwrap_or(LocationType::Gym),
                is_default,
                retry_failed,
                equipment,
                photos: rest.iter().map(PathBuf::from).collect(),
            }
        }
        "update" => {
            let update = LocationUpdate {
                name,
                location_type,
                is_default: is_default.then_some(true),
            };
            if update.is_empty() {
                eprintln!("Error: update requires --name, --type or --default");
                std::process::exit(1);
            }
            Command::Update {
                location_id: parse_uuid(rest.first(), "location id"),
                update,
            }
        }
        "equip" => Command::Equip {
            location_id: parse_uuid(rest.first(), "location id"),
            names: rest.iter().skip(1).cloned().collect(),
        },
        "unequip" => Command::Unequip(parse_uuid(rest.first(), "equipment id")),
        "add" => Command::Add {
            location_id: parse_uuid(rest.first(), "location id"),
            photos: rest.iter().skip(1).map(PathBuf::from).collect(),
        },
        "analyze" => Command::Analyze {
            location_id: parse_uuid(rest.first(), "location id"),
            retry_failed,
        },
        "list" => Command::List,
        "delete" => Command::Delete(parse_uuid(rest.first(), "location id")),
        "delete-photo" => Command::DeletePhoto(parse_uuid(rest.first(), "photo id")),
        "set-default" => Command::SetDefault(parse_uuid(rest.first(), "location id")),
        other => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(1);
        }
    };

    Args {
        config_path,
        command,
    }
}

fn print_help() {
    println!(
        r#"gymlens - training location photo analysis

USAGE:
    gymlens [OPTIONS] <COMMAND>

COMMANDS:
    scan --name NAME [--type TYPE] [--default] [--equipment NAME]... PHOTO...
                            Create a location, upload its photos and detect equipment
    add LOCATION_ID PHOTO...
                            Upload more photos to a location and analyse them
    analyze LOCATION_ID     Re-run equipment detection on a location's photos
    update LOCATION_ID [--name NAME] [--type TYPE] [--default]
                            Rename a location or change its type
    equip LOCATION_ID NAME...
                            Add equipment to a location's list
    unequip EQUIPMENT_ID    Remove equipment from a location's list
    list                    List locations with their equipment and photos
    delete LOCATION_ID      Delete a location with its photos and detections
    delete-photo PHOTO_ID   Delete a single photo
    set-default LOCATION_ID Make a location the default one

OPTIONS:
    --config, -c PATH   Path to config file
    --type, -t TYPE     Location type: home, gym or outdoor (default: gym)
    --equipment, -e N   Equipment available at the location (repeatable)
    --retry-failed      Retry photos whose analysis failed once more
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    GYMLENS_CONFIG      Path to config file (overrides default location)
    GYMLENS_LOG         Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/gymlens/config.toml"#
    );
}

/// Everything a command needs, wired from the config.
struct App {
    config: Config,
    service: LocationService,
    analysis: DetectionOrchestrator,
}

impl App {
    async fn build(config: Config) -> Result<Self> {
        let db: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::open(&config.db_path)
                .with_context(|| format!("Failed to open database {}", config.db_path.display()))?,
        );
        let store: Arc<dyn ObjectStore> = Arc::new(
            FilesystemStore::open(&config.storage.root, &config.storage.bucket)
                .await
                .context("Failed to open photo storage")?,
        );
        let signer: Arc<dyn UrlSigner> = Arc::new(Sha256Signer::new(
            &config.storage.public_base_url,
            &config.storage.signing_secret,
        ));
        let ttl = config.storage.signed_url_ttl();

        let uploader = Arc::new(UploadOrchestrator::new(
            store.clone(),
            signer.clone(),
            db.clone(),
            &config.storage.bucket,
            ttl,
            UploadSettings::from_config(&config.upload),
        ));
        let service = LocationService::new(
            db.clone(),
            store.clone(),
            signer.clone(),
            uploader,
            &config.storage.bucket,
            ttl,
            config.upload.max_photos_per_location,
        );

        let detector = Arc::new(LlmDetector::from_config(&config.detector, store, db.clone()));
        let analysis = DetectionOrchestrator::new(
            detector,
            db,
            signer,
            &config.storage.bucket,
            ttl,
            &config.analysis,
        );

        Ok(Self {
            config,
            service,
            analysis,
        })
    }
}

async fn load_photos(paths: &[PathBuf], max_bytes: u64) -> Result<Vec<ImageFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let file = ImageFile::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        files.push(file);
    }

    let (accepted, rejected) = validate_files(files, max_bytes);
    for reason in &rejected {
        eprintln!("  skipped {}", reason);
    }
    if accepted.is_empty() {
        bail!("No usable photos");
    }
    Ok(accepted)
}

/// Print upload stages as they arrive.
fn upload_sink(names: Vec<String>) -> (ProgressSink, tokio::task::JoinHandle<()>) {
    let (sink, mut rx) = ProgressSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            let name = names
                .get(update.photo_index)
                .map(String::as_str)
                .unwrap_or("?");
            match update.error {
                Some(error) => println!("  {} failed: {}", name, error),
                None => println!("  {} {:?} ({}%)", name, update.stage, update.progress),
            }
        }
    });
    (sink, printer)
}

async fn analyse(ctx: &App, photos: Vec<PhotoRecord>, location: &Location, retry_failed: bool) {
    if photos.is_empty() {
        return;
    }
    println!("Analysing {} photo(s)...", photos.len());

    let names: HashMap<Uuid, u32> = photos.iter().map(|p| (p.id, p.order + 1)).collect();
    let mut rx = ctx.analysis.subscribe();
    let watcher = tokio::spawn(async move {
        let mut last: HashMap<Uuid, AnalysisStatus> = HashMap::new();
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            for (id, state) in snapshot.iter() {
                if last.insert(*id, state.status) == Some(state.status) {
                    continue;
                }
                let photo = names.get(id).copied().unwrap_or(0);
                match state.status {
                    AnalysisStatus::Completed => println!(
                        "  photo {}: {} item(s) found",
                        photo,
                        state.equipment_count.unwrap_or(0)
                    ),
                    AnalysisStatus::Error => println!(
                        "  photo {}: failed: {}",
                        photo,
                        state.error.as_deref().unwrap_or("unknown error")
                    ),
                    AnalysisStatus::Analyzing => println!("  photo {}: analysing", photo),
                    AnalysisStatus::Pending => {}
                }
            }
        }
    });

    let mut summary = ctx.analysis.analyze_batch(photos.clone(), location).await;

    if retry_failed && summary.error_count > 0 {
        for photo in &photos {
            if ctx.analysis.status(photo.id).map(|s| s.status) == Some(AnalysisStatus::Error) {
                if let Err(e) = ctx.analysis.retry_one(photo.id).await {
                    eprintln!("  retry of photo {} rejected: {}", photo.order + 1, e);
                }
            }
        }
        summary = ctx.analysis.summary();
    }

    watcher.abort();
    print_summary(&summary);

    for photo in &photos {
        for detection in ctx.analysis.detections(photo.id) {
            println!(
                "    [photo {}] {} ({}) at {:.2},{:.2} - {:.0}%",
                photo.order + 1,
                detection.label,
                detection.category.as_deref().unwrap_or("other"),
                detection.position.x,
                detection.position.y,
                detection.confidence * 100.0
            );
        }
    }
}

fn print_summary(summary: &AnalysisSummary) {
    println!(
        "Done in {}s: {} analysed, {} failed, {} item(s) of equipment",
        summary.elapsed_seconds,
        summary.completed_count,
        summary.error_count,
        summary.total_equipment_found
    );
}

async fn run(ctx: App, command: Command) -> Result<()> {
    let owner = ctx.config.owner_id.clone();
    let max_bytes = ctx.config.upload.max_file_size_bytes();

    match command {
        Command::Scan {
            name,
            location_type,
            is_default,
            retry_failed,
            equipment,
            photos,
        } => {
            let files = load_photos(&photos, max_bytes).await?;
            let (sink, printer) = upload_sink(files.iter().map(|f| f.name.clone()).collect());

            let created = ctx
                .service
                .create_location(
                    &owner,
                    NewLocation {
                        name,
                        location_type,
                        is_default,
                        equipment,
                        photos: files,
                    },
                    &sink,
                )
                .await
                .context("Failed to create location")?;
            drop(sink);
            let _ = printer.await;

            println!(
                "Location {} created with {} photo(s) and {} equipment item(s)",
                created.location.id,
                created.upload.photos.len(),
                created.equipment.len()
            );
            for dropped in &created.upload.dropped {
                println!("  not uploaded (limit reached): {}", dropped);
            }

            analyse(&ctx, created.upload.photos, &created.location, retry_failed).await;
        }
        Command::Add {
            location_id,
            photos,
        } => {
            let view = ctx
                .service
                .location(location_id)
                .await?
                .with_context(|| format!("Location {} not found", location_id))?;
            let files = load_photos(&photos, max_bytes).await?;
            let (sink, printer) = upload_sink(files.iter().map(|f| f.name.clone()).collect());

            let batch = ctx
                .service
                .add_photos(&owner, location_id, files, &sink)
                .await
                .context("Failed to add photos")?;
            drop(sink);
            let _ = printer.await;

            println!("{} photo(s) added", batch.photos.len());
            for dropped in &batch.dropped {
                println!("  not uploaded (limit reached): {}", dropped);
            }
            analyse(&ctx, batch.photos, &view.location, false).await;
        }
        Command::Analyze {
            location_id,
            retry_failed,
        } => {
            let view = ctx
                .service
                .location(location_id)
                .await?
                .with_context(|| format!("Location {} not found", location_id))?;
            if view.photos.is_empty() {
                println!("Location has no photos");
            }
            let photos = view.photos.into_iter().map(|p| p.record).collect();
            analyse(&ctx, photos, &view.location, retry_failed).await;
        }
        Command::Update {
            location_id,
            update,
        } => {
            let location = ctx.service.update_location(location_id, update).await?;
            println!(
                "Location {} is now {} ({}){}",
                location.id,
                location.name,
                location.location_type,
                if location.is_default { ", default" } else { "" }
            );
        }
        Command::Equip { location_id, names } => {
            if names.is_empty() {
                bail!("No equipment names given");
            }
            let added = ctx.service.add_equipment(location_id, &names).await?;
            for item in added {
                println!("  {} {}", item.id, item.name);
            }
        }
        Command::Unequip(id) => {
            if !ctx.service.remove_equipment(id).await? {
                bail!("Equipment {} not found", id);
            }
            println!("Equipment {} removed", id);
        }
        Command::List => {
            let locations = ctx.service.fetch_locations(&owner).await?;
            if locations.is_empty() {
                println!("No locations");
            }
            for view in locations {
                let marker = if view.location.is_default { "*" } else { " " };
                println!(
                    "{} {} {} ({}) - {} photo(s)",
                    marker,
                    view.location.id,
                    view.location.name,
                    view.location.location_type,
                    view.photos.len()
                );
                for item in &view.equipment {
                    println!("    - {} {}", item.id, item.name);
                }
                for photo in view.photos {
                    let url = photo
                        .url
                        .map(|u| u.url)
                        .unwrap_or_else(|| "(no url)".to_string());
                    println!("    {} #{} {}", photo.record.id, photo.record.order + 1, url);
                }
            }
        }
        Command::Delete(id) => {
            if !ctx.service.delete_location(id).await? {
                bail!("Location {} not found", id);
            }
            println!("Location {} deleted", id);
        }
        Command::DeletePhoto(id) => {
            if !ctx.service.delete_photo(id).await? {
                bail!("Photo {} not found", id);
            }
            println!("Photo {} deleted", id);
        }
        Command::SetDefault(id) => {
            ctx.service.set_default_location(&owner, id).await?;
            println!("Location {} is now the default", id);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    // Journald on Linux, file fallback otherwise
    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let config = match args.config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    let ctx = App::build(config).await?;
    run(ctx, args.command).await
}
