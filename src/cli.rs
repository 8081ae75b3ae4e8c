// ============================================================================
// MillionGrid CLI: server, provisioning and client commands
// ============================================================================
//
// Usage examples:
//   MillionGrid serve --db grid.db --addr 0.0.0.0:4000
//   MillionGrid provision --db grid.db
//   MillionGrid render --server http://127.0.0.1:4000 -o grid.png
//   MillionGrid claim --owner alice --x 10 --y 20 --image logo.png
//
// Flags override the settings file; the settings file overrides defaults.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use image::RgbaImage;

use crate::api::ClaimResponse;
use crate::checkout::{CheckoutSession, HttpClaimClient};
use crate::claim::ClaimService;
use crate::config::GridSettings;
use crate::grid::{Cell, Coord, GRID_SIZE, GridSnapshot};
use crate::raster;
use crate::render;
use crate::selection::{PointerPos, Selection, SelectionEngine};
use crate::server::GridServer;
use crate::store::{GridStore, SqliteGridStore};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// MillionGrid: a 1000x1000 grid of purchasable cells.
#[derive(Parser, Debug)]
#[command(name = "MillionGrid", version, about = "Pixel-ownership grid server and client")]
pub struct CliArgs {
    /// Settings file to use instead of the platform default.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log at debug level and mirror log lines to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the grid API over HTTP.
    Serve {
        #[arg(long, value_name = "FILE")]
        db: Option<PathBuf>,
        #[arg(long, value_name = "HOST:PORT")]
        addr: Option<String>,
    },
    /// Create every cell row in the database (no-op if already present).
    Provision {
        #[arg(long, value_name = "FILE")]
        db: Option<PathBuf>,
    },
    /// Write the grid as a 1000x1000 PNG.
    Render {
        /// Read straight from a database file.
        #[arg(long, value_name = "FILE", conflicts_with = "server")]
        db: Option<PathBuf>,
        /// Fetch from a running server (default: `server_url` setting).
        #[arg(long, value_name = "URL")]
        server: Option<String>,
        #[arg(short, long, value_name = "FILE.png")]
        output: PathBuf,
    },
    /// Print the effective settings.
    Config {
        /// Also store them in the settings file.
        #[arg(long)]
        write: bool,
    },
    /// Buy a rectangle of cells and paint it with an image.
    ///
    /// The rectangle starts at (x, y) and takes the image's size.
    Claim {
        #[arg(long, value_name = "URL")]
        server: Option<String>,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        x: u16,
        #[arg(long)]
        y: u16,
        #[arg(long, value_name = "FILE")]
        image: PathBuf,
        #[arg(long)]
        image_url: Option<String>,
        #[arg(long)]
        link_url: Option<String>,
        /// Draw the upload onto the grid, write it here and stop before checkout.
        #[arg(long, value_name = "FILE.png")]
        preview: Option<PathBuf>,
    },
}

impl CliArgs {
    /// Settings from `--config`, or the platform file.
    pub fn load_settings(&self) -> GridSettings {
        match &self.config {
            Some(path) => GridSettings::load_from(path),
            None => GridSettings::load(),
        }
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run one command and return an OS exit code.
pub fn run(args: CliArgs, settings: &GridSettings) -> ExitCode {
    let settings_file = args.config.clone().or_else(GridSettings::settings_path);
    let result = match args.command {
        Command::Serve { db, addr } => serve(settings, db, addr),
        Command::Provision { db } => provision(settings, db),
        Command::Render { db, server, output } => render_png(settings, db, server, &output),
        Command::Config { write } => show_config(settings, write.then_some(settings_file).flatten()),
        Command::Claim { server, owner, x, y, image, image_url, link_url, preview } => {
            let order = ClaimOrder {
                owner,
                origin: Coord::new(x, y),
                image,
                image_url,
                link_url,
                preview,
            };
            claim(settings, server, order)
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Server-side commands
// ============================================================================

fn open_store(settings: &GridSettings, db: Option<PathBuf>) -> Result<SqliteGridStore> {
    let path = db.unwrap_or_else(|| settings.db_path.clone());
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("could not create '{}'", parent.display()))?;
    }
    SqliteGridStore::open(&path).with_context(|| format!("could not open database '{}'", path.display()))
}

fn provision_store(store: &SqliteGridStore) -> Result<()> {
    let start = Instant::now();
    let inserted = store.provision().context("provisioning failed")?;
    if inserted > 0 {
        log::info!(
            "provisioned {} cells in {:.1}s",
            inserted,
            start.elapsed().as_secs_f64()
        );
    }
    Ok(())
}

fn serve(settings: &GridSettings, db: Option<PathBuf>, addr: Option<String>) -> Result<()> {
    let store = open_store(settings, db)?;
    provision_store(&store)?;

    let service = ClaimService::new(Arc::new(store)).with_max_cells(settings.max_claim_cells);
    let addr = addr.unwrap_or_else(|| settings.listen_addr.clone());
    let server = GridServer::bind(addr.as_str(), Arc::new(service))
        .with_context(|| format!("could not bind {}", addr))?
        .with_cors_origin(Some(settings.cors_origin.clone()));
    println!("MillionGrid listening on http://{}", server.local_addr()?);
    server.run().context("server stopped")
}

fn provision(settings: &GridSettings, db: Option<PathBuf>) -> Result<()> {
    let store = open_store(settings, db)?;
    provision_store(&store)?;
    println!("{} cells present", store.cell_count()?);
    Ok(())
}

fn show_config(settings: &GridSettings, write_to: Option<PathBuf>) -> Result<()> {
    print!("{}", settings.to_config_string());
    if let Some(path) = write_to {
        settings
            .save_to(&path)
            .with_context(|| format!("could not write '{}'", path.display()))?;
        println!("# saved to {}", path.display());
    }
    Ok(())
}

// ============================================================================
// Client-side commands
// ============================================================================

fn client(settings: &GridSettings, server: Option<String>) -> HttpClaimClient {
    let url = server.unwrap_or_else(|| settings.server_url.clone());
    HttpClaimClient::new(&url, Duration::from_secs(settings.request_timeout_secs))
}

fn fetch_snapshot(client: &HttpClaimClient) -> Result<GridSnapshot> {
    let cells: Vec<Cell> = client.fetch_grid().context("could not fetch the grid")?;
    Ok(GridSnapshot::from_cells(&cells))
}

fn render_png(
    settings: &GridSettings,
    db: Option<PathBuf>,
    server: Option<String>,
    output: &Path,
) -> Result<()> {
    let snapshot = match db {
        Some(path) => {
            let store = open_store(settings, Some(path))?;
            GridSnapshot::from_cells(&store.get_all()?)
        }
        None => fetch_snapshot(&client(settings, server))?,
    };
    render::render(&snapshot, None, None)
        .save(output)
        .with_context(|| format!("could not write '{}'", output.display()))?;
    println!(
        "{} owned cells -> {}",
        snapshot.owned_count(),
        output.display()
    );
    Ok(())
}

struct ClaimOrder {
    owner: String,
    origin: Coord,
    image: PathBuf,
    image_url: Option<String>,
    link_url: Option<String>,
    preview: Option<PathBuf>,
}

/// Select the rectangle an upload at `origin` would cover, the way a pointer
/// drag across cell centres would. Fails if it leaves the grid or any cell
/// in it is owned.
fn select_for_upload(snapshot: Arc<GridSnapshot>, origin: Coord, image: &RgbaImage) -> Result<Selection> {
    let (w, h) = image.dimensions();
    let far_x = origin.x as u32 + w.saturating_sub(1);
    let far_y = origin.y as u32 + h.saturating_sub(1);
    if w == 0 || h == 0 || far_x >= GRID_SIZE as u32 || far_y >= GRID_SIZE as u32 {
        bail!(
            "a {}x{} image at {} does not fit on the {}x{} grid",
            w,
            h,
            origin,
            GRID_SIZE,
            GRID_SIZE
        );
    }

    let mut engine = SelectionEngine::new(snapshot);
    engine.pointer_down(PointerPos::new(origin.x as f32 + 0.5, origin.y as f32 + 0.5));
    engine.pointer_move(PointerPos::new(far_x as f32 + 0.5, far_y as f32 + 0.5));
    let Some(selection) = engine.pointer_up() else {
        bail!("every cell in that rectangle is already owned");
    };
    if !selection.is_full_rect() {
        bail!(
            "{} of {} cells in that rectangle are already owned",
            selection.bounds().area() - selection.len(),
            selection.bounds().area()
        );
    }
    Ok(selection)
}

fn write_preview(
    snapshot: &GridSnapshot,
    selection: &Selection,
    image: &RgbaImage,
    output: &Path,
) -> Result<()> {
    let preview = render::Preview { image, origin: selection.origin() };
    render::render(snapshot, Some(selection), Some(preview))
        .save(output)
        .with_context(|| format!("could not write '{}'", output.display()))
}

/// The transport gives up at the request timeout; allow it time to report.
fn checkout_deadline(settings: &GridSettings) -> Duration {
    Duration::from_secs(settings.request_timeout_secs.saturating_add(5))
}

fn claim(settings: &GridSettings, server: Option<String>, order: ClaimOrder) -> Result<()> {
    let image = raster::load_upload(&order.image)
        .with_context(|| format!("could not load '{}'", order.image.display()))?;

    let client = Arc::new(client(settings, server));
    let snapshot = Arc::new(fetch_snapshot(&client)?);
    let selection = select_for_upload(Arc::clone(&snapshot), order.origin, &image)?;

    if let Some(path) = &order.preview {
        write_preview(&snapshot, &selection, &image, path)?;
        println!("preview of {} cells -> {}", selection.len(), path.display());
        return Ok(());
    }

    let request = raster::build_claim(&selection, &image, &order.owner, order.image_url, order.link_url)?;
    let cells = request.cells.len();

    let mut session = CheckoutSession::new(client);
    session.submit(request)?;
    match session.wait(checkout_deadline(settings)) {
        Some(ClaimResponse::Ok) => {
            println!("claimed {} cells at {}", cells, order.origin);
            Ok(())
        }
        Some(ClaimResponse::Conflict { cells }) => {
            let listed: Vec<String> = cells.iter().take(10).map(Coord::to_string).collect();
            bail!(
                "{} cells were taken first: {}{}",
                cells.len(),
                listed.join(", "),
                if cells.len() > 10 { ", ..." } else { "" }
            )
        }
        Some(ClaimResponse::Invalid { reason }) => bail!("claim rejected: {}", reason),
        Some(ClaimResponse::Error { message }) => bail!("claim failed: {}", message),
        None => bail!("no reply from the server"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_claim_command() {
        let args = CliArgs::try_parse_from([
            "MillionGrid", "claim", "--owner", "alice", "--x", "10", "--y", "20", "--image", "a.png",
        ])
        .unwrap();
        match args.command {
            Command::Claim { owner, x, y, image, image_url, .. } => {
                assert_eq!(owner, "alice");
                assert_eq!((x, y), (10, 20));
                assert_eq!(image, PathBuf::from("a.png"));
                assert!(image_url.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn render_rejects_two_sources() {
        let parsed = CliArgs::try_parse_from([
            "MillionGrid", "render", "--db", "g.db", "--server", "http://x", "-o", "g.png",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let args = CliArgs::try_parse_from(["MillionGrid", "serve", "-v", "--config", "x.cfg"]).unwrap();
        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("x.cfg")));
    }

    #[test]
    fn config_write_uses_explicit_path() {
        let dir = std::env::temp_dir().join(format!("milliongrid-cli-{}", uuid::Uuid::new_v4()));
        let path = dir.join("settings.cfg");
        let settings = GridSettings { max_claim_cells: 9, ..GridSettings::default() };

        show_config(&settings, Some(path.clone())).unwrap();
        assert_eq!(GridSettings::load_from(&path).max_claim_cells, 9);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn checkout_deadline_outlasts_the_request_timeout() {
        let settings = GridSettings { request_timeout_secs: 30, ..GridSettings::default() };
        assert_eq!(checkout_deadline(&settings), Duration::from_secs(35));
        let settings = GridSettings { request_timeout_secs: u64::MAX, ..GridSettings::default() };
        assert_eq!(checkout_deadline(&settings), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn preview_shows_upload_at_the_selection() {
        let dir = std::env::temp_dir().join(format!("milliongrid-cli-{}", uuid::Uuid::new_v4()));
        let out = dir.join("preview.png");
        std::fs::create_dir_all(&dir).unwrap();
        let snapshot = Arc::new(GridSnapshot::empty());
        let upload = RgbaImage::from_pixel(3, 2, image::Rgba([9, 90, 180, 255]));

        let selection = select_for_upload(Arc::clone(&snapshot), Coord::new(40, 50), &upload).unwrap();
        assert_eq!(selection.len(), 6);
        write_preview(&snapshot, &selection, &upload, &out).unwrap();

        let image = image::open(&out).unwrap().to_rgba8();
        assert_eq!(image.get_pixel(42, 51).0, [9, 90, 180, 255]);
        assert_eq!(image.get_pixel(43, 51).0, [0xD3, 0xD3, 0xD3, 255]);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn upload_off_the_grid_or_over_owned_cells_is_refused() {
        let upload = RgbaImage::new(2, 2);
        let empty = Arc::new(GridSnapshot::empty());
        assert!(select_for_upload(Arc::clone(&empty), Coord::new(999, 0), &upload).is_err());

        let mut owned = Cell::unowned(Coord::new(1, 1));
        owned.owner = Some("x".into());
        owned.is_owned = true;
        let snapshot = Arc::new(GridSnapshot::from_cells([&owned]));
        let err = select_for_upload(snapshot, Coord::new(0, 0), &upload).unwrap_err();
        assert!(err.to_string().contains("1 of 4"));
    }

    #[test]
    fn provision_then_render_from_db() {
        let dir = std::env::temp_dir().join(format!("milliongrid-cli-{}", uuid::Uuid::new_v4()));
        let db = dir.join("grid.db");
        let out = dir.join("grid.png");
        let settings = GridSettings::default();

        provision(&settings, Some(db.clone())).unwrap();
        render_png(&settings, Some(db), None, &out).unwrap();
        let image = image::open(&out).unwrap();
        assert_eq!((image.width(), image.height()), (1000, 1000));
        let _ = std::fs::remove_dir_all(dir);
    }
}
