//! Headless demo: several producer threads paint sprites from a shared atlas
//! onto one canvas, then the canvas is read back and summarized.

use anyhow::Context as _;
use clap::Parser;

use tessera_engine::backend::{RecordingBackend, RecordingLog, WgpuInit};
use tessera_engine::coords::{CropRect, Region};
use tessera_engine::logging::{init_logging, LoggingConfig};
use tessera_engine::paint::Color;
use tessera_engine::{BlendMode, Engine, EngineConfig, Painter, Surface};

const TILE: u32 = 16;
const ATLAS_TILES: u32 = 4;

#[derive(Parser, Debug)]
#[command(name = "tessera-studio", version)]
struct Cli {
    /// Record backend calls on the CPU instead of opening a GPU device.
    #[arg(long)]
    dry_run: bool,

    /// Sprites drawn by each producer thread.
    #[arg(long, default_value_t = 256)]
    sprites: u32,

    /// Producer threads.
    #[arg(long, default_value_t = 4)]
    threads: u32,

    /// Canvas size as WIDTHxHEIGHT.
    #[arg(long, default_value = "512x512", value_parser = parse_size)]
    size: (u32, u32),

    /// Log filter (env_logger syntax). Falls back to RUST_LOG.
    #[arg(long)]
    log: Option<String>,
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let w: u32 = w.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let h: u32 = h.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    if w == 0 || h == 0 {
        return Err("size must be non-zero".into());
    }
    Ok((w, h))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(LoggingConfig {
        env_filter: cli.log.clone(),
        ..LoggingConfig::default()
    });

    let config = EngineConfig::default();
    let (engine, log) = if cli.dry_run {
        let log = RecordingLog::default();
        let engine = Engine::with_backend(config, RecordingBackend::new(log.clone()))?;
        (engine, Some(log))
    } else {
        (Engine::new_wgpu(config, WgpuInit::default())?, None)
    };

    let (width, height) = cli.size;
    let atlas = engine
        .new_image(Some("atlas"), TILE * ATLAS_TILES, TILE * ATLAS_TILES, &atlas_pixels())
        .context("failed to create sprite atlas")?;
    let canvas = engine
        .new_surface(Some("canvas"), width, height)
        .context("failed to create canvas")?;

    canvas.clear(canvas.bounds(), Color::BLACK)?;

    std::thread::scope(|scope| -> anyhow::Result<()> {
        let handles: Vec<_> = (0..cli.threads)
            .map(|t| {
                let (canvas, atlas) = (&canvas, &atlas);
                scope.spawn(move || paint_sprites(canvas, atlas, t, cli.sprites))
            })
            .collect();
        for h in handles {
            h.join()
                .map_err(|_| anyhow::anyhow!("producer thread panicked"))??;
        }
        Ok(())
    })?;

    // A translucent banner across the top, clipped to the canvas.
    let mut painter = Painter::new(&canvas);
    painter.push_clip(CropRect::from_size(0, 0, width as i32, (height / 8) as i32));
    painter.fill_rect(Color::rgba(1.0, 1.0, 1.0, 0.25), Region::new(0.0, 0.0, width as f32, height as f32))?;
    painter.pop_clip();
    painter.flush();

    // Stamp the first atlas tile, unblended, into the bottom-left corner.
    if width >= TILE && height >= TILE {
        let tile = CropRect::from_size(0, 0, TILE as i32, TILE as i32);
        canvas.copy_from(&atlas, tile, 0, (height - TILE) as i32)?;
    }

    let pixels = canvas.read_pixels(canvas.bounds())?;
    let checksum = pixels
        .iter()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, &p| (h ^ u64::from(p)).wrapping_mul(0x0100_0000_01b3));
    let lit = pixels.iter().filter(|&&p| p & 0x00FF_FFFF != 0).count();

    println!("canvas        {width}x{height}");
    println!("checksum      {checksum:016x}");
    println!("lit pixels    {lit}");
    if let Some(log) = &log {
        println!("draw calls    {}", log.draws_into(canvas.texture_id()).len());
    }

    canvas.dispose();
    atlas.dispose();
    engine.sync()?;

    let stats = engine.stats();
    println!("tasks         {:?}", stats.tasks);
    println!("callbacks     {:?}", stats.callbacks);
    println!("pool          {:?}", stats.pool);
    println!("live surfaces {}", stats.live_surfaces);

    engine.shutdown();
    Ok(())
}

fn paint_sprites(canvas: &Surface, atlas: &Surface, thread: u32, count: u32) -> anyhow::Result<()> {
    let mut painter = Painter::new(canvas);
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    let mut seed = 0x9E37_79B9u32.wrapping_mul(thread + 1);

    for i in 0..count {
        seed = xorshift(seed);
        let x = (seed % 1024) as f32 / 1024.0 * w;
        seed = xorshift(seed);
        let y = (seed % 1024) as f32 / 1024.0 * h;
        let tile = (seed >> 16) % (ATLAS_TILES * ATLAS_TILES);
        let src = Region::new(
            ((tile % ATLAS_TILES) * TILE) as f32,
            ((tile / ATLAS_TILES) * TILE) as f32,
            TILE as f32,
            TILE as f32,
        );

        match i % 8 {
            0 => painter.blit_rotated_scaled(
                src,
                Region::new(x, y, TILE as f32 * 2.0, TILE as f32 * 2.0),
                (seed % 360) as f32,
                atlas,
                BlendMode::NORMAL,
            )?,
            1 => painter.blit_scaled(src, Region::new(x, y, TILE as f32 * 1.5, TILE as f32 * 1.5), atlas)?,
            _ => painter.blit(src, x, y, atlas)?,
        }
    }
    painter.flush();
    log::debug!("producer {thread} painted {count} sprites");
    Ok(())
}

fn xorshift(mut x: u32) -> u32 {
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    x
}

/// Checkerboard of coloured tiles with transparent corners.
fn atlas_pixels() -> Vec<u32> {
    let side = TILE * ATLAS_TILES;
    let mut out = Vec::with_capacity((side * side) as usize);
    for y in 0..side {
        for x in 0..side {
            let (tx, ty) = (x / TILE, y / TILE);
            let (lx, ly) = (x % TILE, y % TILE);
            let corner = (lx < 2 || lx >= TILE - 2) && (ly < 2 || ly >= TILE - 2);
            if corner {
                out.push(0);
                continue;
            }
            let r = 64 + tx * 48;
            let g = 64 + ty * 48;
            let b = if (tx + ty) % 2 == 0 { 220 } else { 90 };
            out.push(0xFF00_0000 | r << 16 | g << 8 | b);
        }
    }
    out
}
