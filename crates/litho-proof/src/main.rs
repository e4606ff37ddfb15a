//! Headless proof-of-pipeline: builds a scene, runs it through
//! render → measure → layout → draw → raster, exercises the delta path, and
//! writes the results as PNG proofs next to a phase-timing report.

use anyhow::{Context, Result};

use litho_engine::assets::{AssetRef, ImageSource};
use litho_engine::coords::{Rect, Vec2};
use litho_engine::logging::{LoggingConfig, init_logging};
use litho_engine::paint::{Color, ColorStop, LinearGradient, Paint, SpreadMode};
use litho_engine::pipeline::{ManagedContext, MeasureMode, OwnerThread};
use litho_engine::raster::{AlphaType, ColorType, Surface};
use litho_engine::scene::{SceneBuilder, ZIndex};
use litho_engine::time::Stopwatch;

const WIDTH: u32 = 480;
const HEIGHT: u32 = 320;

fn checkerboard(cells: u32, cell: u32) -> ImageSource {
    let side = cells * cell;
    let mut pixels = Vec::with_capacity((side * side * 4) as usize);
    for y in 0..side {
        for x in 0..side {
            let on = ((x / cell) + (y / cell)) % 2 == 0;
            if on {
                pixels.extend_from_slice(&[235, 235, 235, 255]);
            } else {
                pixels.extend_from_slice(&[60, 60, 70, 255]);
            }
        }
    }
    ImageSource::Rgba8 { width: side, height: side, pixels }
}

fn build_scene(builder: &mut SceneBuilder, tick: usize, badge: AssetRef) {
    let w = WIDTH as f32;
    let h = HEIGHT as f32;

    builder.push_rect(
        ZIndex::new(-10),
        Rect::new(0.0, 0.0, w, h),
        Paint::LinearGradient(LinearGradient::new(
            Vec2::new(0.0, 0.0),
            Vec2::new(w, h),
            vec![
                ColorStop::new(0.0, Color::from_rgba8(28, 32, 48, 255)),
                ColorStop::new(1.0, Color::from_rgba8(64, 24, 72, 255)),
            ],
            SpreadMode::Pad,
        )),
    );

    // Card row.
    for i in 0..4 {
        let x = 24.0 + i as f32 * 112.0;
        builder.push_rounded_rect(
            ZIndex::new(0),
            Rect::new(x, 32.0, 96.0, 120.0),
            12.0,
            Paint::solid(Color::from_rgba8(240, 240, 245, 230)),
        );
        builder.push_circle(
            ZIndex::new(1),
            Vec2::new(x + 48.0, 72.0),
            24.0,
            Paint::solid(Color::from_rgba8(80 + i * 40, 120, 200, 255)),
        );
    }

    // The animated cursor: the only thing that moves between ticks, so the
    // delta pass damages a small region.
    builder.push_solid_rect(
        ZIndex::new(5),
        Rect::new(24.0 + (tick * 60) as f32, 200.0, 40.0, 40.0),
        Color::from_rgba8(255, 140, 0, 255),
    );

    // Clipped badge strip.
    builder.push_clip(Rect::new(24.0, 256.0, w - 48.0, 48.0));
    builder.push_image(ZIndex::new(6), Rect::new(24.0, 256.0, 64.0, 64.0), badge);
    builder.push_solid_rect(
        ZIndex::new(7),
        Rect::new(96.0, 260.0, w - 144.0, 40.0),
        Color::from_rgba8(255, 255, 255, 40),
    );
    builder.pop_clip();
}

fn save_png(path: &str, buf: &[u8]) -> Result<()> {
    let img = image::RgbaImage::from_raw(WIDTH, HEIGHT, buf.to_vec())
        .context("pixel buffer does not match image dimensions")?;
    img.save(path).with_context(|| format!("failed to write {path}"))?;
    Ok(())
}

fn main() -> Result<()> {
    init_logging(LoggingConfig {
        env_filter: Some("info".to_string()),
        ..LoggingConfig::default()
    });

    let owner = OwnerThread::spawn()?;
    let ctx = ManagedContext::new(owner);

    let badge = ctx.load_image(checkerboard(8, 8));
    let assets = ctx.on_all_assets_loaded().wait();
    log::info!("assets loaded: {} (errors: {})", assets.loaded_count, assets.errors.len());

    // Frame 0: full pipeline.
    let render_sw = Stopwatch::start();
    ctx.render(|b| build_scene(b, 0, badge));
    let render_ms = render_sw.elapsed_ms();

    let measured = ctx
        .measure(
            WIDTH as f32,
            MeasureMode::AtMost,
            HEIGHT as f32,
            MeasureMode::AtMost,
            false,
        )
        .wait()?;
    log::info!("measured content: {:.0}x{:.0}", measured.width, measured.height);

    let layout_sw = Stopwatch::start();
    ctx.layout(WIDTH as f32, HEIGHT as f32, false)
        .wait()?;
    let layout_ms = layout_sw.elapsed_ms();

    let draw_sw = Stopwatch::start();
    let output = ctx.draw().wait()?;
    let draw_total_ms = draw_sw.elapsed_ms();
    let sched_ms = (draw_total_ms - output.owner_ms).max(0.0);

    let mut buf = vec![0u8; (WIDTH * HEIGHT * 4) as usize];
    let raster_sw = Stopwatch::start();
    {
        let mut surface = Surface::new(
            &mut buf,
            WIDTH,
            HEIGHT,
            WIDTH as usize * 4,
            ColorType::Rgba8888,
            AlphaType::Premultiplied,
        )?;
        output.frame.raster_into(&mut surface, true)?;
    }
    let raster_ms = raster_sw.elapsed_ms();
    save_png("proof_full.png", &buf)?;
    output.frame.dispose();

    // Frame 1: move the cursor, redraw only the damage.
    ctx.render(|b| build_scene(b, 1, badge));
    let delta_output = ctx.draw().wait()?;

    let delta_sw = Stopwatch::start();
    let damage = {
        let mut surface = Surface::new(
            &mut buf,
            WIDTH,
            HEIGHT,
            WIDTH as usize * 4,
            ColorType::Rgba8888,
            AlphaType::Premultiplied,
        )?;
        delta_output.frame.raster_delta_into(&mut surface)?
    };
    let delta_ms = delta_sw.elapsed_ms();
    save_png("proof_delta.png", &buf)?;
    delta_output.frame.dispose();

    println!();
    println!("  proof images: proof_full.png, proof_delta.png ({WIDTH}x{HEIGHT})");
    println!();
    println!("  phase timings (ms)");
    println!("    render        {render_ms:8.3}");
    println!("    layout        {layout_ms:8.3}");
    println!("    draw total    {draw_total_ms:8.3}");
    println!("    draw (owner)  {:8.3}", output.owner_ms);
    println!("    draw (sched)  {sched_ms:8.3}");
    println!("    raster full   {raster_ms:8.3}");
    println!("    raster delta  {delta_ms:8.3}");
    println!();
    println!("  delta damage ({} rects):", damage.damage.len());
    for rect in &damage.damage {
        println!(
            "    x={:.0} y={:.0} w={:.0} h={:.0}",
            rect.origin.x, rect.origin.y, rect.size.x, rect.size.y
        );
    }
    println!();

    ctx.dispose();
    Ok(())
}
