// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::io::Write;

use aobvh::{
    render::{
        self,
        Camera,
    },
    MeshBvh,
    OptimizeConfig,
    Triangle,
};
use glam::Vec3A;
use gltf::mesh::Mode;
use indicatif::{
    ParallelProgressIterator,
    ProgressBar,
};
use rayon::iter::{
    IndexedParallelIterator,
    IntoParallelRefMutIterator,
    ParallelIterator,
};
use rgb::Rgb;
use tracing::{
    info,
    warn,
};

pub const WIDTH: u32 = 800;
pub const HEIGHT: u32 = 600;
pub const FOV: f32 = 30.0;

pub const AO_SAMPLES: u32 = 64;
// Relative to the mesh's bounding diagonal.
pub const AO_RADIUS: f32 = 0.1;

const DEFAULT_MODEL: &str = "models/bunny.glb";
const OUTPUT: &str = "ambient_occlusion.png";

#[inline]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
fn process_sample(visibility: Option<f32>) -> Rgb<u16> {
    let Some(visibility) = visibility else {
        return Rgb::new(u16::MAX / 8, u16::MAX / 6, u16::MAX / 4);
    };

    // Gamma correction
    let shade = visibility.clamp(0.0, 1.0).powf(1.0 / 1.8);

    // Saturating cast - Will auto-clamp within bounds of u16
    let value = (shade * f32::from(u16::MAX)) as u16;
    Rgb::new(value, value, value)
}

fn load_triangles(path: &str) -> Result<Vec<Triangle>, Box<dyn std::error::Error>> {
    let (document, buffers, _) = gltf::import(path)?;
    let mut triangles = Vec::new();

    for mesh in document.meshes() {
        for prim in mesh.primitives() {
            if prim.mode() != Mode::Triangles {
                continue;
            }

            let reader = prim.reader(|buf| buffers.get(buf.index()).map(|d| &*d.0));
            let Some(positions) = reader.read_positions() else {
                warn!(mesh = mesh.index(), "no positions attached to triangle mesh");
                continue;
            };
            let positions = positions.map(Vec3A::from_array).collect::<Vec<_>>();

            let indices = reader.read_indices().map_or_else(
                || (0..positions.len()).collect::<Vec<_>>(),
                |indices| indices.into_u32().map(|v| v as usize).collect(),
            );

            let before = triangles.len();
            for chunk in indices.chunks_exact(3) {
                let (Some(&a), Some(&b), Some(&c)) = (
                    positions.get(chunk[0]),
                    positions.get(chunk[1]),
                    positions.get(chunk[2]),
                ) else {
                    warn!(mesh = mesh.index(), "triangle index out of range");
                    continue;
                };
                triangles.push(Triangle::new(a, b, c));
            }
            info!(mesh = mesh.index(), tris = triangles.len() - before, "added mesh");
        }
    }

    Ok(triangles)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let fmt_subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)?;

    let model = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_MODEL.to_owned());

    let triangles = load_triangles(&model)?;
    info!(model = %model, primitives = triangles.len(), "loaded model");

    let mut bvh = MeshBvh::new(triangles)?;

    let begin_time = std::time::Instant::now();
    let report = bvh.optimize_with(&OptimizeConfig {
        report_closest_pair: false,
        ..OptimizeConfig::default()
    });
    info!(
        iterations = report.iterations,
        initial_cost = report.initial_cost,
        final_cost = report.final_cost,
        elapsed_ms = begin_time.elapsed().as_secs_f64() * 1000.0,
        "optimization finished"
    );

    let bounds = bvh.bounds();
    let camera = Camera::framing(&bounds, Vec3A::new(-1.0, -0.4, -1.0), FOV, WIDTH, HEIGHT);
    let radius = AO_RADIUS * bounds.diagonal_length();

    let mut render_buffer = vec![Rgb::<u16>::default(); WIDTH as usize * HEIGHT as usize];

    info!(width = WIDTH, height = HEIGHT, samples = AO_SAMPLES, "beginning render");
    let begin_time = std::time::Instant::now();

    let bar = ProgressBar::new(u64::from(HEIGHT) * u64::from(WIDTH));
    render_buffer
        .par_iter_mut()
        .enumerate()
        .progress_with(bar)
        .for_each(|(idx, px)| {
            let y = u32::try_from(idx / WIDTH as usize).unwrap_or(u32::MAX);
            let x = u32::try_from(idx % WIDTH as usize).unwrap_or(u32::MAX);

            let mut rng = rand::thread_rng();
            let ray = camera.ray(x, y);
            *px = process_sample(render::ambient_occlusion(
                &bvh, &ray, AO_SAMPLES, radius, &mut rng,
            ));
        });

    info!(elapsed_s = begin_time.elapsed().as_secs_f32(), "rendered");

    // Write results to a PNG
    let mut encoder = png::Encoder::new(std::fs::File::create(OUTPUT)?, WIDTH, HEIGHT);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Sixteen);
    encoder.set_source_gamma(png::ScaledFloat::new(1.0 / 1.8));
    encoder.set_srgb(png::SrgbRenderingIntent::Perceptual);
    let mut writer = encoder.write_header()?;
    let mut stream = writer.stream_writer()?;

    for px in bytemuck::must_cast_slice::<_, u16>(&render_buffer) {
        stream.write_all(&px.to_be_bytes())?;
    }

    stream.finish()?;
    writer.finish()?;

    info!(path = OUTPUT, "wrote image");
    Ok(())
}
