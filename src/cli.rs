use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use nalgebra::Unit;

use kdray::{
    Camera, RenderSettings, Scene,
    geometry::{ScreenSize, WorldPoint, WorldTransform, WorldVector},
    render,
    scene::{GeometryIdx, kd_tree::BuildConfig, mesh::TriangleMesh, source::Instance},
};

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let obj_path: Option<PathBuf> = args.next().map(Into::into);
    let output: PathBuf = args
        .next()
        .map(Into::into)
        .unwrap_or_else(|| "render.png".into());

    let (meshes, instances) = match obj_path {
        Some(path) => (
            vec![TriangleMesh::with_obj(path)?],
            vec![Instance::new(
                GeometryIdx::from_usize(0),
                WorldTransform::identity(),
            )],
        ),
        None => demo_scene(),
    };

    let config = BuildConfig::builder().split_clipping(true).build();
    let scene = match std::env::var_os("KDRAY_CACHE_DIR") {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            Scene::build_cached(meshes, instances, &config, Path::new(&dir))?
        }
        None => Scene::build(meshes, instances, &config),
    };
    scene.print_statistics();

    let camera = Camera::builder()
        .center(WorldPoint::new(3.0, -6.0, 2.5))
        .look_at(WorldPoint::new(0.0, 0.0, 0.0))
        .up(WorldVector::new(0.0, 0.0, 1.0))
        .resolution(ScreenSize::new(1024, 768))
        .vertical_fov_degrees(40.0)
        .build();
    let settings = RenderSettings {
        tile_size: 64.try_into().unwrap(),
        sample_count: 16.try_into().unwrap(),
        light_direction: Unit::new_normalize(WorldVector::new(-0.4, -0.3, 1.0)),
    };

    let bar = ProgressBar::no_length();
    let mut render_progress = render(scene, camera, settings, |_| {}, {
        let bar = bar.clone();
        move |_| bar.inc(1)
    })?;
    bar.set_length(render_progress.progress().1 as u64);

    render_progress.wait();
    bar.finish();

    let image = render_progress.image().lock().expect("Poisoned lock!");
    image.save(&output)?;
    println!("Saved {}", output.display());

    Ok(())
}

/// A sphere hovering over a flat slab, so that both instancing and shadows
/// show up in the output.
fn demo_scene() -> (Vec<TriangleMesh>, Vec<Instance>) {
    let meshes = vec![
        TriangleMesh::tessellated_sphere(1.0, 64, 32),
        TriangleMesh::cube(0.5),
    ];

    let floor = nalgebra::Translation3::new(0.0, 0.0, -1.6).to_homogeneous()
        * nalgebra::Matrix4::new_nonuniform_scaling(&WorldVector::new(20.0, 20.0, 0.2));
    let instances = vec![
        Instance::new(GeometryIdx::from_usize(0), WorldTransform::identity()),
        Instance::new(
            GeometryIdx::from_usize(1),
            WorldTransform::from_matrix_unchecked(floor),
        ),
    ];

    (meshes, instances)
}
