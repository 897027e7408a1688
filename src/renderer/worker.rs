use image::RgbaImage;
use rand::{SeedableRng, rngs::SmallRng};

use crate::{
    camera::Camera,
    geometry::{FloatType, Ray, ScreenPoint},
    renderer::RenderSettings,
    scene::Scene,
    screen_block::ScreenBlock,
    util::Rgba,
};

/// Offset of shadow ray origins along the surface normal, to keep them from
/// immediately re-hitting the surface they start on.
const SHADOW_BIAS: FloatType = 1e-4;

pub struct Worker {
    rng: SmallRng,
}

impl Worker {
    pub fn new(_worker_id: usize) -> Self {
        Self {
            rng: SmallRng::from_os_rng(),
        }
    }

    pub fn render_tile(
        &mut self,
        scene: &Scene,
        camera: &Camera,
        settings: &RenderSettings,
        tile: &ScreenBlock,
        buffer: &mut RgbaImage,
    ) {
        for point in tile.internal_points() {
            let mut pixel_sum = Rgba::new(0.0, 0.0, 0.0, 0.0);
            for _i in 0..settings.sample_count.get() {
                pixel_sum += self.render_sample(scene, camera, settings, &point);
            }
            let pixel = pixel_sum * (1.0 / settings.sample_count.get() as f32);

            let buffer_position = point - tile.min;
            buffer.put_pixel(buffer_position.x, buffer_position.y, color_to_image(pixel));
        }
    }

    /// One camera sample: closest hit, then lambert shading with a shadow ray
    /// towards the directional light.
    fn render_sample(
        &mut self,
        scene: &Scene,
        camera: &Camera,
        settings: &RenderSettings,
        point: &ScreenPoint,
    ) -> Rgba {
        const AMBIENT: f32 = 0.1;

        let ray = camera.sample_ray(point, &mut self.rng);

        let hit = scene.intersect(&ray);
        if !hit.is_hit() {
            return Rgba::new(0.0, 0.0, 0.0, 0.0);
        }
        let Some(normal) = scene.hit_normal(&hit) else {
            return Rgba::new(0.0, 0.0, 0.0, 0.0);
        };
        // Two sided shading: flip the normal towards the viewer
        let normal = if normal.dot(&ray.direction) > 0.0 {
            -normal
        } else {
            normal
        };

        let lambert = normal.dot(&settings.light_direction).max(0.0);
        let lit = lambert > 0.0 && {
            let shadow_ray = Ray::new(
                ray.point_at(hit.t) + normal * SHADOW_BIAS,
                settings.light_direction.into_inner(),
            );
            !scene.intersect_any(&shadow_ray, FloatType::INFINITY)
        };

        let value = AMBIENT + if lit { (1.0 - AMBIENT) * lambert } else { 0.0 };
        Rgba::new(value, value, value, 1.0)
    }
}

/// Maps a 0-1 f32 rgba pixel to pixel type compatible with module image.
pub fn color_to_image(color: Rgba) -> image::Rgba<u8> {
    image::Rgba([
        (color.r * 255.0).round().clamp(0.0, 255.0) as u8,
        (color.g * 255.0).round().clamp(0.0, 255.0) as u8,
        (color.b * 255.0).round().clamp(0.0, 255.0) as u8,
        (color.a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}
