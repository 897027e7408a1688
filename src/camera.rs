use assert2::assert;
use bon::bon;
use nalgebra::Unit;
use rand_distr::Distribution as _;

use crate::geometry::{EPSILON, FloatType, Ray, ScreenPoint, ScreenSize, WorldPoint, WorldVector};

/// Thin lens perspective camera.
///
/// Rays start on the lens disc and aim at the focus plane, so points at the
/// focus distance are sharp and everything else blurs with the aperture.
/// An aperture of zero degenerates to a pinhole camera.
#[derive(Copy, Clone, Debug)]
pub struct Camera {
    center: WorldPoint,
    resolution: ScreenSize,

    /// Offset from the camera center to the middle of the top left pixel,
    /// projected onto the focus plane
    film_origin: WorldVector,
    /// World space step per pixel along the image x axis, on the focus plane
    pixel_right: WorldVector,
    pixel_down: WorldVector,

    lens_right: WorldVector,
    lens_up: WorldVector,
}

#[bon]
impl Camera {
    #[builder]
    pub fn new(
        center: WorldPoint,
        look_at: WorldPoint,
        up: WorldVector,
        resolution: ScreenSize,
        #[builder(default = 60.0)] vertical_fov_degrees: FloatType,
        #[builder(default = 0.0)] aperture: FloatType,
        /// Defaults to the distance between `center` and `look_at`
        focus_distance: Option<FloatType>,
    ) -> Self {
        let forward =
            Unit::try_new(look_at - center, EPSILON).expect("look_at must differ from center");
        let right = Unit::try_new(forward.cross(&up), EPSILON)
            .expect("`up` and the view direction must be linearly independent");
        let up = Unit::new_normalize(right.cross(&forward));

        assert!(resolution.x > 0);
        assert!(resolution.y > 0);
        assert!(vertical_fov_degrees > 0.0);
        assert!(vertical_fov_degrees < 180.0);
        assert!(aperture >= 0.0);

        let focus_distance = focus_distance.unwrap_or_else(|| (look_at - center).norm());
        assert!(focus_distance > 0.0);

        let half_height = focus_distance * (vertical_fov_degrees.to_radians() / 2.0).tan();
        let half_width = half_height * resolution.x as FloatType / resolution.y as FloatType;
        let pixel_pitch = 2.0 * half_height / resolution.y as FloatType;

        let pixel_right = right.into_inner() * pixel_pitch;
        let pixel_down = -up.into_inner() * pixel_pitch;
        let film_origin = forward.into_inner() * focus_distance
            - right.into_inner() * half_width
            + up.into_inner() * half_height
            + (pixel_right + pixel_down) / 2.0;

        let lens_radius = aperture / 2.0;

        Camera {
            center,
            resolution,
            film_origin,
            pixel_right,
            pixel_down,
            lens_right: right.into_inner() * lens_radius,
            lens_up: up.into_inner() * lens_radius,
        }
    }
}

impl Camera {
    pub fn resolution(&self) -> ScreenSize {
        self.resolution
    }

    /// Samples a new ray from the camera for the given image pixel.
    /// Jitters within the pixel square and over the lens disc.
    pub fn sample_ray(&self, point: &ScreenPoint, rng: &mut impl rand::Rng) -> Ray {
        let film_u = point.x as FloatType + rng.random_range(-0.5..=0.5);
        let film_v = point.y as FloatType + rng.random_range(-0.5..=0.5);
        let target = self.film_origin + self.pixel_right * film_u + self.pixel_down * film_v;

        let lens_uv: [FloatType; 2] = rand_distr::UnitDisc.sample(rng);
        let lens_offset = self.lens_right * lens_uv[0] + self.lens_up * lens_uv[1];

        Ray::new(self.center + lens_offset, target - lens_offset)
    }
}
