//! Kannala-Brandt fisheye model adapter.
//!
//! Wraps the pure projection core from [`crate::fisheye`] in the
//! [`CameraModel`] trait: intrinsics plus the four radial coefficients, YAML
//! calibration I/O in the `cam0` format, and batch helpers over point
//! matrices. All mathematics happens in the core; this type only carries the
//! calibration constants and converts validity flags into errors.

use log::debug;
use nalgebra::{DVector, Matrix2xX, Matrix3xX, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use yaml_rust::YamlLoader;

use crate::camera::{validation, CameraModel, CameraModelError, Intrinsics, Resolution};
use crate::fisheye;

/// Equidistant fisheye camera with Kannala-Brandt radial distortion.
///
/// # Examples
///
/// ```rust
/// use nalgebra::{DVector, Vector3};
/// use fisheye_camera::camera::kannala_brandt::KannalaBrandtModel;
/// use fisheye_camera::camera::CameraModel;
///
/// // fx, fy, cx, cy, k1, k2, k3, k4
/// let params = DVector::from_vec(vec![280.0, 280.0, 320.0, 240.0, -0.01, 0.02, -0.01, 0.002]);
/// let model = KannalaBrandtModel::new(&params).unwrap();
///
/// let pixel = model.project(&Vector3::new(0.0, 0.0, 1.0)).unwrap();
/// assert_eq!(pixel.x, 320.0);
/// assert_eq!(pixel.y, 240.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KannalaBrandtModel {
    pub intrinsics: Intrinsics,
    pub resolution: Resolution,
    /// Radial distortion coefficients in calibration order (k1, k2, k3, k4).
    pub coefficients: [f64; 4],
}

impl KannalaBrandtModel {
    /// Creates a model from the parameter vector
    /// `[fx, fy, cx, cy, k1, k2, k3, k4]`.
    ///
    /// The resolution is initialized to 0x0 and should be set manually or by
    /// loading from YAML.
    pub fn new(parameters: &DVector<f64>) -> Result<Self, CameraModelError> {
        if parameters.len() != 8 {
            return Err(CameraModelError::InvalidParams(format!(
                "Kannala-Brandt model requires 8 parameters, got {}",
                parameters.len()
            )));
        }
        let model = KannalaBrandtModel {
            intrinsics: Intrinsics {
                fx: parameters[0],
                fy: parameters[1],
                cx: parameters[2],
                cy: parameters[3],
            },
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            coefficients: [parameters[4], parameters[5], parameters[6], parameters[7]],
        };

        model.validate_params()?;

        Ok(model)
    }

    /// Largest incidence angle for which this calibration is invertible.
    ///
    /// Recomputed per call; the projection core keeps no state between
    /// invocations.
    pub fn max_theta(&self) -> f64 {
        fisheye::monotonic_max_theta(&self.coefficients, fisheye::MONOTONIC_GUESS)
    }

    /// Projects a batch of camera-frame points, one column per point.
    ///
    /// Returns `None` for points whose incidence angle falls outside the
    /// invertible region. The monotonic bound is computed once for the whole
    /// batch.
    pub fn project_points(&self, points_3d: &Matrix3xX<f64>) -> Vec<Option<Vector2<f64>>> {
        let focal_length = self.intrinsics.focal_length();
        let principal_point = self.intrinsics.principal_point();
        let max_theta = self.max_theta();

        let mut rejected = 0usize;
        let projected = points_3d
            .column_iter()
            .map(|column| {
                let point = column.into_owned();
                let (pixel, valid) = fisheye::project_distorted(
                    &point,
                    &focal_length,
                    &principal_point,
                    &self.coefficients,
                    fisheye::MIN_2D_NORM,
                    max_theta,
                );
                if valid {
                    Some(pixel)
                } else {
                    rejected += 1;
                    None
                }
            })
            .collect();
        if rejected > 0 {
            debug!(
                "project_points: rejected {rejected} of {} points beyond max_theta {max_theta}",
                points_3d.ncols()
            );
        }
        projected
    }

    /// Unprojects a batch of pixels, one column per pixel.
    ///
    /// Returns `None` where the distortion inverse does not converge.
    pub fn unproject_points(&self, points_2d: &Matrix2xX<f64>) -> Vec<Option<Vector3<f64>>> {
        let focal_length = self.intrinsics.focal_length();
        let principal_point = self.intrinsics.principal_point();
        let max_theta = self.max_theta();

        let mut rejected = 0usize;
        let directions = points_2d
            .column_iter()
            .map(|column| {
                let pixel = column.into_owned();
                let (direction, valid) = fisheye::unproject_distorted(
                    &pixel,
                    &focal_length,
                    &principal_point,
                    &self.coefficients,
                    fisheye::MIN_2D_NORM,
                    max_theta,
                );
                if valid {
                    Some(direction)
                } else {
                    rejected += 1;
                    None
                }
            })
            .collect();
        if rejected > 0 {
            debug!(
                "unproject_points: {rejected} of {} pixels failed to undistort",
                points_2d.ncols()
            );
        }
        directions
    }
}

impl CameraModel for KannalaBrandtModel {
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }

        let (pixel, valid) = fisheye::project_distorted(
            point_3d,
            &self.intrinsics.focal_length(),
            &self.intrinsics.principal_point(),
            &self.coefficients,
            fisheye::MIN_2D_NORM,
            self.max_theta(),
        );
        if !valid {
            return Err(CameraModelError::ProjectionOutSideImage);
        }
        Ok(pixel)
    }

    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        if point_2d.x < 0.0
            || point_2d.x >= self.resolution.width as f64
            || point_2d.y < 0.0
            || point_2d.y >= self.resolution.height as f64
        {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let (direction, valid) = fisheye::unproject_distorted(
            point_2d,
            &self.intrinsics.focal_length(),
            &self.intrinsics.principal_point(),
            &self.coefficients,
            fisheye::MIN_2D_NORM,
            self.max_theta(),
        );
        if !valid {
            return Err(CameraModelError::NumericalError(
                "undistortion did not converge".to_string(),
            ));
        }
        Ok(direction.normalize())
    }

    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;

        if docs.is_empty() {
            return Err(CameraModelError::InvalidParams(
                "Empty YAML document".to_string(),
            ));
        }

        let doc = &docs[0];

        let intrinsics = doc["cam0"]["intrinsics"]
            .as_vec()
            .ok_or_else(|| CameraModelError::InvalidParams("Invalid intrinsics".to_string()))?;
        let distortion = doc["cam0"]["distortion_coeffs"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams("Invalid distortion_coeffs".to_string())
        })?;
        let resolution = doc["cam0"]["resolution"]
            .as_vec()
            .ok_or_else(|| CameraModelError::InvalidParams("Invalid resolution".to_string()))?;

        if distortion.len() != 4 {
            return Err(CameraModelError::InvalidParams(
                "Kannala-Brandt model requires 4 distortion coefficients".to_string(),
            ));
        }

        let intrinsics = Intrinsics {
            fx: intrinsics[0]
                .as_f64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid fx".to_string()))?,
            fy: intrinsics[1]
                .as_f64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid fy".to_string()))?,
            cx: intrinsics[2]
                .as_f64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid cx".to_string()))?,
            cy: intrinsics[3]
                .as_f64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid cy".to_string()))?,
        };

        let mut coefficients = [0.0; 4];
        for (slot, value) in coefficients.iter_mut().zip(distortion.iter()) {
            *slot = value.as_f64().ok_or_else(|| {
                CameraModelError::InvalidParams("Invalid distortion coefficient".to_string())
            })?;
        }

        let resolution = Resolution {
            width: resolution[0]
                .as_i64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid width".to_string()))?
                as u32,
            height: resolution[1]
                .as_i64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid height".to_string()))?
                as u32,
        };

        let model = KannalaBrandtModel {
            intrinsics,
            resolution,
            coefficients,
        };

        model.validate_params()?;

        Ok(model)
    }

    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let yaml = serde_yaml::to_value(serde_yaml::Mapping::from_iter([(
            serde_yaml::Value::String("cam0".to_string()),
            serde_yaml::to_value(serde_yaml::Mapping::from_iter([
                (
                    serde_yaml::Value::String("camera_model".to_string()),
                    serde_yaml::Value::String("kannala_brandt".to_string()),
                ),
                (
                    serde_yaml::Value::String("intrinsics".to_string()),
                    serde_yaml::to_value(vec![
                        self.intrinsics.fx,
                        self.intrinsics.fy,
                        self.intrinsics.cx,
                        self.intrinsics.cy,
                    ])
                    .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
                ),
                (
                    serde_yaml::Value::String("distortion_coeffs".to_string()),
                    serde_yaml::to_value(self.coefficients.to_vec())
                        .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
                ),
                (
                    serde_yaml::Value::String("rostopic".to_string()),
                    serde_yaml::Value::String("/cam0/image_raw".to_string()),
                ),
                (
                    serde_yaml::Value::String("resolution".to_string()),
                    serde_yaml::to_value(vec![self.resolution.width, self.resolution.height])
                        .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
                ),
            ]))
            .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
        )]))
        .map_err(|e| CameraModelError::YamlError(e.to_string()))?;

        let yaml_string =
            serde_yaml::to_string(&yaml).map_err(|e| CameraModelError::YamlError(e.to_string()))?;

        let mut file =
            fs::File::create(path).map_err(|e| CameraModelError::IOError(e.to_string()))?;

        file.write_all(yaml_string.as_bytes())
            .map_err(|e| CameraModelError::IOError(e.to_string()))?;

        Ok(())
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;

        if self.coefficients.iter().any(|k| !k.is_finite()) {
            return Err(CameraModelError::InvalidParams(
                "Distortion coefficients must be finite".to_string(),
            ));
        }

        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics.clone()
    }

    fn get_distortion(&self) -> Vec<f64> {
        self.coefficients.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry;
    use approx::assert_relative_eq;

    fn test_model() -> KannalaBrandtModel {
        KannalaBrandtModel {
            intrinsics: Intrinsics {
                fx: 278.66723066149086,
                fy: 278.48991409740296,
                cx: 319.75221200593535,
                cy: 241.96858910358173,
            },
            resolution: Resolution {
                width: 640,
                height: 480,
            },
            coefficients: [
                -0.013721808247486035,
                0.020727425669427896,
                -0.012786476702685545,
                0.0025242267320687625,
            ],
        }
    }

    #[test]
    fn test_new_rejects_wrong_parameter_count() {
        let params = DVector::from_vec(vec![280.0, 280.0, 320.0, 240.0]);
        assert!(matches!(
            KannalaBrandtModel::new(&params),
            Err(CameraModelError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_new_rejects_non_positive_focal_length() {
        let params = DVector::from_vec(vec![0.0, 280.0, 320.0, 240.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(matches!(
            KannalaBrandtModel::new(&params),
            Err(CameraModelError::FocalLengthMustBePositive)
        ));
    }

    #[test]
    fn test_kannala_brandt_load_from_yaml() {
        let model = KannalaBrandtModel::load_from_yaml("samples/kannala_brandt.yaml").unwrap();

        assert_eq!(model.intrinsics.fx, 278.66723066149086);
        assert_eq!(model.intrinsics.fy, 278.48991409740296);
        assert_eq!(model.intrinsics.cx, 319.75221200593535);
        assert_eq!(model.intrinsics.cy, 241.96858910358173);
        assert_eq!(model.coefficients[0], -0.013721808247486035);
        assert_eq!(model.coefficients[3], 0.0025242267320687625);
        assert_eq!(model.resolution.width, 640);
        assert_eq!(model.resolution.height, 480);
    }

    #[test]
    fn test_kannala_brandt_save_to_yaml() {
        fs::create_dir_all("output").unwrap();

        let model = test_model();
        let output_path = "output/kannala_brandt_saved.yaml";
        model.save_to_yaml(output_path).unwrap();

        let saved_model = KannalaBrandtModel::load_from_yaml(output_path).unwrap();

        assert_eq!(model.intrinsics.fx, saved_model.intrinsics.fx);
        assert_eq!(model.intrinsics.fy, saved_model.intrinsics.fy);
        assert_eq!(model.intrinsics.cx, saved_model.intrinsics.cx);
        assert_eq!(model.intrinsics.cy, saved_model.intrinsics.cy);
        assert_eq!(model.coefficients, saved_model.coefficients);
        assert_eq!(model.resolution.width, saved_model.resolution.width);
        assert_eq!(model.resolution.height, saved_model.resolution.height);
    }

    #[test]
    fn test_project_unproject_round_trip() {
        let model = test_model();

        let point_3d = Vector3::new(0.5, -0.3, 2.0);
        let norm_3d = point_3d.normalize();

        let point_2d = model.project(&point_3d).unwrap();
        assert!(point_2d.x >= 0.0 && point_2d.x < model.resolution.width as f64);
        assert!(point_2d.y >= 0.0 && point_2d.y < model.resolution.height as f64);

        let unprojected = model.unproject(&point_2d).unwrap();
        assert_relative_eq!(norm_3d.x, unprojected.x, epsilon = 1e-5);
        assert_relative_eq!(norm_3d.y, unprojected.y, epsilon = 1e-5);
        assert_relative_eq!(norm_3d.z, unprojected.z, epsilon = 1e-5);
    }

    #[test]
    fn test_project_on_axis_hits_principal_point() {
        let model = test_model();
        let pixel = model.project(&Vector3::new(0.0, 0.0, 3.0)).unwrap();
        assert_relative_eq!(pixel.x, model.intrinsics.cx);
        assert_relative_eq!(pixel.y, model.intrinsics.cy);
    }

    #[test]
    fn test_project_rejects_point_at_camera_center() {
        let model = test_model();
        assert!(matches!(
            model.project(&Vector3::new(0.1, 0.1, 0.0)),
            Err(CameraModelError::PointAtCameraCenter)
        ));
    }

    #[test]
    fn test_unproject_rejects_pixel_outside_image() {
        let model = test_model();
        assert!(matches!(
            model.unproject(&Vector2::new(-1.0, 10.0)),
            Err(CameraModelError::PointIsOutSideImage)
        ));
        assert!(matches!(
            model.unproject(&Vector2::new(10.0, 1e4)),
            Err(CameraModelError::PointIsOutSideImage)
        ));
    }

    #[test]
    fn test_image_grid_round_trip() {
        let model = test_model();
        let pixels = geometry::sample_points(
            model.resolution.width as f64,
            model.resolution.height as f64,
            60,
        );

        for pixel in &pixels {
            let ray = model.unproject(pixel).unwrap();
            // Rays from pixels inside the image must point forward
            assert!(ray.z > 0.0);
            let reprojected = model.project(&ray).unwrap();
            assert_relative_eq!(reprojected.x, pixel.x, epsilon = 1e-3);
            assert_relative_eq!(reprojected.y, pixel.y, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_batch_matches_scalar_path() {
        let model = test_model();
        let points = [
            Vector3::new(0.3, -0.2, 1.5),
            Vector3::new(-0.6, 0.4, 2.0),
            Vector3::new(0.0, 0.0, 1.0),
        ];
        let batch = Matrix3xX::from_columns(&points);

        let projected = model.project_points(&batch);
        assert_eq!(projected.len(), points.len());
        for (point, pixel) in points.iter().zip(&projected) {
            let pixel = pixel.expect("projection should be valid");
            let scalar = model.project(point).unwrap();
            assert_relative_eq!(pixel.x, scalar.x);
            assert_relative_eq!(pixel.y, scalar.y);
        }

        let pixels: Vec<Vector2<f64>> = projected.into_iter().flatten().collect();
        let pixel_batch = Matrix2xX::from_columns(&pixels);
        let directions = model.unproject_points(&pixel_batch);
        for (point, direction) in points.iter().zip(&directions) {
            let direction = direction.expect("unprojection should be valid");
            let expected = point.normalize();
            assert_relative_eq!(direction.x, expected.x, epsilon = 1e-5);
            assert_relative_eq!(direction.y, expected.y, epsilon = 1e-5);
            assert_relative_eq!(direction.z, expected.z, epsilon = 1e-5);
        }
    }
}
