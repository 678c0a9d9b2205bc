//! Canonical 3D reference face used by the pose solver.
//!
//! The built-in model is the 68-point mean face in millimetres with the camera
//! convention x right, y down, z away from the camera. A frontal face at the
//! identity rotation therefore has its nose tip at the smallest z.

use crate::{
    constants::{MODEL_POINTS_TOTAL_VALUES, NUM_FACIAL_LANDMARKS},
    Error, Result,
};
use opencv::core::Point3f;
use std::fs;
use std::path::Path;

/// Built-in 68-point mean face, `[x, y, z]` per landmark
#[rustfmt::skip]
const MEAN_FACE_68: [[f32; 3]; NUM_FACIAL_LANDMARKS] = [
    [-73.393523, -29.801432, 47.667532],
    [-72.775014, -10.949766, 45.909403],
    [-70.533638, 7.929818, 44.842580],
    [-66.850058, 26.074280, 43.141114],
    [-59.790187, 42.564390, 38.635298],
    [-48.368973, 56.481080, 30.750622],
    [-34.121101, 67.246992, 18.456453],
    [-17.875411, 75.056892, 3.609035],
    [0.098749, 77.061286, -0.881698],
    [17.477031, 74.758448, 5.181201],
    [32.648966, 66.929021, 19.176563],
    [46.372358, 56.311389, 30.770570],
    [57.343480, 42.419126, 37.628629],
    [64.388482, 25.455880, 40.886309],
    [68.212038, 6.990805, 42.281449],
    [70.486405, -11.666193, 44.142567],
    [71.375822, -30.365191, 47.140426],
    [-61.119406, -49.361602, 14.254422],
    [-51.287588, -58.769795, 7.268147],
    [-37.804800, -61.996155, 0.442051],
    [-24.022754, -61.033399, -6.606501],
    [-11.635713, -56.686759, -11.967398],
    [12.056636, -57.391033, -12.051204],
    [25.106256, -61.902186, -7.315098],
    [38.338588, -62.777713, -1.022953],
    [51.191007, -59.302347, 5.349435],
    [60.053851, -50.190255, 11.615746],
    [0.653940, -42.193790, -13.380835],
    [0.804809, -30.993721, -21.150853],
    [0.992204, -19.944596, -29.284036],
    [1.226783, -8.414541, -36.948060],
    [-14.772472, 2.598255, -20.132003],
    [-7.180239, 4.751589, -23.536684],
    [0.555920, 6.562900, -25.944448],
    [8.272499, 4.661005, -23.695741],
    [15.214351, 2.643046, -20.858157],
    [-46.047290, -37.471411, 7.037989],
    [-37.674688, -42.730510, 3.021217],
    [-27.883856, -42.711517, 1.353629],
    [-19.648268, -36.754742, -0.111088],
    [-28.272965, -35.134493, -0.147273],
    [-38.082418, -34.919043, 1.476612],
    [19.265868, -37.032306, -0.665746],
    [27.894191, -43.342445, 0.247660],
    [37.437529, -43.110822, 1.696435],
    [45.170805, -38.086515, 4.894163],
    [38.196454, -35.532024, 0.282961],
    [28.764989, -35.484289, -1.172675],
    [-28.916267, 28.612716, -2.240310],
    [-17.533194, 22.172187, -15.934335],
    [-6.684590, 19.029051, -22.611355],
    [0.381001, 20.721118, -23.748437],
    [8.375443, 19.035460, -22.721995],
    [18.876618, 22.394109, -15.610679],
    [28.794412, 28.079924, -3.217393],
    [19.057574, 36.298248, -14.987997],
    [8.956375, 39.634575, -22.554245],
    [0.381549, 40.395647, -23.591626],
    [-7.428895, 39.836405, -22.406106],
    [-18.160634, 36.677899, -15.121907],
    [-24.377490, 28.677771, -4.785684],
    [-6.897633, 25.475976, -20.893742],
    [0.340663, 26.014269, -22.220479],
    [8.444722, 25.326198, -21.025520],
    [24.474473, 28.323008, -5.712776],
    [8.449166, 30.596216, -20.671489],
    [0.205322, 31.408738, -21.903670],
    [-7.198266, 30.844876, -20.328022],
];

/// Fixed 3D configuration of the landmark indices
#[derive(Debug, Clone)]
pub struct CanonicalFaceModel {
    points: Vec<Point3f>,
}

impl Default for CanonicalFaceModel {
    fn default() -> Self {
        Self {
            points: MEAN_FACE_68.iter().map(|p| Point3f::new(p[0], p[1], p[2])).collect(),
        }
    }
}

impl CanonicalFaceModel {
    /// Load model points from a text file with one value per line.
    ///
    /// The file holds all x values, then all y values, then all z values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not hold exactly
    /// 204 numeric values
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        log::info!("Loading 3D face model from {}", path.as_ref().display());
        let content = fs::read_to_string(path)?;
        Ok(Self {
            points: Self::parse_model_points(&content)?,
        })
    }

    /// Model points in landmark order
    #[must_use]
    pub fn points(&self) -> &[Point3f] {
        &self.points
    }

    /// Number of points in the model
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the model is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Frontal 2D template of the model, normalized to the unit square
    #[must_use]
    pub fn frontal_template(&self) -> Vec<(f32, f32)> {
        let (min_x, max_x) = self
            .points
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), p| (lo.min(p.x), hi.max(p.x)));
        let (min_y, max_y) = self
            .points
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), p| (lo.min(p.y), hi.max(p.y)));
        let w = (max_x - min_x).max(f32::EPSILON);
        let h = (max_y - min_y).max(f32::EPSILON);
        self.points
            .iter()
            .map(|p| ((p.x - min_x) / w, (p.y - min_y) / h))
            .collect()
    }

    fn parse_model_points(content: &str) -> Result<Vec<Point3f>> {
        let values: Vec<f32> = content
            .lines()
            .filter_map(|line| line.trim().parse::<f32>().ok())
            .collect();

        if values.len() != MODEL_POINTS_TOTAL_VALUES {
            return Err(Error::ModelValidationError(format!(
                "Expected {} coordinate values ({} points × 3), got {}",
                MODEL_POINTS_TOTAL_VALUES,
                NUM_FACIAL_LANDMARKS,
                values.len()
            )));
        }

        let n = NUM_FACIAL_LANDMARKS;
        Ok((0..n)
            .map(|i| Point3f::new(values[i], values[n + i], values[2 * n + i]))
            .collect())
    }
}
