//! Where images, keypoints and ground truth come from.
//!
//! Scenes follow the HPatches layout: `<root>/<scene>/1.ppm` is the reference,
//! `2.ppm`..`6.ppm` are targets and `H_1_<i>` holds the row-major 3x3
//! homography mapping the reference onto target `i`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use desceval_core::{Image, Keypoint};
use nalgebra::Matrix3;

use crate::error::{SourceError, SourceResult};

/// Header written at the top of keypoint CSV files
pub const KEYPOINT_CSV_HEADER: &str = "x,y,size,angle,response,octave,class_id";

pub trait ImageSource: Send + Sync {
    /// Scene identifiers in a stable order
    fn scenes(&self) -> SourceResult<Vec<String>>;

    /// Image identifiers of a scene, reference first
    fn images(&self, scene: &str) -> SourceResult<Vec<String>>;

    fn load(&self, scene: &str, image: &str) -> SourceResult<Image>;

    /// Homography mapping the reference image onto `image`, when known
    fn ground_truth(&self, _scene: &str, _image: &str) -> Option<Matrix3<f64>> {
        None
    }
}

pub trait KeypointSource: Send + Sync {
    /// Keypoints of one image. An empty list means "no keypoints", not failure.
    fn lookup(&self, scene: &str, image: &str) -> SourceResult<Vec<Keypoint>>;
}

/// Nine whitespace-separated numbers, row-major
pub fn parse_homography(text: &str) -> Result<Matrix3<f64>, String> {
    let values = text
        .split_whitespace()
        .map(|tok| tok.parse::<f64>().map_err(|e| format!("'{}': {}", tok, e)))
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() != 9 {
        return Err(format!("expected 9 values, found {}", values.len()));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err("non-finite homography entry".to_string());
    }
    Ok(Matrix3::from_row_slice(&values))
}

/// Parse `x,y,size,angle,response,octave,class_id` rows.
///
/// Blank lines, `#` comments and the header row are skipped. Missing trailing
/// columns take the [`Keypoint::new`] defaults. Errors carry the 1-based line.
pub fn parse_keypoints_csv(text: &str) -> Result<Vec<Keypoint>, (usize, String)> {
    let mut keypoints = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line == KEYPOINT_CSV_HEADER {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 3 || fields.len() > 7 {
            return Err((i + 1, format!("expected 3 to 7 fields, found {}", fields.len())));
        }
        let float = |idx: usize| -> Result<f32, (usize, String)> {
            fields[idx]
                .parse::<f32>()
                .map_err(|e| (i + 1, format!("field {} '{}': {}", idx + 1, fields[idx], e)))
        };
        let int = |idx: usize| -> Result<i32, (usize, String)> {
            fields[idx]
                .parse::<i32>()
                .map_err(|e| (i + 1, format!("field {} '{}': {}", idx + 1, fields[idx], e)))
        };

        let mut kp = Keypoint::new(float(0)?, float(1)?, float(2)?);
        if fields.len() > 3 {
            kp.angle = float(3)?;
        }
        if fields.len() > 4 {
            kp.response = float(4)?;
        }
        if fields.len() > 5 {
            kp.octave = int(5)?;
        }
        if fields.len() > 6 {
            kp.class_id = int(6)?;
        }
        keypoints.push(kp);
    }
    Ok(keypoints)
}

pub fn format_keypoints_csv(keypoints: &[Keypoint]) -> String {
    let mut out = String::with_capacity(48 * (keypoints.len() + 1));
    out.push_str(KEYPOINT_CSV_HEADER);
    out.push('\n');
    for kp in keypoints {
        out.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            kp.x, kp.y, kp.size, kp.angle, kp.response, kp.octave, kp.class_id
        ));
    }
    out
}

/// Decode any format the `image` crate reads into 8-bit grayscale
pub fn load_gray(path: &Path) -> SourceResult<Image> {
    let gray = image::open(path)
        .map_err(|e| SourceError::Image {
            path: path.display().to_string(),
            message: e.to_string(),
        })?
        .to_luma8();
    let (w, h) = gray.dimensions();
    Image::new(w as usize, h as usize, gray.into_raw()).map_err(|e| SourceError::Image {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// HPatches-style directory tree
#[derive(Debug, Clone)]
pub struct HPatchesDataset {
    root: PathBuf,
    extension: String,
}

impl HPatchesDataset {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: "ppm".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scene_dir(&self, scene: &str) -> PathBuf {
        self.root.join(scene)
    }

    fn image_path(&self, scene: &str, image: &str) -> PathBuf {
        self.scene_dir(scene).join(format!("{}.{}", image, self.extension))
    }

    fn read_dir(path: &Path) -> SourceResult<std::fs::ReadDir> {
        std::fs::read_dir(path).map_err(|e| SourceError::io(path, e))
    }
}

impl ImageSource for HPatchesDataset {
    fn scenes(&self) -> SourceResult<Vec<String>> {
        let mut scenes: Vec<String> = Self::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|scene| self.image_path(scene, "1").is_file())
            .collect();
        scenes.sort();
        Ok(scenes)
    }

    fn images(&self, scene: &str) -> SourceResult<Vec<String>> {
        let dir = self.scene_dir(scene);
        if !dir.is_dir() {
            return Err(SourceError::UnknownScene(scene.to_string()));
        }
        let mut numbered: Vec<u32> = Self::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str()))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse().ok()))
            .collect();
        numbered.sort_unstable();
        Ok(numbered.into_iter().map(|n| n.to_string()).collect())
    }

    fn load(&self, scene: &str, image: &str) -> SourceResult<Image> {
        load_gray(&self.image_path(scene, image))
    }

    fn ground_truth(&self, scene: &str, image: &str) -> Option<Matrix3<f64>> {
        if image == "1" {
            return Some(Matrix3::identity());
        }
        let path = self.scene_dir(scene).join(format!("H_1_{}", image));
        let text = std::fs::read_to_string(&path).ok()?;
        match parse_homography(&text) {
            Ok(h) => Some(h),
            Err(message) => {
                tracing::warn!(path = %path.display(), %message, "ignoring malformed homography");
                None
            }
        }
    }
}

/// Keypoints stored as `<root>/<scene>/<image>.csv`
#[derive(Debug, Clone)]
pub struct CsvKeypoints {
    root: PathBuf,
}

impl CsvKeypoints {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, scene: &str, image: &str) -> PathBuf {
        self.root.join(scene).join(format!("{}.csv", image))
    }

    pub fn save(&self, scene: &str, image: &str, keypoints: &[Keypoint]) -> SourceResult<PathBuf> {
        let path = self.path(scene, image);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| SourceError::io(dir, e))?;
        }
        std::fs::write(&path, format_keypoints_csv(keypoints)).map_err(|e| SourceError::io(&path, e))?;
        Ok(path)
    }
}

impl KeypointSource for CsvKeypoints {
    /// A missing file means the image has no keypoints
    fn lookup(&self, scene: &str, image: &str) -> SourceResult<Vec<Keypoint>> {
        let path = self.path(scene, image);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SourceError::io(&path, e)),
        };
        parse_keypoints_csv(&text).map_err(|(line, message)| SourceError::Parse {
            path: path.display().to_string(),
            line,
            message,
        })
    }
}

/// Keypoints held in memory, keyed by (scene, image)
#[derive(Debug, Clone, Default)]
pub struct MemoryKeypoints {
    entries: HashMap<(String, String), Vec<Keypoint>>,
}

impl MemoryKeypoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, scene: &str, image: &str, keypoints: Vec<Keypoint>) {
        self.entries.insert((scene.to_string(), image.to_string()), keypoints);
    }
}

impl KeypointSource for MemoryKeypoints {
    fn lookup(&self, scene: &str, image: &str) -> SourceResult<Vec<Keypoint>> {
        Ok(self
            .entries
            .get(&(scene.to_string(), image.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
struct MemoryImage {
    id: String,
    image: Option<Image>,
    ground_truth: Option<Matrix3<f64>>,
}

/// Scenes held in memory. An image pushed as `None` fails to load.
#[derive(Debug, Clone, Default)]
pub struct MemoryImages {
    scenes: BTreeMap<String, Vec<MemoryImage>>,
}

impl MemoryImages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a scene, possibly without images
    pub fn add_scene(&mut self, scene: &str) {
        self.scenes.entry(scene.to_string()).or_default();
    }

    pub fn push(&mut self, scene: &str, image: &str, pixels: Option<Image>, ground_truth: Option<Matrix3<f64>>) {
        self.scenes.entry(scene.to_string()).or_default().push(MemoryImage {
            id: image.to_string(),
            image: pixels,
            ground_truth,
        });
    }

    fn find(&self, scene: &str, image: &str) -> SourceResult<&MemoryImage> {
        self.scenes
            .get(scene)
            .ok_or_else(|| SourceError::UnknownScene(scene.to_string()))?
            .iter()
            .find(|entry| entry.id == image)
            .ok_or_else(|| SourceError::Io {
                path: format!("{}/{}", scene, image),
                message: "no such image".to_string(),
            })
    }
}

impl ImageSource for MemoryImages {
    fn scenes(&self) -> SourceResult<Vec<String>> {
        Ok(self.scenes.keys().cloned().collect())
    }

    fn images(&self, scene: &str) -> SourceResult<Vec<String>> {
        self.scenes
            .get(scene)
            .map(|entries| entries.iter().map(|entry| entry.id.clone()).collect())
            .ok_or_else(|| SourceError::UnknownScene(scene.to_string()))
    }

    fn load(&self, scene: &str, image: &str) -> SourceResult<Image> {
        self.find(scene, image)?.image.clone().ok_or_else(|| SourceError::Image {
            path: format!("{}/{}", scene, image),
            message: "image unavailable".to_string(),
        })
    }

    fn ground_truth(&self, scene: &str, image: &str) -> Option<Matrix3<f64>> {
        self.find(scene, image).ok().and_then(|entry| entry.ground_truth)
    }
}
