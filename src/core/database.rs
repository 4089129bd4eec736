use crate::core::manifest::{write_manifest, FaceRecord};
use crate::core::sharpness::blur_score;
use crate::encoder::{EncodeError, FaceEncoder};
use crate::error::{PipelineError, Result};
use image::ImageFormat;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Drop images whose blur score is below `blur_threshold`.
    pub remove_blurry: bool,
    pub blur_threshold: f64,
    /// Print per-image progress.
    pub verbose: bool,
    /// Where the database directory is created.
    pub output_root: PathBuf,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            remove_blurry: false,
            blur_threshold: 100.0,
            verbose: true,
            output_root: PathBuf::from("."),
        }
    }
}

/// Result of a builder run.
#[derive(Debug, Clone)]
pub struct FaceDatabase {
    pub dir: PathBuf,
    pub records: usize,
}

/// Scan `input_dir`, embed every usable face image, and store the accepted
/// images together with their manifest in a freshly named directory.
///
/// Fails before creating anything when the input directory is missing or has
/// no files. Images that cannot be decoded, are too blurry, or have no
/// detectable face are skipped.
pub fn build_face_database<E: FaceEncoder + ?Sized>(
    input_dir: &Path,
    options: &BuildOptions,
    encoder: &E,
) -> Result<FaceDatabase> {
    let files = list_input_files(input_dir)?;
    if files.is_empty() {
        return Err(PipelineError::not_found(input_dir, "no files found in directory"));
    }

    let db_dir = options.output_root.join(unique_dir_name());
    fs::create_dir_all(&db_dir)?;
    info!(
        "Building face database {} from {} file(s)",
        db_dir.display(),
        files.len()
    );

    let total = files.len();
    let progress = if options.verbose {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40.green} {pos}/{len} {msg}") {
            bar.set_style(style);
        }
        bar
    } else {
        ProgressBar::hidden()
    };
    let report = |msg: String| {
        debug!("{}", msg);
        if options.verbose {
            progress.println(msg);
        }
    };

    let mut records = Vec::new();
    for (i, path) in files.iter().enumerate() {
        let position = format!("{} / {}", i + 1, total);
        progress.set_message(file_label(path));
        progress.inc(1);

        let image = match image::open(path) {
            Ok(image) => image,
            Err(e) => {
                warn!("Failed to decode {}: {}", path.display(), e);
                report(format!("{} -- skipped, not a readable image", position));
                continue;
            }
        };

        if options.remove_blurry {
            let blurriness = blur_score(&image);
            if blurriness < options.blur_threshold {
                report(format!(
                    "{} -- skipped due to blurriness {}",
                    position, blurriness
                ));
                continue;
            }
        }

        let embedding = match encoder.encode(&image) {
            Ok(embedding) => embedding,
            Err(EncodeError::NoFace) => {
                report(format!("{} -- skipped due to face not found", position));
                continue;
            }
            Err(e) => {
                warn!("Face encoding failed for {}: {}", path.display(), e);
                report(format!("{} -- skipped due to {}", position, e));
                continue;
            }
        };

        let stored_name = PathBuf::from(format!("img_{}.jpg", records.len() + 1));
        image
            .to_rgb8()
            .save_with_format(db_dir.join(&stored_name), ImageFormat::Jpeg)?;
        records.push(FaceRecord {
            path: stored_name,
            embedding,
        });
        report(format!("{} -- used for database", position));
    }
    progress.finish_and_clear();

    write_manifest(&db_dir, &records)?;
    info!(
        "Face database {} holds {} record(s)",
        db_dir.display(),
        records.len()
    );

    Ok(FaceDatabase {
        dir: db_dir,
        records: records.len(),
    })
}

/// Regular files directly inside `dir`, sorted by file name.
fn list_input_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PipelineError::not_found(dir, "directory not found"));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn unique_dir_name() -> String {
    Uuid::new_v4().to_string().replace('-', "_")
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::manifest::read_manifest;
    use crate::core::sharpness::blur_score_from_path;
    use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb};
    use tempfile::TempDir;

    /// Width that the test encoder reports as "no face".
    pub const NO_FACE_WIDTH: u32 = 50;
    /// Width that makes the test encoder fail as if the model broke.
    pub const MODEL_ERROR_WIDTH: u32 = 70;

    /// Identity comes from the image width so it survives JPEG re-encoding.
    pub struct WidthEncoder;

    impl FaceEncoder for WidthEncoder {
        fn encode(&self, image: &DynamicImage) -> std::result::Result<Vec<f32>, EncodeError> {
            match image.width() {
                NO_FACE_WIDTH => Err(EncodeError::NoFace),
                MODEL_ERROR_WIDTH => Err(EncodeError::Model("inference failed".to_string())),
                w => Ok(vec![w as f32, 0.0, 0.0, 0.0]),
            }
        }
    }

    /// Sharp checkerboard of the given size.
    pub fn create_sharp_image(path: &Path, width: u32, height: u32) {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let v: u8 = if (x / 2 + y / 2) % 2 == 0 { 255 } else { 0 };
            Rgb([v, v, v])
        });
        img.save(path).unwrap();
    }

    /// Uniform gray image, blur score zero.
    pub fn create_flat_image(path: &Path, width: u32, height: u32) {
        let img = ImageBuffer::from_pixel(width, height, Rgb([128u8, 128, 128]));
        img.save(path).unwrap();
    }

    fn quiet_options(output_root: &Path) -> BuildOptions {
        BuildOptions {
            verbose: false,
            output_root: output_root.to_path_buf(),
            ..BuildOptions::default()
        }
    }

    #[test]
    fn test_default_options() {
        let options = BuildOptions::default();
        assert!(!options.remove_blurry);
        assert_eq!(options.blur_threshold, 100.0);
        assert!(options.verbose);
    }

    #[test]
    fn test_builds_records_for_faces_only() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        create_sharp_image(&input.path().join("a.jpg"), 40, 40);
        create_sharp_image(&input.path().join("b.png"), 40, 30);
        create_sharp_image(&input.path().join("c.jpg"), NO_FACE_WIDTH, 40);
        create_sharp_image(&input.path().join("d.jpg"), 60, 40);

        let db = build_face_database(input.path(), &quiet_options(output.path()), &WidthEncoder)
            .unwrap();
        assert_eq!(db.records, 3);
        assert!(db.dir.starts_with(output.path()));

        let records = read_manifest(&db.dir).unwrap();
        assert_eq!(records.len(), 3);
        for (n, record) in records.iter().enumerate() {
            assert_eq!(record.path, PathBuf::from(format!("img_{}.jpg", n + 1)));
            assert!(record.resolve(&db.dir).is_file());
        }
        // Sorted listing order: a, b, d
        assert_eq!(records[0].embedding[0], 40.0);
        assert_eq!(records[1].embedding[0], 40.0);
        assert_eq!(records[2].embedding[0], 60.0);

        let stored = image::open(records[1].resolve(&db.dir)).unwrap();
        assert_eq!(stored.dimensions(), (40, 30));

        let images = fs::read_dir(&db.dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "jpg"))
            .count();
        assert_eq!(images, 3);
    }

    #[test]
    fn test_directory_name_is_unique_and_safe() {
        let a = unique_dir_name();
        let b = unique_dir_name();
        assert_ne!(a, b);
        assert!(!a.contains('-'));
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn test_missing_input_creates_nothing() {
        let output = TempDir::new().unwrap();
        let result = build_face_database(
            &output.path().join("does_not_exist"),
            &quiet_options(output.path()),
            &WidthEncoder,
        );
        assert!(matches!(result, Err(PipelineError::NotFound { .. })));
        assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_input_creates_nothing() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        fs::create_dir(input.path().join("nested")).unwrap();

        let result =
            build_face_database(input.path(), &quiet_options(output.path()), &WidthEncoder);
        assert!(matches!(result, Err(PipelineError::NotFound { .. })));
        assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_blurry_filters_below_threshold() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        create_sharp_image(&input.path().join("1.png"), 40, 40);
        create_flat_image(&input.path().join("2.png"), 40, 40);
        create_sharp_image(&input.path().join("3.png"), 40, 40);

        let options = BuildOptions {
            remove_blurry: true,
            blur_threshold: 100.0,
            ..quiet_options(output.path())
        };
        let db = build_face_database(input.path(), &options, &WidthEncoder).unwrap();
        assert_eq!(db.records, 2);

        for source in ["1.png", "3.png"] {
            let score = blur_score_from_path(input.path().join(source)).unwrap();
            assert!(score >= options.blur_threshold);
        }

        // Without the filter the flat image is accepted too
        let db = build_face_database(input.path(), &quiet_options(output.path()), &WidthEncoder)
            .unwrap();
        assert_eq!(db.records, 3);
    }

    #[test]
    fn test_unreadable_and_failing_files_are_skipped() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        fs::write(input.path().join("notes.txt"), b"not an image").unwrap();
        create_sharp_image(&input.path().join("face.jpg"), 40, 40);

        let db = build_face_database(input.path(), &quiet_options(output.path()), &WidthEncoder)
            .unwrap();
        assert_eq!(db.records, 1);
        assert!(db.dir.join("img_1.jpg").is_file());
        assert!(!db.dir.join("img_2.jpg").exists());
    }

    #[test]
    fn test_model_failure_is_skipped_and_numbering_stays_dense() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        create_sharp_image(&input.path().join("a.jpg"), 40, 40);
        create_sharp_image(&input.path().join("b.jpg"), MODEL_ERROR_WIDTH, 40);
        create_sharp_image(&input.path().join("c.jpg"), 60, 40);

        let db = build_face_database(input.path(), &quiet_options(output.path()), &WidthEncoder)
            .unwrap();
        assert_eq!(db.records, 2);

        let records = read_manifest(&db.dir).unwrap();
        let names: Vec<_> = records.iter().map(|r| r.path.clone()).collect();
        assert_eq!(
            names,
            vec![PathBuf::from("img_1.jpg"), PathBuf::from("img_2.jpg")]
        );
        assert_eq!(records[0].embedding[0], 40.0);
        assert_eq!(records[1].embedding[0], 60.0);
        assert!(db.dir.join("img_2.jpg").is_file());
        assert!(!db.dir.join("img_3.jpg").exists());
    }

    #[test]
    fn test_all_skipped_still_writes_manifest() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        create_sharp_image(&input.path().join("x.jpg"), NO_FACE_WIDTH, 20);

        let db = build_face_database(input.path(), &quiet_options(output.path()), &WidthEncoder)
            .unwrap();
        assert_eq!(db.records, 0);
        assert!(read_manifest(&db.dir).unwrap().is_empty());
    }
}
