pub mod core;
pub mod encoder;
pub mod error;

pub use crate::core::best::{export_best_images, select_best_images, BestImage, ClusterPick};
pub use crate::core::cluster::{cluster_faces, ClusterOptions, ClusterSummary};
pub use crate::core::database::{build_face_database, BuildOptions, FaceDatabase};
pub use crate::core::dbscan::{Dbscan, Label};
pub use crate::core::manifest::{read_manifest, write_manifest, FaceRecord, MANIFEST_FILE};
pub use crate::core::sharpness::{blur_score, blur_score_from_path};
pub use crate::encoder::{EncodeError, FaceEncoder};
pub use crate::error::{PipelineError, Result};
