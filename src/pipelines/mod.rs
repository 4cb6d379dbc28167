pub mod apriltag;
pub mod image;
pub mod text_cube;

pub use apriltag::AprilTagPipeline;
pub use image::ImagePipeline;
pub use text_cube::TextCubePipeline;

use crate::pipeline_catalog;

// Register built-in kinds here - plugin manifests refer to them by `kind`
pipeline_catalog! {
    apriltag => AprilTagPipeline,
    image => ImagePipeline,
    text_cube => TextCubePipeline,
}
