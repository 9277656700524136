pub mod color_segmenter;
pub mod contrast;
pub mod frame_extractor;
pub mod manual;
pub mod measurement;
pub mod overlay;
pub mod pixel;
pub mod region;
pub mod region_extractor;
pub mod spatial_grouper;

pub mod utils {
    pub mod image_helper;
}
