//! Reading and writing of images, masks and acquisition data.
pub mod raw;
