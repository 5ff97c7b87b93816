//! Mapping between arbitrary image geometry and the square model input.
//!
//! [`Preprocessor`] letterboxes an image into an `S x S` canvas and records a
//! [`PreprocessMeta`]; [`postprocess_tensor`] uses that record to crop the
//! padding out of a predicted map, resize it back to the source size and
//! binarize it with a [`Threshold`].

mod postprocess;
mod preprocess;

pub use postprocess::{postprocess_map, postprocess_tensor, Threshold};
pub use preprocess::{PreprocessMeta, Preprocessor};
