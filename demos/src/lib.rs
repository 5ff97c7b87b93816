//! SINet demos
//!
//! Command-line front-ends for the `sinet-burn` library.
//!
//! ## Binaries
//!
//! - `train`: fine-tune RFB and decoder weights on a COD10K-style dataset
//! - `inference`: detect camouflaged objects in an image or a directory
//! - `make_subset`: copy a seeded random sample of a dataset
//! - `converter`: turn a PyTorch `.pth` checkpoint into a Burn `.mpk` file
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin make_subset -- --source datasets/COD10K_full --count 500
//! cargo run --release --bin train -- --config train.json
//! cargo run --release --bin inference -- weights/model.mpk photo.jpg --visuals
//! cargo run --release --features pretrained --bin converter -- sinet.pth sinet
//! ```

pub mod common;
pub mod config;

pub use common::{create_device, get_backend_name, init_logging, SelectedBackend, SelectedDevice};
pub use config::{load_or_default, InferenceRunConfig, SubsetConfig, TrainingConfig};
