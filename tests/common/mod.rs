//! Common test utilities module
//!
//! Provides shared utilities for tests including:
//! - Temporary directory management
//! - Sample records and schemas
//! - MNIST, image folder and VOC fixtures

#![allow(dead_code)]

pub mod test_utils;

pub use test_utils::{
    create_image_folder, create_mnist_files, create_voc_tree, get_temp_dir, record_ids,
    sample_records, sample_schema, test_temp_dir, TempTestDir, VocObject,
};
