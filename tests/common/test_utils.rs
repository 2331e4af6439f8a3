//! Test utilities for temporary dataset directories and source fixtures
//!
//! Provides RAII temporary directories (respecting TMPDIR, TEMP, TMP) and
//! builders for the MNIST, image folder and VOC layouts read by the format
//! converters.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use orcars::dataset::{DType, Record, Schema, SchemaField, Tensor, Value};

static TEST_DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Get the temporary directory, respecting environment variables
///
/// Checks in order: TMPDIR, TEMP, TMP, then falls back to std::env::temp_dir()
pub fn get_temp_dir() -> PathBuf {
    env::var("TMPDIR")
        .or_else(|_| env::var("TEMP"))
        .or_else(|_| env::var("TMP"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir())
}

/// Generate a unique test directory path
pub fn test_temp_dir(test_name: &str) -> PathBuf {
    let counter = TEST_DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dirname = format!(
        "orcars_test_dir_{}_{}_{}",
        test_name,
        std::process::id(),
        counter
    );
    get_temp_dir().join(dirname)
}

/// RAII wrapper for temporary test directories with automatic cleanup
///
/// The directory and its contents are deleted when this struct is dropped
pub struct TempTestDir {
    path: PathBuf,
    keep: bool,
}

impl TempTestDir {
    pub fn new(test_name: &str) -> std::io::Result<Self> {
        let path = test_temp_dir(test_name);
        fs::create_dir_all(&path)?;
        Ok(TempTestDir { path, keep: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a not yet existing entry inside the directory
    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Keep the directory after drop (for debugging)
    pub fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for TempTestDir {
    fn drop(&mut self) {
        if !self.keep && self.path.exists() {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

/// Schema of the records built by [`sample_records`]
pub fn sample_schema() -> Schema {
    let mut schema = Schema::new();
    schema.insert("id".to_string(), SchemaField::scalar(DType::Int64));
    schema.insert("name".to_string(), SchemaField::scalar(DType::String));
    schema.insert(
        "feature".to_string(),
        SchemaField::ndarray(DType::Float32, vec![2, 2]),
    );
    schema
}

/// `n` records with an id, a name and a 2x2 float feature derived from the id
pub fn sample_records(n: i64) -> Vec<Record> {
    (0..n)
        .map(|i| {
            let v = i as f32;
            let feature = ndarray::array![[v, v + 0.5], [-v, 1.0]];
            let mut record = Record::new();
            record.insert("id".to_string(), Value::Int64(i));
            record.insert("name".to_string(), Value::from(format!("item-{}", i)));
            record.insert("feature".to_string(), Value::from(Tensor::from(feature)));
            record
        })
        .collect()
}

/// Ids of a list of records in iteration order
pub fn record_ids<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<i64> {
    records
        .into_iter()
        .map(|record| match record.get("id") {
            Some(Value::Int64(id)) => *id,
            other => panic!("unexpected id value {:?}", other),
        })
        .collect()
}

/// Writes MNIST IDX image and label files holding `count` images of `rows` x `cols`
///
/// Pixel `p` of image `i` has value `(i + p) % 256`; label `i` is `i % 10`.
pub fn create_mnist_files(dir: &Path, count: u32, rows: u32, cols: u32) -> (PathBuf, PathBuf) {
    let mut images = Vec::new();
    for header in [2051, count, rows, cols] {
        images.extend_from_slice(&header.to_be_bytes());
    }
    for i in 0..count {
        for p in 0..rows * cols {
            images.push(((i + p) % 256) as u8);
        }
    }

    let mut labels = Vec::new();
    for header in [2049, count] {
        labels.extend_from_slice(&header.to_be_bytes());
    }
    labels.extend((0..count).map(|i| (i % 10) as u8));

    let image_file = dir.join("train-images-idx3-ubyte");
    let label_file = dir.join("train-labels-idx1-ubyte");
    fs::write(&image_file, images).unwrap();
    fs::write(&label_file, labels).unwrap();
    (image_file, label_file)
}

/// Creates `<dir>/<label>/img<i>.jpg` files; each file holds its own relative path as bytes
pub fn create_image_folder(dir: &Path, labels: &[(&str, usize)]) {
    for (label, count) in labels {
        let label_dir = dir.join(label);
        fs::create_dir_all(&label_dir).unwrap();
        for i in 0..*count {
            let content = format!("{}/img{}.jpg", label, i);
            fs::write(label_dir.join(format!("img{}.jpg", i)), content.as_bytes()).unwrap();
        }
    }
}

/// One VOC object: class name, `[xmin, ymin, xmax, ymax]` and difficult flag
pub type VocObject<'a> = (&'a str, [u32; 4], u8);

/// Creates a `VOC<year>` tree with a `<split>.txt` listing and one image plus
/// annotation per entry
pub fn create_voc_tree(root: &Path, year: &str, split: &str, images: &[(&str, Vec<VocObject>)]) {
    let base = root.join(format!("VOC{}", year));
    let main = base.join("ImageSets").join("Main");
    let jpegs = base.join("JPEGImages");
    let annotations = base.join("Annotations");
    for dir in [&main, &jpegs, &annotations] {
        fs::create_dir_all(dir).unwrap();
    }

    let ids: Vec<&str> = images.iter().map(|(id, _)| *id).collect();
    fs::write(main.join(format!("{}.txt", split)), ids.join("\n") + "\n").unwrap();

    for (id, objects) in images {
        fs::write(jpegs.join(format!("{}.jpg", id)), id.as_bytes()).unwrap();

        let mut xml = format!("<annotation>\n  <filename>{}.jpg</filename>\n", id);
        for (name, [xmin, ymin, xmax, ymax], difficult) in objects {
            xml.push_str(&format!(
                "  <object>\n    <name>{}</name>\n    <difficult>{}</difficult>\n    \
                 <bndbox><xmin>{}</xmin><ymin>{}</ymin><xmax>{}</xmax><ymax>{}</ymax></bndbox>\n  \
                 </object>\n",
                name, difficult, xmin, ymin, xmax, ymax
            ));
        }
        xml.push_str("</annotation>\n");
        fs::write(annotations.join(format!("{}.xml", id)), xml).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_test_dir_cleanup() {
        let path;
        {
            let temp_dir = TempTestDir::new("temp_dir_test").unwrap();
            path = temp_dir.path().to_path_buf();
            fs::write(temp_dir.join("test.txt"), b"test data").unwrap();
            assert!(path.exists(), "Directory should exist");
        }
        assert!(
            !path.exists(),
            "Directory should be deleted after TempTestDir is dropped"
        );
    }

    #[test]
    fn test_temp_dir_unique() {
        assert_ne!(test_temp_dir("test"), test_temp_dir("test"));
    }
}
