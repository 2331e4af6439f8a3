//! Converters from common image dataset layouts, and format dispatch

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ndarray::{arr0, Array, Array2, IxDyn};
use rand::seq::SliceRandom;
use regex::Regex;

use super::reader::{DataLoader, RecordStream, Transform};
use super::schema::{DType, Schema, SchemaField};
use super::value::{Record, Tensor, Value};
use super::writer::{ParquetDataset, WriteSummary};
use crate::config::{ReadConfig, WriteOptions};
use crate::error::{Error, Result};

const MNIST_IMAGE_MAGIC: u32 = 2051;
const MNIST_LABEL_MAGIC: u32 = 2049;

/// The 20 object classes of Pascal VOC
pub const VOC_CLASSES: [&str; 20] = [
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tvmonitor",
];

fn read_be_u32(bytes: &[u8], offset: usize, path: &Path) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::Format(format!("truncated IDX header in {}", path.display())))
}

fn idx_payload<'a>(bytes: &'a [u8], header: usize, len: usize, path: &Path) -> Result<&'a [u8]> {
    let end = header.checked_add(len).ok_or_else(|| {
        Error::Format(format!("IDX payload size overflows in {}", path.display()))
    })?;
    bytes.get(header..end).ok_or_else(|| {
        Error::Format(format!(
            "{} holds {} bytes of data, expected {}",
            path.display(),
            bytes.len().saturating_sub(header),
            len
        ))
    })
}

/// MNIST images as (count, rows, cols, pixels)
fn read_mnist_images(path: &Path) -> Result<(usize, usize, usize, Vec<u8>)> {
    let bytes = fs::read(path)?;
    let magic = read_be_u32(&bytes, 0, path)?;
    if magic != MNIST_IMAGE_MAGIC {
        return Err(Error::Format(format!(
            "Invalid magic number {} in MNIST image file: {}",
            magic,
            path.display()
        )));
    }
    let count = read_be_u32(&bytes, 4, path)? as usize;
    let rows = read_be_u32(&bytes, 8, path)? as usize;
    let cols = read_be_u32(&bytes, 12, path)? as usize;
    let len = count
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .ok_or_else(|| {
            Error::Format(format!(
                "IDX dimensions {}x{}x{} overflow in {}",
                count,
                rows,
                cols,
                path.display()
            ))
        })?;
    let pixels = idx_payload(&bytes, 16, len, path)?.to_vec();
    Ok((count, rows, cols, pixels))
}

fn read_mnist_labels(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path)?;
    let magic = read_be_u32(&bytes, 0, path)?;
    if magic != MNIST_LABEL_MAGIC {
        return Err(Error::Format(format!(
            "Invalid magic number {} in MNIST label file: {}",
            magic,
            path.display()
        )));
    }
    let count = read_be_u32(&bytes, 4, path)? as usize;
    Ok(idx_payload(&bytes, 8, count, path)?.to_vec())
}

/// Packages a pair of MNIST IDX files
///
/// Each record holds an `image` uint8 array of shape `[rows, cols, 1]` and a
/// zero-dimensional uint8 `label`.
pub fn write_mnist(
    image_file: impl AsRef<Path>,
    label_file: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    options: &WriteOptions,
) -> Result<WriteSummary> {
    let (count, rows, cols, pixels) = read_mnist_images(image_file.as_ref())?;
    let labels = read_mnist_labels(label_file.as_ref())?;
    if labels.len() != count {
        return Err(Error::DimensionMismatch(format!(
            "MNIST image file holds {} images but label file holds {} labels",
            count,
            labels.len()
        )));
    }

    let mut schema = Schema::new();
    schema.insert(
        "image".to_string(),
        SchemaField::ndarray(DType::UInt8, vec![rows as i64, cols as i64, 1]),
    );
    schema.insert("label".to_string(), SchemaField::ndarray(DType::UInt8, vec![]));

    let image_size = rows * cols;
    let records = labels
        .iter()
        .enumerate()
        .map(|(i, &label)| {
            let image = Array::from_shape_vec(
                IxDyn(&[rows, cols, 1]),
                pixels[i * image_size..(i + 1) * image_size].to_vec(),
            )?;
            let mut record = Record::new();
            record.insert("image".to_string(), Value::Tensor(Tensor::UInt8(image)));
            record.insert(
                "label".to_string(),
                Value::Tensor(Tensor::UInt8(arr0(label).into_dyn())),
            );
            Ok(record)
        })
        .collect::<Result<Vec<Record>>>()?;

    ParquetDataset::write(output_path, records, &schema, options)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<PathBuf>>>()?;
    entries.sort();
    Ok(entries)
}

/// Packages an image folder whose subdirectories name the labels
///
/// Only subdirectories present in `label_map` are read. Every file inside
/// becomes one record with the image bytes, its integer label, its path as
/// `image_id` and the label name as `label_str`.
pub fn write_from_directory(
    directory: impl AsRef<Path>,
    label_map: &BTreeMap<String, i32>,
    output_path: impl AsRef<Path>,
    shuffle: bool,
    options: &WriteOptions,
) -> Result<WriteSummary> {
    let mut records = Vec::new();

    for label_dir in sorted_entries(directory.as_ref())? {
        if !label_dir.is_dir() {
            continue;
        }
        let label_str = match label_dir.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        let label = match label_map.get(&label_str) {
            Some(&label) => label,
            None => {
                log::debug!("skipping unlabeled directory {}", label_dir.display());
                continue;
            }
        };

        for image_path in sorted_entries(&label_dir)? {
            if !image_path.is_file() {
                continue;
            }
            let mut record = Record::new();
            record.insert(
                "image_id".to_string(),
                Value::Str(image_path.display().to_string()),
            );
            record.insert("image".to_string(), Value::ImagePath(image_path));
            record.insert("label".to_string(), Value::Int32(label));
            record.insert("label_str".to_string(), Value::Str(label_str.clone()));
            records.push(record);
        }
    }

    if shuffle {
        records.shuffle(&mut rand::rng());
    }

    let mut schema = Schema::new();
    schema.insert("image".to_string(), SchemaField::image());
    schema.insert("label".to_string(), SchemaField::scalar(DType::Int32));
    schema.insert("image_id".to_string(), SchemaField::scalar(DType::String));
    schema.insert("label_str".to_string(), SchemaField::scalar(DType::String));

    ParquetDataset::write(output_path, records, &schema, options)
}

/// Extracts labelled bounding boxes from Pascal VOC annotation files
struct VocAnnotationParser {
    object: Regex,
    part: Regex,
    name: Regex,
    difficult: Regex,
    bounds: [Regex; 4],
    classes: Vec<String>,
}

fn tag_regex(tag: &str) -> Result<Regex> {
    Ok(Regex::new(&format!(r"<{0}>\s*([^<]*?)\s*</{0}>", tag))?)
}

impl VocAnnotationParser {
    fn new(classes: Vec<String>) -> Result<Self> {
        Ok(Self {
            object: Regex::new(r"(?s)<object>(.*?)</object>")?,
            part: Regex::new(r"(?s)<part>.*?</part>")?,
            name: tag_regex("name")?,
            difficult: tag_regex("difficult")?,
            bounds: [
                tag_regex("xmin")?,
                tag_regex("ymin")?,
                tag_regex("xmax")?,
                tag_regex("ymax")?,
            ],
            classes,
        })
    }

    /// Rows of `[xmin, ymin, xmax, ymax, class, difficult]` with 0-based coordinates
    fn parse(&self, xml: &str, path: &Path) -> Result<Array2<f32>> {
        let mut rows: Vec<f32> = Vec::new();

        for object in self.object.captures_iter(xml) {
            let body = self.part.replace_all(&object[1], "");

            let name = match self.name.captures(&body) {
                Some(c) => c[1].trim().to_lowercase(),
                None => continue,
            };
            let class = match self.classes.iter().position(|c| *c == name) {
                Some(class) => class,
                None => {
                    log::debug!("skipping object of unknown class '{}'", name);
                    continue;
                }
            };
            let difficult = match self.difficult.captures(&body) {
                Some(c) => c[1].parse::<f32>().map_err(|_| {
                    Error::Format(format!("invalid difficult flag in {}", path.display()))
                })?,
                None => 0.0,
            };

            for regex in &self.bounds {
                let value = regex
                    .captures(&body)
                    .and_then(|c| c[1].parse::<f32>().ok())
                    .ok_or_else(|| {
                        Error::Format(format!(
                            "missing or invalid bounding box in {}",
                            path.display()
                        ))
                    })?;
                rows.push(value - 1.0);
            }
            rows.push(class as f32);
            rows.push(difficult);
        }

        let count = rows.len() / 6;
        Ok(Array2::from_shape_vec((count, 6), rows)?)
    }
}

/// Packages Pascal VOC splits, e.g. `[("2007", "trainval")]`
///
/// Each record holds the JPEG bytes, a float32 `label` array of shape
/// `[objects, 6]` and the image path as `image_id`. Objects whose class is
/// not in `classes` (the 20 VOC classes when `None`) are dropped.
pub fn write_voc(
    voc_root_path: impl AsRef<Path>,
    splits_names: &[(String, String)],
    output_path: impl AsRef<Path>,
    classes: Option<&[String]>,
    options: &WriteOptions,
) -> Result<WriteSummary> {
    let root = voc_root_path.as_ref();
    let classes = match classes {
        Some(classes) => classes.to_vec(),
        None => VOC_CLASSES.iter().map(|c| c.to_string()).collect(),
    };
    let parser = VocAnnotationParser::new(classes)?;

    let mut records = Vec::new();
    for (year, split) in splits_names {
        let base = root.join(format!("VOC{}", year));
        let split_file = base.join("ImageSets").join("Main").join(format!("{}.txt", split));

        for id in fs::read_to_string(&split_file)?.lines().map(str::trim) {
            if id.is_empty() {
                continue;
            }
            let image_path = base.join("JPEGImages").join(format!("{}.jpg", id));
            let annotation_path = base.join("Annotations").join(format!("{}.xml", id));
            let label = parser.parse(&fs::read_to_string(&annotation_path)?, &annotation_path)?;

            let mut record = Record::new();
            record.insert(
                "image_id".to_string(),
                Value::Str(image_path.display().to_string()),
            );
            record.insert("image".to_string(), Value::ImagePath(image_path));
            record.insert("label".to_string(), Value::from(Tensor::from(label)));
            records.push(record);
        }
    }

    let mut schema = Schema::new();
    schema.insert("image".to_string(), SchemaField::image());
    schema.insert(
        "label".to_string(),
        SchemaField::ndarray(DType::Float32, vec![-1, 6]),
    );
    schema.insert("image_id".to_string(), SchemaField::scalar(DType::String));

    ParquetDataset::write(output_path, records, &schema, options)
}

/// Source layouts accepted by [`write_parquet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFormat {
    Mnist,
    ImageFolder,
    Voc,
}

impl FromStr for WriteFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mnist" => Ok(WriteFormat::Mnist),
            "image_folder" => Ok(WriteFormat::ImageFolder),
            "voc" => Ok(WriteFormat::Voc),
            other => Err(Error::UnsupportedFormat(format!(
                "{} is not supported, should be one of 'mnist', 'image_folder' and 'voc'.",
                other
            ))),
        }
    }
}

impl fmt::Display for WriteFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteFormat::Mnist => "mnist",
            WriteFormat::ImageFolder => "image_folder",
            WriteFormat::Voc => "voc",
        })
    }
}

/// Arguments of [`write_parquet`]; which ones are required depends on the format
#[derive(Debug, Clone)]
pub struct FormatArgs {
    pub image_file: Option<PathBuf>,
    pub label_file: Option<PathBuf>,
    pub directory: Option<PathBuf>,
    pub label_map: Option<BTreeMap<String, i32>>,
    pub shuffle: bool,
    pub voc_root_path: Option<PathBuf>,
    pub splits_names: Option<Vec<(String, String)>>,
    pub classes: Option<Vec<String>>,
    pub options: WriteOptions,
}

impl Default for FormatArgs {
    fn default() -> Self {
        Self {
            image_file: None,
            label_file: None,
            directory: None,
            label_map: None,
            shuffle: true,
            voc_root_path: None,
            splits_names: None,
            classes: None,
            options: WriteOptions::default(),
        }
    }
}

impl FormatArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the MNIST image and label files
    pub fn with_mnist_files(mut self, image_file: impl Into<PathBuf>, label_file: impl Into<PathBuf>) -> Self {
        self.image_file = Some(image_file.into());
        self.label_file = Some(label_file.into());
        self
    }

    /// Set the image folder and its label mapping
    pub fn with_directory(mut self, directory: impl Into<PathBuf>, label_map: BTreeMap<String, i32>) -> Self {
        self.directory = Some(directory.into());
        self.label_map = Some(label_map);
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Set the VOC root and the `(year, split)` pairs to read
    pub fn with_voc(mut self, voc_root_path: impl Into<PathBuf>, splits_names: Vec<(String, String)>) -> Self {
        self.voc_root_path = Some(voc_root_path.into());
        self.splits_names = Some(splits_names);
        self
    }

    pub fn with_classes(mut self, classes: Vec<String>) -> Self {
        self.classes = Some(classes);
        self
    }

    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }
}

fn required<'a, T>(value: &'a Option<T>, format: &str, argument: &str) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| Error::MissingArgument {
        format: format.to_string(),
        argument: argument.to_string(),
    })
}

/// Packages a dataset of the given source `format` into `output_path`
///
/// Supported formats are `mnist` (needs `image_file` and `label_file`),
/// `image_folder` (needs `directory` and `label_map`) and `voc` (needs
/// `voc_root_path` and `splits_names`).
pub fn write_parquet(
    format: &str,
    output_path: impl AsRef<Path>,
    args: &FormatArgs,
) -> Result<WriteSummary> {
    let parsed: WriteFormat = format.parse()?;
    log::info!("writing {} dataset to {}", parsed, output_path.as_ref().display());

    match parsed {
        WriteFormat::Mnist => {
            let image_file = required(&args.image_file, format, "image_file")?;
            let label_file = required(&args.label_file, format, "label_file")?;
            write_mnist(image_file, label_file, output_path, &args.options)
        }
        WriteFormat::ImageFolder => {
            let directory = required(&args.directory, format, "directory")?;
            let label_map = required(&args.label_map, format, "label_map")?;
            write_from_directory(directory, label_map, output_path, args.shuffle, &args.options)
        }
        WriteFormat::Voc => {
            let root = required(&args.voc_root_path, format, "voc_root_path")?;
            let splits = required(&args.splits_names, format, "splits_names")?;
            write_voc(
                root,
                splits,
                output_path,
                args.classes.as_deref(),
                &args.options,
            )
        }
    }
}

/// Arguments of [`read_parquet`]
#[derive(Clone, Default)]
pub struct ReadArgs {
    /// Field dtypes of the stream; required by `tf_dataset`
    pub output_types: Option<BTreeMap<String, DType>>,
    pub output_shapes: Option<BTreeMap<String, Vec<Option<usize>>>>,
    pub config: ReadConfig,
    pub transform: Option<Transform>,
    /// Overrides `config.batch_size` when set
    pub batch_size: Option<usize>,
}

impl ReadArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_types(mut self, output_types: BTreeMap<String, DType>) -> Self {
        self.output_types = Some(output_types);
        self
    }

    pub fn with_output_shapes(mut self, output_shapes: BTreeMap<String, Vec<Option<usize>>>) -> Self {
        self.output_shapes = Some(output_shapes);
        self
    }

    pub fn with_config(mut self, config: ReadConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Record) -> Result<Record> + Send + Sync + 'static,
    {
        self.transform = Some(std::sync::Arc::new(transform));
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// Result of [`read_parquet`]
pub enum ParquetRead {
    Stream(RecordStream),
    Loader(DataLoader),
}

impl ParquetRead {
    pub fn into_stream(self) -> Option<RecordStream> {
        match self {
            ParquetRead::Stream(stream) => Some(stream),
            ParquetRead::Loader(_) => None,
        }
    }

    pub fn into_loader(self) -> Option<DataLoader> {
        match self {
            ParquetRead::Loader(loader) => Some(loader),
            ParquetRead::Stream(_) => None,
        }
    }
}

/// Opens a packaged dataset for a training loop
///
/// `tf_dataset` returns a lazy [`RecordStream`] and needs `output_types`;
/// `dataloader` returns a batching [`DataLoader`].
pub fn read_parquet(
    format: &str,
    input_path: impl AsRef<Path>,
    args: &ReadArgs,
) -> Result<ParquetRead> {
    match format {
        "tf_dataset" => {
            let output_types = required(&args.output_types, format, "output_types")?;
            let stream = ParquetDataset::read_as_stream(
                input_path,
                output_types.clone(),
                args.output_shapes.clone(),
            )?;
            Ok(ParquetRead::Stream(stream))
        }
        "dataloader" => {
            let mut config = args.config.clone();
            if let Some(batch_size) = args.batch_size {
                config.batch_size = batch_size;
            }
            let loader = DataLoader::from_path(input_path, &config, args.transform.clone())?;
            Ok(ParquetRead::Loader(loader))
        }
        other => Err(Error::UnsupportedFormat(format!(
            "{} is not supported, should be 'tf_dataset' or 'dataloader'.",
            other
        ))),
    }
}
