#![cfg(feature = "parquet")]

mod common;

use std::collections::BTreeMap;
use std::fs;

use common::{create_image_folder, create_mnist_files, create_voc_tree, TempTestDir};
use orcars::dataset::{
    load_schema, read_parquet, write_from_directory, write_mnist, write_parquet, write_voc,
    DType, FeatureType, FormatArgs, ParquetDataset, ReadArgs, Record, SchemaField, Tensor, Value,
};
use orcars::{Error, ReadConfig, WriteOptions};

fn rows(path: &std::path::Path) -> Vec<Record> {
    let (partitions, _) = ParquetDataset::read_as_dict_rows(path).unwrap();
    partitions.into_iter().flatten().collect()
}

fn label_map(labels: &[(&str, i32)]) -> BTreeMap<String, i32> {
    labels.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[test]
fn test_write_mnist() {
    let dir = TempTestDir::new("write_mnist").unwrap();
    let (images, labels) = create_mnist_files(dir.path(), 12, 3, 2);
    let out = dir.join("mnist");

    let summary = write_mnist(&images, &labels, &out, &WriteOptions::new().with_block_size(5)).unwrap();
    assert_eq!(summary.records, 12);
    assert_eq!(summary.chunks, 3);

    let schema = load_schema(&out).unwrap();
    assert_eq!(schema["image"], SchemaField::ndarray(DType::UInt8, vec![3, 2, 1]));
    assert_eq!(schema["label"], SchemaField::ndarray(DType::UInt8, vec![]));

    let records = rows(&out);
    assert_eq!(records.len(), 12);
    let image = records[11]["image"].as_tensor().unwrap();
    assert_eq!(image.shape(), &[3, 2, 1]);
    assert_eq!(image.to_f64_vec(), vec![11.0, 12.0, 13.0, 14.0, 15.0, 16.0]);
    assert_eq!(
        records[11]["label"],
        Value::Tensor(Tensor::UInt8(ndarray::arr0(1).into_dyn()))
    );
}

#[test]
fn test_mnist_magic_validation() {
    let dir = TempTestDir::new("mnist_magic").unwrap();
    let (images, labels) = create_mnist_files(dir.path(), 2, 2, 2);
    let out = dir.join("mnist");

    // label file passed as the image file
    let err = write_mnist(&labels, &labels, &out, &WriteOptions::new()).unwrap_err();
    assert!(matches!(err, Error::Format(_)));
    assert!(err.to_string().contains("2049"));

    let err = write_mnist(&images, &images, &out, &WriteOptions::new()).unwrap_err();
    assert!(matches!(err, Error::Format(_)));

    let truncated = dir.join("truncated");
    let bytes = fs::read(&images).unwrap();
    fs::write(&truncated, &bytes[..bytes.len() - 1]).unwrap();
    assert!(write_mnist(&truncated, &labels, &out, &WriteOptions::new()).is_err());
}

#[test]
fn test_write_from_directory() {
    let dir = TempTestDir::new("image_folder").unwrap();
    let source = dir.join("images");
    create_image_folder(&source, &[("cat", 3), ("dog", 2), ("bird", 4)]);
    let out = dir.join("out");

    let labels = label_map(&[("cat", 0), ("dog", 1)]);
    let summary = write_from_directory(&source, &labels, &out, false, &WriteOptions::new()).unwrap();
    assert_eq!(summary.records, 5);

    let schema = load_schema(&out).unwrap();
    assert_eq!(schema["image"].feature_type, FeatureType::Image);
    assert_eq!(schema["label"], SchemaField::scalar(DType::Int32));

    let records = rows(&out);
    let label_strs: Vec<&str> = records
        .iter()
        .map(|r| r["label_str"].as_str().unwrap())
        .collect();
    assert_eq!(label_strs, vec!["cat", "cat", "cat", "dog", "dog"]);
    assert_eq!(records[3]["label"], Value::Int32(1));
    assert_eq!(records[3]["image"], Value::Bytes(b"dog/img0.jpg".to_vec()));
    assert!(records[3]["image_id"].as_str().unwrap().ends_with("img0.jpg"));
}

#[test]
fn test_write_from_directory_shuffled() {
    let dir = TempTestDir::new("image_folder_shuffled").unwrap();
    let source = dir.join("images");
    create_image_folder(&source, &[("a", 20), ("b", 20)]);
    let out = dir.join("out");

    let labels = label_map(&[("a", 0), ("b", 1)]);
    write_from_directory(&source, &labels, &out, true, &WriteOptions::new()).unwrap();

    let mut ids: Vec<String> = rows(&out)
        .iter()
        .map(|r| r["image_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 40);
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 40);
}

#[test]
fn test_write_voc() {
    let dir = TempTestDir::new("write_voc").unwrap();
    let root = dir.join("VOCdevkit");
    create_voc_tree(
        &root,
        "2007",
        "trainval",
        &[
            ("000001", vec![("dog", [48, 240, 195, 371], 0), ("person", [8, 12, 352, 498], 1)]),
            ("000002", vec![("train", [139, 200, 207, 301], 0)]),
            ("000003", vec![("dragon", [1, 1, 10, 10], 0)]),
        ],
    );
    let out = dir.join("out");

    let splits = vec![("2007".to_string(), "trainval".to_string())];
    let summary = write_voc(&root, &splits, &out, None, &WriteOptions::new()).unwrap();
    assert_eq!(summary.records, 3);

    let schema = load_schema(&out).unwrap();
    assert_eq!(schema["label"], SchemaField::ndarray(DType::Float32, vec![-1, 6]));

    let records = rows(&out);
    let first = records[0]["label"].as_tensor().unwrap();
    assert_eq!(first.shape(), &[2, 6]);
    assert_eq!(
        first.to_f64_vec(),
        vec![47.0, 239.0, 194.0, 370.0, 11.0, 0.0, 7.0, 11.0, 351.0, 497.0, 14.0, 1.0]
    );
    assert_eq!(records[0]["image"], Value::Bytes(b"000001".to_vec()));
    // unknown classes are dropped, leaving an empty label array
    assert_eq!(records[2]["label"].as_tensor().unwrap().shape(), &[0, 6]);
}

#[test]
fn test_write_voc_custom_classes() {
    let dir = TempTestDir::new("write_voc_classes").unwrap();
    let root = dir.join("VOCdevkit");
    create_voc_tree(
        &root,
        "2012",
        "val",
        &[("a", vec![("dragon", [2, 3, 4, 5], 0), ("dog", [1, 1, 2, 2], 0)])],
    );
    let out = dir.join("out");

    let classes = vec!["dragon".to_string()];
    let splits = vec![("2012".to_string(), "val".to_string())];
    write_voc(&root, &splits, &out, Some(classes.as_slice()), &WriteOptions::new()).unwrap();

    let label = rows(&out)[0]["label"].as_tensor().unwrap().to_f64_vec();
    assert_eq!(label, vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0]);
}

#[test]
fn test_write_parquet_dispatch() {
    let dir = TempTestDir::new("write_parquet").unwrap();
    let (images, labels) = create_mnist_files(dir.path(), 4, 2, 2);

    let args = FormatArgs::new()
        .with_mnist_files(&images, &labels)
        .with_options(WriteOptions::new().with_block_size(2));
    let summary = write_parquet("mnist", dir.join("mnist"), &args).unwrap();
    assert_eq!(summary.chunks, 2);

    let err = write_parquet("image_folder", dir.join("folder"), &args).unwrap_err();
    assert_eq!(
        err.to_string(),
        "directory is not specified for format image_folder."
    );

    let args = FormatArgs::new().with_voc(dir.join("VOCdevkit"), vec![]);
    let summary = write_parquet("voc", dir.join("voc"), &args).unwrap();
    assert_eq!(summary.records, 0);

    assert!(matches!(
        write_parquet("coco", dir.join("coco"), &FormatArgs::new()),
        Err(Error::UnsupportedFormat(_))
    ));
}

#[test]
fn test_read_parquet_dispatch() {
    let dir = TempTestDir::new("read_parquet").unwrap();
    let (images, labels) = create_mnist_files(dir.path(), 6, 2, 2);
    let out = dir.join("mnist");
    write_mnist(&images, &labels, &out, &WriteOptions::new().with_block_size(2)).unwrap();

    let mut types = BTreeMap::new();
    types.insert("label".to_string(), DType::Int64);
    let stream = read_parquet("tf_dataset", &out, &ReadArgs::new().with_output_types(types))
        .unwrap()
        .into_stream()
        .unwrap();
    let labels: Vec<Value> = stream.map(|r| r.unwrap()["label"].clone()).collect();
    assert_eq!(labels.len(), 6);
    assert_eq!(
        labels[5],
        Value::Tensor(Tensor::Int64(ndarray::arr0(5_i64).into_dyn()))
    );

    let args = ReadArgs::new()
        .with_config(ReadConfig::new().with_shard(0, 3))
        .with_batch_size(4)
        .with_transform(|mut record| {
            record.remove("image");
            Ok(record)
        });
    let loader = read_parquet("dataloader", &out, &args)
        .unwrap()
        .into_loader()
        .unwrap();
    assert_eq!(loader.batch_size(), 4);
    let batches: Vec<_> = loader.map(|b| b.unwrap()).collect();
    // shard 0 of 3 keeps chunk 0 only
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(batches[0].column_names().collect::<Vec<_>>(), vec!["label"]);
}
