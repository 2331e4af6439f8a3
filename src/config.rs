//! Configuration for dataset writing and reading
//!
//! Options can be built in code with the `with_*` setters or loaded from a
//! TOML, YAML or JSON file.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Parquet圧縮オプションの列挙型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    None,
    Snappy,
    Gzip,
    Lzo,
    Brotli,
    Lz4,
    Zstd,
}

impl Default for ParquetCompression {
    fn default() -> Self {
        ParquetCompression::Snappy
    }
}

#[cfg(feature = "parquet")]
impl From<ParquetCompression> for parquet::basic::Compression {
    fn from(comp: ParquetCompression) -> Self {
        use parquet::basic::Compression;
        match comp {
            ParquetCompression::None => Compression::UNCOMPRESSED,
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Gzip => Compression::GZIP(Default::default()),
            ParquetCompression::Lzo => Compression::LZO,
            ParquetCompression::Brotli => Compression::BROTLI(Default::default()),
            ParquetCompression::Lz4 => Compression::LZ4,
            ParquetCompression::Zstd => Compression::ZSTD(Default::default()),
        }
    }
}

/// What to do when a chunk directory already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WriteMode {
    /// Replace the existing chunk
    Overwrite,
    /// Add new part files next to the existing ones
    Append,
    /// Fail if the chunk already exists
    ErrorIfExists,
    /// Leave the existing chunk untouched
    Ignore,
}

impl Default for WriteMode {
    fn default() -> Self {
        WriteMode::Overwrite
    }
}

impl FromStr for WriteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(WriteMode::Overwrite),
            "append" => Ok(WriteMode::Append),
            "error" | "errorifexists" => Ok(WriteMode::ErrorIfExists),
            "ignore" => Ok(WriteMode::Ignore),
            other => Err(Error::InvalidInput(format!(
                "Unknown save mode: {}. Accepted save modes are 'overwrite', 'append', \
                 'ignore', 'error', 'errorifexists'.",
                other
            ))),
        }
    }
}

impl TryFrom<String> for WriteMode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<WriteMode> for String {
    fn from(mode: WriteMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteMode::Overwrite => "overwrite",
            WriteMode::Append => "append",
            WriteMode::ErrorIfExists => "errorifexists",
            WriteMode::Ignore => "ignore",
        };
        f.write_str(name)
    }
}

/// Options for packaging records into chunked Parquet files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Number of records per chunk directory
    pub block_size: usize,
    /// Behaviour for chunk directories that already exist
    pub write_mode: WriteMode,
    /// Number of part files per chunk (None for the rayon thread count)
    pub num_partitions: Option<usize>,
    /// Compression codec of the part files
    pub compression: ParquetCompression,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            block_size: 1000,
            write_mode: WriteMode::Overwrite,
            num_partitions: None,
            compression: ParquetCompression::Snappy,
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of records per chunk
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the write mode
    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    /// Set the number of part files written per chunk
    pub fn with_num_partitions(mut self, num_partitions: usize) -> Self {
        self.num_partitions = Some(num_partitions);
        self
    }

    pub fn with_compression(mut self, compression: ParquetCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Get the number of partitions to use
    pub fn partitions(&self) -> usize {
        match self.num_partitions {
            Some(n) => n,
            None => rayon::current_num_threads(),
        }
    }

    /// Load options from a `.toml`, `.yaml`/`.yml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_config(path.as_ref())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::InvalidInput(
                "block_size should be a positive number".to_string(),
            ));
        }
        if self.num_partitions == Some(0) {
            return Err(Error::InvalidInput(
                "num_partitions should be a positive number".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options for reading a packaged dataset as a training-loop iterable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    /// Total number of shards the chunks are split into
    pub num_shards: Option<usize>,
    /// Shard index of this reader, in `[0, num_shards)`
    pub rank: Option<usize>,
    /// Number of loader workers (0 reads everything in one worker)
    pub num_workers: usize,
    /// Records per batch
    pub batch_size: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            num_shards: None,
            rank: None,
            num_workers: 0,
            batch_size: 1,
        }
    }
}

impl ReadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select one shard out of `num_shards`
    pub fn with_shard(mut self, rank: usize, num_shards: usize) -> Self {
        self.rank = Some(rank);
        self.num_shards = Some(num_shards);
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Load the configuration from a `.toml`, `.yaml`/`.yml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_config(path.as_ref())
    }
}

fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("toml") => Ok(toml::from_str(&text)?),
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&text)?),
        Some("json") => Ok(serde_json::from_str(&text)?),
        _ => Err(Error::Config(format!(
            "unsupported configuration file: {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_write_mode_parse() {
        assert_eq!("overwrite".parse::<WriteMode>().unwrap(), WriteMode::Overwrite);
        assert_eq!("Append".parse::<WriteMode>().unwrap(), WriteMode::Append);
        assert_eq!("error".parse::<WriteMode>().unwrap(), WriteMode::ErrorIfExists);
        assert_eq!(
            "errorifexists".parse::<WriteMode>().unwrap(),
            WriteMode::ErrorIfExists
        );
        assert_eq!("ignore".parse::<WriteMode>().unwrap(), WriteMode::Ignore);
        assert!("replace".parse::<WriteMode>().is_err());
    }

    #[test]
    fn test_write_options_defaults() {
        let options = WriteOptions::default();
        assert_eq!(options.block_size, 1000);
        assert_eq!(options.write_mode, WriteMode::Overwrite);
        assert_eq!(options.partitions(), rayon::current_num_threads());
        assert!(options.validate().is_ok());
        assert!(WriteOptions::new().with_block_size(0).validate().is_err());
        assert!(WriteOptions::new().with_num_partitions(0).validate().is_err());
    }

    #[test]
    fn test_write_options_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("write.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "block_size = 16\nwrite_mode = \"append\"\ncompression = \"zstd\"").unwrap();

        let options = WriteOptions::from_file(&path).unwrap();
        assert_eq!(options.block_size, 16);
        assert_eq!(options.write_mode, WriteMode::Append);
        assert_eq!(options.compression, ParquetCompression::Zstd);
        assert_eq!(options.num_partitions, None);
    }

    #[test]
    fn test_read_config_from_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("read.yaml");
        fs::write(&yaml_path, "num_shards: 2\nrank: 1\nbatch_size: 4\n").unwrap();
        let config = ReadConfig::from_file(&yaml_path).unwrap();
        assert_eq!(config, ReadConfig::new().with_shard(1, 2).with_batch_size(4));

        let json_path = dir.path().join("read.json");
        fs::write(&json_path, r#"{"num_workers": 3}"#).unwrap();
        let config = ReadConfig::from_file(&json_path).unwrap();
        assert_eq!(config.num_workers, 3);
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn test_unknown_config_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("read.ini");
        fs::write(&path, "batch_size=1").unwrap();
        assert!(matches!(ReadConfig::from_file(&path), Err(Error::Config(_))));
    }
}
