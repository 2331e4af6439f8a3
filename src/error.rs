use thiserror::Error;

/// エラー型の定義
#[derive(Error, Debug)]
pub enum Error {
    #[error("入出力エラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSONエラー: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "parquet")]
    #[error("Parquetエラー: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[cfg(feature = "parquet")]
    #[error("Arrowエラー: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("配列形状エラー: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("無効な入力です: {0}")]
    InvalidInput(String),

    #[error("無効な値です: {0}")]
    InvalidValue(String),

    #[error("次元が一致しません: {0}")]
    DimensionMismatch(String),

    #[error("無効な操作です: {0}")]
    InvalidOperation(String),

    // 呼び出し側が表示する文言をそのまま保持する
    #[error("{argument} is not specified for format {format}.")]
    MissingArgument { format: String, argument: String },

    #[error("{0}")]
    UnsupportedFormat(String),

    #[error("スキーマが一致しません: {0}")]
    SchemaMismatch(String),

    #[error("データ形式エラー: {0}")]
    Format(String),

    #[error("設定エラー: {0}")]
    Config(String),
}

/// Resultの型エイリアス
pub type Result<T> = std::result::Result<T, Error>;

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::InvalidValue(err.to_string())
    }
}
