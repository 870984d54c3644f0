//! Table configuration.
//!
//! Describes where a table lives and how absent fields are written, so
//! tables can be set up from a YAML file instead of code.
//!
//! # Example YAML
//!
//! ```yaml
//! schema: public
//! table: simple
//! id_column: id
//! column_defaults:
//!   title: zero
//!   data: null
//! ```

use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::value::ColumnDefaults;

fn default_id_column() -> String {
    "id".to_string()
}

/// Location and write policy of one table.
///
/// # Examples
///
/// ```
/// use protorow_core::{OnEmpty, TableConfig};
///
/// let yaml = "table: simple\ncolumn_defaults: {title: zero}";
/// let config = TableConfig::from_yaml_str(yaml).unwrap();
/// assert_eq!(config.schema, "");
/// assert_eq!(config.id_column, "id");
/// assert_eq!(config.column_defaults.get("title"), OnEmpty::Zero);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Schema name; empty to leave it out of statements.
    #[serde(default)]
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Column identifying a single row.
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Null or zero policy for absent fields in multi-row writes.
    #[serde(default)]
    pub column_defaults: ColumnDefaults,
}

impl TableConfig {
    /// Configuration for `table` without schema, with default settings.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            schema: String::new(),
            table: table.into(),
            id_column: default_id_column(),
            column_defaults: ColumnDefaults::default(),
        }
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`Io`](crate::Error::Io) if the file cannot be read, or
    /// [`Yaml`](crate::Error::Yaml) if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_yaml::from_reader(reader)?;
        Ok(config)
    }

    /// Parses configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Saves the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }
}
