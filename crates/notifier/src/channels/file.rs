//! FileChannel - appends alerts as JSON lines, one file per UTC day

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use contracts::{AlertMessage, ContractError, NotificationChannel};
use tracing::{debug, error, instrument};

#[derive(Debug, Clone)]
pub struct FileChannelConfig {
    /// Directory receiving `alerts-YYYY-MM-DD.jsonl`
    pub dir: PathBuf,
}

impl FileChannelConfig {
    /// Read the `path` parameter
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let dir = params
            .get("path")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| "missing 'path' parameter".to_string())?;
        Ok(Self { dir })
    }
}

/// Channel that writes every alert to a daily JSON-lines file
pub struct FileChannel {
    name: String,
    config: FileChannelConfig,
    current: Option<(NaiveDate, BufWriter<File>)>,
}

impl FileChannel {
    pub fn new(name: impl Into<String>, config: FileChannelConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.dir)?;
        Ok(Self {
            name: name.into(),
            config,
            current: None,
        })
    }

    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = FileChannelConfig::from_params(params)
            .map_err(|e| ContractError::channel_connection(&name, e))?;
        Self::new(name.clone(), config)
            .map_err(|e| ContractError::channel_connection(&name, e.to_string()))
    }

    /// File that receives alerts created on `date`
    pub fn path_for(dir: &Path, date: NaiveDate) -> PathBuf {
        dir.join(format!("alerts-{}.jsonl", date.format("%Y-%m-%d")))
    }

    fn writer_for(&mut self, date: NaiveDate) -> std::io::Result<&mut BufWriter<File>> {
        let stale = !matches!(&self.current, Some((day, _)) if *day == date);
        if stale {
            if let Some((_, mut previous)) = self.current.take() {
                previous.flush()?;
            }
            let path = Self::path_for(&self.config.dir, date);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            debug!(channel = %self.name, path = %path.display(), "Alert file opened");
            self.current = Some((date, BufWriter::new(file)));
        }

        match self.current.as_mut() {
            Some((_, writer)) => Ok(writer),
            None => Err(std::io::Error::other("alert file not open")),
        }
    }

    fn append(&mut self, message: &AlertMessage) -> std::io::Result<()> {
        let writer = self.writer_for(message.timestamp.date_naive())?;
        serde_json::to_writer(&mut *writer, message)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

impl NotificationChannel for FileChannel {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_channel_send",
        skip(self, message),
        fields(channel = %self.name, severity = %message.severity)
    )]
    async fn send(&mut self, message: &AlertMessage) -> Result<(), ContractError> {
        self.append(message).map_err(|e| {
            error!(channel = %self.name, error = %e, "Alert write failed");
            ContractError::channel_send(&self.name, e.to_string())
        })
    }

    #[instrument(name = "file_channel_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some((_, mut writer)) = self.current.take() {
            writer
                .flush()
                .map_err(|e| ContractError::channel_send(&self.name, e.to_string()))?;
        }
        debug!(channel = %self.name, "FileChannel closed");
        Ok(())
    }
}
