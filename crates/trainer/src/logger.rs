//! Experiment loggers.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};

use fgvc_core::config::LoggerConfig;
use fgvc_core::{Registry, Result};

pub trait Logger: Send {
    fn log(&mut self, msg: &str);

    fn add_scalars(&mut self, step: usize, scalars: &BTreeMap<String, f64>);

    /// Flushes and releases any resource. Later calls are no-ops.
    fn close(&mut self);
}

pub type LoggerBuilder = fn(&LoggerConfig, &str) -> Result<Box<dyn Logger>>;

pub fn register_defaults(registry: &mut Registry<LoggerBuilder>) -> Result<()> {
    registry.register("txt_logger", txt_logger)?;
    registry.register("console_logger", console_logger)?;
    Ok(())
}

fn format_scalars(step: usize, scalars: &BTreeMap<String, f64>) -> String {
    let values: Vec<String> = scalars.iter().map(|(k, v)| format!("{}: {:.6}", k, v)).collect();
    format!("step {} | {}", step, values.join(", "))
}

/// Appends every line to `<dir>/<exp_name>.txt` and mirrors it to `log`.
pub struct TxtLogger {
    path: PathBuf,
    writer: Option<LineWriter<File>>,
}

impl TxtLogger {
    pub fn new(dir: &Path, exp_name: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.txt", exp_name));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Some(LineWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Logger for TxtLogger {
    fn log(&mut self, msg: &str) {
        log::info!("{}", msg);
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writeln!(writer, "{}", msg) {
                log::warn!("cannot write to {:?}: {}", self.path, e);
            }
        }
    }

    fn add_scalars(&mut self, step: usize, scalars: &BTreeMap<String, f64>) {
        self.log(&format_scalars(step, scalars));
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                log::warn!("cannot flush {:?}: {}", self.path, e);
            }
        }
    }
}

pub fn txt_logger(cfg: &LoggerConfig, exp_name: &str) -> Result<Box<dyn Logger>> {
    Ok(Box::new(TxtLogger::new(Path::new(&cfg.file_path), exp_name)?))
}

#[derive(Debug, Default)]
pub struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn log(&mut self, msg: &str) {
        log::info!("{}", msg);
    }

    fn add_scalars(&mut self, step: usize, scalars: &BTreeMap<String, f64>) {
        log::info!("{}", format_scalars(step, scalars));
    }

    fn close(&mut self) {}
}

pub fn console_logger(_cfg: &LoggerConfig, _exp_name: &str) -> Result<Box<dyn Logger>> {
    Ok(Box::new(ConsoleLogger))
}
