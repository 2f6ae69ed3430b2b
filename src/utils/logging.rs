//! Plain-text transcript of a chat session, appended as messages finish.

use crate::core::message::{ChatMessage, Role};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

pub struct LoggingState {
    file_path: Option<String>,
    is_active: bool,
}

impl LoggingState {
    pub fn new(log_file: Option<String>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut logging = LoggingState::disabled();
        if let Some(path) = log_file {
            logging.set_log_file(path)?;
        }
        Ok(logging)
    }

    pub fn disabled() -> Self {
        LoggingState {
            file_path: None,
            is_active: false,
        }
    }

    pub fn set_log_file(&mut self, path: String) -> Result<String, Box<dyn std::error::Error>> {
        self.test_file_access(&path)?;

        self.file_path = Some(path.clone());
        self.is_active = true;

        Ok(format!("Logging enabled to: {path}"))
    }

    pub fn toggle_logging(&mut self) -> Result<String, Box<dyn std::error::Error>> {
        match &self.file_path {
            Some(path) => {
                if self.is_active {
                    self.is_active = false;
                    Ok(format!("Logging paused (file: {path})"))
                } else {
                    self.is_active = true;
                    Ok(format!("Logging resumed to: {path}"))
                }
            }
            None => {
                Err("No log file specified. Use /log <filename> to enable logging first.".into())
            }
        }
    }

    /// Append one finished message. Empty assistant replies are skipped.
    pub fn log_chat_message(&self, message: &ChatMessage) -> Result<(), Box<dyn std::error::Error>> {
        match format_entry(message) {
            Some(entry) => self.log_message(&entry),
            None => Ok(()),
        }
    }

    pub fn log_message(&self, content: &str) -> Result<(), Box<dyn std::error::Error>> {
        let Some(file_path) = self.active_path() else {
            return Ok(());
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);
        write_entry(&mut writer, content)?;
        writer.flush()?;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn get_status_string(&self) -> String {
        match (&self.file_path, self.is_active) {
            (None, _) => "disabled".to_string(),
            (Some(path), true) => format!("active ({})", file_name(path)),
            (Some(path), false) => format!("paused ({})", file_name(path)),
        }
    }

    /// Replace the transcript with the current log, e.g. after `/clear`.
    pub fn rewrite_log<'a>(
        &self,
        messages: impl IntoIterator<Item = &'a ChatMessage>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let Some(file_path) = self.active_path() else {
            return Ok(());
        };

        let target_path = Path::new(file_path);
        let parent = match target_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        // Same directory so the final rename is atomic.
        let mut temp_file = NamedTempFile::new_in(parent)?;
        for message in messages {
            if let Some(entry) = format_entry(message) {
                write_entry(&mut temp_file, &entry)?;
            }
        }
        temp_file.flush()?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(file_path)?;

        Ok(())
    }

    fn active_path(&self) -> Option<&str> {
        if self.is_active {
            self.file_path.as_deref()
        } else {
            None
        }
    }

    fn test_file_access(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.flush()?;
        Ok(())
    }
}

fn format_entry(message: &ChatMessage) -> Option<String> {
    match message.role {
        Role::User => Some(format!("You: {}", message.text)),
        Role::Assistant if message.text.is_empty() => None,
        Role::Assistant => Some(message.text.clone()),
        Role::System => Some(format!("## {}", message.text)),
    }
}

fn write_entry(writer: &mut impl Write, content: &str) -> std::io::Result<()> {
    for line in content.lines() {
        writeln!(writer, "{line}")?;
    }
    // Blank line between messages, matching the screen.
    writeln!(writer)
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}
