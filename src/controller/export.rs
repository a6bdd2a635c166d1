/*!
 * Packaging of finished translations through an external converter.
 */

use async_trait::async_trait;
use log::{debug, info};
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use tokio::process::Command;

use crate::errors::ExportError;

/// Packaged document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Epub,
    Pdf,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Epub => "epub",
            Self::Pdf => "pdf",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "epub" => Ok(Self::Epub),
            "pdf" => Ok(Self::Pdf),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Document metadata passed to the converter
#[derive(Debug, Clone)]
pub struct ExportMetadata {
    pub title: String,
    /// Language code of the translation
    pub language: String,
}

/// Converts a markdown document into a packaged format
#[async_trait]
pub trait DocumentExporter: Send + Sync {
    async fn export(
        &self,
        input: &Path,
        output: &Path,
        format: ExportFormat,
        metadata: &ExportMetadata,
    ) -> Result<(), ExportError>;
}

/// Exporter backed by the `pandoc` binary
#[derive(Debug, Clone)]
pub struct PandocExporter {
    program: String,
}

impl Default for PandocExporter {
    fn default() -> Self {
        Self {
            program: "pandoc".to_string(),
        }
    }
}

impl PandocExporter {
    /// Use a specific converter binary
    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    /// Converter arguments for one export
    pub fn build_args(input: &Path, output: &Path, format: ExportFormat, metadata: &ExportMetadata) -> Vec<String> {
        let resource_dir = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut args = vec![
            input.to_string_lossy().into_owned(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
            "--resource-path".to_string(),
            resource_dir.to_string_lossy().into_owned(),
            "--metadata".to_string(),
            format!("title={}", metadata.title),
        ];
        match format {
            ExportFormat::Epub => args.push("--epub-chapter-level=1".to_string()),
            ExportFormat::Pdf => args.push("--pdf-engine=xelatex".to_string()),
        }
        args.extend(["-V".to_string(), format!("lang={}", metadata.language)]);
        args
    }
}

#[async_trait]
impl DocumentExporter for PandocExporter {
    async fn export(
        &self,
        input: &Path,
        output: &Path,
        format: ExportFormat,
        metadata: &ExportMetadata,
    ) -> Result<(), ExportError> {
        let ready = std::fs::metadata(input).map(|m| m.len() > 0).unwrap_or(false);
        if !ready {
            return Err(ExportError::NotReady(input.to_path_buf()));
        }

        let args = Self::build_args(input, output, format, metadata);
        debug!("Running {} {}", self.program, args.join(" "));

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ExportError::ConverterMissing(self.program.clone()),
                _ => ExportError::Io(e),
            })?;

        if !result.status.success() {
            let stderr: String = String::from_utf8_lossy(&result.stderr).chars().take(400).collect();
            return Err(ExportError::ConverterFailed {
                status: result.status.code().unwrap_or(-1),
                stderr,
            });
        }

        info!("Exported {:?} to {:?}", input, output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metadata() -> ExportMetadata {
        ExportMetadata {
            title: "Книга".to_string(),
            language: "uk".to_string(),
        }
    }

    #[test]
    fn test_buildArgs_shouldSelectFormatOptions() {
        let epub = PandocExporter::build_args(Path::new("/j/out/book.md"), Path::new("/j/out/b.epub"), ExportFormat::Epub, &metadata());
        assert!(epub.contains(&"--epub-chapter-level=1".to_string()));
        assert!(epub.contains(&"lang=uk".to_string()));
        assert!(epub.contains(&"/j/out".to_string()));

        let pdf = PandocExporter::build_args(Path::new("book.md"), Path::new("b.pdf"), ExportFormat::Pdf, &metadata());
        assert!(pdf.contains(&"--pdf-engine=xelatex".to_string()));
        assert!(pdf.contains(&".".to_string()));
    }

    #[test]
    fn test_exportFormat_shouldParseCaseInsensitively() {
        assert_eq!("EPUB".parse::<ExportFormat>().unwrap(), ExportFormat::Epub);
        assert!(matches!("docx".parse::<ExportFormat>(), Err(ExportError::UnsupportedFormat(_))));
    }

    #[tokio::test]
    async fn test_export_withEmptyInput_shouldBeNotReady() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("book.md");
        std::fs::write(&input, "").unwrap();

        let result = PandocExporter::default()
            .export(&input, &dir.path().join("book.epub"), ExportFormat::Epub, &metadata())
            .await;
        assert!(matches!(result, Err(ExportError::NotReady(_))));
    }

    #[tokio::test]
    async fn test_export_withMissingConverter_shouldBeConverterMissing() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("book.md");
        std::fs::write(&input, "# Title").unwrap();

        let result = PandocExporter::with_program("booktrans-no-such-converter")
            .export(&input, &dir.path().join("book.epub"), ExportFormat::Epub, &metadata())
            .await;
        assert!(matches!(result, Err(ExportError::ConverterMissing(_))));
    }
}
