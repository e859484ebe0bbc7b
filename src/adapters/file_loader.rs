use crate::utils::error::{PipelineError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static DOCX_PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<w:p(?:\s[^>]*?)?(?:/>|>(.*?)</w:p>)").expect("valid paragraph regex")
});

static DOCX_RUN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:tab/>|<w:br(?:\s[^>]*)?/>")
        .expect("valid run regex")
});

/// 支援的筆記格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NoteFormat {
    Text,
    Pdf,
    Docx,
}

impl NoteFormat {
    fn detect(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            None => Some(NoteFormat::Text),
            Some(ext) => match ext.to_ascii_lowercase().as_str() {
                "txt" => Some(NoteFormat::Text),
                "pdf" => Some(NoteFormat::Pdf),
                "docx" => Some(NoteFormat::Docx),
                _ => None,
            },
        }
    }
}

/// Loads clinical notes (TXT, PDF, DOCX) from a single directory.
#[derive(Debug, Clone)]
pub struct FileLoader {
    input_dir: PathBuf,
}

impl FileLoader {
    pub fn new(input_dir: impl Into<PathBuf>) -> Result<Self> {
        let input_dir = input_dir.into();
        if !input_dir.is_dir() {
            return Err(PipelineError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Input directory not found: {}", input_dir.display()),
            )));
        }
        Ok(Self { input_dir })
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Map of file name to trimmed note text. Unreadable files are logged and skipped.
    pub fn load_files(&self) -> Result<BTreeMap<String, String>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.input_dir)? {
            let path = entry?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        tracing::info!("📂 Found {} files in {}", paths.len(), self.input_dir.display());

        let mut notes = BTreeMap::new();
        for path in paths {
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => {
                    tracing::warn!("Skipping file with non UTF-8 name: {}", path.display());
                    continue;
                }
            };

            let Some(format) = NoteFormat::detect(&path) else {
                tracing::warn!("Skipping unsupported file: {}", name);
                continue;
            };

            match load_note(&path, format) {
                Ok(content) => {
                    tracing::debug!("Loaded: {}", name);
                    notes.insert(name, content.trim().to_string());
                }
                Err(e) => tracing::error!("❌ Failed to load {}: {}", name, e),
            }
        }

        tracing::info!("✅ Successfully loaded {} files", notes.len());
        Ok(notes)
    }

    /// `load_files` on the blocking pool; PDF extraction can take a while.
    pub async fn load_files_blocking(self) -> Result<BTreeMap<String, String>> {
        tokio::task::spawn_blocking(move || self.load_files())
            .await
            .map_err(|e| PipelineError::processing(format!("File loading task failed: {}", e)))?
    }
}

fn load_note(path: &Path, format: NoteFormat) -> Result<String> {
    match format {
        NoteFormat::Text => Ok(fs::read_to_string(path)?),
        NoteFormat::Pdf => load_pdf(path),
        NoteFormat::Docx => load_docx(path),
    }
}

/// Text of every page, in page order.
pub fn load_pdf(path: &Path) -> Result<String> {
    let document_error = |message: String| PipelineError::DocumentError {
        file: path.display().to_string(),
        message,
    };
    // pdf-extract 遇到部分損壞檔案會 panic，視同讀取失敗
    match std::panic::catch_unwind(|| pdf_extract::extract_text(path)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(document_error(e.to_string())),
        Err(_) => Err(document_error("PDF parser panicked".to_string())),
    }
}

/// Paragraph texts of `word/document.xml`, joined with newlines.
pub fn load_docx(path: &Path) -> Result<String> {
    let file = fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")?
        .read_to_string(&mut xml)?;
    Ok(docx_paragraphs(&xml).join("\n"))
}

fn docx_paragraphs(xml: &str) -> Vec<String> {
    DOCX_PARAGRAPH
        .captures_iter(xml)
        .map(|para| {
            let body = para.get(1).map(|m| m.as_str()).unwrap_or("");
            let mut text = String::new();
            for run in DOCX_RUN_TEXT.captures_iter(body) {
                match run.get(1) {
                    Some(t) => text.push_str(&unescape_xml(t.as_str())),
                    None if run[0].starts_with("<w:tab") => text.push('\t'),
                    None => text.push('\n'),
                }
            }
            text
        })
        .collect()
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::{FileOptions, ZipWriter};

    /// Two pages: "Assessment/Plan: Diabetes" then "Hypertension".
    const SAMPLE_PDF: &[u8] = include_bytes!("../../tests/fixtures/sample_note.pdf");

    fn write_docx(path: &Path, body: &str) {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        );
        let file = fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        zip.start_file::<_, ()>("word/document.xml", FileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_missing_input_dir() {
        let temp_dir = TempDir::new().unwrap();
        let err = FileLoader::new(temp_dir.path().join("missing")).unwrap_err();
        assert!(err.to_string().contains("Input directory not found"));
    }

    #[test]
    fn test_load_txt_and_extensionless_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("note.txt"), "Assessment/Plan: Diabetes\n").unwrap();
        fs::write(temp_dir.path().join("NOTE2.TXT"), "  upper case  ").unwrap();
        fs::write(temp_dir.path().join("progress"), "no extension").unwrap();

        let notes = FileLoader::new(temp_dir.path()).unwrap().load_files().unwrap();

        assert_eq!(notes.len(), 3);
        assert_eq!(notes["note.txt"], "Assessment/Plan: Diabetes");
        assert_eq!(notes["NOTE2.TXT"], "upper case");
        assert_eq!(notes["progress"], "no extension");
    }

    #[test]
    fn test_unsupported_and_broken_files_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("image.png"), [0u8, 1, 2]).unwrap();
        fs::write(temp_dir.path().join("broken.docx"), "not a zip").unwrap();
        fs::write(temp_dir.path().join("ok.txt"), "fine").unwrap();
        fs::create_dir(temp_dir.path().join("subdir")).unwrap();

        let notes = FileLoader::new(temp_dir.path()).unwrap().load_files().unwrap();

        assert_eq!(notes.keys().collect::<Vec<_>>(), vec!["ok.txt"]);
    }

    #[test]
    fn test_load_docx_paragraphs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("visit.docx");
        write_docx(
            &path,
            r#"<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Assessment/Plan</w:t></w:r></w:p><w:p/><w:p><w:r><w:t xml:space="preserve">Type 2 </w:t></w:r><w:r><w:t>diabetes &amp; CKD</w:t></w:r></w:p>"#,
        );

        let text = load_docx(&path).unwrap();
        assert_eq!(text, "Assessment/Plan\n\nType 2 diabetes & CKD");

        let notes = FileLoader::new(temp_dir.path()).unwrap().load_files().unwrap();
        assert_eq!(notes["visit.docx"], "Assessment/Plan\n\nType 2 diabetes & CKD");
    }

    #[test]
    fn test_docx_tabs_and_breaks() {
        let paragraphs = docx_paragraphs(
            r#"<w:p w14:paraId="1"><w:r><w:t>A</w:t><w:tab/><w:t>B</w:t><w:br/><w:t>C</w:t></w:r></w:p>"#,
        );
        assert_eq!(paragraphs, vec!["A\tB\nC".to_string()]);
    }

    #[test]
    fn test_load_pdf_reads_every_page() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("visit.pdf");
        fs::write(&path, SAMPLE_PDF).unwrap();

        let text = load_pdf(&path).unwrap();
        let first = text.find("Assessment/Plan: Diabetes").unwrap();
        let second = text.find("Hypertension").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_pdf_detection_ignores_case_and_trims() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("VISIT.PDF"), SAMPLE_PDF).unwrap();

        let notes = FileLoader::new(temp_dir.path()).unwrap().load_files().unwrap();

        let text = &notes["VISIT.PDF"];
        assert!(text.starts_with("Assessment/Plan: Diabetes"));
        assert!(text.ends_with("Hypertension"));
        assert_eq!(text.trim(), text);
    }

    #[test]
    fn test_corrupt_pdf_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("broken.pdf"), "%PDF-1.4 not really").unwrap();
        fs::write(temp_dir.path().join("good.pdf"), SAMPLE_PDF).unwrap();
        fs::write(temp_dir.path().join("note.txt"), "fine").unwrap();

        let notes = FileLoader::new(temp_dir.path()).unwrap().load_files().unwrap();

        assert_eq!(notes.keys().collect::<Vec<_>>(), vec!["good.pdf", "note.txt"]);
    }

    #[tokio::test]
    async fn test_load_files_off_the_runtime() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.pdf"), SAMPLE_PDF).unwrap();
        fs::write(temp_dir.path().join("b.txt"), " text ").unwrap();

        let notes = FileLoader::new(temp_dir.path())
            .unwrap()
            .load_files_blocking()
            .await
            .unwrap();

        assert_eq!(notes.len(), 2);
        assert_eq!(notes["b.txt"], "text");
        assert!(notes["a.pdf"].contains("Hypertension"));
    }
}
