//! PDF text extraction

use super::IngestError;
use std::io::Write;
use std::path::Path;

/// Text of an uploaded PDF, one entry per page
#[derive(Debug)]
pub struct ExtractedPdf {
    /// Path the upload was staged at
    pub source: String,
    /// Base name of the staged file
    pub file_name: String,
    pub pages: Vec<String>,
}

/// Stage `bytes` in a temporary `.pdf` file and extract its text page by
/// page. The temporary file is removed before returning, whatever the
/// outcome.
pub fn extract_pages(bytes: &[u8]) -> Result<ExtractedPdf, IngestError> {
    extract_pages_in(&std::env::temp_dir(), bytes)
}

/// Like [`extract_pages`], staging the upload under `dir`
pub fn extract_pages_in(dir: &Path, bytes: &[u8]) -> Result<ExtractedPdf, IngestError> {
    // Dropping the handle deletes the file on every return path
    let mut file = tempfile::Builder::new()
        .prefix("ragbot-")
        .suffix(".pdf")
        .tempfile_in(dir)?;
    file.write_all(bytes)?;
    file.flush()?;

    let path = file.path().to_path_buf();
    let pages = pdf_extract::extract_text_by_pages(&path)
        .map_err(|e| IngestError::Pdf(e.to_string()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(ExtractedPdf {
        source: path.to_string_lossy().into_owned(),
        file_name,
        pages,
    })
}

/// A minimal Helvetica PDF with one text line per page
#[cfg(test)]
pub fn sample_pdf(pages: &[&str]) -> Vec<u8> {
    // Object 1 is the catalog, 2 the page tree, 3 the font; each page then
    // takes a page object followed by its content stream.
    let kids: Vec<String> = (0..pages.len())
        .map(|i| format!("{} 0 R", 4 + 2 * i))
        .collect();
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_string(),
    ];
    for (i, text) in pages.iter().enumerate() {
        let content = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET");
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
            5 + 2 * i
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{content}\nendstream",
            content.len()
        ));
    }

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
    }

    let xref_at = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        xref.push_str(&format!("{offset:010} 00000 n \n"));
    }
    xref.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
        objects.len() + 1
    ));
    out.extend_from_slice(xref.as_bytes());
    out
}
