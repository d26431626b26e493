//! Word (.docx) package access: paragraph text, embedded images, and writing
//! a plain paragraph document.
//!
//! A .docx file is a ZIP archive; body text lives in `word/document.xml` as
//! WordprocessingML and images under `word/media/`, referenced from the body
//! through relationship ids in `word/_rels/document.xml.rels`.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const DOCUMENT_PART: &str = "word/document.xml";
const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";
const MEDIA_PREFIX: &str = "word/media/";
const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

const WORDML_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const PACKAGE_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

#[derive(Debug, Error)]
pub enum DocxError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a valid Word package: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Word package is missing {0}")]
    MissingPart(&'static str),

    #[error("malformed WordprocessingML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An image embedded in a Word package.
#[derive(Debug, Clone)]
pub struct MediaImage {
    /// Part name inside the archive, e.g. `word/media/image1.png`
    pub name: String,
    pub data: Vec<u8>,
}

/// Read a .docx file from disk
pub fn read_file(path: &Path) -> Result<Vec<u8>, DocxError> {
    std::fs::read(path).map_err(|source| DocxError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn read_part(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Option<String>, DocxError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(Some(content))
}

/// Text of every body paragraph, in document order.
///
/// Runs are concatenated; `w:tab` becomes a tab and `w:br`/`w:cr` a newline.
pub fn read_paragraphs(docx_bytes: &[u8]) -> Result<Vec<String>, DocxError> {
    let mut archive = ZipArchive::new(Cursor::new(docx_bytes))?;
    let xml = read_part(&mut archive, DOCUMENT_PART)?.ok_or(DocxError::MissingPart(DOCUMENT_PART))?;
    parse_paragraphs(&xml)
}

/// True if any paragraph has non-whitespace text.
pub fn has_text(docx_bytes: &[u8]) -> Result<bool, DocxError> {
    Ok(read_paragraphs(docx_bytes)?
        .iter()
        .any(|p| !p.trim().is_empty()))
}

fn parse_paragraphs(xml: &str) -> Result<Vec<String>, DocxError> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    // Text boxes nest paragraphs inside paragraphs
    let mut open: Vec<String> = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:p" => open.push(String::new()),
                b"w:t" => in_text = true,
                _ => {}
            },
            Event::Empty(e) => match (e.name().as_ref(), open.last_mut()) {
                (b"w:p", _) => paragraphs.push(String::new()),
                (b"w:tab", Some(text)) => text.push('\t'),
                (b"w:br" | b"w:cr", Some(text)) => text.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                if let Some(text) = open.last_mut() {
                    text.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    if let Some(text) = open.pop() {
                        paragraphs.push(text);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs)
}

fn is_image_part(name: &str) -> bool {
    name.starts_with(MEDIA_PREFIX)
        && Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

/// Relationship id → archive part name, for relationships targeting media.
fn parse_media_relationships(xml: &str) -> Result<HashMap<String, String>, DocxError> {
    let mut reader = Reader::from_str(xml);
    let mut rels = HashMap::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Relationship" => {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    match attr.key.as_ref() {
                        b"Id" => id = Some(attr.unescape_value()?.into_owned()),
                        b"Target" => target = Some(attr.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    let part = format!("word/{}", target.trim_start_matches('/').trim_start_matches("word/"));
                    if part.starts_with(MEDIA_PREFIX) {
                        rels.insert(id, part);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(rels)
}

/// Relationship ids of `a:blip` / `v:imagedata` elements in body order.
fn parse_image_refs(xml: &str) -> Result<Vec<String>, DocxError> {
    let mut reader = Reader::from_str(xml);
    let mut refs = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e)
                if matches!(e.name().as_ref(), b"a:blip" | b"v:imagedata") =>
            {
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    if matches!(attr.key.as_ref(), b"r:embed" | b"r:id") {
                        refs.push(attr.unescape_value()?.into_owned());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(refs)
}

/// Sort key that orders `image2.png` before `image10.png`.
fn natural_key(name: &str) -> (String, u64) {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let digits_at = stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let number = stem[digits_at..].parse().unwrap_or(0);
    (stem[..digits_at].to_string(), number)
}

/// Embedded images in reading order.
///
/// Images referenced from the body come first, in the order they appear;
/// unreferenced media follow in natural name order.
pub fn media_images(docx_bytes: &[u8]) -> Result<Vec<MediaImage>, DocxError> {
    let mut archive = ZipArchive::new(Cursor::new(docx_bytes))?;

    let mut order: Vec<String> = Vec::new();
    if let (Some(body), Some(rels)) = (
        read_part(&mut archive, DOCUMENT_PART)?,
        read_part(&mut archive, DOCUMENT_RELS_PART)?,
    ) {
        let rels = parse_media_relationships(&rels)?;
        let mut seen = HashSet::new();
        for rel_id in parse_image_refs(&body)? {
            if let Some(part) = rels.get(&rel_id) {
                if is_image_part(part) && seen.insert(part.clone()) {
                    order.push(part.clone());
                }
            }
        }
    }

    let mut remaining: Vec<String> = archive
        .file_names()
        .filter(|name| is_image_part(name) && !order.iter().any(|o| o == name))
        .map(str::to_string)
        .collect();
    remaining.sort_by_key(|name| natural_key(name));
    order.extend(remaining);

    let mut images = Vec::with_capacity(order.len());
    for name in order {
        let mut file = match archive.by_name(&name) {
            Ok(file) => file,
            Err(zip::result::ZipError::FileNotFound) => continue,
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        images.push(MediaImage { name, data });
    }

    Ok(images)
}

fn document_xml(paragraphs: &[String]) -> Result<Vec<u8>, DocxError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;

    let mut document = BytesStart::new("w:document");
    document.push_attribute(("xmlns:w", WORDML_NS));
    writer.write_event(Event::Start(document))?;
    writer.write_event(Event::Start(BytesStart::new("w:body")))?;

    for paragraph in paragraphs {
        writer.write_event(Event::Start(BytesStart::new("w:p")))?;
        writer.write_event(Event::Start(BytesStart::new("w:r")))?;
        for (i, line) in paragraph.split('\n').enumerate() {
            if i > 0 {
                writer.write_event(Event::Empty(BytesStart::new("w:br")))?;
            }
            let mut text = BytesStart::new("w:t");
            text.push_attribute(("xml:space", "preserve"));
            writer.write_event(Event::Start(text))?;
            writer.write_event(Event::Text(BytesText::new(line)))?;
            writer.write_event(Event::End(BytesEnd::new("w:t")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("w:r")))?;
        writer.write_event(Event::End(BytesEnd::new("w:p")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("w:body")))?;
    writer.write_event(Event::End(BytesEnd::new("w:document")))?;

    Ok(writer.into_inner().into_inner())
}

/// Build a minimal .docx package holding one paragraph per entry.
pub fn write_docx(paragraphs: &[String]) -> Result<Vec<u8>, DocxError> {
    let body = document_xml(paragraphs)?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(CONTENT_TYPES_XML.as_bytes())?;
    zip.start_file("_rels/.rels", options)?;
    zip.write_all(PACKAGE_RELS_XML.as_bytes())?;
    zip.start_file(DOCUMENT_PART, options)?;
    zip.write_all(&body)?;

    Ok(zip.finish()?.into_inner())
}


#[cfg(test)]
mod tests {
    use super::test_support::image_only_docx;
    use super::*;

    #[test]
    fn test_write_then_read_paragraphs() {
        let paragraphs = vec![
            "Name: A & B <C>".to_string(),
            String::new(),
            "line one\nline two".to_string(),
        ];
        let bytes = write_docx(&paragraphs).unwrap();

        let read = read_paragraphs(&bytes).unwrap();
        assert_eq!(read, paragraphs);
        assert!(has_text(&bytes).unwrap());
    }

    #[test]
    fn test_blank_document_has_no_text() {
        let bytes = write_docx(&["   ".to_string(), "\t".to_string()]).unwrap();
        assert!(!has_text(&bytes).unwrap());
    }

    #[test]
    fn test_tabs_and_runs() {
        let xml = r#"<w:document xmlns:w="x"><w:body>
            <w:p><w:r><w:t>Date</w:t></w:r><w:r><w:tab/><w:t xml:space="preserve"> 01/02/1990</w:t></w:r></w:p>
            <w:p/>
        </w:body></w:document>"#;
        let paragraphs = parse_paragraphs(xml).unwrap();
        assert_eq!(paragraphs, vec!["Date\t 01/02/1990".to_string(), String::new()]);
    }

    #[test]
    fn test_not_a_zip() {
        let err = read_paragraphs(b"plain text").unwrap_err();
        assert!(matches!(err, DocxError::Zip(_)));
    }

    #[test]
    fn test_missing_document_part() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("other.xml", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"<x/>").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let err = read_paragraphs(&bytes).unwrap_err();
        assert!(matches!(err, DocxError::MissingPart(DOCUMENT_PART)));
    }

    #[test]
    fn test_media_images_follow_body_order() {
        let bytes = image_only_docx(&[
            ("image10.png", vec![1]),
            ("image2.jpeg", vec![2]),
            ("image1.png", vec![3]),
        ]);

        let images = media_images(&bytes).unwrap();
        let names: Vec<_> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "word/media/image10.png",
                "word/media/image2.jpeg",
                "word/media/image1.png"
            ]
        );
        assert_eq!(images[0].data, vec![1]);
        assert!(!has_text(&bytes).unwrap());
    }

    #[test]
    fn test_unreferenced_media_natural_order() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for name in ["image10.png", "image2.png", "notes.txt"] {
            zip.start_file(format!("{}{}", MEDIA_PREFIX, name), options)
                .unwrap();
            zip.write_all(b"x").unwrap();
        }
        let bytes = zip.finish().unwrap().into_inner();

        let names: Vec<_> = media_images(&bytes)
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["word/media/image2.png", "word/media/image10.png"]);
    }

    #[test]
    fn test_non_ascii_media_names() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for name in ["画像.png", "image2.png", "写真3.jpg"] {
            zip.start_file(format!("{}{}", MEDIA_PREFIX, name), options)
                .unwrap();
            zip.write_all(b"x").unwrap();
        }
        let bytes = zip.finish().unwrap().into_inner();

        assert_eq!(natural_key("word/media/写真3.jpg"), ("写真".to_string(), 3));
        assert_eq!(natural_key("word/media/画像.png"), ("画像".to_string(), 0));
        assert_eq!(media_images(&bytes).unwrap().len(), 3);
    }

    #[test]
    fn test_text_box_keeps_outer_paragraph() {
        let xml = r#"<w:document xmlns:w="x"><w:body>
            <w:p><w:r><w:t>before </w:t></w:r><w:r><w:txbxContent><w:p><w:r><w:t>boxed</w:t></w:r></w:p></w:txbxContent></w:r><w:r><w:t>after</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let paragraphs = parse_paragraphs(xml).unwrap();
        assert_eq!(
            paragraphs,
            vec!["boxed".to_string(), "before after".to_string()]
        );
    }
}
