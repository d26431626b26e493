//! Builds an output PDF from single-page OCR overlays.

use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use super::geometry::{self, PageRect, PageSize, PAGE_BOXES};
use super::PdfError;

/// Accumulates pages imported from other PDFs into one document.
///
/// Pages are appended in call order; the caller is responsible for calling
/// [`append_page`](Self::append_page) in source page order.
pub struct PdfAssembler {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<ObjectId>,
}

impl Default for PdfAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfAssembler {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Import the first page of `page_pdf`, scaled so its MediaBox measures
    /// exactly `target`.
    pub fn append_page(&mut self, page_pdf: &[u8], target: PageSize) -> Result<(), PdfError> {
        let mut page_doc = Document::load_mem(page_pdf).map_err(PdfError::Parse)?;
        page_doc.renumber_objects_with(self.doc.max_id + 1);

        let page_id = *page_doc.get_pages().values().next().ok_or(PdfError::NoPages)?;
        geometry::flatten_inherited(&mut page_doc, page_id);
        scale_page_to(&mut page_doc, page_id, target, self.kids.len())?;

        for (id, object) in std::mem::take(&mut page_doc.objects) {
            if is_tree_node(&object) {
                continue;
            }
            self.doc.objects.insert(id, object);
        }
        self.doc.max_id = self.doc.max_id.max(page_doc.max_id);

        let page = self
            .doc
            .get_dictionary_mut(page_id)
            .map_err(PdfError::Parse)?;
        page.set("Parent", self.pages_id);
        self.kids.push(page_id);

        Ok(())
    }

    /// Serialize the assembled document.
    pub fn to_bytes(mut self) -> Result<Vec<u8>, PdfError> {
        let kids: Vec<Object> = self.kids.iter().map(|&id| id.into()).collect();
        let count = kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| PdfError::Serialize(e.to_string()))?;
        Ok(buffer)
    }
}

/// Catalog and page-tree nodes of an imported document are replaced by the
/// assembler's own.
fn is_tree_node(object: &Object) -> bool {
    let Object::Dictionary(dict) = object else {
        return false;
    };
    matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(b"Catalog") | Ok(b"Pages")
    )
}

/// Scale a page's content and boxes so its MediaBox becomes `target`.
fn scale_page_to(
    doc: &mut Document,
    page_id: ObjectId,
    target: PageSize,
    page_index: usize,
) -> Result<(), PdfError> {
    let media = geometry::page_box(doc, page_id, b"MediaBox").unwrap_or(PageRect {
        x0: 0.0,
        y0: 0.0,
        x1: PageSize::letter().width,
        y1: PageSize::letter().height,
    });
    let sx = target.width / media.width();
    let sy = target.height / media.height();
    if !sx.is_finite() || !sy.is_finite() || sx <= 0.0 || sy <= 0.0 {
        return Err(PdfError::InvalidPageBox { page_index });
    }

    let boxes: Vec<(&[u8], PageRect)> = PAGE_BOXES
        .iter()
        .filter_map(|key| geometry::page_box(doc, page_id, key).map(|rect| (*key, rect)))
        .collect();
    let existing = content_refs(doc, page_id);

    let prefix = doc.add_object(Stream::new(
        dictionary! {},
        format!("q {:.6} 0 0 {:.6} 0 0 cm\n", sx, sy).into_bytes(),
    ));
    let suffix = doc.add_object(Stream::new(dictionary! {}, b"\nQ\n".to_vec()));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(prefix));
    contents.extend(existing);
    contents.push(Object::Reference(suffix));

    let page = doc.get_dictionary_mut(page_id).map_err(PdfError::Parse)?;
    page.set("Contents", Object::Array(contents));
    for (key, rect) in boxes {
        page.set(key, rect.scaled(sx, sy).to_object());
    }
    if !page.has(b"MediaBox") {
        page.set("MediaBox", media.scaled(sx, sy).to_object());
    }

    Ok(())
}

/// The page's content streams as a flat list of objects.
fn content_refs(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    match page.get(b"Contents") {
        Ok(Object::Array(items)) => items.clone(),
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(other) => vec![other.clone()],
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::geometry::page_sizes;
    use crate::pdf::test_support::text_pdf_sized;

    fn page_texts(bytes: &[u8]) -> Vec<String> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .keys()
            .map(|n| doc.extract_text(&[*n]).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_append_scales_to_target() {
        // An overlay rendered at 150 DPI from a Letter page
        let overlay = text_pdf_sized(&["overlay"], &[(1275.0, 1650.0)]);

        let mut assembler = PdfAssembler::new();
        assembler
            .append_page(&overlay, PageSize::new(612.0, 792.0))
            .unwrap();
        let bytes = assembler.to_bytes().unwrap();

        let doc = Document::load_mem(&bytes).unwrap();
        let sizes = page_sizes(&doc).unwrap();
        assert_eq!(sizes.len(), 1);
        assert!(sizes[0].approx_eq(&PageSize::new(612.0, 792.0), 0.01));
    }

    #[test]
    fn test_pages_keep_append_order() {
        let mut assembler = PdfAssembler::new();
        for label in ["first", "second", "third"] {
            let overlay = text_pdf_sized(&[label], &[(200.0, 300.0)]);
            assembler
                .append_page(&overlay, PageSize::new(400.0, 600.0))
                .unwrap();
        }
        assert_eq!(assembler.page_count(), 3);

        let texts = page_texts(&assembler.to_bytes().unwrap());
        assert_eq!(texts.len(), 3);
        assert!(texts[0].contains("first"));
        assert!(texts[1].contains("second"));
        assert!(texts[2].contains("third"));
    }

    #[test]
    fn test_append_rejects_garbage() {
        let mut assembler = PdfAssembler::new();
        let err = assembler
            .append_page(b"not a pdf", PageSize::letter())
            .unwrap_err();
        assert!(matches!(err, PdfError::Parse(_)));
        assert_eq!(assembler.page_count(), 0);
    }
}
