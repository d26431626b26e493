//! Page boxes, inherited page attributes and physical page sizes.

use lopdf::{Document, Object, ObjectId};

use super::PdfError;

/// Page attributes a page may inherit from its ancestors in the page tree.
pub(crate) const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Boxes rescaled together with the page content.
pub(crate) const PAGE_BOXES: [&[u8]; 5] = [b"MediaBox", b"CropBox", b"BleedBox", b"TrimBox", b"ArtBox"];

/// Maximum page-tree depth followed when resolving inherited attributes.
const MAX_TREE_DEPTH: usize = 64;

/// Physical page dimensions in PDF points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// US Letter, the fallback when a page declares no MediaBox.
    pub fn letter() -> Self {
        Self::new(612.0, 792.0)
    }

    /// Compare dimensions within an absolute tolerance in points.
    pub fn approx_eq(&self, other: &PageSize, tolerance: f32) -> bool {
        (self.width - other.width).abs() <= tolerance
            && (self.height - other.height).abs() <= tolerance
    }
}

/// A page box as `[x0, y0, x1, y1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PageRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl PageRect {
    pub fn width(&self) -> f32 {
        (self.x1 - self.x0).abs()
    }

    pub fn height(&self) -> f32 {
        (self.y1 - self.y0).abs()
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x0: self.x0 * sx,
            y0: self.y0 * sy,
            x1: self.x1 * sx,
            y1: self.y1 * sy,
        }
    }

    pub fn to_object(self) -> Object {
        Object::Array(vec![
            self.x0.into(),
            self.y0.into(),
            self.x1.into(),
            self.y1.into(),
        ])
    }

    fn from_object(doc: &Document, obj: &Object) -> Option<Self> {
        let values = resolve(doc, obj).as_array().ok()?;
        if values.len() != 4 {
            return None;
        }
        let mut coords = [0f32; 4];
        for (slot, value) in coords.iter_mut().zip(values) {
            *slot = resolve(doc, value).as_float().ok()?;
        }
        let rect = Self {
            x0: coords[0],
            y0: coords[1],
            x1: coords[2],
            y1: coords[3],
        };
        (rect.width() > 0.0 && rect.height() > 0.0).then_some(rect)
    }
}

/// Follow a single indirect reference.
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

/// Look up a page attribute, walking up `Parent` links when the page
/// itself does not define it.
pub(crate) fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value);
        }
        let parent = current.get(b"Parent").and_then(Object::as_reference).ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

pub(crate) fn page_box(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<PageRect> {
    inherited(doc, page_id, key).and_then(|obj| PageRect::from_object(doc, obj))
}

fn rotation(doc: &Document, page_id: ObjectId) -> i64 {
    inherited(doc, page_id, b"Rotate")
        .and_then(|obj| resolve(doc, obj).as_i64().ok())
        .unwrap_or(0)
        .rem_euclid(360)
}

/// Displayed size of a page: the CropBox (or MediaBox), with width and height
/// swapped for pages rotated by 90 or 270 degrees.
pub(crate) fn page_size(doc: &Document, page_id: ObjectId) -> Option<PageSize> {
    let rect = page_box(doc, page_id, b"CropBox").or_else(|| page_box(doc, page_id, b"MediaBox"))?;
    let size = match rotation(doc, page_id) {
        90 | 270 => PageSize::new(rect.height(), rect.width()),
        _ => PageSize::new(rect.width(), rect.height()),
    };
    Some(size)
}

/// Physical sizes of every page in page order.
pub(crate) fn page_sizes(doc: &Document) -> Result<Vec<PageSize>, PdfError> {
    doc.get_pages()
        .values()
        .enumerate()
        .map(|(page_index, page_id)| {
            page_size(doc, *page_id).ok_or(PdfError::InvalidPageBox { page_index })
        })
        .collect()
}

/// Copy inherited attributes onto the page dictionary so the page can be
/// detached from its original page tree.
pub(crate) fn flatten_inherited(doc: &mut Document, page_id: ObjectId) {
    let mut resolved = Vec::new();
    {
        let Ok(page) = doc.get_dictionary(page_id) else {
            return;
        };
        for key in INHERITABLE {
            if page.has(key) {
                continue;
            }
            if let Some(value) = inherited(doc, page_id, key) {
                resolved.push((key.to_vec(), value.clone()));
            }
        }
    }

    if let Ok(page) = doc.get_dictionary_mut(page_id) {
        for (key, value) in resolved {
            page.set(key, value);
        }
    }
}
