//! Helpers for tests: synthesized PDFs and output-directory inspection.

use std::path::Path;

use walkdir::WalkDir;

/// Build a well-formed PDF with one page per `(width, height)` entry, in points.
///
/// Every page paints a filled rectangle so the rendered image is not blank.
pub(crate) fn pdf_with_pages(sizes: &[(u32, u32)]) -> Vec<u8> {
    let page_count = sizes.len();
    // 1: catalog, 2: page tree, then a (page, content) pair per page.
    let page_id = |i: usize| 3 + 2 * i;
    let content_id = |i: usize| 4 + 2 * i;

    let mut objects: Vec<String> = Vec::with_capacity(2 + 2 * page_count);
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());

    let kids = (0..page_count)
        .map(|i| format!("{} 0 R", page_id(i)))
        .collect::<Vec<_>>()
        .join(" ");
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids, page_count
    ));

    for (i, (width, height)) in sizes.iter().enumerate() {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] /Resources << >> /Contents {} 0 R >>",
            width,
            height,
            content_id(i)
        ));
        let stream = format!("0 0 1 rg 10 10 {} {} re f", width / 2, height / 2);
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            stream.len(),
            stream
        ));
    }

    let mut out = b"%PDF-1.7\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );
    out
}

/// A4 in points.
pub(crate) const A4: (u32, u32) = (595, 842);

/// File names directly inside `dir`, sorted.
pub(crate) fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Pixel dimensions of a PNG on disk.
pub(crate) fn png_size(path: &Path) -> (usize, usize) {
    let size = imagesize::size(path).unwrap();
    (size.width, size.height)
}
