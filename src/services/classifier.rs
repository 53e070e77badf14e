//! Decide whether a store object is an image.

use crate::models::object::DiscoveredObject;

const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif"];

/// A declared content type wins; otherwise fall back to the key's extension.
pub fn is_image(object: &DiscoveredObject) -> bool {
    is_image_key(&object.key, object.content_type.as_deref())
}

pub fn is_image_key(key: &str, content_type: Option<&str>) -> bool {
    match content_type.map(str::trim) {
        Some(ct) if !ct.is_empty() => ct.starts_with("image/"),
        _ => has_image_extension(key),
    }
}

fn has_image_extension(key: &str) -> bool {
    let name = crate::models::object::basename(key);
    match name.rsplit_once('.') {
        // A leading dot marks a hidden file, not an extension.
        Some((stem, ext)) if !stem.is_empty() => IMAGE_EXTENSIONS
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(ext)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(key: &str, ct: Option<&str>) -> DiscoveredObject {
        DiscoveredObject::new(key, 10, ct.map(str::to_string))
    }

    #[test]
    fn content_type_decides_when_present() {
        assert!(is_image(&obj("blob", Some("image/png"))));
        assert!(!is_image(&obj("photo.jpg", Some("application/octet-stream"))));
    }

    #[test]
    fn extension_is_case_insensitive() {
        assert!(is_image(&obj("photo.JPEG", None)));
        assert!(is_image(&obj("dir/scan.TiF", None)));
        assert!(!is_image(&obj("a.txt", None)));
    }

    #[test]
    fn empty_content_type_falls_back_to_extension() {
        assert!(is_image(&obj("x.webp", Some(""))));
        assert!(!is_image(&obj("x", Some(""))));
    }

    #[test]
    fn no_extension_is_not_an_image() {
        assert!(!is_image(&obj("README", None)));
        assert!(!is_image(&obj("photos.png/README", None)));
        assert!(!is_image(&obj("trailing.", None)));
        assert!(!is_image(&obj("dir/.png", None)));
    }
}
