use std::iter::repeat;
use std::path::{Path, PathBuf};

use base64::engine::GeneralPurpose;

pub fn find_first_subpath<P: AsRef<Path>, F: Fn(&Path) -> bool>(
    root: impl AsRef<Path>,
    subpaths: &[P],
    search: F,
) -> Option<PathBuf> {
    subpaths
        .iter()
        .zip(repeat(root.as_ref()))
        .map(|(b, a)| a.join(b))
        .find(|it: &PathBuf| search(it))
}

/// URL-safe engine shared by verification codes and certificate artifacts so
/// both can be embedded in URLs and JSON without escaping.
pub fn base64_engine() -> GeneralPurpose {
    base64::engine::GeneralPurpose::new(
        &base64::alphabet::URL_SAFE,
        base64::engine::GeneralPurposeConfig::new(),
    )
}

/// Strips everything but ASCII digits from a government ID document number.
///
/// Certificates and event attendance are keyed by the normalized form so that
/// "123.456.789-00" and "12345678900" resolve to the same holder.
pub fn normalize_id_document(raw: impl AsRef<str>) -> String {
    raw.as_ref().chars().filter(char::is_ascii_digit).collect()
}
