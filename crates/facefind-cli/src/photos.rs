use facefind_core::PhotoInput;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "bmp"];

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Expand the command-line photo arguments into the batch, in a stable order.
///
/// Directories contribute their image files (non-recursive, sorted by path);
/// files are taken as given. Repeated paths keep their first position.
pub fn collect_photo_inputs(args: &[PathBuf]) -> std::io::Result<Vec<PhotoInput>> {
    let mut seen = HashSet::new();
    let mut inputs = Vec::new();

    for arg in args {
        let paths = if arg.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(arg)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image_path(p))
                .collect();
            entries.sort();
            tracing::debug!(dir = %arg.display(), images = entries.len(), "scanned photo directory");
            entries
        } else {
            vec![arg.clone()]
        };

        for path in paths {
            if seen.insert(path.clone()) {
                inputs.push(PhotoInput::from_path(path));
            }
        }
    }

    Ok(inputs)
}
