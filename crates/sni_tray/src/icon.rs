use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum IconError {
    #[error("loading icon from file {path:?}")]
    LoadIconFromFile {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("icon {icon_name:?} not found (theme path {theme_path:?})")]
    NotFound { icon_name: String, theme_path: Option<PathBuf> },
    #[error("no icon available")]
    NotAvailable,
}

/// An RGBA8 image, row-major, without padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pixmap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Pixmap {
    /// Load a pixmap from StatusNotifierItem's [Icon format]: ARGB32 in network byte order.
    ///
    /// Returns `None` if the dimensions are not positive or don't match the amount of data.
    ///
    /// [Icon format]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/Icons/
    pub fn from_argb32(width: i32, height: i32, mut data: Vec<u8>) -> Option<Self> {
        let width = u32::try_from(width).ok().filter(|w| *w > 0)?;
        let height = u32::try_from(height).ok().filter(|h| *h > 0)?;
        if data.len() as u64 != u64::from(width) * u64::from(height) * 4 {
            return None;
        }

        for chunk in data.chunks_mut(4) {
            chunk.rotate_left(1);
        }
        Some(Self { width, height, data })
    }

    /// From the list of pixmaps an item offers (one per resolution), keep the one with the
    /// largest area. On a tie the first one wins. Malformed entries are skipped.
    pub fn from_sni_pixmaps(pixmaps: Vec<(i32, i32, Vec<u8>)>) -> Option<Self> {
        pixmaps
            .into_iter()
            .filter_map(|(w, h, data)| Pixmap::from_argb32(w, h, data))
            .fold(None, |best: Option<Pixmap>, candidate| match best {
                Some(best) if best.area() >= candidate.area() => Some(best),
                _ => Some(candidate),
            })
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Scale to `size`x`size`, or return a copy if the pixmap already has that size.
    pub fn scaled(&self, size: u32) -> Pixmap {
        if self.width == size && self.height == size {
            return self.clone();
        }
        match image::RgbaImage::from_raw(self.width, self.height, self.data.clone()) {
            Some(img) => {
                let scaled = image::imageops::resize(&img, size, size, image::imageops::FilterType::Triangle);
                Pixmap { width: size, height: size, data: scaled.into_raw() }
            }
            None => self.clone(),
        }
    }
}

/// Maps an icon name to pixels. This is the seam to whatever icon theme implementation the
/// consumer uses.
pub trait IconResolver: Send + Sync {
    /// Whether the backend can resolve anything at all. A [`Host`][crate::Host] refuses to be
    /// constructed with an unavailable resolver.
    fn is_available(&self) -> bool {
        true
    }

    /// Look up `icon_name` at `size`. If `theme_path` is given, it is searched in addition to the
    /// resolver's own search paths.
    fn resolve(&self, icon_name: &str, theme_path: Option<&Path>, size: u32) -> Result<Pixmap, IconError>;
}

/// Looks icons up as PNG files in a list of icon directories, using the plain and the `hicolor`
/// layout. Absolute paths are loaded directly.
#[derive(Debug, Clone)]
pub struct ThemeDirResolver {
    search_paths: Vec<PathBuf>,
}

impl ThemeDirResolver {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// `extra` followed by `~/.local/share/icons`, `$XDG_DATA_DIRS/*/icons` and
    /// `/usr/share/pixmaps`.
    pub fn from_environment(extra: &[PathBuf]) -> Self {
        let mut search_paths = extra.to_vec();
        if let Some(home) = std::env::var_os("HOME") {
            search_paths.push(PathBuf::from(home).join(".local/share/icons"));
        }
        let data_dirs = std::env::var("XDG_DATA_DIRS").unwrap_or_else(|_| "/usr/local/share:/usr/share".to_owned());
        search_paths.extend(data_dirs.split(':').filter(|d| !d.is_empty()).map(|d| Path::new(d).join("icons")));
        search_paths.push(PathBuf::from("/usr/share/pixmaps"));
        Self { search_paths }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    fn candidates(dir: &Path, icon_name: &str, size: u32) -> Vec<PathBuf> {
        let mut candidates = vec![dir.join(icon_name), dir.join(format!("{}.png", icon_name))];
        let fallbacks = [48, 32, 24, 22, 16, 64, 128, 256].into_iter().filter(|s| *s != size);
        for s in std::iter::once(size).chain(fallbacks) {
            candidates.push(dir.join(format!("hicolor/{s}x{s}/apps/{icon_name}.png")));
            candidates.push(dir.join(format!("hicolor/{s}x{s}/status/{icon_name}.png")));
        }
        candidates
    }
}

impl IconResolver for ThemeDirResolver {
    fn is_available(&self) -> bool {
        self.search_paths.iter().any(|p| p.is_dir())
    }

    fn resolve(&self, icon_name: &str, theme_path: Option<&Path>, size: u32) -> Result<Pixmap, IconError> {
        if icon_name.is_empty() {
            return Err(IconError::NotAvailable);
        }

        // interpret it as an absolute path if we can
        let icon_path = Path::new(icon_name);
        if icon_path.is_absolute() {
            return if icon_path.is_file() {
                load_icon_from_file(icon_path, size)
            } else {
                Err(IconError::NotFound { icon_name: icon_name.to_owned(), theme_path: None })
            };
        }

        let dirs = theme_path.into_iter().chain(self.search_paths.iter().map(PathBuf::as_path));
        for dir in dirs {
            if let Some(path) = Self::candidates(dir, icon_name, size).into_iter().find(|p| p.is_file()) {
                return load_icon_from_file(&path, size);
            }
        }

        Err(IconError::NotFound { icon_name: icon_name.to_owned(), theme_path: theme_path.map(Path::to_path_buf) })
    }
}

fn load_icon_from_file(path: &Path, size: u32) -> Result<Pixmap, IconError> {
    let img = image::open(path)
        .map_err(|source| IconError::LoadIconFromFile { path: path.to_path_buf(), source })?
        .into_rgba8();
    let pixmap = Pixmap { width: img.width(), height: img.height(), data: img.into_raw() };
    Ok(pixmap.scaled(size))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_argb_to_rgba() {
        let pixmap = Pixmap::from_argb32(1, 2, vec![0xff, 0x10, 0x20, 0x30, 0x80, 0x01, 0x02, 0x03]).unwrap();
        assert_eq!(pixmap.width, 1);
        assert_eq!(pixmap.height, 2);
        assert_eq!(pixmap.data, vec![0x10, 0x20, 0x30, 0xff, 0x01, 0x02, 0x03, 0x80]);
    }

    #[test]
    fn test_malformed_pixmaps_are_rejected() {
        assert_eq!(Pixmap::from_argb32(0, 0, vec![]), None);
        assert_eq!(Pixmap::from_argb32(-1, 1, vec![0; 4]), None);
        assert_eq!(Pixmap::from_argb32(2, 2, vec![0; 15]), None);
    }

    #[test]
    fn test_largest_pixmap_wins() {
        let pixmaps = vec![(16, 16, vec![1; 16 * 16 * 4]), (32, 32, vec![2; 32 * 32 * 4]), (22, 22, vec![3; 22 * 22 * 4])];
        let pixmap = Pixmap::from_sni_pixmaps(pixmaps).unwrap();
        assert_eq!((pixmap.width, pixmap.height), (32, 32));
        assert_eq!(pixmap.data.len(), 32 * 32 * 4);
        assert!(pixmap.data.iter().all(|b| *b == 2));
    }

    #[test]
    fn test_pixmap_tie_keeps_first() {
        let pixmaps = vec![(4, 2, vec![1; 32]), (2, 4, vec![2; 32])];
        let pixmap = Pixmap::from_sni_pixmaps(pixmaps).unwrap();
        assert_eq!((pixmap.width, pixmap.height), (4, 2));
    }

    #[test]
    fn test_pixmap_skips_malformed_entries() {
        let pixmaps = vec![(64, 64, vec![0; 10]), (8, 8, vec![7; 8 * 8 * 4])];
        let pixmap = Pixmap::from_sni_pixmaps(pixmaps).unwrap();
        assert_eq!((pixmap.width, pixmap.height), (8, 8));
        assert_eq!(Pixmap::from_sni_pixmaps(vec![]), None);
    }

    #[test]
    fn test_scaled() {
        let pixmap = Pixmap { width: 2, height: 2, data: vec![255; 16] };
        let scaled = pixmap.scaled(4);
        assert_eq!((scaled.width, scaled.height), (4, 4));
        assert_eq!(scaled.data.len(), 4 * 4 * 4);
        assert_eq!(pixmap.scaled(2), pixmap);
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sni-tray-icon-test-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_candidates_try_each_size_once() {
        let candidates = ThemeDirResolver::candidates(Path::new("/icons"), "app", 24);
        let unique: std::collections::HashSet<_> = candidates.iter().collect();
        assert_eq!(unique.len(), candidates.len());
        assert_eq!(candidates[2], PathBuf::from("/icons/hicolor/24x24/apps/app.png"));
        assert_eq!(candidates.len(), 2 + 9 * 2);

        let candidates = ThemeDirResolver::candidates(Path::new("/icons"), "app", 20);
        assert_eq!(candidates[2], PathBuf::from("/icons/hicolor/20x20/apps/app.png"));
        assert_eq!(candidates.len(), 2 + 9 * 2 + 2);
    }

    #[test]
    fn test_theme_dir_resolver() {
        let dir = temp_dir("resolver");
        let apps = dir.join("hicolor/24x24/apps");
        std::fs::create_dir_all(&apps).unwrap();
        image::RgbaImage::from_pixel(24, 24, image::Rgba([1, 2, 3, 4])).save(apps.join("nm-applet.png")).unwrap();

        let resolver = ThemeDirResolver::new(vec![dir.clone()]);
        assert!(resolver.is_available());
        let pixmap = resolver.resolve("nm-applet", None, 24).unwrap();
        assert_eq!((pixmap.width, pixmap.height), (24, 24));
        assert_eq!(&pixmap.data[..4], &[1, 2, 3, 4]);

        assert!(matches!(resolver.resolve("missing", None, 24), Err(IconError::NotFound { .. })));

        let absolute = apps.join("nm-applet.png");
        let pixmap = resolver.resolve(absolute.to_str().unwrap(), None, 16).unwrap();
        assert_eq!((pixmap.width, pixmap.height), (16, 16));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_theme_path_is_searched() {
        let dir = temp_dir("theme-path");
        image::RgbaImage::from_pixel(8, 8, image::Rgba([9, 9, 9, 255])).save(dir.join("custom.png")).unwrap();

        let resolver = ThemeDirResolver::new(vec![]);
        assert!(!resolver.is_available());
        assert!(resolver.resolve("custom", None, 8).is_err());
        assert_eq!(resolver.resolve("custom", Some(&dir), 8).unwrap().width, 8);

        std::fs::remove_dir_all(dir).unwrap();
    }
}
