use crate::error::{IndexError, IndexResult};
use crate::schema::{IndexSchema, FORMAT_VERSION};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaFile {
    pub version: u32,
    pub created_at: String,
    pub schema: IndexSchema,
}

impl MetaFile {
    pub fn new(schema: IndexSchema) -> IndexResult<Self> {
        let created_at = time::OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| IndexError::Write(format!("meta.json created_at: {e}")))?;
        Ok(Self { version: FORMAT_VERSION, created_at, schema })
    }
}

pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    pub fn segments(&self) -> PathBuf { self.root.join("segments") }
    /// Sibling directory a bootstrap replay builds into before it is renamed over `root`.
    pub fn staging(&self) -> PathBuf {
        let mut name = self.root.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| ".index".into());
        name.push(".building");
        self.root.with_file_name(name)
    }
}

fn corrupt(paths: &IndexPaths, reason: impl ToString) -> IndexError {
    IndexError::Corrupt { path: paths.root.clone(), reason: reason.to_string() }
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> IndexResult<()> {
    let write = || -> std::io::Result<()> {
        create_dir_all(&paths.root)?;
        let mut f = File::create(paths.meta())?;
        let json = serde_json::to_string_pretty(meta).map_err(std::io::Error::other)?;
        f.write_all(json.as_bytes())?;
        f.sync_all()
    };
    write().map_err(|e| IndexError::Write(format!("meta.json: {e}")))
}

pub fn load_meta(paths: &IndexPaths) -> IndexResult<MetaFile> {
    let mut f = File::open(paths.meta()).map_err(|e| corrupt(paths, format!("meta.json: {e}")))?;
    let mut buf = String::new();
    f.read_to_string(&mut buf).map_err(|e| corrupt(paths, format!("meta.json: {e}")))?;
    let meta: MetaFile = serde_json::from_str(&buf).map_err(|e| corrupt(paths, format!("meta.json: {e}")))?;
    if meta.version != FORMAT_VERSION {
        return Err(corrupt(paths, format!("unsupported format version {}", meta.version)));
    }
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn meta_round_trips() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path().join("idx"));
        save_meta(&paths, &MetaFile::new(IndexSchema::default()).unwrap()).unwrap();
        let meta = load_meta(&paths).unwrap();
        assert_eq!(meta.version, FORMAT_VERSION);
        assert!(!meta.created_at.is_empty());
        assert!(time::OffsetDateTime::parse(&meta.created_at, &Rfc3339).is_ok());
    }

    #[test]
    fn future_version_is_corrupt() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let mut meta = MetaFile::new(IndexSchema::default()).unwrap();
        meta.version = FORMAT_VERSION + 1;
        save_meta(&paths, &meta).unwrap();
        assert!(matches!(load_meta(&paths), Err(IndexError::Corrupt { .. })));
    }

    #[test]
    fn staging_is_a_sibling() {
        let paths = IndexPaths::new("/data/.index");
        assert_eq!(paths.staging(), PathBuf::from("/data/.index.building"));
    }
}
