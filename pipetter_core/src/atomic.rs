use std::{fs, io::Write, path::Path};

/// Write `bytes` to `path` through a synced temp file and a rename, creating
/// parent directories as needed. Readers see the old or the new file, never a
/// partial one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}
