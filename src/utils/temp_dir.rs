use std::{
    env, fs, io,
    ops::Deref,
    path::{Path, PathBuf},
};

/// Scratch directory under the system temp dir, removed with everything in
/// it when dropped.  The process id is folded into the name so concurrent
/// test binaries don't trample each other.
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new<P: AsRef<Path>>(name: P) -> io::Result<Self> {
        let mut leaf = name.as_ref().as_os_str().to_owned();
        leaf.push(format!("-{}", std::process::id()));
        let path = env::temp_dir().join(leaf);
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;
        Ok(Self(path))
    }
}

impl Deref for TempDir {
    type Target = PathBuf;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}
