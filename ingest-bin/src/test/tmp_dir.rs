use std::{
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

/// Creates a fresh, uniquely named directory under the OS temp dir.
pub fn try_new(name: &str) -> std::io::Result<PathBuf> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let dir = std::env::temp_dir().join(format!("{name}_{}_{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
