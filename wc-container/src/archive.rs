use anyhow::{Context, Result};
use std::io::Read;
use tar::Archive;

/// Read the file carried by a `docker cp <id>:<path> -` tar stream.
///
/// Contents of every regular entry are concatenated (a single-file copy
/// yields exactly one). An archive without entries means the path did not
/// exist inside the container.
pub fn extract_single_file(archive_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut archive = Archive::new(archive_bytes);
    let mut content = Vec::new();
    let mut entries_seen = 0usize;

    for entry in archive.entries().context("failed to read tar archive")? {
        let mut entry = entry.context("failed to read tar entry")?;
        entries_seen += 1;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        entry
            .read_to_end(&mut content)
            .context("failed to read tar entry contents")?;
    }

    if entries_seen == 0 {
        anyhow::bail!("archive contains no entries (file not found in container)");
    }

    Ok(content)
}
