#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use passdb::config::{load_config, Config};
use tempfile::TempDir;

/// Writes a gzip-compressed tar archive at `path`. Entries whose name ends
/// in `/` become directories.
pub fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        if name.ends_with('/') {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, std::io::empty()).unwrap();
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// `count` distinct credential lines.
pub fn unique_lines(count: usize) -> String {
    (0..count)
        .map(|i| format!("user{}@domain{}.example:secret{}\n", i, i % 7, i))
        .collect()
}

/// Creates `config/passdb.toml` and `data/` under a fresh temp dir.
/// `extra` is appended verbatim to the config file.
pub fn setup_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let content = format!(
        r#"[db]
path = "{}/data/passdb.sqlite"

[server]
bind = "127.0.0.1:0"
default_per_page = 50
max_per_page = 100
{}
"#,
        root.display(),
        extra
    );
    let config_path = root.join("config").join("passdb.toml");
    fs::write(&config_path, content).unwrap();
    (tmp, config_path)
}

pub fn test_config(config_path: &Path) -> Config {
    let mut config = load_config(config_path).unwrap();
    config.breach.api_key = None;
    config
}
