use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use reqwest::blocking::get;
use sha2::{Digest, Sha256};

use anchor_face::models::{inspect_models_dir, read_metadata, ModelMetadata, KINDS};

const PLACEHOLDER_SHA: &str = "<to-fill>";

fn main() -> anyhow::Result<()> {
    let base = std::env::var("ANCHOR_FACE_MODELS")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("models"));
    println!("models directory: {}", base.display());
    for kind in KINDS {
        let dir = base.join(kind);
        if !dir.exists() {
            fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
            println!("created: {}", dir.display());
        }
    }

    for entry in inspect_models_dir(&base) {
        for version in &entry.versions {
            let dir = base.join(&entry.kind).join(version);
            let meta_path = dir.join("metadata.json");
            let Some(meta) = read_metadata(&meta_path) else {
                println!("skip: cannot parse {}", meta_path.display());
                continue;
            };
            fetch(&dir, &meta)?;
        }
    }
    Ok(())
}

fn fetch(dir: &Path, meta: &ModelMetadata) -> anyhow::Result<()> {
    if meta.url.is_empty() || meta.sha256.is_empty() || meta.sha256 == PLACEHOLDER_SHA {
        println!("skip: provide valid url and sha256 for {} {}", meta.name, meta.version);
        return Ok(());
    }
    let model_path = dir.join("model.onnx");
    if model_path.exists() {
        println!("model exists: {}", model_path.display());
        return Ok(());
    }

    println!("downloading {} -> {}", meta.url, model_path.display());
    let buf = get(&meta.url)
        .and_then(|resp| resp.error_for_status())
        .and_then(|resp| resp.bytes())
        .with_context(|| format!("downloading {}", meta.url))?;
    let digest = hex::encode(Sha256::digest(&buf));
    if !digest.eq_ignore_ascii_case(&meta.sha256) {
        bail!("checksum mismatch for {}: {digest} != {}", meta.url, meta.sha256);
    }
    fs::write(&model_path, &buf).with_context(|| format!("writing {}", model_path.display()))?;
    println!("saved {} ({} bytes)", model_path.display(), buf.len());
    Ok(())
}
