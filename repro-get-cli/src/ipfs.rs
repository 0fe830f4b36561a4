use std::io::Write;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use repro_get::cache::Cache;
use repro_get::filespec;

use crate::cli::{GlobalOptions, IpfsPushOptions};

pub async fn push(global: &GlobalOptions, opts: &IpfsPushOptions) -> Result<()> {
    let cache = Cache::new(&global.cache)?;
    let specs = filespec::from_hash_files(&[&opts.hash_file])?;

    let mut appender = if opts.append {
        Some(
            std::fs::OpenOptions::new()
                .append(true)
                .open(&opts.hash_file)
                .with_context(|| {
                    format!(
                        "failed to open {:?} for appending",
                        opts.hash_file.display().to_string()
                    )
                })?,
        )
    } else {
        None
    };

    for (name, spec) in &specs {
        if let Some(cid) = &spec.cid {
            info!("skipping to push {name:?} (already has CID {cid:?})");
            continue;
        }
        let blob = cache.blob_path(&spec.sha256);
        if !blob.exists() {
            bail!("uncached file? {name:?} (Hint: try 'repro-get download ...')");
        }
        let mut cmd = tokio::process::Command::new("ipfs");
        cmd.args(["add", "-Q", "--dereference-args"])
            .arg(&blob)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        debug!("running {cmd:?}");
        let output = cmd.output().await?;
        if !output.status.success() {
            bail!("ipfs add exited with {}", output.status);
        }
        let cid = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        let line = format!("{}  /ipfs/{cid}", spec.sha256);
        println!("{line}");
        if let Some(appender) = &mut appender {
            writeln!(appender, "{line}")?;
        }
    }
    Ok(())
}
