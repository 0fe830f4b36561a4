use anyhow::Result;
use serde::Serialize;

use repro_get::{distro, urlopener};

use crate::cli::{GlobalOptions, InfoOptions};

#[derive(Serialize)]
struct InfoOutput {
    #[serde(rename = "Version")]
    version: &'static str,
    #[serde(rename = "Cache")]
    cache: String,
    #[serde(rename = "Schemes")]
    schemes: Vec<&'static str>,
    #[serde(rename = "Distros")]
    distros: Vec<&'static str>,
    #[serde(rename = "Distro")]
    distro: distro::Info,
}

pub fn run(global: &GlobalOptions, opts: &InfoOptions) -> Result<()> {
    let driver = distro::resolve(&global.distro)?;
    let info = InfoOutput {
        version: repro_get::VERSION,
        cache: global.cache.display().to_string(),
        schemes: urlopener::SCHEMES.to_vec(),
        distros: distro::known_names().to_vec(),
        distro: driver.info().clone(),
    };
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }
    println!("Version: {}", info.version);
    println!("Cache: {}", info.cache);
    println!("Recognized schemes: {}", info.schemes.join(" "));
    println!("Recognized distros: {}", info.distros.join(" "));
    println!("Distro: {}", info.distro.name);
    println!("Default providers:");
    for provider in &info.distro.default_providers {
        println!("- {provider}");
    }
    Ok(())
}
