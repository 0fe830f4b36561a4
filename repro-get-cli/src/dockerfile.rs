use anyhow::Result;
use tracing::{info, warn};

use repro_get::distro::{self, DockerfileArgs, DockerfileOpts};
use repro_get::urlopener::UrlOpener;

use crate::cli::{DockerfileGenerateOptions, GlobalOptions};

const NEXT_STEPS: &str = "\
# Copy the repro-get binary into the current directory
cp $(command -v repro-get) .

# Enable BuildKit
export DOCKER_BUILDKIT=1

# Build the image
docker build .
";

pub async fn generate(global: &GlobalOptions, opts: &DockerfileGenerateOptions) -> Result<()> {
    let driver = distro::resolve(&global.distro)?;
    if global.distro.is_empty() {
        warn!(
            "no image distro was explicitly specified (--distro=...), assuming the distro to be {:?}",
            driver.info().name
        );
    }

    let mut providers = global.provider.clone();
    if providers.is_empty() {
        providers = driver.info().default_providers.clone();
    }

    std::fs::create_dir_all(&opts.dir)?;

    let opener = UrlOpener::new();
    let base_image = opener.resolve_image_digest(&opts.base_image).await?;

    let args = DockerfileArgs {
        base_image,
        base_image_orig: opts.base_image.clone(),
        packages: opts.packages.clone(),
        oci_arch_dash_variant: distro::oci_arch_dash_variant().to_owned(),
        providers,
        version: repro_get::VERSION.to_owned(),
    };
    let dockerfile_opts = DockerfileOpts {
        generate_hash: !opts.packages.is_empty(),
    };
    driver
        .generate_dockerfile(&opts.dir, &args, dockerfile_opts)
        .await?;

    info!("next steps:");
    println!("-----");
    print!("{NEXT_STEPS}");
    println!("-----");
    Ok(())
}
